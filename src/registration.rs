//! Space/Registration Adapter
//!
//! Normalizes a user-supplied registration into a single convention: a
//! row-major 4x4 affine mapping anatomical-surface (FreeSurfer) RAS
//! coordinates to DWI-space world coordinates. Three on-disk encodings are
//! accepted:
//!
//! - `.lta` — FreeSurfer linear transform (text), RAS-to-RAS matrix
//! - `.txt` — ITK/ANTS "Insight Transform File V1.0" affine (LPS-based)
//! - `.mat` — flat 4x4 affine, four rows of four numbers (FSL style)
//!
//! The direction is declared by which path slot the caller fills (fs2dwi
//! or dwi2fs); a dwi2fs registration is inverted on load. Supplying both
//! slots is a conflict, supplying neither yields the identity (same-space
//! inputs). This is a pure loader with no side effects.

use std::path::{Path, PathBuf};

use crate::error::{ExtractError, Result};
use crate::space;

/// Recognized registration file encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegFormat {
    /// FreeSurfer linear transform array (.lta)
    Lta,
    /// ITK/ANTS text transform (.txt)
    Itk,
    /// Flat 4x4 affine matrix (.mat)
    FslMat,
}

/// Which way the on-disk transform maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegDirection {
    FsToDwi,
    DwiToFs,
}

/// What the caller supplied; resolved into a [`Registration`] on load.
#[derive(Debug, Clone, Default)]
pub struct RegistrationSpec {
    /// Registration mapping FreeSurfer space to DWI space.
    pub fs2dwi: Option<PathBuf>,
    /// Registration mapping DWI space to FreeSurfer space.
    pub dwi2fs: Option<PathBuf>,
    /// Explicit format tag; inferred from the extension when `None`.
    pub format: Option<RegFormat>,
}

/// A normalized registration: always FreeSurfer-to-DWI.
#[derive(Debug, Clone)]
pub struct Registration {
    pub fs_to_dwi: [f64; 16],
    pub format: Option<RegFormat>,
}

impl Registration {
    /// Same-space inputs: the identity transform.
    pub fn identity() -> Self {
        Registration {
            fs_to_dwi: space::IDENTITY,
            format: None,
        }
    }

    /// Map a point from FreeSurfer space into DWI space.
    pub fn to_dwi(&self, p: [f64; 3]) -> [f64; 3] {
        space::apply(&self.fs_to_dwi, p)
    }

    /// The inverse mapping (DWI to FreeSurfer space).
    pub fn inverse(&self) -> Result<[f64; 16]> {
        space::invert(&self.fs_to_dwi)
    }
}

/// Infer the registration format from a file extension.
pub fn infer_format(path: &Path) -> Result<RegFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("lta") => Ok(RegFormat::Lta),
        Some("txt") => Ok(RegFormat::Itk),
        Some("mat") => Ok(RegFormat::FslMat),
        _ => Err(ExtractError::UnsupportedFileType {
            role: "registration",
            path: path.to_path_buf(),
        }),
    }
}

/// Resolve a registration spec into a normalized fs-to-dwi transform.
pub fn resolve(spec: &RegistrationSpec) -> Result<Registration> {
    let (path, direction) = match (&spec.fs2dwi, &spec.dwi2fs) {
        (Some(_), Some(_)) => {
            return Err(ExtractError::ConflictingConfiguration(
                "fs2dwi and dwi2fs registrations are mutually exclusive".into(),
            ))
        }
        (Some(p), None) => (p, RegDirection::FsToDwi),
        (None, Some(p)) => (p, RegDirection::DwiToFs),
        (None, None) => return Ok(Registration::identity()),
    };

    if !path.exists() {
        return Err(ExtractError::InputNotFound(path.clone()));
    }
    let format = match spec.format {
        Some(f) => f,
        None => infer_format(path)?,
    };

    let text = std::fs::read_to_string(path).map_err(|e| ExtractError::io(path, e))?;
    let matrix = match format {
        RegFormat::Lta => parse_lta(&text, path)?,
        RegFormat::Itk => parse_itk(&text, path)?,
        RegFormat::FslMat => parse_flat(&text, path)?,
    };

    let fs_to_dwi = match direction {
        RegDirection::FsToDwi => matrix,
        RegDirection::DwiToFs => space::invert(&matrix)?,
    };
    tracing::info!(
        "registration loaded from {} ({:?}, {:?})",
        path.display(),
        format,
        direction
    );
    Ok(Registration {
        fs_to_dwi,
        format: Some(format),
    })
}

fn parse_floats(line: &str) -> Vec<f64> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse::<f64>().ok())
        .collect()
}

/// Parse a FreeSurfer .lta file: the 4x4 matrix follows the "1 4 4"
/// dimensions line. Only RAS-to-RAS transforms (type 1) are expected;
/// other types are accepted with a warning since the matrix layout is
/// identical.
fn parse_lta(text: &str, path: &Path) -> Result<[f64; 16]> {
    let mut lines = text.lines().peekable();
    let mut lta_type: Option<i64> = None;

    while let Some(line) = lines.next() {
        let trimmed = line.split('#').next().unwrap_or("").trim();
        if let Some(rest) = trimmed.strip_prefix("type") {
            if let Some(v) = rest.trim_start().strip_prefix('=') {
                lta_type = v.trim().parse::<i64>().ok();
            }
        }
        let nums = parse_floats(trimmed);
        if nums.len() == 3 && nums == [1.0, 4.0, 4.0] {
            if let Some(t) = lta_type {
                if t != 1 {
                    tracing::warn!(
                        "LTA type {} in {} is not RAS-to-RAS; using matrix as-is",
                        t,
                        path.display()
                    );
                }
            }
            let mut m = [0.0; 16];
            for row in 0..4 {
                let row_line = lines.next().ok_or_else(|| {
                    ExtractError::parse(path, "LTA matrix truncated")
                })?;
                let vals = parse_floats(row_line);
                if vals.len() < 4 {
                    return Err(ExtractError::parse(path, "LTA matrix row has fewer than 4 values"));
                }
                m[row * 4..row * 4 + 4].copy_from_slice(&vals[..4]);
            }
            return Ok(m);
        }
    }
    Err(ExtractError::parse(path, "no 4x4 matrix found in LTA file"))
}

/// Parse an ITK text transform: 12 `Parameters` (row-major 3x3 + translation)
/// applied about the `FixedParameters` center, composed in LPS coordinates
/// and conjugated into RAS.
fn parse_itk(text: &str, path: &Path) -> Result<[f64; 16]> {
    let mut params: Option<Vec<f64>> = None;
    let mut center = [0.0f64; 3];

    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix("Parameters:") {
            params = Some(parse_floats(rest));
        } else if let Some(rest) = line.trim().strip_prefix("FixedParameters:") {
            let c = parse_floats(rest);
            if c.len() >= 3 {
                center = [c[0], c[1], c[2]];
            }
        }
    }

    let p = params.ok_or_else(|| ExtractError::parse(path, "no Parameters line in ITK transform"))?;
    if p.len() < 12 {
        return Err(ExtractError::parse(
            path,
            format!("expected 12 affine parameters, found {}", p.len()),
        ));
    }

    // x' = M (x - c) + c + t  =>  affine with translation t + c - M c
    let mut lps = space::IDENTITY;
    for row in 0..3 {
        lps[row * 4] = p[row * 3];
        lps[row * 4 + 1] = p[row * 3 + 1];
        lps[row * 4 + 2] = p[row * 3 + 2];
    }
    let mc = space::apply(
        &[
            p[0], p[1], p[2], 0.0,
            p[3], p[4], p[5], 0.0,
            p[6], p[7], p[8], 0.0,
            0.0, 0.0, 0.0, 1.0,
        ],
        center,
    );
    lps[3] = p[9] + center[0] - mc[0];
    lps[7] = p[10] + center[1] - mc[1];
    lps[11] = p[11] + center[2] - mc[2];

    // LPS -> RAS conjugation: D * M * D with D = diag(-1,-1,1,1)
    let d = [
        -1.0, 0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ];
    Ok(space::mat_mul(&d, &space::mat_mul(&lps, &d)))
}

/// Parse a flat 4x4 affine: four rows of four numbers.
fn parse_flat(text: &str, path: &Path) -> Result<[f64; 16]> {
    let nums: Vec<f64> = text.lines().flat_map(|l| parse_floats(l)).collect();
    if nums.len() < 16 {
        return Err(ExtractError::parse(
            path,
            format!("expected 16 matrix values, found {}", nums.len()),
        ));
    }
    let mut m = [0.0; 16];
    m.copy_from_slice(&nums[..16]);
    Ok(m)
}
