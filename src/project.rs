//! ROI Projector
//!
//! Projects a gray-matter ROI along the cortical normal direction into the
//! white matter, producing a binary mask on the DWI grid. Surface ROIs
//! (label files) are swept from `start` to `stop` millimetres along each
//! labeled vertex's normal; a negative `start` reaches into white matter.
//! Volumetric ROIs carry no normals and are instead resampled into the DWI
//! grid through the registration (nearest neighbour).

use std::path::Path;

use crate::error::{ExtractError, Result};
use crate::freesurfer::{self, Hemisphere};
use crate::nifti_io;
use crate::registration::Registration;
use crate::space;
use crate::volume::{RegionMask, Volume};

/// Projection-fraction sweep: start, stop, step in millimetres along the
/// vertex normal. Matches the mri_surf2vol projfrac convention of
/// `start,stop,delta` with a negative start.
#[derive(Debug, Clone, Copy)]
pub struct ProjFrac {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl Default for ProjFrac {
    fn default() -> Self {
        ProjFrac {
            start: -1.0,
            stop: 0.0,
            step: 0.1,
        }
    }
}

impl ProjFrac {
    pub fn validate(&self) -> Result<()> {
        if self.start >= 0.0 {
            return Err(ExtractError::invalid(
                "projfrac",
                format!("start must be negative to project into white matter, got {}", self.start),
            ));
        }
        if self.step <= 0.0 {
            return Err(ExtractError::invalid(
                "projfrac",
                format!("step must be positive, got {}", self.step),
            ));
        }
        if self.start >= self.stop {
            return Err(ExtractError::invalid(
                "projfrac",
                format!("start ({}) must be below stop ({})", self.start, self.stop),
            ));
        }
        Ok(())
    }
}

/// An ROI as loaded from disk, before projection.
#[derive(Debug, Clone)]
pub enum Roi {
    /// Vertex indices on a cortical surface (from a `.label` file).
    Surface(Vec<usize>),
    /// A volumetric binary mask (from `.mgz`/`.nii`/`.nii.gz`).
    Volume(RegionMask),
}

/// Accepted ROI file extensions.
pub fn is_supported_roi(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".label")
        || name.ends_with(".mgz")
        || name.ends_with(".mgh")
        || name.ends_with(".nii")
        || name.ends_with(".nii.gz")
}

/// Load an ROI file, dispatching on extension.
pub fn load_roi(path: &Path) -> Result<Roi> {
    let name = path.to_string_lossy().into_owned();
    if name.ends_with(".label") {
        Ok(Roi::Surface(freesurfer::read_label(path)?))
    } else if name.ends_with(".mgz") || name.ends_with(".mgh") {
        Ok(Roi::Volume(freesurfer::read_mgh(path)?.binarize(0.0)))
    } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
        Ok(Roi::Volume(nifti_io::read_mask(path)?))
    } else {
        Err(ExtractError::UnsupportedFileType {
            role: "ROI",
            path: path.to_path_buf(),
        })
    }
}

/// Project an ROI into white matter on the reference grid.
///
/// `subject_dir` is the per-subject FreeSurfer directory; only surface
/// ROIs consult it (for the hemisphere's white surface).
pub fn project_roi(
    roi: &Roi,
    subject_dir: &Path,
    hemi: Hemisphere,
    projfrac: ProjFrac,
    registration: &Registration,
    reference: &Volume,
) -> Result<RegionMask> {
    projfrac.validate()?;
    match roi {
        Roi::Surface(vertices) => {
            project_surface_roi(vertices, subject_dir, hemi, projfrac, registration, reference)
        }
        Roi::Volume(mask) => resample_volume_roi(mask, registration, reference),
    }
}

fn project_surface_roi(
    label_vertices: &[usize],
    subject_dir: &Path,
    hemi: Hemisphere,
    projfrac: ProjFrac,
    registration: &Registration,
    reference: &Volume,
) -> Result<RegionMask> {
    let surf_path = freesurfer::white_surface_path(subject_dir, hemi);
    if !surf_path.exists() {
        return Err(ExtractError::MissingPrecursor(format!(
            "white surface not found at {}",
            surf_path.display()
        )));
    }
    let surface = freesurfer::read_surface(&surf_path)?;
    let normals = surface.vertex_normals();

    let mut out = RegionMask::zeros_like(reference);
    let inv_ref = space::invert(&reference.affine)?;
    let (nx, ny, nz) = out.dims;

    let mut marked = 0usize;
    for &vi in label_vertices {
        if vi >= surface.vertices.len() {
            return Err(ExtractError::parse(
                &surf_path,
                format!(
                    "label vertex {} out of range for surface with {} vertices",
                    vi,
                    surface.vertices.len()
                ),
            ));
        }
        let v = surface.vertices[vi];
        let n = normals[vi];

        // Sample the ray from start to stop inclusive
        let steps = ((projfrac.stop - projfrac.start) / projfrac.step).round() as usize;
        for s in 0..=steps {
            let t = projfrac.start + s as f64 * projfrac.step;
            let p = [v[0] + t * n[0], v[1] + t * n[1], v[2] + t * n[2]];
            let dwi = registration.to_dwi(p);
            let vox = space::apply(&inv_ref, dwi);
            let i = vox[0].round();
            let j = vox[1].round();
            let k = vox[2].round();
            if i < 0.0 || j < 0.0 || k < 0.0 {
                continue;
            }
            let (i, j, k) = (i as usize, j as usize, k as usize);
            if i < nx && j < ny && k < nz {
                let idx = out.index(i, j, k);
                if out.data[idx] == 0 {
                    out.data[idx] = 1;
                    marked += 1;
                }
            }
        }
    }

    tracing::info!(
        "projected {} label vertices into {} voxels ({} hemisphere)",
        label_vertices.len(),
        marked,
        hemi.prefix()
    );
    Ok(out)
}

/// Nearest-neighbour resampling of a volumetric ROI into the reference
/// grid, through the registration.
fn resample_volume_roi(
    mask: &RegionMask,
    registration: &Registration,
    reference: &Volume,
) -> Result<RegionMask> {
    let mut out = RegionMask::zeros_like(reference);
    let inv_ref = space::invert(&reference.affine)?;
    let (nx, ny, nz) = out.dims;

    for k in 0..mask.dims.2 {
        for j in 0..mask.dims.1 {
            for i in 0..mask.dims.0 {
                if mask.data[mask.index(i, j, k)] == 0 {
                    continue;
                }
                let world = registration.to_dwi(mask.voxel_center(i, j, k));
                let vox = space::apply(&inv_ref, world);
                let (x, y, z) = (vox[0].round(), vox[1].round(), vox[2].round());
                if x < 0.0 || y < 0.0 || z < 0.0 {
                    continue;
                }
                let (x, y, z) = (x as usize, y as usize, z as usize);
                if x < nx && y < ny && z < nz {
                    let idx = out.index(x, y, z);
                    out.data[idx] = 1;
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::Registration;

    fn reference() -> Volume {
        Volume {
            data: vec![0.0; 16 * 16 * 16],
            dims: (16, 16, 16),
            voxel_size: (1.0, 1.0, 1.0),
            affine: space::IDENTITY,
        }
    }

    #[test]
    fn test_projfrac_validation() {
        assert!(ProjFrac::default().validate().is_ok());
        assert!(ProjFrac { start: 0.0, stop: 1.0, step: 0.1 }.validate().is_err());
        assert!(ProjFrac { start: -1.0, stop: 0.0, step: 0.0 }.validate().is_err());
        assert!(ProjFrac { start: -1.0, stop: -2.0, step: 0.1 }.validate().is_err());
    }

    #[test]
    fn test_volume_roi_resample_identity() {
        let mut roi = RegionMask::zeros((16, 16, 16), (1.0, 1.0, 1.0), space::IDENTITY);
        let idx = roi.index(5, 6, 7);
        roi.data[idx] = 1;

        let out = resample_volume_roi(&roi, &Registration::identity(), &reference()).unwrap();
        assert_eq!(out.count(), 1);
        assert_eq!(out.data[out.index(5, 6, 7)], 1);
    }

    #[test]
    fn test_volume_roi_resample_translated() {
        let mut roi = RegionMask::zeros((16, 16, 16), (1.0, 1.0, 1.0), space::IDENTITY);
        let idx = roi.index(5, 6, 7);
        roi.data[idx] = 1;

        let reg = Registration {
            fs_to_dwi: [
                1.0, 0.0, 0.0, 2.0,
                0.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
            format: None,
        };
        let out = resample_volume_roi(&roi, &reg, &reference()).unwrap();
        assert_eq!(out.count(), 1);
        assert_eq!(out.data[out.index(7, 6, 7)], 1);
    }

    #[test]
    fn test_out_of_grid_voxels_dropped() {
        let mut roi = RegionMask::zeros((16, 16, 16), (1.0, 1.0, 1.0), space::IDENTITY);
        let idx = roi.index(15, 15, 15);
        roi.data[idx] = 1;

        let reg = Registration {
            fs_to_dwi: [
                1.0, 0.0, 0.0, 100.0,
                0.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
            format: None,
        };
        let out = resample_volume_roi(&roi, &reg, &reference()).unwrap();
        assert_eq!(out.count(), 0);
    }

    #[test]
    fn test_is_supported_roi() {
        assert!(is_supported_roi(Path::new("a.label")));
        assert!(is_supported_roi(Path::new("a.mgz")));
        assert!(is_supported_roi(Path::new("a.nii.gz")));
        assert!(!is_supported_roi(Path::new("a.mif")));
        assert!(!is_supported_roi(Path::new("a.txt")));
    }
}
