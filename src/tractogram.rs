//! Tractogram containers and streamline I/O
//!
//! Streamlines are stored as ordered 3D point sequences in world
//! millimetres, in the insertion order of the source file. Two container
//! formats are read:
//!
//! - `.tck` (MRtrix): text header + Float32LE triplets, NaN-separated,
//!   Inf-terminated. Self-describing — coordinates are already world mm.
//! - `.trk` (TrackVis): 1000-byte little-endian header, voxel-mm
//!   coordinates. Requires an external reference image to map into world
//!   space.
//!
//! Output is always `.tck`. Per-streamline weights come from a flat
//! numeric text table, order-aligned with the tractogram.

use std::path::Path;

use crate::error::{ExtractError, Result};
use crate::space;
use crate::volume::Volume;

/// An ordered polyline in world millimetres.
pub type Streamline = Vec<[f64; 3]>;

/// A collection of streamlines sharing one reference space.
#[derive(Debug, Clone, Default)]
pub struct Tractogram {
    pub streamlines: Vec<Streamline>,
}

impl Tractogram {
    pub fn len(&self) -> usize {
        self.streamlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streamlines.is_empty()
    }
}

/// Accepted tractogram extensions.
pub fn is_supported_tract(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".tck") || name.ends_with(".trk")
}

/// Read a tractogram, dispatching on extension. `.trk` inputs need a
/// reference image to define their world space.
pub fn read_tractogram(path: &Path, reference: Option<&Volume>) -> Result<Tractogram> {
    let name = path.to_string_lossy().into_owned();
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    if name.ends_with(".tck") {
        load_tck(&bytes, path)
    } else if name.ends_with(".trk") {
        let reference = reference.ok_or_else(|| {
            ExtractError::MissingPrecursor(format!(
                "{} is a TRK file; a reference image is required to resolve its space",
                path.display()
            ))
        })?;
        load_trk(&bytes, path, reference)
    } else {
        Err(ExtractError::UnsupportedFileType {
            role: "tractogram",
            path: path.to_path_buf(),
        })
    }
}

/// Parse an MRtrix `.tck` stream.
pub fn load_tck(bytes: &[u8], origin: &Path) -> Result<Tractogram> {
    // Header is ASCII "key: value" lines up to END; "file: . <offset>"
    // gives the byte offset of the binary section.
    let header_end = bytes
        .windows(4)
        .position(|w| w == b"END\n")
        .ok_or_else(|| ExtractError::parse(origin, "no END marker in TCK header"))?;
    let header = std::str::from_utf8(&bytes[..header_end])
        .map_err(|_| ExtractError::parse(origin, "TCK header is not ASCII"))?;

    let mut lines = header.lines();
    let first = lines.next().unwrap_or("");
    if first.trim() != "mrtrix tracks" {
        return Err(ExtractError::parse(origin, "missing 'mrtrix tracks' magic line"));
    }

    let mut offset: Option<usize> = None;
    let mut datatype = "Float32LE".to_string();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            match key.trim() {
                "file" => {
                    // "file: . <offset>"
                    let v = value.trim();
                    let off = v
                        .rsplit(' ')
                        .next()
                        .and_then(|t| t.parse::<usize>().ok())
                        .ok_or_else(|| ExtractError::parse(origin, "bad 'file' offset in TCK header"))?;
                    offset = Some(off);
                }
                "datatype" => datatype = value.trim().to_string(),
                _ => {}
            }
        }
    }

    if datatype != "Float32LE" {
        return Err(ExtractError::parse(
            origin,
            format!("unsupported TCK datatype '{}' (only Float32LE)", datatype),
        ));
    }
    let offset = offset.ok_or_else(|| ExtractError::parse(origin, "no 'file' entry in TCK header"))?;
    if offset > bytes.len() {
        return Err(ExtractError::parse(origin, "TCK data offset beyond end of file"));
    }

    let mut streamlines = Vec::new();
    let mut current: Streamline = Vec::new();
    let data = &bytes[offset..];
    let mut pos = 0;
    while pos + 12 <= data.len() {
        let x = f32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        let y = f32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
        let z = f32::from_le_bytes([data[pos + 8], data[pos + 9], data[pos + 10], data[pos + 11]]);
        pos += 12;

        if x.is_infinite() && y.is_infinite() && z.is_infinite() {
            break; // end of file triplet
        }
        if x.is_nan() && y.is_nan() && z.is_nan() {
            if !current.is_empty() {
                streamlines.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push([x as f64, y as f64, z as f64]);
    }
    if !current.is_empty() {
        streamlines.push(current);
    }

    Ok(Tractogram { streamlines })
}

/// Serialize a tractogram as `.tck` bytes.
pub fn save_tck(tract: &Tractogram) -> Vec<u8> {
    // Two-pass header: the data offset depends on the header length,
    // which depends on the offset's digit count.
    let body = |offset: usize| {
        format!(
            "mrtrix tracks\ncount: {}\ndatatype: Float32LE\nfile: . {}\nEND\n",
            tract.len(),
            offset
        )
    };
    let mut offset = body(0).len();
    loop {
        let next = body(offset).len();
        if next == offset {
            break;
        }
        offset = next;
    }

    let mut bytes = body(offset).into_bytes();
    debug_assert_eq!(bytes.len(), offset);
    for streamline in &tract.streamlines {
        for p in streamline {
            for c in p {
                bytes.extend_from_slice(&(*c as f32).to_le_bytes());
            }
        }
        for _ in 0..3 {
            bytes.extend_from_slice(&f32::NAN.to_le_bytes());
        }
    }
    for _ in 0..3 {
        bytes.extend_from_slice(&f32::INFINITY.to_le_bytes());
    }
    bytes
}

/// Write a tractogram to a `.tck` file.
pub fn write_tck(path: &Path, tract: &Tractogram) -> Result<()> {
    std::fs::write(path, save_tck(tract)).map_err(|e| ExtractError::io(path, e))
}

fn le_i16(bytes: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([bytes[off], bytes[off + 1]])
}

fn le_i32(bytes: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

fn le_f32(bytes: &[u8], off: usize) -> f32 {
    f32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

const TRK_HEADER_LEN: usize = 1000;

/// Parse a TrackVis `.trk` stream, mapping its voxel-mm coordinates into
/// world space through the reference image's affine. TrackVis places the
/// point (0.5, 0.5, 0.5) * voxel_size at the center of voxel (0, 0, 0).
pub fn load_trk(bytes: &[u8], origin: &Path, reference: &Volume) -> Result<Tractogram> {
    if bytes.len() < TRK_HEADER_LEN {
        return Err(ExtractError::parse(origin, "file too small for TRK header"));
    }
    if &bytes[0..5] != b"TRACK" {
        return Err(ExtractError::parse(origin, "missing TRACK magic"));
    }
    let hdr_size = le_i32(bytes, 996);
    if hdr_size != TRK_HEADER_LEN as i32 {
        return Err(ExtractError::parse(
            origin,
            format!("unexpected TRK header size {} (byte-swapped file?)", hdr_size),
        ));
    }

    let n_scalars = le_i16(bytes, 36) as usize;
    let n_properties = le_i16(bytes, 238) as usize;
    let mut voxel_size = [
        le_f32(bytes, 12) as f64,
        le_f32(bytes, 16) as f64,
        le_f32(bytes, 20) as f64,
    ];
    for (axis, v) in voxel_size.iter_mut().enumerate() {
        if *v <= 0.0 {
            // Header left blank by the producer; fall back to the reference
            *v = match axis {
                0 => reference.voxel_size.0,
                1 => reference.voxel_size.1,
                _ => reference.voxel_size.2,
            };
        }
    }

    let mut streamlines = Vec::new();
    let mut pos = TRK_HEADER_LEN;
    while pos + 4 <= bytes.len() {
        let n_points = le_i32(bytes, pos);
        pos += 4;
        if n_points < 0 {
            return Err(ExtractError::parse(origin, "negative point count in TRK track"));
        }
        let n_points = n_points as usize;
        let record = n_points * (3 + n_scalars) * 4 + n_properties * 4;
        if pos + record > bytes.len() {
            return Err(ExtractError::parse(origin, "TRK track data truncated"));
        }

        let mut streamline = Vec::with_capacity(n_points);
        for p in 0..n_points {
            let base = pos + p * (3 + n_scalars) * 4;
            let vx = le_f32(bytes, base) as f64 / voxel_size[0] - 0.5;
            let vy = le_f32(bytes, base + 4) as f64 / voxel_size[1] - 0.5;
            let vz = le_f32(bytes, base + 8) as f64 / voxel_size[2] - 0.5;
            streamline.push(space::apply(&reference.affine, [vx, vy, vz]));
        }
        pos += record;
        streamlines.push(streamline);
    }

    let n_count = le_i32(bytes, 988);
    if n_count > 0 && streamlines.len() != n_count as usize {
        tracing::warn!(
            "{}: header declares {} tracks, parsed {}",
            origin.display(),
            n_count,
            streamlines.len()
        );
    }

    Ok(Tractogram { streamlines })
}

/// Read a per-streamline weights table: one weight per streamline, comma
/// and/or whitespace separated, order-aligned with the tractogram.
pub fn read_weights(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path).map_err(|e| ExtractError::io(path, e))?;
    let mut weights = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        for token in line.split(|c: char| c == ',' || c.is_whitespace()) {
            if token.is_empty() {
                continue;
            }
            let w: f64 = token.parse().map_err(|_| {
                ExtractError::parse(path, format!("bad weight value '{}'", token))
            })?;
            weights.push(w);
        }
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tract() -> Tractogram {
        Tractogram {
            streamlines: vec![
                vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
                vec![[5.0, 5.0, 5.0], [5.0, 6.0, 5.0]],
            ],
        }
    }

    #[test]
    fn test_tck_roundtrip_preserves_order() {
        let t = sample_tract();
        let bytes = save_tck(&t);
        let back = load_tck(&bytes, Path::new("mem.tck")).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.streamlines[0].len(), 3);
        assert_eq!(back.streamlines[1].len(), 2);
        assert_eq!(back.streamlines[0][2], [2.0, 0.0, 0.0]);
        assert_eq!(back.streamlines[1][1], [5.0, 6.0, 5.0]);
    }

    #[test]
    fn test_tck_empty() {
        let t = Tractogram::default();
        let back = load_tck(&save_tck(&t), Path::new("mem.tck")).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_tck_rejects_bad_magic() {
        assert!(load_tck(b"not tracks\nEND\n", Path::new("mem.tck")).is_err());
    }

    fn synth_trk(streamlines: &[Vec<[f32; 3]>], voxel_size: [f32; 3]) -> Vec<u8> {
        let mut bytes = vec![0u8; TRK_HEADER_LEN];
        bytes[0..6].copy_from_slice(b"TRACK\0");
        for i in 0..3 {
            bytes[12 + i * 4..16 + i * 4].copy_from_slice(&voxel_size[i].to_le_bytes());
        }
        bytes[988..992].copy_from_slice(&(streamlines.len() as i32).to_le_bytes());
        bytes[992..996].copy_from_slice(&2i32.to_le_bytes());
        bytes[996..1000].copy_from_slice(&1000i32.to_le_bytes());
        for s in streamlines {
            bytes.extend_from_slice(&(s.len() as i32).to_le_bytes());
            for p in s {
                for c in p {
                    bytes.extend_from_slice(&c.to_le_bytes());
                }
            }
        }
        bytes
    }

    #[test]
    fn test_trk_voxel_mm_to_world() {
        let reference = Volume {
            data: vec![0.0; 8],
            dims: (2, 2, 2),
            voxel_size: (2.0, 2.0, 2.0),
            affine: [
                2.0, 0.0, 0.0, -10.0,
                0.0, 2.0, 0.0, -20.0,
                0.0, 0.0, 2.0, -30.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        };
        // (2,2,2) voxel-mm maps to voxel (0.5,0.5,0.5) after the half-voxel shift
        let bytes = synth_trk(&[vec![[2.0, 2.0, 2.0]]], [2.0, 2.0, 2.0]);
        let t = load_trk(&bytes, Path::new("mem.trk"), &reference).unwrap();
        assert_eq!(t.len(), 1);
        let p = t.streamlines[0][0];
        assert_eq!(p, [-9.0, -19.0, -29.0]);
    }

    #[test]
    fn test_trk_requires_reference_via_dispatch() {
        let dir = std::env::temp_dir().join(format!("fsub_trk_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("t.trk");
        std::fs::write(&path, synth_trk(&[], [1.0, 1.0, 1.0])).unwrap();
        assert!(matches!(
            read_tractogram(&path, None),
            Err(ExtractError::MissingPrecursor(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_weights_parsing() {
        let dir = std::env::temp_dir().join(format!("fsub_w_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("weights.csv");
        std::fs::write(&path, "0.5, 0.3 0.2\n").unwrap();
        assert_eq!(read_weights(&path).unwrap(), vec![0.5, 0.3, 0.2]);

        std::fs::write(&path, "0.5\nnot_a_number\n").unwrap();
        assert!(read_weights(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
