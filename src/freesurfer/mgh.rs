//! FreeSurfer `.mgz`/`.mgh` volumes
//!
//! MGH format: a 284-byte big-endian header (version, dims, data type,
//! direction cosines and RAS center when the goodRASFlag is set) followed
//! by the voxel data, x varying fastest. `.mgz` is the same stream gzip
//! compressed.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::{ExtractError, Result};
use crate::volume::Volume;

const MGH_HEADER_LEN: usize = 284;

// MGH data type codes
const MRI_UCHAR: i32 = 0;
const MRI_INT: i32 = 1;
const MRI_FLOAT: i32 = 3;
const MRI_SHORT: i32 = 4;

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn be_i32(bytes: &[u8], off: usize) -> i32 {
    i32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

fn be_i16(bytes: &[u8], off: usize) -> i16 {
    i16::from_be_bytes([bytes[off], bytes[off + 1]])
}

fn be_f32(bytes: &[u8], off: usize) -> f32 {
    f32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

/// Parse an MGH volume from (already decompressed) bytes.
pub fn load_mgh(bytes: &[u8], origin: &Path) -> Result<Volume> {
    let bytes = if is_gzip(bytes) {
        let mut decompressed = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut decompressed)
            .map_err(|e| ExtractError::parse(origin, format!("gzip: {}", e)))?;
        std::borrow::Cow::Owned(decompressed)
    } else {
        std::borrow::Cow::Borrowed(bytes)
    };
    let bytes = bytes.as_ref();

    if bytes.len() < MGH_HEADER_LEN {
        return Err(ExtractError::parse(origin, "file too small for MGH header"));
    }

    let version = be_i32(bytes, 0);
    if version != 1 {
        return Err(ExtractError::parse(origin, format!("unsupported MGH version {}", version)));
    }
    let nx = be_i32(bytes, 4) as usize;
    let ny = be_i32(bytes, 8) as usize;
    let nz = be_i32(bytes, 12) as usize;
    let _nframes = be_i32(bytes, 16);
    let dtype = be_i32(bytes, 20);
    let _dof = be_i32(bytes, 24);
    let good_ras = be_i16(bytes, 28);

    let (voxel_size, affine) = if good_ras > 0 {
        let sx = be_f32(bytes, 30) as f64;
        let sy = be_f32(bytes, 34) as f64;
        let sz = be_f32(bytes, 38) as f64;
        // Direction cosines: x_ras, y_ras, z_ras column vectors
        let mut mdc = [0.0f64; 9];
        for i in 0..9 {
            mdc[i] = be_f32(bytes, 42 + i * 4) as f64;
        }
        let c_ras = [
            be_f32(bytes, 78) as f64,
            be_f32(bytes, 82) as f64,
            be_f32(bytes, 86) as f64,
        ];
        // Affine columns are the scaled direction cosines; the RAS center
        // sits at the volume center
        let spacing = [sx, sy, sz];
        let mut m = [0.0f64; 16];
        for row in 0..3 {
            for col in 0..3 {
                m[row * 4 + col] = mdc[col * 3 + row] * spacing[col];
            }
        }
        let half = [nx as f64 / 2.0, ny as f64 / 2.0, nz as f64 / 2.0];
        for row in 0..3 {
            let offset: f64 = (0..3).map(|col| m[row * 4 + col] * half[col]).sum();
            m[row * 4 + 3] = c_ras[row] - offset;
        }
        m[15] = 1.0;
        ((sx, sy, sz), m)
    } else {
        (
            (1.0, 1.0, 1.0),
            crate::space::IDENTITY,
        )
    };

    let n = nx * ny * nz;
    let elem = match dtype {
        MRI_UCHAR => 1,
        MRI_SHORT => 2,
        MRI_INT | MRI_FLOAT => 4,
        other => {
            return Err(ExtractError::parse(origin, format!("unsupported MGH data type {}", other)))
        }
    };
    if bytes.len() < MGH_HEADER_LEN + n * elem {
        return Err(ExtractError::parse(origin, "MGH data truncated"));
    }

    // First frame only; data is already x-fastest, matching our Fortran order
    let mut data = Vec::with_capacity(n);
    for idx in 0..n {
        let off = MGH_HEADER_LEN + idx * elem;
        let v = match dtype {
            MRI_UCHAR => bytes[off] as f64,
            MRI_SHORT => be_i16(bytes, off) as f64,
            MRI_INT => be_i32(bytes, off) as f64,
            MRI_FLOAT => be_f32(bytes, off) as f64,
            _ => unreachable!(),
        };
        data.push(v);
    }

    Ok(Volume {
        data,
        dims: (nx, ny, nz),
        voxel_size,
        affine,
    })
}

/// Read a `.mgz`/`.mgh` volume from disk.
pub fn read_mgh(path: &Path) -> Result<Volume> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    load_mgh(&bytes, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal uchar MGH volume with identity direction cosines.
    fn synth_mgh(dims: (usize, usize, usize), marked: &[(usize, usize, usize)]) -> Vec<u8> {
        let (nx, ny, nz) = dims;
        let mut bytes = vec![0u8; MGH_HEADER_LEN + nx * ny * nz];
        bytes[0..4].copy_from_slice(&1i32.to_be_bytes());
        bytes[4..8].copy_from_slice(&(nx as i32).to_be_bytes());
        bytes[8..12].copy_from_slice(&(ny as i32).to_be_bytes());
        bytes[12..16].copy_from_slice(&(nz as i32).to_be_bytes());
        bytes[16..20].copy_from_slice(&1i32.to_be_bytes()); // nframes
        bytes[20..24].copy_from_slice(&MRI_UCHAR.to_be_bytes());
        bytes[28..30].copy_from_slice(&1i16.to_be_bytes()); // goodRASFlag
        // spacing 1,1,1
        for i in 0..3 {
            bytes[30 + i * 4..34 + i * 4].copy_from_slice(&1.0f32.to_be_bytes());
        }
        // Mdc = identity columns
        for (i, v) in [1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0].iter().enumerate() {
            bytes[42 + i * 4..46 + i * 4].copy_from_slice(&v.to_be_bytes());
        }
        // c_ras at volume center => zero translation
        for (i, half) in [nx, ny, nz].iter().enumerate() {
            bytes[78 + i * 4..82 + i * 4]
                .copy_from_slice(&((*half as f32) / 2.0).to_be_bytes());
        }
        for &(i, j, k) in marked {
            bytes[MGH_HEADER_LEN + i + j * nx + k * nx * ny] = 1;
        }
        bytes
    }

    #[test]
    fn test_load_uchar_mgh() {
        let bytes = synth_mgh((4, 4, 4), &[(1, 2, 3)]);
        let v = load_mgh(&bytes, Path::new("mem.mgh")).unwrap();
        assert_eq!(v.dims, (4, 4, 4));
        assert_eq!(v.data[v.index(1, 2, 3)], 1.0);
        assert_eq!(v.data.iter().sum::<f64>(), 1.0);
        // Identity cosines, center c_ras => affine maps voxel 0 to origin
        assert_eq!(crate::space::apply(&v.affine, [0.0, 0.0, 0.0]), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_gzipped_mgz() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let raw = synth_mgh((3, 3, 3), &[(0, 0, 0)]);
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw).unwrap();
        let gz = enc.finish().unwrap();

        let v = load_mgh(&gz, Path::new("mem.mgz")).unwrap();
        assert_eq!(v.dims, (3, 3, 3));
        assert_eq!(v.data[0], 1.0);
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = synth_mgh((2, 2, 2), &[]);
        bytes[0..4].copy_from_slice(&9i32.to_be_bytes());
        assert!(load_mgh(&bytes, Path::new("mem.mgh")).is_err());
    }
}
