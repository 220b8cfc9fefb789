//! NIfTI file I/O
//!
//! Reads `.nii`/`.nii.gz` volumes into the pipeline's [`Volume`] type and
//! writes masks and volumes back out with a hand-built NIfTI-1 header.
//! Gzip compression is auto-detected on read and chosen by extension on
//! write.

use std::io::Cursor;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{ExtractError, Result};
use crate::volume::{RegionMask, Volume};

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Load a NIfTI volume from bytes (gzip auto-detected).
pub fn load_volume(bytes: &[u8], origin: &Path) -> Result<Volume> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        InMemNiftiObject::from_reader(decoder)
            .map_err(|e| ExtractError::parse(origin, format!("gzipped NIfTI: {}", e)))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| ExtractError::parse(origin, format!("NIfTI: {}", e)))?
    };

    let header = obj.header();
    if (header.dim[0] as usize) < 3 {
        return Err(ExtractError::parse(
            origin,
            format!("expected a 3D volume, got {}D", header.dim[0]),
        ));
    }

    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let scl_slope = if header.scl_slope == 0.0 { 1.0 } else { header.scl_slope as f64 };
    let scl_inter = header.scl_inter as f64;
    let affine = affine_from_header(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| ExtractError::parse(origin, format!("volume decode: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(ExtractError::parse(
            origin,
            format!("expected a 3D array, got {}D", shape.len()),
        ));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);

    // Extract in Fortran order (x varies fastest) to match NIfTI convention;
    // 4D inputs contribute their first frame only.
    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let raw = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    array[[i, j, k, 0]]
                };
                data.push(raw * scl_slope + scl_inter);
            }
        }
    }

    Ok(Volume {
        data,
        dims: (nx, ny, nz),
        voxel_size,
        affine,
    })
}

/// Read a NIfTI volume from a filesystem path.
pub fn read_volume(path: &Path) -> Result<Volume> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    load_volume(&bytes, path)
}

/// Read a NIfTI file as a binary mask (any voxel > 0 is inside).
pub fn read_mask(path: &Path) -> Result<RegionMask> {
    Ok(read_volume(path)?.binarize(0.0))
}

/// Affine transformation matrix from a NIfTI header.
///
/// Prefers the sform when set, falling back to a diagonal voxel-scaling
/// matrix otherwise.
fn affine_from_header(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Serialize a volume as uncompressed NIfTI-1 bytes (float32 data).
pub fn save_volume(vol: &Volume) -> Vec<u8> {
    let (nx, ny, nz) = vol.dims;
    let (vsx, vsy, vsz) = vol.voxel_size;

    // NIfTI-1 header (348 bytes)
    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    // pixdim[0..7]
    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4-byte extension field)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z from the affine's first three rows
    for row in 0..3 {
        for i in 0..4 {
            let offset = 280 + row * 16 + i * 4;
            let v = vol.affine[row * 4 + i] as f32;
            header[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
        }
    }

    // magic = "n+1\0" for single-file NIfTI-1
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + vol.data.len() * 4);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]); // no extensions
    for &val in &vol.data {
        buffer.extend_from_slice(&(val as f32).to_le_bytes());
    }
    buffer
}

/// Write a volume to disk; `.nii.gz` paths are gzip compressed.
pub fn write_volume(path: &Path, vol: &Volume) -> Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let raw = save_volume(vol);
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .and_then(|_| encoder.finish())
            .map_err(|e| ExtractError::io(path, e))?
    } else {
        raw
    };

    std::fs::write(path, &bytes).map_err(|e| ExtractError::io(path, e))
}

/// Write a binary mask to disk as a float32 NIfTI volume.
pub fn write_mask(path: &Path, mask: &RegionMask) -> Result<()> {
    write_volume(path, &mask.to_volume())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space;

    fn sample_volume() -> Volume {
        let mut v = Volume {
            data: vec![0.0; 3 * 4 * 5],
            dims: (3, 4, 5),
            voxel_size: (1.0, 1.5, 2.0),
            affine: [
                1.0, 0.0, 0.0, -10.0,
                0.0, 1.5, 0.0, -12.0,
                0.0, 0.0, 2.0, -14.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        };
        let idx = v.index(2, 1, 3);
        v.data[idx] = 7.5;
        v
    }

    #[test]
    fn test_save_load_roundtrip() {
        let v = sample_volume();
        let bytes = save_volume(&v);
        let back = load_volume(&bytes, Path::new("mem.nii")).unwrap();
        assert_eq!(back.dims, v.dims);
        assert_eq!(back.data.len(), v.data.len());
        assert_eq!(back.data[back.index(2, 1, 3)], 7.5);
        assert!(space::affines_close(&back.affine, &v.affine, 1e-4));
    }

    #[test]
    fn test_mask_roundtrip_binarizes() {
        let v = sample_volume();
        let bytes = save_volume(&v);
        let mask = load_volume(&bytes, Path::new("mem.nii")).unwrap().binarize(0.0);
        assert_eq!(mask.count(), 1);
        assert_eq!(mask.data[mask.index(2, 1, 3)], 1);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(load_volume(&[0u8; 64], Path::new("bad.nii")).is_err());
    }

    #[test]
    fn test_affine_fallback_without_sform() {
        let mut header = NiftiHeader::default();
        header.pixdim[1] = 1.0;
        header.pixdim[2] = 2.0;
        header.pixdim[3] = 3.0;
        header.sform_code = 0;

        let affine = affine_from_header(&header);
        assert_eq!(affine[0], 1.0);
        assert_eq!(affine[5], 2.0);
        assert_eq!(affine[10], 3.0);
    }
}
