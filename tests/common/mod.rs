//! Shared helpers for fsub-core integration tests
//!
//! Synthesizes the small on-disk fixtures a pipeline run needs: reference
//! volumes, binary mask NIfTIs, FreeSurfer subject directories with flat
//! test surfaces, label files, tractograms, and weights tables.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use fsub_core::freesurfer::{write_surface, Surface};
use fsub_core::space::IDENTITY;
use fsub_core::tractogram::{write_tck, Tractogram};
use fsub_core::volume::{RegionMask, Volume};
use fsub_core::nifti_io;

/// A cubic volume with identity affine and 1 mm voxels.
pub fn identity_volume(n: usize) -> Volume {
    Volume {
        data: vec![0.0; n * n * n],
        dims: (n, n, n),
        voxel_size: (1.0, 1.0, 1.0),
        affine: IDENTITY,
    }
}

/// A cubic mask with the given voxels marked.
pub fn cube_mask(n: usize, voxels: &[(usize, usize, usize)]) -> RegionMask {
    let mut m = RegionMask::zeros((n, n, n), (1.0, 1.0, 1.0), IDENTITY);
    for &(i, j, k) in voxels {
        let idx = m.index(i, j, k);
        m.data[idx] = 1;
    }
    m
}

/// Write a cubic all-zero reference image.
pub fn write_reference(path: &Path, n: usize) {
    nifti_io::write_volume(path, &identity_volume(n)).unwrap();
}

/// Write a cubic mask NIfTI with the given voxels marked.
pub fn write_mask_nii(path: &Path, n: usize, voxels: &[(usize, usize, usize)]) {
    nifti_io::write_mask(path, &cube_mask(n, voxels)).unwrap();
}

/// Write a tractogram to a .tck file.
pub fn write_tract(path: &Path, streamlines: Vec<Vec<[f64; 3]>>) {
    write_tck(path, &Tractogram { streamlines }).unwrap();
}

/// A flat square surface in the z = `z` plane spanning `[lo, hi]` in x
/// and y. Vertex order: (lo,lo), (hi,lo), (hi,hi), (lo,hi); normals
/// point along +z.
pub fn flat_surface(lo: f64, hi: f64, z: f64) -> Surface {
    Surface {
        vertices: vec![[lo, lo, z], [hi, lo, z], [hi, hi, z], [lo, hi, z]],
        faces: vec![[0, 1, 2], [0, 2, 3]],
    }
}

/// Create `<fs_dir>/<subject>/surf/` with the given left-hemisphere white
/// surface, returning the subjects directory.
pub fn make_freesurfer_subject(root: &Path, subject: &str, lh_white: &Surface) -> PathBuf {
    let fs_dir = root.join("freesurfer");
    let surf = fs_dir.join(subject).join("surf");
    std::fs::create_dir_all(&surf).unwrap();
    write_surface(&surf.join("lh.white"), lh_white).unwrap();
    fs_dir
}

/// Write a FreeSurfer label file selecting the given vertex indices.
pub fn write_label(path: &Path, vertices: &[usize]) {
    let mut text = format!("#!ascii label, test fixture\n{}\n", vertices.len());
    for &v in vertices {
        text.push_str(&format!("{} 0.0 0.0 0.0 0.0\n", v));
    }
    std::fs::write(path, text).unwrap();
}

/// Write a flat-affine registration (.mat) file.
pub fn write_mat(path: &Path, matrix: &[f64; 16]) {
    let mut text = String::new();
    for row in 0..4 {
        let r: Vec<String> = (0..4).map(|c| format!("{}", matrix[row * 4 + c])).collect();
        text.push_str(&r.join(" "));
        text.push('\n');
    }
    std::fs::write(path, text).unwrap();
}
