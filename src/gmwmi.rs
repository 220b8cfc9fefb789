//! Gray-matter/white-matter interface (GMWMI) builder
//!
//! When no GMWMI volume is supplied, one is derived from the subject's
//! anatomical surfaces: each hemisphere's white surface is rasterized into
//! the DWI grid by sampling every triangle at sub-voxel pitch, and the
//! resulting hit-count volume is binarized at the configured threshold
//! (default 0.0, i.e. any touched voxel counts as boundary).

use std::path::Path;

use crate::error::{ExtractError, Result};
use crate::freesurfer::{self, Hemisphere, Surface};
use crate::registration::Registration;
use crate::space;
use crate::volume::{RegionMask, Volume};

/// Build a binary GMWMI mask on the reference grid from the subject's
/// white surfaces. Requires at least one hemisphere surface to exist.
pub fn build_gmwmi(
    subject_dir: &Path,
    registration: &Registration,
    reference: &Volume,
    threshold: f64,
) -> Result<RegionMask> {
    let mut counts = Volume {
        data: vec![0.0; reference.len()],
        dims: reference.dims,
        voxel_size: reference.voxel_size,
        affine: reference.affine,
    };
    let inv_ref = space::invert(&reference.affine)?;

    let mut found = 0usize;
    for hemi in [Hemisphere::Left, Hemisphere::Right] {
        let path = freesurfer::white_surface_path(subject_dir, hemi);
        if !path.exists() {
            continue;
        }
        let surface = freesurfer::read_surface(&path)?;
        rasterize_surface(&surface, registration, &inv_ref, &mut counts);
        found += 1;
        tracing::info!("rasterized {} into GMWMI grid", path.display());
    }
    if found == 0 {
        return Err(ExtractError::MissingPrecursor(format!(
            "no white surfaces found under {} (expected surf/lh.white or surf/rh.white)",
            subject_dir.display()
        )));
    }

    let mask = counts.binarize(threshold);
    tracing::info!("GMWMI mask has {} voxels", mask.count());
    Ok(mask)
}

/// Accumulate triangle sample hits into the count volume.
fn rasterize_surface(
    surface: &Surface,
    registration: &Registration,
    inv_ref: &[f64; 16],
    counts: &mut Volume,
) {
    let (nx, ny, nz) = counts.dims;
    let min_voxel = counts
        .voxel_size
        .0
        .min(counts.voxel_size.1)
        .min(counts.voxel_size.2)
        .max(1e-6);
    let pitch = 0.5 * min_voxel;

    for &[i0, i1, i2] in &surface.faces {
        let a = registration.to_dwi(surface.vertices[i0]);
        let b = registration.to_dwi(surface.vertices[i1]);
        let c = registration.to_dwi(surface.vertices[i2]);

        // Subdivide at half-voxel pitch along the longest edge
        let longest = edge_len(&a, &b).max(edge_len(&b, &c)).max(edge_len(&a, &c));
        let n = (longest / pitch).ceil().max(1.0) as usize;

        for u in 0..=n {
            for v in 0..=(n - u) {
                let fu = u as f64 / n as f64;
                let fv = v as f64 / n as f64;
                let fw = 1.0 - fu - fv;
                let p = [
                    fu * a[0] + fv * b[0] + fw * c[0],
                    fu * a[1] + fv * b[1] + fw * c[1],
                    fu * a[2] + fv * b[2] + fw * c[2],
                ];
                let vox = space::apply(inv_ref, p);
                let (x, y, z) = (vox[0].round(), vox[1].round(), vox[2].round());
                if x < 0.0 || y < 0.0 || z < 0.0 {
                    continue;
                }
                let (x, y, z) = (x as usize, y as usize, z as usize);
                if x < nx && y < ny && z < nz {
                    let idx = counts.index(x, y, z);
                    counts.data[idx] += 1.0;
                }
            }
        }
    }
}

fn edge_len(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> Volume {
        Volume {
            data: vec![0.0; 10 * 10 * 10],
            dims: (10, 10, 10),
            voxel_size: (1.0, 1.0, 1.0),
            affine: space::IDENTITY,
        }
    }

    #[test]
    fn test_rasterize_covers_triangle_plane() {
        // A triangle spanning the z=5 plane
        let surface = Surface {
            vertices: vec![[1.0, 1.0, 5.0], [8.0, 1.0, 5.0], [1.0, 8.0, 5.0]],
            faces: vec![[0, 1, 2]],
        };
        let mut counts = reference();
        let inv = space::invert(&counts.affine).unwrap();
        rasterize_surface(&surface, &Registration::identity(), &inv, &mut counts);

        let mask = counts.binarize(0.0);
        // Corners of the triangle must be hit, all in slice k=5
        assert_eq!(mask.data[mask.index(1, 1, 5)], 1);
        assert_eq!(mask.data[mask.index(8, 1, 5)], 1);
        assert_eq!(mask.data[mask.index(1, 8, 5)], 1);
        for k in 0..10 {
            if k == 5 {
                continue;
            }
            for j in 0..10 {
                for i in 0..10 {
                    assert_eq!(mask.data[mask.index(i, j, k)], 0);
                }
            }
        }
    }

    #[test]
    fn test_missing_surfaces_is_precursor_error() {
        let dir = std::env::temp_dir().join(format!("fsub_gmwmi_{}", std::process::id()));
        std::fs::create_dir_all(dir.join("surf")).unwrap();
        let err = build_gmwmi(&dir, &Registration::identity(), &reference(), 0.0).unwrap_err();
        assert!(matches!(err, ExtractError::MissingPrecursor(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_threshold_filters_sparse_hits() {
        let surface = Surface {
            vertices: vec![[2.0, 2.0, 2.0], [2.2, 2.0, 2.0], [2.0, 2.2, 2.0]],
            faces: vec![[0, 1, 2]],
        };
        let mut counts = reference();
        let inv = space::invert(&counts.affine).unwrap();
        rasterize_surface(&surface, &Registration::identity(), &inv, &mut counts);

        // Tiny triangle: a handful of samples land in one voxel
        let hits = counts.data[counts.index(2, 2, 2)];
        assert!(hits >= 1.0);
        assert_eq!(counts.binarize(hits + 1.0).count(), 0);
    }
}
