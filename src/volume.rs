//! Voxel-grid types shared across the pipeline
//!
//! Volumes store data flattened in Fortran (column-major) order to match
//! the NIfTI convention: `index = x + y*nx + z*nx*ny`. Each volume carries
//! its grid shape, voxel size, and a row-major 4x4 voxel-to-world affine,
//! and those three together define its "space"; stage boundaries check the
//! space explicitly rather than assuming same-space inputs.

use crate::error::{ExtractError, Result};
use crate::space;

/// A scalar 3D volume (e.g. a reference image or an unthresholded GMWMI).
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel-to-world affine (4x4, row-major)
    pub affine: [f64; 16],
}

/// A binary 3D region mask. Values are exactly 0 or 1.
#[derive(Debug, Clone)]
pub struct RegionMask {
    pub data: Vec<u8>,
    pub dims: (usize, usize, usize),
    pub voxel_size: (f64, f64, f64),
    pub affine: [f64; 16],
}

/// Tolerance for comparing affines between artifacts that should share a
/// grid. NIfTI headers store the sform as f32, so exact equality is too
/// strict after one round-trip through disk.
pub const AFFINE_TOL: f64 = 1e-3;

impl Volume {
    pub fn len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims.0 + k * self.dims.0 * self.dims.1
    }

    /// Binarize at a threshold: strictly greater than `thresh` becomes 1.
    ///
    /// The default GMWMI threshold of 0.0 therefore counts any nonzero
    /// (positive) voxel as boundary.
    pub fn binarize(&self, thresh: f64) -> RegionMask {
        let data = self.data.iter().map(|&v| (v > thresh) as u8).collect();
        RegionMask {
            data,
            dims: self.dims,
            voxel_size: self.voxel_size,
            affine: self.affine,
        }
    }
}

impl RegionMask {
    /// An all-zero mask on the given grid.
    pub fn zeros(dims: (usize, usize, usize), voxel_size: (f64, f64, f64), affine: [f64; 16]) -> Self {
        RegionMask {
            data: vec![0u8; dims.0 * dims.1 * dims.2],
            dims,
            voxel_size,
            affine,
        }
    }

    /// A zero mask on the same grid as a reference volume.
    pub fn zeros_like(reference: &Volume) -> Self {
        Self::zeros(reference.dims, reference.voxel_size, reference.affine)
    }

    pub fn len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims.0 + k * self.dims.0 * self.dims.1
    }

    /// Number of voxels marked in the mask.
    pub fn count(&self) -> usize {
        self.data.iter().map(|&v| v as usize).sum()
    }

    /// World coordinates of a voxel center.
    pub fn voxel_center(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        space::apply(&self.affine, [i as f64, j as f64, k as f64])
    }

    /// Whether another mask lives on the same grid (shape and affine).
    pub fn same_grid(&self, other: &RegionMask) -> bool {
        self.dims == other.dims && space::affines_close(&self.affine, &other.affine, AFFINE_TOL)
    }

    /// Error unless `other` shares this mask's grid.
    pub fn require_same_grid(&self, other: &RegionMask, what: &str) -> Result<()> {
        if self.dims != other.dims {
            return Err(ExtractError::SpaceMismatch(format!(
                "{}: grid shapes differ ({:?} vs {:?})",
                what, self.dims, other.dims
            )));
        }
        if !space::affines_close(&self.affine, &other.affine, AFFINE_TOL) {
            return Err(ExtractError::SpaceMismatch(format!(
                "{}: affines differ beyond tolerance",
                what
            )));
        }
        Ok(())
    }

    /// View the mask as an f64 volume (for writing to disk).
    pub fn to_volume(&self) -> Volume {
        Volume {
            data: self.data.iter().map(|&v| v as f64).collect(),
            dims: self.dims,
            voxel_size: self.voxel_size,
            affine: self.affine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> RegionMask {
        RegionMask::zeros((4, 5, 6), (1.0, 1.0, 1.0), space::IDENTITY)
    }

    #[test]
    fn test_fortran_indexing() {
        let m = grid();
        assert_eq!(m.index(0, 0, 0), 0);
        assert_eq!(m.index(1, 0, 0), 1);
        assert_eq!(m.index(0, 1, 0), 4);
        assert_eq!(m.index(0, 0, 1), 20);
        assert_eq!(m.index(3, 4, 5), 4 * 5 * 6 - 1);
    }

    #[test]
    fn test_binarize_threshold() {
        let v = Volume {
            data: vec![0.0, 0.5, 1.0, -1.0],
            dims: (4, 1, 1),
            voxel_size: (1.0, 1.0, 1.0),
            affine: space::IDENTITY,
        };
        let m = v.binarize(0.0);
        assert_eq!(m.data, vec![0, 1, 1, 0]);
        let m = v.binarize(0.5);
        assert_eq!(m.data, vec![0, 0, 1, 0]);
    }

    #[test]
    fn test_same_grid_rejects_shape_and_affine() {
        let a = grid();
        let mut b = grid();
        assert!(a.same_grid(&b));
        b.affine[3] += 0.5;
        assert!(!a.same_grid(&b));
        let c = RegionMask::zeros((4, 5, 7), (1.0, 1.0, 1.0), space::IDENTITY);
        assert!(!a.same_grid(&c));
        assert!(a.require_same_grid(&c, "test").is_err());
    }

    #[test]
    fn test_voxel_center_uses_affine() {
        let mut m = grid();
        m.affine = [
            2.0, 0.0, 0.0, -10.0,
            0.0, 2.0, 0.0, -10.0,
            0.0, 0.0, 2.0, -10.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        assert_eq!(m.voxel_center(1, 2, 3), [-8.0, -6.0, -4.0]);
    }
}
