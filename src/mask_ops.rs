//! Mask algebra: ROI merging and GMWMI intersection
//!
//! Merging is a voxelwise OR that additionally records provenance (which
//! input marked each voxel) for diagnostics. Intersection is a voxelwise
//! AND; an empty result is a degenerate but valid outcome (selection will
//! simply retain nothing), so it is logged rather than raised.

use crate::error::Result;
use crate::volume::RegionMask;

/// Provenance codes in [`MergedRoi::labels`].
pub const FROM_FIRST: u8 = 1;
pub const FROM_SECOND: u8 = 2;
pub const FROM_BOTH: u8 = 3;

/// A merged two-ROI mask plus per-voxel provenance.
#[derive(Debug, Clone)]
pub struct MergedRoi {
    /// Voxelwise OR of the two inputs.
    pub mask: RegionMask,
    /// 0 outside, 1 first only, 2 second only, 3 both.
    pub labels: Vec<u8>,
}

/// Union two region masks sharing a grid.
pub fn merge_rois(first: &RegionMask, second: &RegionMask) -> Result<MergedRoi> {
    first.require_same_grid(second, "ROI merge")?;

    let mut mask = RegionMask::zeros(first.dims, first.voxel_size, first.affine);
    let mut labels = vec![0u8; first.len()];
    for i in 0..first.len() {
        let a = first.data[i] != 0;
        let b = second.data[i] != 0;
        if a || b {
            mask.data[i] = 1;
            labels[i] = match (a, b) {
                (true, false) => FROM_FIRST,
                (false, true) => FROM_SECOND,
                _ => FROM_BOTH,
            };
        }
    }
    Ok(MergedRoi { mask, labels })
}

/// Voxelwise AND of an ROI mask with the GMWMI mask.
///
/// An empty intersection passes through with a warning: selecting against
/// an empty mask yields zero streamlines, which is a valid result.
pub fn intersect_gmwmi(roi: &RegionMask, gmwmi: &RegionMask) -> Result<RegionMask> {
    roi.require_same_grid(gmwmi, "GMWMI intersection")?;

    let mut out = RegionMask::zeros(roi.dims, roi.voxel_size, roi.affine);
    for i in 0..roi.len() {
        out.data[i] = roi.data[i] & gmwmi.data[i];
    }
    if out.count() == 0 {
        tracing::warn!(
            "ROI/GMWMI intersection is empty ({} ROI voxels in); downstream selection will retain no streamlines",
            roi.count()
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space;

    fn mask_with(voxels: &[(usize, usize, usize)]) -> RegionMask {
        let mut m = RegionMask::zeros((8, 8, 8), (1.0, 1.0, 1.0), space::IDENTITY);
        for &(i, j, k) in voxels {
            let idx = m.index(i, j, k);
            m.data[idx] = 1;
        }
        m
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = mask_with(&[(1, 1, 1), (2, 2, 2)]);
        let b = mask_with(&[(2, 2, 2), (3, 3, 3)]);
        let ab = merge_rois(&a, &b).unwrap();
        let ba = merge_rois(&b, &a).unwrap();
        assert_eq!(ab.mask.data, ba.mask.data);
        assert_eq!(ab.mask.count(), 3);
    }

    #[test]
    fn test_merge_provenance() {
        let a = mask_with(&[(1, 1, 1), (2, 2, 2)]);
        let b = mask_with(&[(2, 2, 2), (3, 3, 3)]);
        let merged = merge_rois(&a, &b).unwrap();
        assert_eq!(merged.labels[a.index(1, 1, 1)], FROM_FIRST);
        assert_eq!(merged.labels[a.index(3, 3, 3)], FROM_SECOND);
        assert_eq!(merged.labels[a.index(2, 2, 2)], FROM_BOTH);
        assert_eq!(merged.labels[a.index(0, 0, 0)], 0);
    }

    #[test]
    fn test_merge_rejects_grid_mismatch() {
        let a = mask_with(&[(1, 1, 1)]);
        let b = RegionMask::zeros((8, 8, 9), (1.0, 1.0, 1.0), space::IDENTITY);
        assert!(merge_rois(&a, &b).is_err());
    }

    #[test]
    fn test_intersect_self_is_identity() {
        let a = mask_with(&[(1, 1, 1), (4, 5, 6)]);
        let out = intersect_gmwmi(&a, &a).unwrap();
        assert_eq!(out.data, a.data);
    }

    #[test]
    fn test_intersect_with_zero_is_zero() {
        let a = mask_with(&[(1, 1, 1)]);
        let zero = mask_with(&[]);
        let out = intersect_gmwmi(&a, &zero).unwrap();
        assert_eq!(out.count(), 0);
    }

    #[test]
    fn test_intersect_keeps_overlap_only() {
        let a = mask_with(&[(1, 1, 1), (2, 2, 2)]);
        let b = mask_with(&[(2, 2, 2), (3, 3, 3)]);
        let out = intersect_gmwmi(&a, &b).unwrap();
        assert_eq!(out.count(), 1);
        assert_eq!(out.data[out.index(2, 2, 2)], 1);
    }
}
