//! Streamline selection against inclusion masks
//!
//! A streamline is retained when it satisfies the spatial search criterion
//! against every inclusion mask (one or two), does not come near the
//! exclude mask, and passes through the include (waypoint) mask when one
//! is given. Selection preserves source order, and per-streamline weights
//! are subset in lockstep: weight `i` of the output always refers to
//! output streamline `i`.

use crate::error::{ExtractError, Result};
use crate::space;
use crate::tractogram::{Streamline, Tractogram};
use crate::volume::RegionMask;

/// How streamline points are tested against a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPolicy {
    /// Scan points in source order; first point within the search
    /// distance of any mask voxel is a hit.
    Forward,
    /// Same criterion, scanning from the last point backwards.
    Reverse,
    /// Points are tested against the mask's boundary shell only,
    /// independent of scan order.
    Radial,
}

/// The tuple governing which streamlines are retained.
#[derive(Debug, Clone, Copy)]
pub struct SelectionCriterion {
    pub policy: SearchPolicy,
    /// Search distance in millimetres; must be positive.
    pub search_dist: f64,
}

/// Result of a selection pass.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Retained streamlines, in their original relative order.
    pub tractogram: Tractogram,
    /// Index of each retained streamline in the source tractogram.
    pub kept_indices: Vec<usize>,
    /// Weights subset in lockstep with the retained streamlines.
    pub weights: Option<Vec<f64>>,
    /// Sum of the retained weights, when weights were supplied.
    pub weight_sum: Option<f64>,
}

/// Distance query against one mask: precomputes the voxel-offset
/// neighbourhood covering the search radius, then answers point-in-range
/// queries with an exact world-distance check against voxel centers.
struct MaskProbe {
    data: Vec<u8>,
    dims: (usize, usize, usize),
    affine: [f64; 16],
    inv_affine: [f64; 16],
    offsets: Vec<(i64, i64, i64)>,
    dist: f64,
}

impl MaskProbe {
    fn new(mask: &RegionMask, dist: f64, boundary_only: bool) -> Result<MaskProbe> {
        let data = if boundary_only {
            boundary_shell(mask)
        } else {
            mask.data.clone()
        };
        let inv_affine = space::invert(&mask.affine)?;

        // Offset box covering the radius, one voxel of slack for rounding
        let (vx, vy, vz) = mask.voxel_size;
        let rx = (dist / vx.max(1e-6)).ceil() as i64 + 1;
        let ry = (dist / vy.max(1e-6)).ceil() as i64 + 1;
        let rz = (dist / vz.max(1e-6)).ceil() as i64 + 1;
        let mut offsets = Vec::new();
        for dk in -rz..=rz {
            for dj in -ry..=ry {
                for di in -rx..=rx {
                    offsets.push((di, dj, dk));
                }
            }
        }

        Ok(MaskProbe {
            data,
            dims: mask.dims,
            affine: mask.affine,
            inv_affine,
            offsets,
            dist,
        })
    }

    /// Whether the world-mm point lies within `dist` of a marked voxel center.
    fn hit(&self, p: [f64; 3]) -> bool {
        let vox = space::apply(&self.inv_affine, p);
        let (ci, cj, ck) = (vox[0].round() as i64, vox[1].round() as i64, vox[2].round() as i64);
        let (nx, ny, nz) = (self.dims.0 as i64, self.dims.1 as i64, self.dims.2 as i64);

        for &(di, dj, dk) in &self.offsets {
            let (i, j, k) = (ci + di, cj + dj, ck + dk);
            if i < 0 || j < 0 || k < 0 || i >= nx || j >= ny || k >= nz {
                continue;
            }
            let idx = (i + j * nx + k * nx * ny) as usize;
            if self.data[idx] == 0 {
                continue;
            }
            let center = space::apply(&self.affine, [i as f64, j as f64, k as f64]);
            let dx = center[0] - p[0];
            let dy = center[1] - p[1];
            let dz = center[2] - p[2];
            if dx * dx + dy * dy + dz * dz <= self.dist * self.dist {
                return true;
            }
        }
        false
    }

    /// First point of the streamline (in the given scan order) within
    /// range; returns the index in source point order.
    fn first_hit(&self, streamline: &Streamline, reverse: bool) -> Option<usize> {
        if reverse {
            (0..streamline.len()).rev().find(|&i| self.hit(streamline[i]))
        } else {
            (0..streamline.len()).find(|&i| self.hit(streamline[i]))
        }
    }
}

/// Mask voxels on the 6-connected boundary of the region (or at the
/// volume edge).
fn boundary_shell(mask: &RegionMask) -> Vec<u8> {
    let (nx, ny, nz) = mask.dims;
    let mut shell = vec![0u8; mask.len()];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if mask.data[mask.index(i, j, k)] == 0 {
                    continue;
                }
                let at_edge = i == 0 || j == 0 || k == 0 || i == nx - 1 || j == ny - 1 || k == nz - 1;
                let interior = !at_edge
                    && mask.data[mask.index(i - 1, j, k)] != 0
                    && mask.data[mask.index(i + 1, j, k)] != 0
                    && mask.data[mask.index(i, j - 1, k)] != 0
                    && mask.data[mask.index(i, j + 1, k)] != 0
                    && mask.data[mask.index(i, j, k - 1)] != 0
                    && mask.data[mask.index(i, j, k + 1)] != 0;
                if !interior {
                    shell[mask.index(i, j, k)] = 1;
                }
            }
        }
    }
    shell
}

/// Containment query: does any streamline point map into a marked voxel?
fn passes_through(mask: &RegionMask, inv_affine: &[f64; 16], streamline: &Streamline) -> bool {
    let (nx, ny, nz) = (mask.dims.0 as i64, mask.dims.1 as i64, mask.dims.2 as i64);
    streamline.iter().any(|&p| {
        let vox = space::apply(inv_affine, p);
        let (i, j, k) = (vox[0].round() as i64, vox[1].round() as i64, vox[2].round() as i64);
        if i < 0 || j < 0 || k < 0 || i >= nx || j >= ny || k >= nz {
            return false;
        }
        mask.data[(i + j * nx + k * nx * ny) as usize] != 0
    })
}

/// Select the sub-bundle satisfying the criterion against every inclusion
/// mask (two-ROI selection is order-independent), minus streamlines near
/// the exclude mask, restricted to those crossing the include mask.
pub fn select(
    tract: &Tractogram,
    inclusion_masks: &[&RegionMask],
    criterion: SelectionCriterion,
    exclude: Option<&RegionMask>,
    include: Option<&RegionMask>,
    weights: Option<&[f64]>,
) -> Result<Selection> {
    if criterion.search_dist <= 0.0 {
        return Err(ExtractError::invalid(
            "search_dist",
            format!("search distance must be > 0 mm, got {}", criterion.search_dist),
        ));
    }
    if inclusion_masks.is_empty() {
        return Err(ExtractError::invalid("masks", "at least one inclusion mask is required"));
    }
    for m in &inclusion_masks[1..] {
        inclusion_masks[0].require_same_grid(m, "inclusion masks")?;
    }
    if let Some(ex) = exclude {
        inclusion_masks[0].require_same_grid(ex, "exclude mask")?;
    }
    if let Some(inc) = include {
        inclusion_masks[0].require_same_grid(inc, "include mask")?;
    }
    if let Some(w) = weights {
        if w.len() != tract.len() {
            return Err(ExtractError::invalid(
                "weights",
                format!("{} weights for {} streamlines", w.len(), tract.len()),
            ));
        }
    }

    let boundary_only = criterion.policy == SearchPolicy::Radial;
    let probes: Vec<MaskProbe> = inclusion_masks
        .iter()
        .map(|m| MaskProbe::new(m, criterion.search_dist, boundary_only))
        .collect::<Result<_>>()?;
    let exclude_probe = match exclude {
        Some(m) => Some(MaskProbe::new(m, criterion.search_dist, false)?),
        None => None,
    };
    let include_inv = match include {
        Some(m) => Some(space::invert(&m.affine)?),
        None => None,
    };

    let reverse_scan = criterion.policy == SearchPolicy::Reverse;
    let mut kept_indices = Vec::new();
    let mut kept: Vec<Streamline> = Vec::new();
    let mut kept_weights = weights.map(|_| Vec::new());

    for (idx, streamline) in tract.streamlines.iter().enumerate() {
        // Every inclusion mask must be reached, at any point along the
        // streamline (order-independent across masks)
        let mut hits = Vec::with_capacity(probes.len());
        let mut satisfied = true;
        for probe in &probes {
            match probe.first_hit(streamline, reverse_scan) {
                Some(h) => hits.push(h),
                None => {
                    satisfied = false;
                    break;
                }
            }
        }
        if !satisfied {
            continue;
        }
        if let Some(probe) = &exclude_probe {
            if streamline.iter().any(|&p| probe.hit(p)) {
                continue;
            }
        }
        if let (Some(mask), Some(inv)) = (include, &include_inv) {
            if !passes_through(mask, inv, streamline) {
                continue;
            }
        }

        tracing::debug!("streamline {} retained (first hits at {:?})", idx, hits);
        kept_indices.push(idx);
        kept.push(streamline.clone());
        if let (Some(kw), Some(w)) = (&mut kept_weights, weights) {
            kw.push(w[idx]);
        }
    }

    let weight_sum = kept_weights.as_ref().map(|w| w.iter().sum());
    tracing::info!(
        "selection retained {} of {} streamlines ({:?}, {} mm)",
        kept_indices.len(),
        tract.len(),
        criterion.policy,
        criterion.search_dist
    );

    Ok(Selection {
        tractogram: Tractogram { streamlines: kept },
        kept_indices,
        weights: kept_weights,
        weight_sum,
    })
}
