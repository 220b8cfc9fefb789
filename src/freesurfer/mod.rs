//! FreeSurfer on-disk formats
//!
//! Native readers for the per-subject anatomical store: binary triangle
//! surfaces (`lh.white`, `rh.white`, ...), surface `.label` files, and
//! `.mgz`/`.mgh` volumes. All multi-byte values in these formats are
//! big-endian.

mod label;
mod mgh;
mod surface;

pub use label::read_label;
pub use mgh::{load_mgh, read_mgh};
pub use surface::{read_surface, write_surface, Surface};

use std::path::{Path, PathBuf};

use crate::error::{ExtractError, Result};

/// A hemisphere name as FreeSurfer spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    Left,
    Right,
}

impl Hemisphere {
    pub fn parse(s: &str) -> Result<Hemisphere> {
        match s {
            "lh" => Ok(Hemisphere::Left),
            "rh" => Ok(Hemisphere::Right),
            other => Err(ExtractError::invalid(
                "hemi",
                format!("hemisphere must be 'lh' or 'rh', got '{}'", other),
            )),
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Hemisphere::Left => "lh",
            Hemisphere::Right => "rh",
        }
    }
}

/// Path to a hemisphere's white-matter surface under `<subject_dir>/surf/`.
pub fn white_surface_path(subject_dir: &Path, hemi: Hemisphere) -> PathBuf {
    subject_dir
        .join("surf")
        .join(format!("{}.white", hemi.prefix()))
}
