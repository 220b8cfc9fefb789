//! fsub-core: functional sub-bundle extraction
//!
//! Extracts the subset of streamlines from a tractogram that connects one
//! or two gray-matter ROIs, by projecting the ROIs into white matter,
//! intersecting them with the gray/white-matter interface, and filtering
//! streamlines against the resulting DWI-space masks.
//!
//! # Modules
//! - `space`: 4x4 affine helpers and space-compatibility checks
//! - `volume`: voxel-grid `Volume` and binary `RegionMask` types
//! - `nifti_io`: NIfTI read/write
//! - `freesurfer`: surface, label, and MGH volume readers
//! - `registration`: LTA/ITK/FSL registration loading and normalization
//! - `project`: ROI projection along cortical normals
//! - `mask_ops`: ROI merging and GMWMI intersection
//! - `gmwmi`: gray/white-matter interface construction from surfaces
//! - `tractogram`: TCK/TRK streamline I/O and weights tables
//! - `select`: streamline selection policies (forward/reverse/radial)
//! - `extractor`: the pipeline orchestrator state machine

pub mod error;
pub mod space;
pub mod volume;

pub mod freesurfer;
pub mod nifti_io;
pub mod registration;
pub mod tractogram;

pub mod gmwmi;
pub mod mask_ops;
pub mod project;
pub mod select;

pub mod extractor;

pub use error::{ExtractError, Result};
pub use extractor::{run, Extraction, ExtractorConfig, PipelineState};
pub use select::{SearchPolicy, Selection, SelectionCriterion};
pub use volume::{RegionMask, Volume};
