//! Pipeline orchestrator
//!
//! Sequences the extraction stages as an explicit state machine:
//!
//! ```text
//! Validating -> ProjectingRois -> MergingRois -> BuildingGmwmi
//!            -> Intersecting -> Selecting -> Done
//! ```
//!
//! `MergingRois` runs only in two-ROI mode; `BuildingGmwmi` and
//! `Intersecting` are skipped when the caller asserts the ROI masks are
//! already intersected. All preconditions are checked eagerly in
//! `Validating` so a doomed configuration never produces partial outputs;
//! any failure moves the machine to `Aborted` and surfaces the first
//! violated precondition.

use std::path::{Path, PathBuf};

use crate::error::{ExtractError, Result};
use crate::freesurfer::Hemisphere;
use crate::gmwmi;
use crate::mask_ops;
use crate::nifti_io;
use crate::project::{self, ProjFrac, Roi};
use crate::registration::{self, Registration, RegistrationSpec};
use crate::select::{self, SearchPolicy, SelectionCriterion};
use crate::tractogram;
use crate::volume::{RegionMask, Volume};

/// Everything a run needs. Paths are resolved eagerly during validation.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Subject identifier; must match the FreeSurfer folder name unless
    /// projection is skipped.
    pub subject: String,
    /// Tract file (.tck or .trk).
    pub tract: PathBuf,
    /// First ROI (.label, .mgz, .mgh, .nii, .nii.gz).
    pub roi1: PathBuf,
    /// Optional second ROI; when given, only streamlines connecting both
    /// ROIs are retained.
    pub roi2: Option<PathBuf>,
    /// FreeSurfer subjects directory (the parent of `<subject>/surf`).
    pub fs_dir: Option<PathBuf>,
    /// Hemisphere(s) of the ROI(s): "lh", "rh", or two comma-separated
    /// names. A single name covers both ROIs.
    pub hemi: Option<String>,
    /// Registration between anatomical and DWI space.
    pub registration: RegistrationSpec,
    /// Pre-computed GMWMI volume; rebuilt from anatomy when absent.
    pub gmwmi: Option<PathBuf>,
    /// Binarization threshold for the GMWMI volume.
    pub gmwmi_thresh: f64,
    /// DWI-space reference image defining the output grid.
    pub reference: Option<PathBuf>,
    /// Streamline search distance in mm.
    pub search_dist: f64,
    pub search_policy: SearchPolicy,
    pub projfrac: ProjFrac,
    /// Per-streamline weights (SIFT2 style), order-aligned with the tract.
    pub weights: Option<PathBuf>,
    /// Streamlines near this mask are dropped.
    pub exclude_mask: Option<PathBuf>,
    /// Streamlines must pass through this mask (waypoint).
    pub include_mask: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub out_prefix: String,
    pub overwrite: bool,
    pub skip_roi_projection: bool,
    pub skip_gmwmi_intersection: bool,
}

impl ExtractorConfig {
    /// A config with the pipeline defaults (forward search at 3 mm,
    /// projfrac -1,0,0.1, GMWMI threshold 0, overwrite on).
    pub fn new(subject: impl Into<String>, tract: impl Into<PathBuf>, roi1: impl Into<PathBuf>) -> Self {
        ExtractorConfig {
            subject: subject.into(),
            tract: tract.into(),
            roi1: roi1.into(),
            roi2: None,
            fs_dir: None,
            hemi: None,
            registration: RegistrationSpec::default(),
            gmwmi: None,
            gmwmi_thresh: 0.0,
            reference: None,
            search_dist: 3.0,
            search_policy: SearchPolicy::Forward,
            projfrac: ProjFrac::default(),
            weights: None,
            exclude_mask: None,
            include_mask: None,
            out_dir: PathBuf::from("."),
            out_prefix: String::new(),
            overwrite: true,
            skip_roi_projection: false,
            skip_gmwmi_intersection: false,
        }
    }
}

/// Orchestrator states. Conditional states are entered and immediately
/// forwarded when their skip flag is set, so every reachable path is
/// enumerable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Validating,
    ProjectingRois,
    MergingRois,
    BuildingGmwmi,
    Intersecting,
    Selecting,
    Done,
    Aborted,
}

/// Artifacts of a completed run.
#[derive(Debug)]
pub struct Extraction {
    /// Path of the extracted sub-bundle (.tck).
    pub tract_path: PathBuf,
    pub n_selected: usize,
    pub n_total: usize,
    /// Sum of retained weights, when a weights file was supplied.
    pub weight_sum: Option<f64>,
    /// Where the weight sum was written, when applicable.
    pub weight_sum_path: Option<PathBuf>,
}

/// Refuse to clobber an existing output unless overwrite is on.
fn check_overwrite(path: &Path, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        return Err(ExtractError::ConflictingConfiguration(format!(
            "{} already exists and overwrite is disabled",
            path.display()
        )));
    }
    Ok(())
}

/// Run the full extraction pipeline.
pub fn run(config: &ExtractorConfig) -> Result<Extraction> {
    let mut pipeline = Pipeline::new(config);
    match pipeline.advance_to_done() {
        Ok(extraction) => Ok(extraction),
        Err(e) => {
            pipeline.state = PipelineState::Aborted;
            tracing::error!("pipeline aborted: {}", e);
            Err(e)
        }
    }
}

pub struct Pipeline<'a> {
    config: &'a ExtractorConfig,
    state: PipelineState,
    // Artifacts owned by the orchestrator between stages
    hemis: Vec<Hemisphere>,
    registration: Registration,
    reference: Option<Volume>,
    gmwmi_path: Option<PathBuf>,
    roi_masks: Vec<RegionMask>,
    out_base: PathBuf,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a ExtractorConfig) -> Self {
        Pipeline {
            config,
            state: PipelineState::Validating,
            hemis: Vec::new(),
            registration: Registration::identity(),
            reference: None,
            gmwmi_path: None,
            roi_masks: Vec::new(),
            out_base: PathBuf::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn advance_to_done(&mut self) -> Result<Extraction> {
        loop {
            self.state = match self.state {
                PipelineState::Validating => {
                    self.validate()?;
                    PipelineState::ProjectingRois
                }
                PipelineState::ProjectingRois => {
                    self.project_rois()?;
                    if self.roi_masks.len() == 2 {
                        PipelineState::MergingRois
                    } else {
                        PipelineState::BuildingGmwmi
                    }
                }
                PipelineState::MergingRois => {
                    self.merge_rois()?;
                    PipelineState::BuildingGmwmi
                }
                PipelineState::BuildingGmwmi => {
                    if self.config.skip_gmwmi_intersection {
                        tracing::info!("skipping GMWMI intersection");
                        PipelineState::Selecting
                    } else {
                        self.ensure_gmwmi()?;
                        PipelineState::Intersecting
                    }
                }
                PipelineState::Intersecting => {
                    self.intersect_with_gmwmi()?;
                    PipelineState::Selecting
                }
                PipelineState::Selecting => {
                    let extraction = self.select_streamlines()?;
                    self.state = PipelineState::Done;
                    return Ok(extraction);
                }
                PipelineState::Done | PipelineState::Aborted => {
                    unreachable!("terminal state reached inside the run loop")
                }
            };
        }
    }

    /// Every precondition, checked before any stage executes.
    fn validate(&mut self) -> Result<()> {
        let cfg = self.config;

        // Numeric parameters first: cheapest to check, most common mistakes
        if cfg.search_dist <= 0.0 {
            return Err(ExtractError::invalid(
                "search_dist",
                format!("search distance must be > 0 mm, got {}", cfg.search_dist),
            ));
        }
        if !cfg.skip_roi_projection {
            cfg.projfrac.validate()?;
        }

        // ROI files
        for (role, path) in [("roi1", Some(&cfg.roi1)), ("roi2", cfg.roi2.as_ref())] {
            let Some(path) = path else { continue };
            if !path.exists() {
                return Err(ExtractError::InputNotFound(path.clone()));
            }
            if !project::is_supported_roi(path) {
                return Err(ExtractError::UnsupportedFileType {
                    role,
                    path: path.clone(),
                });
            }
        }

        // Tract file
        if !cfg.tract.exists() {
            return Err(ExtractError::InputNotFound(cfg.tract.clone()));
        }
        if !tractogram::is_supported_tract(&cfg.tract) {
            return Err(ExtractError::UnsupportedFileType {
                role: "tractogram",
                path: cfg.tract.clone(),
            });
        }

        // Anatomy and hemispheres, only needed for projection
        if !cfg.skip_roi_projection {
            let fs_dir = cfg.fs_dir.as_ref().ok_or_else(|| {
                ExtractError::MissingPrecursor(
                    "ROI projection requires a FreeSurfer directory (fs_dir)".into(),
                )
            })?;
            let surf_dir = fs_dir.join(&cfg.subject).join("surf");
            if !surf_dir.is_dir() {
                return Err(ExtractError::MissingPrecursor(format!(
                    "{} does not look like a valid FreeSurfer subject directory (no surf/)",
                    fs_dir.join(&cfg.subject).display()
                )));
            }
            let hemi = cfg.hemi.as_deref().ok_or_else(|| {
                ExtractError::invalid("hemi", "hemisphere is required when projecting ROIs")
            })?;
            let names: Vec<&str> = hemi.split(',').collect();
            if names.len() > 2 {
                return Err(ExtractError::invalid(
                    "hemi",
                    format!("expected at most two hemisphere names, got '{}'", hemi),
                ));
            }
            self.hemis = names
                .iter()
                .map(|n| Hemisphere::parse(n.trim()))
                .collect::<Result<_>>()?;
        }

        // Registration: direction conflicts and format surface here
        self.registration = registration::resolve(&cfg.registration)?;

        // GMWMI: a specified-but-missing file is recoverable
        self.gmwmi_path = cfg.gmwmi.clone();
        if let Some(g) = &self.gmwmi_path {
            if !g.exists() {
                tracing::warn!(
                    "GMWMI {} was specified but not found; a new one will be built from the anatomical inputs",
                    g.display()
                );
                self.gmwmi_path = None;
            }
        }
        if self.gmwmi_path.is_none() && cfg.fs_dir.is_none() && !cfg.skip_gmwmi_intersection {
            return Err(ExtractError::MissingPrecursor(
                "a GMWMI cannot be built without a FreeSurfer directory (fs_dir)".into(),
            ));
        }

        // Auxiliary inputs
        for path in [&cfg.weights, &cfg.exclude_mask, &cfg.include_mask].into_iter().flatten() {
            if !path.exists() {
                return Err(ExtractError::InputNotFound(path.clone()));
            }
        }
        for (role, path) in [
            ("exclude mask", &cfg.exclude_mask),
            ("include mask", &cfg.include_mask),
        ] {
            if let Some(p) = path {
                let name = p.to_string_lossy();
                if !(name.ends_with(".nii") || name.ends_with(".nii.gz")) {
                    return Err(ExtractError::UnsupportedFileType {
                        role,
                        path: p.clone(),
                    });
                }
            }
        }

        // Reference grid, when any stage needs one
        let tract_is_trk = cfg.tract.to_string_lossy().ends_with(".trk");
        let needs_reference = !cfg.skip_roi_projection
            || (!cfg.skip_gmwmi_intersection && self.gmwmi_path.is_none())
            || tract_is_trk;
        match &cfg.reference {
            Some(r) => {
                if !r.exists() {
                    return Err(ExtractError::InputNotFound(r.clone()));
                }
                self.reference = Some(nifti_io::read_volume(r)?);
            }
            None if needs_reference => {
                return Err(ExtractError::MissingPrecursor(
                    "a DWI reference image is required for projection, GMWMI construction, or TRK input"
                        .into(),
                ));
            }
            None => {}
        }

        // Output directory must exist; the subject folder is created
        if !cfg.out_dir.is_dir() {
            return Err(ExtractError::InputNotFound(cfg.out_dir.clone()));
        }
        let subject_dir = cfg.out_dir.join(&cfg.subject);
        std::fs::create_dir_all(&subject_dir).map_err(|e| ExtractError::io(&subject_dir, e))?;

        let mut prefix = cfg.out_prefix.clone();
        if !prefix.is_empty() && !prefix.ends_with('_') {
            prefix.push('_');
        }
        self.out_base = subject_dir.join(prefix);

        // Final artifact path is known now; fail fast on overwrite
        check_overwrite(&self.out_path("extracted.tck"), cfg.overwrite)?;

        tracing::info!("configuration validated for subject {}", cfg.subject);
        Ok(())
    }

    /// Output path with the subject/prefix naming convention.
    fn out_path(&self, name: &str) -> PathBuf {
        let mut s = self.out_base.as_os_str().to_owned();
        s.push(name);
        PathBuf::from(s)
    }

    fn write_mask_artifact(&self, name: &str, mask: &RegionMask) -> Result<()> {
        let path = self.out_path(name);
        check_overwrite(&path, self.config.overwrite)?;
        nifti_io::write_mask(&path, mask)
    }

    fn project_rois(&mut self) -> Result<()> {
        let cfg = self.config;
        let roi_paths: Vec<&PathBuf> =
            std::iter::once(&cfg.roi1).chain(cfg.roi2.iter()).collect();

        for (i, path) in roi_paths.iter().enumerate() {
            let roi = project::load_roi(path)?;
            let mask = if cfg.skip_roi_projection {
                tracing::info!("skipping projection for {}", path.display());
                match roi {
                    Roi::Volume(mask) => mask,
                    Roi::Surface(_) => {
                        return Err(ExtractError::ConflictingConfiguration(format!(
                            "{} is a surface label; it cannot be used as-is when ROI projection is skipped",
                            path.display()
                        )))
                    }
                }
            } else {
                tracing::info!("projecting ROI{} ({})", i + 1, path.display());
                // A single hemisphere name covers both ROIs
                let hemi = if i < self.hemis.len() {
                    self.hemis[i]
                } else {
                    *self.hemis.last().expect("validated nonempty")
                };
                let fs_sub_dir = cfg
                    .fs_dir
                    .as_ref()
                    .expect("validated")
                    .join(&cfg.subject);
                let reference = self.reference.as_ref().expect("validated");
                let mask = project::project_roi(
                    &roi,
                    &fs_sub_dir,
                    hemi,
                    cfg.projfrac,
                    &self.registration,
                    reference,
                )?;
                self.write_mask_artifact(&format!("roi{}_projected.nii.gz", i + 1), &mask)?;
                mask
            };
            self.roi_masks.push(mask);
        }
        Ok(())
    }

    /// Union the two projected masks for provenance; selection still sees
    /// the per-ROI masks (a two-ROI criterion must hit both).
    fn merge_rois(&mut self) -> Result<()> {
        tracing::info!("merging ROIs");
        let merged = mask_ops::merge_rois(&self.roi_masks[0], &self.roi_masks[1])?;
        let path = self.out_path("rois_merged.nii.gz");
        check_overwrite(&path, self.config.overwrite)?;
        let labels = Volume {
            data: merged.labels.iter().map(|&v| v as f64).collect(),
            dims: merged.mask.dims,
            voxel_size: merged.mask.voxel_size,
            affine: merged.mask.affine,
        };
        nifti_io::write_volume(&path, &labels)
    }

    fn ensure_gmwmi(&mut self) -> Result<()> {
        if self.gmwmi_path.is_none() {
            tracing::info!("building GMWMI from anatomical surfaces");
            let fs_sub_dir = self
                .config
                .fs_dir
                .as_ref()
                .expect("validated")
                .join(&self.config.subject);
            let reference = self.reference.as_ref().ok_or_else(|| {
                ExtractError::MissingPrecursor("GMWMI construction requires a reference image".into())
            })?;
            let mask = gmwmi::build_gmwmi(
                &fs_sub_dir,
                &self.registration,
                reference,
                self.config.gmwmi_thresh,
            )?;
            let path = self.out_path("gmwmi.nii.gz");
            check_overwrite(&path, self.config.overwrite)?;
            nifti_io::write_mask(&path, &mask)?;
            self.gmwmi_path = Some(path);
        }
        Ok(())
    }

    fn intersect_with_gmwmi(&mut self) -> Result<()> {
        tracing::info!("intersecting ROI(s) with GMWMI");
        let gmwmi_path = self.gmwmi_path.as_ref().expect("set by BuildingGmwmi");
        let gmwmi_mask = nifti_io::read_volume(gmwmi_path)?.binarize(self.config.gmwmi_thresh);

        let mut intersected = Vec::with_capacity(self.roi_masks.len());
        for (i, mask) in self.roi_masks.iter().enumerate() {
            let out = mask_ops::intersect_gmwmi(mask, &gmwmi_mask)?;
            self.write_mask_artifact(&format!("roi{}_intersected.nii.gz", i + 1), &out)?;
            intersected.push(out);
        }
        self.roi_masks = intersected;
        Ok(())
    }

    fn select_streamlines(&mut self) -> Result<Extraction> {
        let cfg = self.config;
        tracing::info!("extracting the sub-bundle from {}", cfg.tract.display());

        let tract = tractogram::read_tractogram(&cfg.tract, self.reference.as_ref())?;
        let weights = match &cfg.weights {
            Some(p) => Some(tractogram::read_weights(p)?),
            None => None,
        };
        let exclude = match &cfg.exclude_mask {
            Some(p) => Some(nifti_io::read_mask(p)?),
            None => None,
        };
        let include = match &cfg.include_mask {
            Some(p) => Some(nifti_io::read_mask(p)?),
            None => None,
        };

        // Masks must live on the declared reference grid when one exists
        if let Some(reference) = &self.reference {
            let ref_mask = RegionMask::zeros(reference.dims, reference.voxel_size, reference.affine);
            for m in &self.roi_masks {
                ref_mask.require_same_grid(m, "inclusion mask vs reference")?;
            }
        }

        let mask_refs: Vec<&RegionMask> = self.roi_masks.iter().collect();
        let selection = select::select(
            &tract,
            &mask_refs,
            SelectionCriterion {
                policy: cfg.search_policy,
                search_dist: cfg.search_dist,
            },
            exclude.as_ref(),
            include.as_ref(),
            weights.as_deref(),
        )?;

        let tract_path = self.out_path("extracted.tck");
        check_overwrite(&tract_path, cfg.overwrite)?;
        tractogram::write_tck(&tract_path, &selection.tractogram)?;

        let weight_sum_path = match selection.weight_sum {
            Some(sum) => {
                let path = self.out_path("weight_sum.txt");
                check_overwrite(&path, cfg.overwrite)?;
                std::fs::write(&path, format!("{}\n", sum)).map_err(|e| ExtractError::io(&path, e))?;
                Some(path)
            }
            None => None,
        };

        tracing::info!(
            "done: {} of {} streamlines written to {}",
            selection.tractogram.len(),
            tract.len(),
            tract_path.display()
        );
        Ok(Extraction {
            tract_path,
            n_selected: selection.tractogram.len(),
            n_total: tract.len(),
            weight_sum: selection.weight_sum,
            weight_sum_path,
        })
    }
}
