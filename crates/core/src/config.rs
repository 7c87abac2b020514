//! Pipeline configuration, loaded from a single TOML file.
//!
//! Every field has a default, so a minimal file only names the inputs:
//!
//! ```toml
//! [paths]
//! raw_checklists = "data/ebd_checklists.csv"
//! raw_observations = "data/ebd_observations.csv"
//!
//! [covariates]
//! elevation = { path = "rasters/srtm.tif", epsg = 4326 }
//! ```

use crate::error::{Error, Result};
use crate::vector::StudyAreaDef;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound on occupancy covariates searched exhaustively (2^8 submodels)
pub const MAX_OCC_COVARIATES: usize = 8;

/// Upper bound on visits per site; GOF enumerates all 2^J histories
pub const MAX_VISITS: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub study_area: StudyAreaDef,
    pub ingest: IngestConfig,
    pub expertise: ExpertiseConfig,
    pub covariates: CovariatesConfig,
    pub thinning: ThinningConfig,
    pub occupancy: OccupancyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_checklists: PathBuf,
    pub raw_observations: PathBuf,
    /// Root for every intermediate and output file
    pub work_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_checklists: PathBuf::from("data/checklists.csv"),
            raw_observations: PathBuf::from("data/observations.csv"),
            work_dir: PathBuf::from("work"),
        }
    }
}

/// Stage 1 filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub protocols: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Julian-day window `[first, last]`; wraps the new year when first > last
    pub season: Option<[u32; 2]>,
    pub max_duration_min: f64,
    pub max_distance_km: f64,
    pub max_observers: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            protocols: vec!["Stationary".into(), "Traveling".into()],
            start_date: None,
            end_date: None,
            season: None,
            max_duration_min: 300.0,
            max_distance_km: 5.0,
            max_observers: 10,
        }
    }
}

/// Stage 2 model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpertiseConfig {
    /// Observers with fewer single-observer checklists get no score
    pub min_checklists: usize,
    /// Add land-cover class dummies at the checklist location
    pub landcover_effects: bool,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ExpertiseConfig {
    fn default() -> Self {
        Self {
            min_checklists: 10,
            landcover_effects: true,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// A raster input and the EPSG code of its CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterSource {
    pub path: PathBuf,
    #[serde(default = "default_source_epsg")]
    pub epsg: u32,
}

fn default_source_epsg() -> u32 {
    4326
}

/// A named land-cover class grouping raw raster codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandcoverClass {
    pub name: String,
    pub codes: Vec<i32>,
}

/// Stage 3 inputs and reference grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovariatesConfig {
    pub target_epsg: u32,
    /// Reference grid resolution in target CRS units
    pub cell_size: f64,
    /// Grid extent `[min_x, min_y, max_x, max_y]` in the target CRS; derived
    /// from the study area when absent
    pub extent: Option<[f64; 4]>,
    pub elevation: Option<RasterSource>,
    /// CRS of the monthly climate stacks
    pub climate_epsg: u32,
    /// Monthly mean temperature, January first
    pub tavg: Vec<PathBuf>,
    /// Monthly precipitation, January first
    pub prec: Vec<PathBuf>,
    pub tmin: Option<Vec<PathBuf>>,
    pub tmax: Option<Vec<PathBuf>>,
    pub landcover: Option<RasterSource>,
    pub landcover_classes: Vec<LandcoverClass>,
}

impl Default for CovariatesConfig {
    fn default() -> Self {
        Self {
            target_epsg: 32643,
            cell_size: 1000.0,
            extent: None,
            elevation: None,
            climate_epsg: 4326,
            tavg: Vec::new(),
            prec: Vec::new(),
            tmin: None,
            tmax: None,
            landcover: None,
            landcover_classes: Vec::new(),
        }
    }
}

/// Stage 4 thinning and buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinningConfig {
    /// Thinning cell size in target CRS units
    pub cell_size: f64,
    pub seed: u64,
    /// Radius of the covariate buffer around each site, target CRS units
    pub buffer_radius: f64,
    pub max_visits: usize,
    pub min_visits: usize,
}

impl Default for ThinningConfig {
    fn default() -> Self {
        Self {
            cell_size: 1000.0,
            seed: 42,
            buffer_radius: 2500.0,
            max_visits: 10,
            min_visits: 2,
        }
    }
}

/// How coefficients of models lacking a term enter the average
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AveragingMethod {
    /// Average over the models that contain the term, weights renormalized
    #[default]
    Conditional,
    /// Average over all top models, absent terms counted as zero
    Full,
}

/// Stage 5 model-fitting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    /// Species to fit; empty means every species with enough detection sites
    pub species: Vec<String>,
    pub min_detection_sites: usize,
    pub det_covariates: Vec<String>,
    /// Empty means every site covariate column
    pub occ_covariates: Vec<String>,
    pub delta_threshold: f64,
    pub averaging: AveragingMethod,
    pub gof_simulations: usize,
    pub seed: u64,
    /// 0 = all cores, 1 = sequential
    pub threads: usize,
    pub max_iterations: usize,
    pub gradient_tolerance: f64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            species: Vec::new(),
            min_detection_sites: 10,
            det_covariates: vec![
                "duration_minutes".into(),
                "effort_distance_km".into(),
                "time_start_min".into(),
                "expertise".into(),
            ],
            occ_covariates: Vec::new(),
            delta_threshold: 2.0,
            averaging: AveragingMethod::Conditional,
            gof_simulations: 100,
            seed: 42,
            threads: 0,
            max_iterations: 500,
            gradient_tolerance: 1e-5,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let occ = &self.occupancy;
        if occ.occ_covariates.len() > MAX_OCC_COVARIATES {
            return Err(Error::Config(format!(
                "occupancy.occ_covariates lists {} covariates; at most {} are searched",
                occ.occ_covariates.len(),
                MAX_OCC_COVARIATES
            )));
        }
        if !(occ.delta_threshold > 0.0) {
            return Err(Error::Config(format!(
                "occupancy.delta_threshold must be positive, got {}",
                occ.delta_threshold
            )));
        }

        let thin = &self.thinning;
        if thin.max_visits == 0 || thin.max_visits > MAX_VISITS {
            return Err(Error::Config(format!(
                "thinning.max_visits must be in 1..={}, got {}",
                MAX_VISITS, thin.max_visits
            )));
        }
        if thin.min_visits > thin.max_visits {
            return Err(Error::Config(format!(
                "thinning.min_visits ({}) exceeds max_visits ({})",
                thin.min_visits, thin.max_visits
            )));
        }
        if !(thin.cell_size > 0.0) || !(thin.buffer_radius >= 0.0) {
            return Err(Error::Config(
                "thinning.cell_size must be positive and buffer_radius non-negative".into(),
            ));
        }

        let cov = &self.covariates;
        if !(cov.cell_size > 0.0) {
            return Err(Error::Config(format!(
                "covariates.cell_size must be positive, got {}",
                cov.cell_size
            )));
        }
        let stacks = [
            ("tavg", Some(&cov.tavg)),
            ("prec", Some(&cov.prec)),
            ("tmin", cov.tmin.as_ref()),
            ("tmax", cov.tmax.as_ref()),
        ];
        for (name, stack) in stacks {
            if let Some(files) = stack {
                if !files.is_empty() && files.len() != 12 {
                    return Err(Error::Config(format!(
                        "covariates.{} needs 12 monthly rasters, got {}",
                        name,
                        files.len()
                    )));
                }
            }
        }
        if cov.tmin.is_some() != cov.tmax.is_some() {
            return Err(Error::Config(
                "covariates.tmin and covariates.tmax must be given together".into(),
            ));
        }

        if let Some((start, end)) = self.ingest.start_date.zip(self.ingest.end_date) {
            if start > end {
                return Err(Error::Config(format!(
                    "ingest.start_date {} is after end_date {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    pub fn paths(&self) -> PipelinePaths {
        PipelinePaths::new(&self.paths.work_dir)
    }
}

/// File layout under the work directory
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePaths {
    root: PathBuf,
}

impl PipelinePaths {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: work_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checklists(&self) -> PathBuf {
        self.root.join("checklists.csv")
    }

    pub fn detections(&self) -> PathBuf {
        self.root.join("detections.csv")
    }

    pub fn ingest_report(&self) -> PathBuf {
        self.root.join("ingest_report.json")
    }

    pub fn observer_scores(&self) -> PathBuf {
        self.root.join("observer_scores.csv")
    }

    pub fn expertise_fit(&self) -> PathBuf {
        self.root.join("expertise_fit.json")
    }

    pub fn covariates_dir(&self) -> PathBuf {
        self.root.join("covariates")
    }

    pub fn covariate_layer(&self, name: &str) -> PathBuf {
        self.covariates_dir().join(format!("{}.tif", name))
    }

    pub fn sites(&self) -> PathBuf {
        self.root.join("sites.csv")
    }

    pub fn visits(&self) -> PathBuf {
        self.root.join("visits.csv")
    }

    /// Buffer covariates per site, keyed by `site_id`
    pub fn site_covariates(&self) -> PathBuf {
        self.root.join("site_covariates.csv")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn species_result(&self, species: &str) -> PathBuf {
        self.results_dir()
            .join(format!("{}.json", file_stem(species)))
    }

    /// Species attempted by the last fitting run, in order
    pub fn species_index(&self) -> PathBuf {
        self.results_dir().join("species.json")
    }

    pub fn summary_dir(&self) -> PathBuf {
        self.root.join("summary")
    }

    /// Create the work directory tree
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.covariates_dir(),
            self.results_dir(),
            self.summary_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// File-system safe name for a species
pub fn file_stem(species: &str) -> String {
    species
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
