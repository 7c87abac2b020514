//! Pipeline stages: read the previous stage's files, run the analysis,
//! write this stage's files.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use birdocc_algorithms::covariates::{
    aspect, bioclim, northness, reclassify_landcover, slope, warp, Resampling,
};
use birdocc_algorithms::expertise::{fit_expertise, score_map, LandcoverLookup};
use birdocc_algorithms::ingest::{clean_checklists, IngestReport};
use birdocc_algorithms::occupancy::{
    build_detection_matrix, fit_all_species, MaximumLikelihood, SpeciesSettings,
};
use birdocc_algorithms::sampling::{
    attach_expertise, extract_buffer_covariates, thin_localities, LandcoverLayer,
};
use birdocc_algorithms::summary::{collect_results, write_summary, ResultStore, SummaryReport};
use birdocc_core::io::{
    read_geotiff, read_json, read_records, write_geotiff, write_json, write_records,
    CovariateTable,
};
use birdocc_core::records::{
    Checklist, Detection, ObserverScore, RawChecklist, RawObservation, VisitRecord,
};
use birdocc_core::{
    CoordTransform, GridSpec, PipelineConfig, PipelinePaths, Raster, RasterStack, StudyArea, CRS,
};

/// Name of the reclassified land-cover layer in the covariate directory
const LANDCOVER_LAYER: &str = "landcover";

/// Pixel size of one heatmap cell in the summary figures
const HEATMAP_CELL_PX: usize = 24;

// ─── Helpers ────────────────────────────────────────────────────────────

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} {elapsed_precise} {msg}")
    {
        pb.set_style(style);
    }
    pb
}

fn read_table<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>> {
    let pb = spinner(&format!("Reading {}...", what));
    let rows: Vec<T> = read_records(path)
        .with_context(|| format!("Failed to read {} from {}", what, path.display()))?;
    pb.finish_and_clear();
    info!("{}: {} rows", what, rows.len());
    Ok(rows)
}

fn write_table<T: serde::Serialize>(path: &Path, rows: &[T], what: &str) -> Result<()> {
    let pb = spinner(&format!("Writing {}...", what));
    write_records(path, rows)
        .with_context(|| format!("Failed to write {} to {}", what, path.display()))?;
    pb.finish_and_clear();
    info!("{} rows -> {}", rows.len(), path.display());
    Ok(())
}

pub fn read_raster(path: &Path) -> Result<Raster<f64>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> = read_geotiff(path)
        .with_context(|| format!("Failed to read raster {}", path.display()))?;
    pb.finish_and_clear();
    info!("{}: {} x {}", path.display(), raster.cols(), raster.rows());
    Ok(raster)
}

fn write_layer(paths: &PipelinePaths, name: &str, raster: &Raster<f64>) -> Result<()> {
    let path = paths.covariate_layer(name);
    write_geotiff(raster, &path)
        .with_context(|| format!("Failed to write layer {}", path.display()))?;
    info!("layer {} -> {}", name, path.display());
    Ok(())
}

fn target_crs(config: &PipelineConfig) -> CRS {
    CRS::from_epsg(config.covariates.target_epsg)
}

// ─── Stage 1 ────────────────────────────────────────────────────────────

pub fn ingest(config: &PipelineConfig) -> Result<IngestReport> {
    let paths = config.paths();
    paths.create_dirs().context("Failed to create work directory")?;

    let raw: Vec<RawChecklist> = read_table(&config.paths.raw_checklists, "raw checklists")?;
    let observations: Vec<RawObservation> =
        read_table(&config.paths.raw_observations, "raw observations")?;
    let area = StudyArea::from_def(&config.study_area).context("Invalid study area")?;

    let out = clean_checklists(&raw, &observations, &config.ingest, &area)
        .context("Checklist cleaning failed")?;
    write_table(&paths.checklists(), &out.checklists, "checklists")?;
    write_table(&paths.detections(), &out.detections, "detections")?;
    write_json(paths.ingest_report(), &out.report).context("Failed to write ingest report")?;
    Ok(out.report)
}

// ─── Stage 2 ────────────────────────────────────────────────────────────

pub fn expertise(config: &PipelineConfig) -> Result<usize> {
    let paths = config.paths();
    let checklists: Vec<Checklist> = read_table(&paths.checklists(), "checklists")?;
    let detections: Vec<Detection> = read_table(&paths.detections(), "detections")?;

    let class_names: Vec<String> = config
        .covariates
        .landcover_classes
        .iter()
        .map(|c| c.name.clone())
        .collect();
    let landcover = match (&config.covariates.landcover, config.expertise.landcover_effects) {
        (Some(source), true) if !class_names.is_empty() => {
            let raw = read_raster(&source.path)?;
            let classes = reclassify_landcover(&raw, &config.covariates.landcover_classes)?;
            let to_grid = CoordTransform::new(&CRS::wgs84(), &CRS::from_epsg(source.epsg))
                .context("Land-cover CRS is not supported")?;
            Some((classes, to_grid))
        }
        (_, true) => {
            warn!("expertise: no land-cover raster or classes configured, fitting without land cover");
            None
        }
        _ => None,
    };
    let lookup = landcover.as_ref().map(|(classes, to_grid)| LandcoverLookup {
        classes,
        class_names: &class_names,
        to_grid: *to_grid,
    });

    let pb = spinner("Fitting expertise model...");
    let fit = fit_expertise(&checklists, &detections, &config.expertise, lookup.as_ref())
        .context("Expertise model failed")?;
    pb.finish_and_clear();
    if !fit.converged {
        warn!(
            "expertise model stopped after {} iterations without converging",
            fit.iterations
        );
    }

    write_table(&paths.observer_scores(), &fit.scores, "observer scores")?;
    write_json(paths.expertise_fit(), &fit).context("Failed to write expertise fit")?;
    Ok(fit.scores.len())
}

// ─── Stage 3 ────────────────────────────────────────────────────────────

/// Reference grid: the configured extent, else the study-area box in the
/// target CRS.
fn reference_grid(config: &PipelineConfig) -> Result<GridSpec> {
    let cov = &config.covariates;
    let crs = target_crs(config);
    let bounds = match cov.extent {
        Some([min_x, min_y, max_x, max_y]) => (min_x, min_y, max_x, max_y),
        None => {
            let area = StudyArea::from_def(&config.study_area)?;
            let Some((min_lon, min_lat, max_lon, max_lat)) = area.bounds() else {
                bail!("covariates.extent or a study_area boundary is required to build the grid");
            };
            let to_grid = CoordTransform::new(&CRS::wgs84(), &crs)?;
            [
                (min_lon, min_lat),
                (min_lon, max_lat),
                (max_lon, min_lat),
                (max_lon, max_lat),
            ]
            .iter()
            .map(|&(lon, lat)| to_grid.apply(lon, lat))
            .fold(
                (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                |(x0, y0, x1, y1), (x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            )
        }
    };
    Ok(GridSpec::covering(bounds, cov.cell_size, crs)?)
}

fn warp_monthly(files: &[std::path::PathBuf], crs: &CRS, grid: &GridSpec) -> Result<Vec<Raster<f64>>> {
    files
        .iter()
        .map(|path| {
            let src = read_raster(path)?;
            warp(&src, crs, grid, Resampling::Bilinear)
                .with_context(|| format!("Failed to warp {}", path.display()))
        })
        .collect()
}

pub fn covariates(config: &PipelineConfig) -> Result<Vec<String>> {
    let paths = config.paths();
    paths.create_dirs().context("Failed to create work directory")?;
    let cov = &config.covariates;
    let grid = reference_grid(config)?;
    info!(
        "reference grid {} x {} at {} m, EPSG:{}",
        grid.cols, grid.rows, cov.cell_size, cov.target_epsg
    );

    let mut written = Vec::new();
    let mut emit = |name: &str, raster: &Raster<f64>| -> Result<()> {
        write_layer(&paths, name, raster)?;
        written.push(name.to_string());
        Ok(())
    };

    if let Some(source) = &cov.elevation {
        let dem = warp(
            &read_raster(&source.path)?,
            &CRS::from_epsg(source.epsg),
            &grid,
            Resampling::Bilinear,
        )
        .context("Failed to warp elevation")?;
        let aspect_deg = aspect(&dem)?;
        emit("elevation", &dem)?;
        emit("slope", &slope(&dem)?)?;
        emit("northness", &northness(&aspect_deg))?;
    }

    if !cov.tavg.is_empty() && !cov.prec.is_empty() {
        let crs = CRS::from_epsg(cov.climate_epsg);
        let tavg = warp_monthly(&cov.tavg, &crs, &grid)?;
        let prec = warp_monthly(&cov.prec, &crs, &grid)?;
        let extremes = match (&cov.tmin, &cov.tmax) {
            (Some(tmin), Some(tmax)) => Some((
                warp_monthly(tmin, &crs, &grid)?,
                warp_monthly(tmax, &crs, &grid)?,
            )),
            _ => None,
        };
        let pb = spinner("Computing bioclimatic indices...");
        let bio = bioclim(
            &tavg,
            &prec,
            extremes.as_ref().map(|(lo, hi)| (lo.as_slice(), hi.as_slice())),
        )
        .context("Bioclimatic indices failed")?;
        pb.finish_and_clear();
        for (name, layer) in bio.layers() {
            emit(name, layer)?;
        }
    }

    if let Some(source) = &cov.landcover {
        let raw = warp(
            &read_raster(&source.path)?,
            &CRS::from_epsg(source.epsg),
            &grid,
            Resampling::Mode,
        )
        .context("Failed to warp land cover")?;
        let classes = reclassify_landcover(&raw, &cov.landcover_classes)?;
        emit(LANDCOVER_LAYER, &classes)?;
    }

    if written.is_empty() {
        warn!("no covariate sources configured");
    }
    Ok(written)
}

// ─── Stage 4 ────────────────────────────────────────────────────────────

/// Continuous layers of the covariate directory, by name
fn load_stack(paths: &PipelinePaths, crs: &CRS) -> Result<(Option<RasterStack>, Option<Raster<f64>>)> {
    let dir = paths.covariates_dir();
    let mut names: Vec<String> = std::fs::read_dir(&dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|e| e == "tif"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort();

    let mut stack: Option<RasterStack> = None;
    let mut landcover = None;
    for name in names {
        let layer = read_raster(&paths.covariate_layer(&name))?;
        if name == LANDCOVER_LAYER {
            landcover = Some(layer);
            continue;
        }
        let stack = stack.get_or_insert_with(|| RasterStack::new(GridSpec::of(&layer, crs.clone())));
        stack
            .push(name.as_str(), layer)
            .with_context(|| format!("Layer {} is not on the reference grid", name))?;
    }
    Ok((stack, landcover))
}

pub fn thin(config: &PipelineConfig) -> Result<(usize, usize)> {
    let paths = config.paths();
    let checklists: Vec<Checklist> = read_table(&paths.checklists(), "checklists")?;
    let scores: Vec<ObserverScore> = if paths.observer_scores().exists() {
        read_table(&paths.observer_scores(), "observer scores")?
    } else {
        warn!("no observer scores found, expertise set to 0");
        Vec::new()
    };

    let crs = target_crs(config);
    let to_grid = CoordTransform::new(&CRS::wgs84(), &crs).context("Target CRS is not supported")?;
    let thinned = thin_localities(&checklists, &to_grid, &config.thinning)?;
    if thinned.sites.is_empty() {
        bail!("no locality has at least {} checklists", config.thinning.min_visits);
    }
    let visits = attach_expertise(&thinned, &score_map(&scores));

    let (stack, landcover) = load_stack(&paths, &crs)?;
    let class_names: Vec<String> = config
        .covariates
        .landcover_classes
        .iter()
        .map(|c| c.name.clone())
        .collect();
    let stack = match (stack, &landcover) {
        (Some(stack), _) => stack,
        (None, Some(lc)) => RasterStack::new(GridSpec::of(lc, crs.clone())),
        (None, None) => bail!(
            "no covariate layers in {}; run the covariates stage first",
            paths.covariates_dir().display()
        ),
    };
    let layer = landcover.as_ref().map(|classes| LandcoverLayer {
        classes,
        names: &class_names,
    });

    let pb = spinner("Extracting buffer covariates...");
    let table = extract_buffer_covariates(&thinned.sites, &stack, layer, config.thinning.buffer_radius)?;
    pb.finish_and_clear();

    write_table(&paths.sites(), &thinned.sites, "sites")?;
    write_table(&paths.visits(), &visits, "visits")?;
    table
        .write(paths.site_covariates())
        .context("Failed to write site covariates")?;
    Ok((thinned.sites.len(), visits.len()))
}

// ─── Stage 5 ────────────────────────────────────────────────────────────

/// Species with detections at `min_sites` or more retained sites, by name
fn eligible_species(
    detected: &BTreeMap<String, HashSet<&str>>,
    site_of: &HashMap<&str, &str>,
    min_sites: usize,
) -> Vec<String> {
    detected
        .iter()
        .filter(|(_, ids)| {
            let sites: HashSet<&str> = ids.iter().filter_map(|id| site_of.get(id).copied()).collect();
            sites.len() >= min_sites
        })
        .map(|(name, _)| name.clone())
        .collect()
}

pub fn fit(config: &PipelineConfig) -> Result<(usize, usize)> {
    let paths = config.paths();
    let occ = &config.occupancy;
    let visits: Vec<VisitRecord> = read_table(&paths.visits(), "visits")?;
    let detections: Vec<Detection> = read_table(&paths.detections(), "detections")?;
    let table = CovariateTable::read(paths.site_covariates(), "site_id")
        .context("Failed to read site covariates")?;

    let site_of: HashMap<&str, &str> = visits
        .iter()
        .map(|v| (v.checklist_id.as_str(), v.site_id.as_str()))
        .collect();
    let mut detected: BTreeMap<String, HashSet<&str>> = BTreeMap::new();
    for d in &detections {
        if let Some((id, _)) = site_of.get_key_value(d.checklist_id.as_str()) {
            detected.entry(d.species.clone()).or_default().insert(*id);
        }
    }

    let species = if occ.species.is_empty() {
        let all = eligible_species(&detected, &site_of, occ.min_detection_sites);
        info!(
            "{} of {} detected species reach {} detection sites",
            all.len(),
            detected.len(),
            occ.min_detection_sites
        );
        all
    } else {
        occ.species.clone()
    };
    if species.is_empty() {
        bail!("no species to fit");
    }

    let mut store =
        ResultStore::create(&paths.results_dir()).context("Failed to create results directory")?;
    write_json(paths.species_index(), &species).context("Failed to write species index")?;

    let settings = SpeciesSettings::from_config(occ);
    let fitter = MaximumLikelihood::from_config(occ);
    let none = HashSet::new();
    let pb = progress_bar(species.len());
    let mut write_error: Option<anyhow::Error> = None;
    let batch = fit_all_species(
        &species,
        |name| {
            pb.set_message(name.to_string());
            let ids = detected.get(name).unwrap_or(&none);
            build_detection_matrix(
                name,
                &visits,
                ids,
                &table,
                &occ.det_covariates,
                &occ.occ_covariates,
            )
        },
        &fitter,
        &settings,
        |name, outcome| {
            pb.inc(1);
            if let Err(e) = store.save(name, outcome) {
                warn!("{}: result not saved: {}", name, e);
                if write_error.is_none() {
                    let path = store.result_path(name);
                    write_error = Some(
                        anyhow::Error::from(e)
                            .context(format!("Failed to write {}", path.display())),
                    );
                }
            }
        },
    );
    pb.finish_and_clear();
    if let Some(e) = write_error {
        return Err(e);
    }
    info!(
        "{} species fitted, {} failed; results in {}",
        batch.results.len(),
        batch.failures.len(),
        paths.results_dir().display()
    );
    Ok((batch.results.len(), batch.failures.len()))
}

// ─── Stage 6 ────────────────────────────────────────────────────────────

pub fn summarize(config: &PipelineConfig) -> Result<SummaryReport> {
    let paths = config.paths();
    let species: Vec<String> = match read_json(paths.species_index()) {
        Ok(list) => list,
        Err(e) if !config.occupancy.species.is_empty() => {
            warn!("no species index ({}), using the configured species", e);
            config.occupancy.species.clone()
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!(
                    "Failed to read {}; run the fit stage first",
                    paths.species_index().display()
                )
            })
        }
    };

    let collected = collect_results(&paths.results_dir(), &species);
    let report = write_summary(&collected, &paths.summary_dir(), HEATMAP_CELL_PX)
        .context("Failed to write summary")?;
    Ok(report)
}
