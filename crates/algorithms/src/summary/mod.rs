//! Result aggregation across species
//!
//! Per-species result files are collected into long-format tables
//! (coefficients, importances, model rankings, goodness of fit, failures)
//! and two species × predictor heatmaps.

mod figures;
mod tables;

pub use figures::{coefficient_matrix, importance_matrix, write_figures, PredictorMatrix};
pub use tables::{
    coefficient_rows, failure_rows, gof_rows, importance_rows, selection_rows, species_rows,
    CoefficientRow, FailureRow, GofRow, ImportanceRow, SelectionRow, SpeciesRow,
};

use crate::occupancy::SpeciesResult;
use birdocc_core::config::file_stem;
use birdocc_core::io::{read_json, write_json, write_records};
use birdocc_core::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the failure record the fitting stage leaves next to the results
pub const FAILURES_FILE: &str = "failures.json";

/// What was found for one requested species
#[derive(Debug, Clone, PartialEq)]
pub enum SpeciesOutcome {
    Fitted(Box<SpeciesResult>),
    /// No usable result; `reason` is the recorded fit failure or the read error
    Missing { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct CollectedResults {
    /// In the requested order
    pub entries: Vec<(String, SpeciesOutcome)>,
}

impl CollectedResults {
    pub fn fitted(&self) -> impl Iterator<Item = &SpeciesResult> {
        self.entries.iter().filter_map(|(_, o)| match o {
            SpeciesOutcome::Fitted(r) => Some(r.as_ref()),
            SpeciesOutcome::Missing { .. } => None,
        })
    }

    pub fn missing(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(s, o)| match o {
            SpeciesOutcome::Missing { reason } => Some((s.as_str(), reason.as_str())),
            SpeciesOutcome::Fitted(_) => None,
        })
    }

    pub fn n_fitted(&self) -> usize {
        self.fitted().count()
    }
}

/// Writes each species' outcome to a results directory as soon as it is
/// known, in the layout [`collect_results`] reads back.
#[derive(Debug)]
pub struct ResultStore {
    dir: PathBuf,
    failures: BTreeMap<String, String>,
}

impl ResultStore {
    /// Create `dir` and start an empty failure record in it
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Self {
            dir: dir.to_path_buf(),
            failures: BTreeMap::new(),
        };
        store.write_failures()?;
        Ok(store)
    }

    pub fn result_path(&self, species: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(species)))
    }

    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }

    /// Record one outcome. A failure also removes any result file an
    /// earlier run left for the species.
    pub fn save(&mut self, species: &str, outcome: std::result::Result<&SpeciesResult, &str>) -> Result<()> {
        match outcome {
            Ok(result) => {
                write_json(self.result_path(species), result)?;
                if self.failures.remove(species).is_some() {
                    self.write_failures()?;
                }
            }
            Err(reason) => {
                match std::fs::remove_file(self.result_path(species)) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                }
                self.failures.insert(species.to_string(), reason.to_string());
                self.write_failures()?;
            }
        }
        Ok(())
    }

    fn write_failures(&self) -> Result<()> {
        write_json(self.dir.join(FAILURES_FILE), &self.failures)
    }
}

/// Read the result of every species in `species` from `dir`.
///
/// A species without a readable result file becomes
/// [`SpeciesOutcome::Missing`], carrying the failure message recorded in
/// `dir/failures.json` when there is one.
pub fn collect_results(dir: &Path, species: &[String]) -> CollectedResults {
    let recorded: BTreeMap<String, String> =
        read_json(dir.join(FAILURES_FILE)).unwrap_or_default();

    let mut entries = Vec::with_capacity(species.len());
    for name in species {
        let path = dir.join(format!("{}.json", file_stem(name)));
        let outcome = match read_json::<SpeciesResult, _>(&path) {
            Ok(result) => SpeciesOutcome::Fitted(Box::new(result)),
            Err(e) => {
                let reason = recorded
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| format!("{}: {}", path.display(), e));
                warn!("{}: no result ({})", name, reason);
                SpeciesOutcome::Missing { reason }
            }
        };
        entries.push((name.clone(), outcome));
    }
    CollectedResults { entries }
}

fn write_table<T: Serialize>(
    out_dir: &Path,
    name: &str,
    rows: &[T],
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    let path = out_dir.join(name);
    write_records(&path, rows)?;
    files.push(path);
    Ok(())
}

/// Files written by [`write_summary`]
#[derive(Debug, Clone, Default)]
pub struct SummaryReport {
    pub fitted: usize,
    pub missing: usize,
    pub files: Vec<PathBuf>,
}

/// Write every summary table and figure into `out_dir`
pub fn write_summary(results: &CollectedResults, out_dir: &Path, cell_px: usize) -> Result<SummaryReport> {
    std::fs::create_dir_all(out_dir)?;
    let mut files = Vec::new();

    write_table(out_dir, "species.csv", &species_rows(results), &mut files)?;
    write_table(out_dir, "coefficients.csv", &coefficient_rows(results), &mut files)?;
    write_table(out_dir, "importance.csv", &importance_rows(results), &mut files)?;
    write_table(out_dir, "model_selection.csv", &selection_rows(results), &mut files)?;
    write_table(out_dir, "gof.csv", &gof_rows(results), &mut files)?;
    write_table(out_dir, "failures.csv", &failure_rows(results), &mut files)?;

    if results.n_fitted() > 0 {
        files.extend(write_figures(results, out_dir, cell_px)?);
    } else {
        warn!("no fitted species, figures skipped");
    }

    let report = SummaryReport {
        fitted: results.n_fitted(),
        missing: results.missing().count(),
        files,
    };
    info!(
        "summary of {} species ({} missing) written to {}",
        report.fitted,
        report.missing,
        out_dir.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::{fit_species, DetectionMatrix, MaximumLikelihood, SpeciesSettings};
    use crate::special::logistic;
    use birdocc_core::io::CovariateTable;
    use birdocc_parallel::ProcessingMode;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fitted(species: &str, seed: u64) -> SpeciesResult {
        let (n, visits) = (120, 3);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut site_data = Array2::zeros((n, 1));
        let mut y = Array2::zeros((n, visits));
        for i in 0..n {
            let x: f64 = rng.gen_range(-1.5..1.5);
            site_data[(i, 0)] = x;
            let occupied = rng.gen::<f64>() < logistic(0.2 + x);
            for j in 0..visits {
                y[(i, j)] = if occupied && rng.gen::<f64>() < 0.5 { 1.0 } else { 0.0 };
            }
        }
        let matrix = DetectionMatrix {
            species: species.into(),
            site_ids: (0..n).map(|i| i.to_string()).collect(),
            y,
            site_covariates: vec!["forest".into()],
            site_data,
            visit_covariates: vec![],
            visit_data: vec![],
            scaling: vec![],
        };
        let settings = SpeciesSettings {
            gof_simulations: 0,
            mode: ProcessingMode::Sequential,
            ..Default::default()
        };
        fit_species(&matrix, &MaximumLikelihood::default(), &settings).unwrap()
    }

    fn species() -> Vec<String> {
        ["Turdus falcklandii", "Zonotrichia capensis", "Vultur gryphus", "Rara avis"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn results_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let names = species();
        for (seed, name) in names[..2].iter().enumerate() {
            let path = dir.path().join(format!("{}.json", file_stem(name)));
            write_json(path, &fitted(name, seed as u64 + 1)).unwrap();
        }
        let mut failures = BTreeMap::new();
        failures.insert(names[2].clone(), "Missing column: bio12".to_string());
        write_json(dir.path().join(FAILURES_FILE), &failures).unwrap();
        dir
    }

    #[test]
    fn test_collect_marks_missing_species() {
        let dir = results_dir();
        let collected = collect_results(dir.path(), &species());
        assert_eq!(collected.entries.len(), 4);
        assert_eq!(collected.n_fitted(), 2);

        let missing: Vec<(&str, &str)> = collected.missing().collect();
        assert_eq!(missing[0], ("Vultur gryphus", "Missing column: bio12"));
        assert_eq!(missing[1].0, "Rara avis");
        assert!(missing[1].1.contains("Rara_avis.json"));

        let first = collected.fitted().next().unwrap();
        assert_eq!(first.species, "Turdus falcklandii");
        assert!(!first.averaged.is_empty());
    }

    #[test]
    fn test_write_summary_tables_and_figures() {
        let dir = results_dir();
        let out = tempfile::tempdir().unwrap();
        let collected = collect_results(dir.path(), &species());
        let report = write_summary(&collected, out.path(), 8).unwrap();
        assert_eq!((report.fitted, report.missing), (2, 2));

        for name in [
            "species.csv",
            "coefficients.csv",
            "importance.csv",
            "model_selection.csv",
            "failures.csv",
            "occupancy_coefficients.png",
            "importance.png",
            "importance_matrix.csv",
        ] {
            assert!(out.path().join(name).exists(), "{} not written", name);
        }

        let failures = std::fs::read_to_string(out.path().join("failures.csv")).unwrap();
        assert_eq!(failures.lines().count(), 3);
        assert!(failures.starts_with("species,reason"));

        let matrix = CovariateTable::read(out.path().join("importance_matrix.csv"), "species").unwrap();
        assert_eq!(matrix.ids, vec!["Turdus falcklandii", "Zonotrichia capensis"]);
        assert_eq!(matrix.columns, vec!["forest"]);

        let img = image_size(&out.path().join("importance.png"));
        assert_eq!(img, (8, 16));
    }

    #[test]
    fn test_matrices_follow_results() {
        let dir = results_dir();
        let collected = collect_results(dir.path(), &species());
        let coefficients = coefficient_matrix(&collected).unwrap();
        assert_eq!(coefficients.predictors, vec!["forest"]);
        let first = collected.fitted().next().unwrap();
        let slope = first
            .averaged
            .iter()
            .find(|a| a.parameter == "psi(forest)")
            .map(|a| a.estimate);
        assert_eq!(coefficients.get("Turdus falcklandii", "forest"), slope);
        assert_eq!(coefficients.get("Vultur gryphus", "forest"), None);

        let importance = importance_matrix(&collected).unwrap();
        let v = importance.get("Zonotrichia capensis", "forest").unwrap();
        assert!((0.0..=1.0).contains(&v));
    }

    #[test]
    fn test_store_writes_each_outcome_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let names = species();
        // left over from an earlier run
        write_json(dir.path().join("Vultur_gryphus.json"), &fitted(&names[2], 9)).unwrap();

        let mut store = ResultStore::create(dir.path()).unwrap();
        store.save(&names[0], Ok(&fitted(&names[0], 1))).unwrap();
        // readable before the rest of the batch has run
        let partial = collect_results(dir.path(), &names[..1]);
        assert_eq!(partial.n_fitted(), 1);

        store.save(&names[2], Err("did not converge")).unwrap();
        assert!(!store.result_path(&names[2]).exists());
        assert_eq!(store.failures().len(), 1);

        let collected = collect_results(dir.path(), &names[..3]);
        assert_eq!(collected.n_fitted(), 1);
        let missing: Vec<(&str, &str)> = collected.missing().collect();
        assert_eq!(missing[0].0, "Zonotrichia capensis");
        assert_eq!(missing[1], ("Vultur gryphus", "did not converge"));
    }

    fn image_size(path: &Path) -> (u32, u32) {
        let bytes = std::fs::read(path).unwrap();
        // IHDR width and height, big endian
        let w = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let h = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        (w, h)
    }
}
