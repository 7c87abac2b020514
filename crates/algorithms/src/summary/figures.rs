//! Species × predictor heatmaps

use super::CollectedResults;
use crate::occupancy::{SpeciesResult, INTERCEPT};
use birdocc_colormap::{symmetric_params, write_heatmap, ColorScheme, ColormapParams};
use birdocc_core::io::CovariateTable;
use birdocc_core::records::Submodel;
use birdocc_core::{Raster, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One value per fitted species (rows) and occupancy predictor (columns);
/// NaN where a species has no value for a predictor.
#[derive(Debug, Clone)]
pub struct PredictorMatrix {
    pub species: Vec<String>,
    pub predictors: Vec<String>,
    pub values: Raster<f64>,
}

impl PredictorMatrix {
    fn build<F>(results: &CollectedResults, entries: F) -> Result<Self>
    where
        F: Fn(&SpeciesResult) -> Vec<(String, f64)>,
    {
        let rows: Vec<(String, Vec<(String, f64)>)> = results
            .fitted()
            .map(|r| (r.species.clone(), entries(r)))
            .collect();

        let mut predictors: Vec<String> = Vec::new();
        for (_, values) in &rows {
            for (term, _) in values {
                if !predictors.contains(term) {
                    predictors.push(term.clone());
                }
            }
        }

        let mut data = vec![f64::NAN; rows.len() * predictors.len()];
        for (i, (_, values)) in rows.iter().enumerate() {
            for (term, v) in values {
                if let Some(j) = predictors.iter().position(|p| p == term) {
                    data[i * predictors.len() + j] = *v;
                }
            }
        }
        let mut values = Raster::from_vec(data, rows.len(), predictors.len())?;
        values.set_nodata(Some(f64::NAN));
        Ok(Self {
            species: rows.into_iter().map(|(s, _)| s).collect(),
            predictors,
            values,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty() || self.predictors.is_empty()
    }

    pub fn get(&self, species: &str, predictor: &str) -> Option<f64> {
        let i = self.species.iter().position(|s| s == species)?;
        let j = self.predictors.iter().position(|p| p == predictor)?;
        self.values.get(i, j).ok().filter(|v| !v.is_nan())
    }

    /// The matrix as a CSV table with a `species` id column
    pub fn to_table(&self) -> Result<CovariateTable> {
        let mut table = CovariateTable::new("species", self.predictors.clone());
        for (i, species) in self.species.iter().enumerate() {
            let row = self.values.data().row(i).to_vec();
            table.push_row(species.clone(), row)?;
        }
        Ok(table)
    }
}

/// Averaged occupancy slopes (intercept excluded)
pub fn coefficient_matrix(results: &CollectedResults) -> Result<PredictorMatrix> {
    PredictorMatrix::build(results, |r| {
        r.averaged
            .iter()
            .filter(|a| a.submodel == Submodel::State && a.term != INTERCEPT)
            .map(|a| (a.term.clone(), a.estimate))
            .collect()
    })
}

/// Relative importance of the occupancy predictors
pub fn importance_matrix(results: &CollectedResults) -> Result<PredictorMatrix> {
    PredictorMatrix::build(results, |r| {
        r.importance
            .iter()
            .filter(|i| i.submodel == Submodel::State)
            .map(|i| (i.term.clone(), i.importance))
            .collect()
    })
}

/// Write both heatmaps and their matrices as CSV. Rows follow the
/// requested species order, columns the order predictors first appear.
pub fn write_figures(results: &CollectedResults, out_dir: &Path, cell_px: usize) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let figures = [
        ("occupancy_coefficients", coefficient_matrix(results)?),
        ("importance", importance_matrix(results)?),
    ];
    for (name, matrix) in &figures {
        if matrix.is_empty() {
            warn!("{}: no occupancy predictors to plot", name);
            continue;
        }
        let params = if *name == "importance" {
            ColormapParams::with_range(ColorScheme::Sequential, 0.0, 1.0)
        } else {
            symmetric_params(&matrix.values, ColorScheme::BlueWhiteRed)
        };
        let png = out_dir.join(format!("{}.png", name));
        write_heatmap(&matrix.values, &params, cell_px, &png)?;
        let csv = out_dir.join(format!("{}_matrix.csv", name));
        matrix.to_table()?.write(&csv)?;
        files.push(png);
        files.push(csv);
    }
    Ok(files)
}
