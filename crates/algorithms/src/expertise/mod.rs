//! Observer expertise scores
//!
//! Species richness per checklist is modelled as Poisson with effort,
//! time-of-day and land-cover fixed effects and a random intercept per
//! observer. An observer's score is their conditional mode: how many more
//! (or fewer) species they report than an average observer under the same
//! effort, on the log scale.

mod glmm;

pub use glmm::{fit_poisson_glmm, GlmmData, GlmmFit};

use birdocc_core::config::ExpertiseConfig;
use birdocc_core::records::{split_observers, Checklist, Detection, ObserverScore};
use birdocc_core::{CoordTransform, Error, Raster, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Land-cover classes at checklist locations
pub struct LandcoverLookup<'a> {
    /// Class indices 1..=k, 0 unclassified
    pub classes: &'a Raster<f64>,
    pub class_names: &'a [String],
    /// WGS84 → raster CRS
    pub to_grid: CoordTransform,
}

impl LandcoverLookup<'_> {
    pub fn class_at(&self, lon: f64, lat: f64) -> Option<usize> {
        let (x, y) = self.to_grid.apply(lon, lat);
        self.classes
            .value_at(x, y)
            .filter(|v| *v >= 1.0)
            .map(|v| v.round() as usize)
            .filter(|c| *c <= self.class_names.len())
    }
}

/// One fixed effect of the expertise model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedEffect {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertiseFit {
    pub fixed_effects: Vec<FixedEffect>,
    /// Variance of the observer intercepts
    pub observer_variance: f64,
    pub scores: Vec<ObserverScore>,
    pub n_checklists: usize,
    pub iterations: usize,
    pub converged: bool,
    pub log_likelihood: f64,
}

/// Design column: name, raw values, whether to standardize
struct Column {
    name: String,
    values: Vec<f64>,
    standardize: bool,
}

fn standardize(values: &mut [f64]) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    let sd = var.sqrt();
    for v in values.iter_mut() {
        *v = if sd > 0.0 { (*v - mean) / sd } else { *v - mean };
    }
}

/// Fit the expertise model on single-observer checklists and score every
/// observer with at least `min_checklists` of them.
pub fn fit_expertise(
    checklists: &[Checklist],
    detections: &[Detection],
    params: &ExpertiseConfig,
    landcover: Option<&LandcoverLookup<'_>>,
) -> Result<ExpertiseFit> {
    let mut richness: HashMap<&str, f64> = HashMap::new();
    for d in detections {
        *richness.entry(d.checklist_id.as_str()).or_default() += 1.0;
    }

    let single: Vec<(&Checklist, &str)> = checklists
        .iter()
        .filter(|c| c.time_start_min.is_some() && c.duration_minutes > 0.0)
        .filter_map(|c| {
            let mut obs = c.observers();
            match (obs.next(), obs.next()) {
                (Some(o), None) => Some((c, o)),
                _ => None,
            }
        })
        .collect();

    let mut per_observer: BTreeMap<&str, usize> = BTreeMap::new();
    for &(_, o) in &single {
        *per_observer.entry(o).or_default() += 1;
    }
    let observers: Vec<&str> = per_observer
        .iter()
        .filter(|(_, n)| **n >= params.min_checklists)
        .map(|(o, _)| *o)
        .collect();
    if observers.len() < 2 {
        return Err(Error::InvalidParameter {
            name: "expertise.min_checklists",
            value: params.min_checklists.to_string(),
            reason: format!("only {} observers qualify; need at least 2", observers.len()),
        });
    }
    let group_of: HashMap<&str, usize> = observers.iter().enumerate().map(|(g, o)| (*o, g)).collect();
    let rows: Vec<(&Checklist, usize)> = single
        .into_iter()
        .filter_map(|(c, o)| group_of.get(o).map(|&g| (c, g)))
        .collect();
    let n = rows.len();

    let hour: Vec<f64> = rows
        .iter()
        .map(|(c, _)| c.time_start_min.unwrap_or_default() / 60.0)
        .collect();
    let mut columns = vec![
        Column {
            name: "log_duration".into(),
            values: rows.iter().map(|(c, _)| c.duration_minutes.ln()).collect(),
            standardize: true,
        },
        Column {
            name: "distance_km".into(),
            values: rows.iter().map(|(c, _)| c.effort_distance_km).collect(),
            standardize: true,
        },
        Column {
            name: "number_observers".into(),
            values: rows.iter().map(|(c, _)| c.number_observers as f64).collect(),
            standardize: true,
        },
        Column {
            name: "hour".into(),
            values: hour.clone(),
            standardize: true,
        },
        Column {
            name: "hour_sq".into(),
            values: hour.iter().map(|h| h * h).collect(),
            standardize: true,
        },
    ];

    if let Some(lc) = landcover.filter(|_| params.landcover_effects) {
        let classes: Vec<Option<usize>> = rows
            .iter()
            .map(|(c, _)| lc.class_at(c.longitude, c.latitude))
            .collect();
        // first class is the baseline
        for (k, name) in lc.class_names.iter().enumerate().skip(1) {
            let values: Vec<f64> = classes
                .iter()
                .map(|c| if *c == Some(k + 1) { 1.0 } else { 0.0 })
                .collect();
            let hits = values.iter().filter(|v| **v > 0.0).count();
            if hits > 0 && hits < n {
                columns.push(Column {
                    name: format!("lc_{}", name),
                    values,
                    standardize: false,
                });
            }
        }
    }

    // Drop constant columns; they would make the system singular.
    columns.retain(|c| {
        let first = c.values.first().copied().unwrap_or_default();
        c.values.iter().any(|v| (v - first).abs() > 1e-12)
    });
    for c in columns.iter_mut().filter(|c| c.standardize) {
        standardize(&mut c.values);
    }

    let p = columns.len() + 1;
    let mut x = Array2::<f64>::ones((n, p));
    for (j, col) in columns.iter().enumerate() {
        for (i, v) in col.values.iter().enumerate() {
            x[(i, j + 1)] = *v;
        }
    }
    let y = Array1::from_iter(
        rows.iter()
            .map(|(c, _)| richness.get(c.checklist_id.as_str()).copied().unwrap_or(0.0)),
    );

    let data = GlmmData {
        y,
        x,
        group: rows.iter().map(|(_, g)| *g).collect(),
        n_groups: observers.len(),
    };
    let fit = fit_poisson_glmm(&data, params.max_iterations, params.tolerance)?;
    if !fit.converged {
        warn!(
            "expertise model did not converge after {} iterations; scores are from the last iterate",
            fit.iterations
        );
    }
    info!(
        "expertise model: {} checklists, {} observers, observer variance {:.4}",
        n,
        observers.len(),
        fit.sigma2
    );

    let mut names = vec!["intercept".to_string()];
    names.extend(columns.into_iter().map(|c| c.name));
    let fixed_effects = names
        .into_iter()
        .enumerate()
        .map(|(j, term)| FixedEffect {
            term,
            estimate: fit.beta[j],
            std_error: fit.beta_se[j],
        })
        .collect();
    let scores = observers
        .iter()
        .enumerate()
        .map(|(g, o)| ObserverScore {
            observer_id: o.to_string(),
            score: fit.u[g],
            n_checklists: per_observer[o],
        })
        .collect();

    Ok(ExpertiseFit {
        fixed_effects,
        observer_variance: fit.sigma2,
        scores,
        n_checklists: n,
        iterations: fit.iterations,
        converged: fit.converged,
        log_likelihood: fit.log_likelihood,
    })
}

pub fn score_map(scores: &[ObserverScore]) -> HashMap<String, f64> {
    scores
        .iter()
        .map(|s| (s.observer_id.clone(), s.score))
        .collect()
}

/// Expertise of a checklist: the highest score among its observers.
/// Unscored observers are ignored; with none scored the checklist gets the
/// population mean, 0.
pub fn checklist_expertise(observer_ids: &str, scores: &HashMap<String, f64>) -> f64 {
    split_observers(observer_ids)
        .filter_map(|o| scores.get(o).copied())
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn checklist(id: usize, observer: &str, duration: f64, start: f64) -> Checklist {
        Checklist {
            checklist_id: format!("S{}", id),
            observer_ids: observer.to_string(),
            locality_id: format!("L{}", id % 7),
            latitude: 11.0,
            longitude: 76.9,
            observation_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            year: 2019,
            julian_day: 1,
            time_start_min: Some(start),
            protocol: "Traveling".into(),
            duration_minutes: duration,
            effort_distance_km: 1.0,
            number_observers: 1,
        }
    }

    #[test]
    fn test_skilled_observer_scores_higher() {
        let mut rng = StdRng::seed_from_u64(21);
        let skill = [("novice", 10.0), ("average", 16.0), ("expert", 26.0)];
        let mut checklists = Vec::new();
        let mut detections = Vec::new();
        let mut id = 0;
        for (observer, mean) in skill {
            for _ in 0..40 {
                let duration = rng.gen_range(30.0..120.0);
                let start = rng.gen_range(360.0..600.0);
                let c = checklist(id, observer, duration, start);
                let richness = (mean * (duration / 60.0_f64).powf(0.3)).round() as usize;
                for s in 0..richness {
                    detections.push(Detection {
                        checklist_id: c.checklist_id.clone(),
                        species: format!("sp{}", s),
                        count: Some(1),
                    });
                }
                checklists.push(c);
                id += 1;
            }
        }
        // a shared checklist never enters the fit
        let mut shared = checklist(999, "novice;expert", 60.0, 400.0);
        shared.number_observers = 2;
        checklists.push(shared);

        let params = ExpertiseConfig {
            min_checklists: 10,
            ..Default::default()
        };
        let fit = fit_expertise(&checklists, &detections, &params, None).unwrap();
        assert_eq!(fit.n_checklists, 120);
        assert_eq!(fit.fixed_effects[0].term, "intercept");
        let scores = score_map(&fit.scores);
        assert!(scores["expert"] > scores["average"]);
        assert!(scores["average"] > scores["novice"]);
    }

    #[test]
    fn test_too_few_observers_rejected() {
        let checklists: Vec<_> = (0..5).map(|i| checklist(i, "solo", 60.0, 400.0)).collect();
        let err = fit_expertise(&checklists, &[], &ExpertiseConfig::default(), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_checklist_expertise_takes_max() {
        let scores: HashMap<String, f64> =
            [("a".to_string(), -0.2), ("b".to_string(), 0.4)].into_iter().collect();
        assert_eq!(checklist_expertise("a;b", &scores), 0.4);
        assert_eq!(checklist_expertise("a;zzz", &scores), -0.2);
        assert_eq!(checklist_expertise("zzz", &scores), 0.0);
    }
}
