//! Grid thinning of localities and visit ordering

use birdocc_core::config::ThinningConfig;
use birdocc_core::records::{Checklist, VisitRecord};
use birdocc_core::{CoordTransform, Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::expertise::checklist_expertise;

/// A retained locality. `x`/`y` are in the grid CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub site_id: String,
    pub longitude: f64,
    pub latitude: f64,
    pub x: f64,
    pub y: f64,
    pub n_visits: usize,
}

/// A checklist placed as the `visit`-th (0-based) repeat of a site
#[derive(Debug, Clone, Copy)]
pub struct SiteVisit<'a> {
    pub site: usize,
    pub visit: usize,
    pub checklist: &'a Checklist,
}

#[derive(Debug, Clone)]
pub struct ThinnedSites<'a> {
    pub sites: Vec<Site>,
    pub visits: Vec<SiteVisit<'a>>,
    /// Occupied grid cells, including those whose localities were all too sparse
    pub cells: usize,
}

/// Keep at most one locality per grid cell.
///
/// Localities are assigned to square cells of `params.cell_size` in the
/// projected CRS reached through `to_grid`. Within a cell one locality with
/// at least `min_visits` checklists is drawn with a generator seeded from
/// `params.seed`, so reruns keep the same sites. The retained locality's
/// checklists are ordered by date and start time and capped at
/// `max_visits`.
pub fn thin_localities<'a>(
    checklists: &'a [Checklist],
    to_grid: &CoordTransform,
    params: &ThinningConfig,
) -> Result<ThinnedSites<'a>> {
    if params.cell_size <= 0.0 {
        return Err(Error::InvalidParameter {
            name: "thinning.cell_size",
            value: params.cell_size.to_string(),
            reason: "must be positive".into(),
        });
    }

    let mut by_locality: BTreeMap<&str, Vec<&Checklist>> = BTreeMap::new();
    for c in checklists {
        by_locality.entry(c.locality_id.as_str()).or_default().push(c);
    }

    let mut by_cell: BTreeMap<(i64, i64), Vec<(&str, f64, f64)>> = BTreeMap::new();
    for (locality, members) in &by_locality {
        let first = members[0];
        let (x, y) = to_grid.apply(first.longitude, first.latitude);
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        let key = (
            (x / params.cell_size).floor() as i64,
            (y / params.cell_size).floor() as i64,
        );
        by_cell.entry(key).or_default().push((locality, x, y));
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut sites = Vec::new();
    let mut visits = Vec::new();
    for candidates in by_cell.values() {
        let eligible: Vec<_> = candidates
            .iter()
            .filter(|(loc, _, _)| by_locality[loc].len() >= params.min_visits)
            .collect();
        if eligible.is_empty() {
            continue;
        }
        let &&(locality, x, y) = &eligible[rng.gen_range(0..eligible.len())];

        let mut ordered = by_locality[locality].clone();
        ordered.sort_by(|a, b| {
            a.observation_date
                .cmp(&b.observation_date)
                .then(
                    a.time_start_min
                        .unwrap_or(f64::INFINITY)
                        .total_cmp(&b.time_start_min.unwrap_or(f64::INFINITY)),
                )
                .then_with(|| a.checklist_id.cmp(&b.checklist_id))
        });
        ordered.truncate(params.max_visits);

        let site = sites.len();
        visits.extend(ordered.iter().enumerate().map(|(visit, c)| SiteVisit {
            site,
            visit,
            checklist: *c,
        }));
        sites.push(Site {
            site_id: locality.to_string(),
            longitude: ordered[0].longitude,
            latitude: ordered[0].latitude,
            x,
            y,
            n_visits: ordered.len(),
        });
    }

    info!(
        "thinning: {} localities in {} cells, {} sites retained with {} visits",
        by_locality.len(),
        by_cell.len(),
        sites.len(),
        visits.len()
    );
    Ok(ThinnedSites {
        sites,
        visits,
        cells: by_cell.len(),
    })
}

/// Visit records carrying each checklist's expertise score
pub fn attach_expertise(
    thinned: &ThinnedSites<'_>,
    scores: &HashMap<String, f64>,
) -> Vec<VisitRecord> {
    thinned
        .visits
        .iter()
        .map(|v| {
            let c = v.checklist;
            VisitRecord {
                site_id: thinned.sites[v.site].site_id.clone(),
                checklist_id: c.checklist_id.clone(),
                visit: v.visit,
                observation_date: c.observation_date,
                julian_day: c.julian_day,
                time_start_min: c.time_start_min,
                duration_minutes: c.duration_minutes,
                effort_distance_km: c.effort_distance_km,
                number_observers: c.number_observers,
                expertise: checklist_expertise(&c.observer_ids, scores),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use birdocc_core::CRS;
    use chrono::NaiveDate;

    fn checklist(id: &str, locality: &str, lon: f64, lat: f64, day: u32, start: Option<f64>) -> Checklist {
        Checklist {
            checklist_id: id.into(),
            observer_ids: "obs1".into(),
            locality_id: locality.into(),
            latitude: lat,
            longitude: lon,
            observation_date: NaiveDate::from_ymd_opt(2020, 3, day).unwrap(),
            year: 2020,
            julian_day: 60 + day,
            time_start_min: start,
            protocol: "Stationary".into(),
            duration_minutes: 30.0,
            effort_distance_km: 0.0,
            number_observers: 1,
        }
    }

    fn identity() -> CoordTransform {
        CoordTransform::new(&CRS::from_epsg(32643), &CRS::from_epsg(32643)).unwrap()
    }

    fn params(min_visits: usize, max_visits: usize) -> ThinningConfig {
        ThinningConfig {
            cell_size: 1000.0,
            seed: 7,
            min_visits,
            max_visits,
            ..Default::default()
        }
    }

    #[test]
    fn test_one_locality_per_cell() {
        // A and B share cell (0, 0); C sits alone in (3, 0)
        let data = vec![
            checklist("1", "A", 100.0, 100.0, 1, None),
            checklist("2", "A", 100.0, 100.0, 2, None),
            checklist("3", "B", 900.0, 900.0, 1, None),
            checklist("4", "B", 900.0, 900.0, 3, None),
            checklist("5", "C", 3500.0, 10.0, 1, None),
            checklist("6", "C", 3500.0, 10.0, 5, None),
        ];
        let thinned = thin_localities(&data, &identity(), &params(2, 10)).unwrap();
        assert_eq!(thinned.cells, 2);
        assert_eq!(thinned.sites.len(), 2);
        assert!(thinned.sites.iter().any(|s| s.site_id == "C"));

        let again = thin_localities(&data, &identity(), &params(2, 10)).unwrap();
        assert_eq!(thinned.sites, again.sites);
    }

    #[test]
    fn test_visits_ordered_and_capped() {
        let data = vec![
            checklist("late", "A", 10.0, 10.0, 9, Some(400.0)),
            checklist("same-day-later", "A", 10.0, 10.0, 2, Some(600.0)),
            checklist("first", "A", 10.0, 10.0, 2, Some(360.0)),
            checklist("no-time", "A", 10.0, 10.0, 2, None),
        ];
        let thinned = thin_localities(&data, &identity(), &params(1, 3)).unwrap();
        let ids: Vec<_> = thinned.visits.iter().map(|v| v.checklist.checklist_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "same-day-later", "no-time"]);
        assert_eq!(thinned.sites[0].n_visits, 3);
        assert_eq!(thinned.visits[2].visit, 2);
    }

    #[test]
    fn test_sparse_localities_dropped() {
        let data = vec![
            checklist("1", "A", 10.0, 10.0, 1, None),
            checklist("2", "B", 5000.0, 10.0, 1, None),
            checklist("3", "B", 5000.0, 10.0, 2, None),
        ];
        let thinned = thin_localities(&data, &identity(), &params(2, 10)).unwrap();
        assert_eq!(thinned.sites.len(), 1);
        assert_eq!(thinned.sites[0].site_id, "B");
    }

    #[test]
    fn test_attach_expertise() {
        let mut c = checklist("1", "A", 10.0, 10.0, 1, Some(400.0));
        c.observer_ids = "obs1;obs2".into();
        let data = vec![c];
        let thinned = thin_localities(&data, &identity(), &params(1, 10)).unwrap();
        let scores: HashMap<String, f64> = [("obs2".to_string(), 0.7)].into_iter().collect();
        let records = attach_expertise(&thinned, &scores);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].site_id, "A");
        assert_eq!(records[0].expertise, 0.7);
    }
}
