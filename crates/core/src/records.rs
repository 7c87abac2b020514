//! Record types exchanged between pipeline stages.
//!
//! Raw extracts come in as [`RawChecklist`] and [`RawObservation`]; stage 1
//! emits [`Checklist`] and [`Detection`], stage 2 [`ObserverScore`] and
//! stage 4 [`VisitRecord`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used for multi-valued observer id fields
pub const OBSERVER_SEPARATOR: char = ';';

/// One sampling event as found in the raw extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChecklist {
    pub checklist_id: String,
    /// Shared-checklist group, set when several observers submitted the same event
    #[serde(default)]
    pub group_id: Option<String>,
    pub observer_ids: String,
    pub locality_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observation_date: NaiveDate,
    #[serde(default)]
    pub time_start: Option<String>,
    pub protocol: String,
    #[serde(default)]
    pub duration_minutes: Option<f64>,
    #[serde(default)]
    pub effort_distance_km: Option<f64>,
    #[serde(default)]
    pub number_observers: Option<u32>,
    pub all_species_reported: u8,
}

/// One species line of a raw checklist; `count` is an integer or `X`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub checklist_id: String,
    pub species: String,
    pub count: String,
}

/// A cleaned checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    pub checklist_id: String,
    pub observer_ids: String,
    pub locality_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observation_date: NaiveDate,
    pub year: i32,
    pub julian_day: u32,
    /// Minutes after midnight
    pub time_start_min: Option<f64>,
    pub protocol: String,
    pub duration_minutes: f64,
    pub effort_distance_km: f64,
    pub number_observers: u32,
}

impl Checklist {
    pub fn observers(&self) -> impl Iterator<Item = &str> {
        split_observers(&self.observer_ids)
    }
}

pub fn split_observers(ids: &str) -> impl Iterator<Item = &str> {
    ids.split(OBSERVER_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// A species reported on a cleaned checklist. `count` is `None` for
/// presence-only (`X`) reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub checklist_id: String,
    pub species: String,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverScore {
    pub observer_id: String,
    /// Observer random effect on the log species-richness scale
    pub score: f64,
    pub n_checklists: usize,
}

/// A retained checklist placed as visit `visit` (0-based) of its site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub site_id: String,
    pub checklist_id: String,
    pub visit: usize,
    pub observation_date: NaiveDate,
    pub julian_day: u32,
    pub time_start_min: Option<f64>,
    pub duration_minutes: f64,
    pub effort_distance_km: f64,
    pub number_observers: u32,
    pub expertise: f64,
}

impl VisitRecord {
    /// Named observation-level covariate, `None` when absent
    pub fn covariate(&self, name: &str) -> Option<f64> {
        match name {
            "duration_minutes" => Some(self.duration_minutes),
            "effort_distance_km" => Some(self.effort_distance_km),
            "number_observers" => Some(self.number_observers as f64),
            "time_start_min" => self.time_start_min,
            "julian_day" => Some(self.julian_day as f64),
            "expertise" => Some(self.expertise),
            _ => None,
        }
    }

    pub const COVARIATES: [&'static str; 6] = [
        "duration_minutes",
        "effort_distance_km",
        "number_observers",
        "time_start_min",
        "julian_day",
        "expertise",
    ];
}

/// The two linear predictors of an occupancy model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Submodel {
    /// Occupancy probability ψ
    State,
    /// Detection probability p
    Det,
}

impl Submodel {
    /// Short label used in parameter names, `psi(...)` / `p(...)`
    pub fn label(self) -> &'static str {
        match self {
            Submodel::State => "psi",
            Submodel::Det => "p",
        }
    }
}

impl fmt::Display for Submodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_observers() {
        let ids: Vec<_> = split_observers("obs1; obs2;;obs3").collect();
        assert_eq!(ids, vec!["obs1", "obs2", "obs3"]);
    }

    #[test]
    fn test_raw_checklist_csv_optional_fields() {
        let csv_text = "checklist_id,group_id,observer_ids,locality_id,latitude,longitude,\
observation_date,time_start,protocol,duration_minutes,effort_distance_km,number_observers,all_species_reported\n\
S1,,obs1,L1,11.0,76.9,2019-05-04,06:30:00,Traveling,60,1.2,2,1\n";
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let rows: Vec<RawChecklist> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows[0].group_id, None);
        assert_eq!(rows[0].number_observers, Some(2));
        assert_eq!(
            rows[0].observation_date,
            NaiveDate::from_ymd_opt(2019, 5, 4).unwrap()
        );
    }
}
