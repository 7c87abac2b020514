//! Checklist ingestion and cleaning
//!
//! Turns raw checklist and observation extracts into cleaned
//! [`Checklist`]s and [`Detection`]s: complete checklists only, allowed
//! protocols, study area, date and season windows, effort limits, and one
//! record per shared (group) checklist.

mod parse;

pub use parse::{parse_count, parse_time_start};

use birdocc_core::config::IngestConfig;
use birdocc_core::records::{split_observers, Checklist, Detection, RawChecklist, RawObservation};
use birdocc_core::{Result, StudyArea};
use chrono::Datelike;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Rows dropped per reason
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub raw_checklists: usize,
    pub group_duplicates: usize,
    pub incomplete: usize,
    pub protocol: usize,
    pub outside_area: usize,
    pub outside_dates: usize,
    pub effort: usize,
    pub kept: usize,
    pub bad_counts: usize,
    /// Kept checklists whose start time could not be read
    pub bad_times: usize,
    pub detections: usize,
}

#[derive(Debug, Clone)]
pub struct IngestOutput {
    pub checklists: Vec<Checklist>,
    pub detections: Vec<Detection>,
    pub report: IngestReport,
}

/// A group of raw checklists describing one sampling event
struct Event<'a> {
    lead: &'a RawChecklist,
    members: Vec<&'a str>,
    observers: BTreeSet<String>,
    number_observers: Option<u32>,
}

fn collapse_groups(raw: &[RawChecklist]) -> Vec<Event<'_>> {
    let mut by_key: BTreeMap<String, Vec<&RawChecklist>> = BTreeMap::new();
    for c in raw {
        let key = match c.group_id.as_deref().map(str::trim) {
            Some(g) if !g.is_empty() => format!("G:{}", g),
            _ => format!("S:{}", c.checklist_id),
        };
        by_key.entry(key).or_default().push(c);
    }

    by_key
        .into_values()
        .filter_map(|mut group| {
            group.sort_by(|a, b| a.checklist_id.cmp(&b.checklist_id));
            let lead = *group.first()?;
            let observers = group
                .iter()
                .flat_map(|c| split_observers(&c.observer_ids))
                .map(str::to_string)
                .collect();
            let number_observers = group.iter().filter_map(|c| c.number_observers).max();
            Some(Event {
                lead,
                members: group.iter().map(|c| c.checklist_id.as_str()).collect(),
                observers,
                number_observers,
            })
        })
        .collect()
}

fn in_season(julian_day: u32, season: Option<[u32; 2]>) -> bool {
    match season {
        None => true,
        Some([first, last]) if first <= last => julian_day >= first && julian_day <= last,
        Some([first, last]) => julian_day >= first || julian_day <= last,
    }
}

fn is_stationary(protocol: &str) -> bool {
    protocol.eq_ignore_ascii_case("stationary")
}

/// Clean raw extracts. Rows failing a filter are counted in the report,
/// never treated as errors. An unreadable start time leaves
/// `time_start_min` empty.
pub fn clean_checklists(
    raw: &[RawChecklist],
    observations: &[RawObservation],
    params: &IngestConfig,
    area: &StudyArea,
) -> Result<IngestOutput> {
    let mut report = IngestReport {
        raw_checklists: raw.len(),
        ..Default::default()
    };

    let events = collapse_groups(raw);
    report.group_duplicates = raw.len() - events.len();

    let mut checklists = Vec::new();
    let mut representative: HashMap<&str, &str> = HashMap::new();

    for event in &events {
        let c = event.lead;
        if c.all_species_reported == 0 {
            report.incomplete += 1;
            continue;
        }
        if !params
            .protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(c.protocol.trim()))
        {
            report.protocol += 1;
            continue;
        }
        if !area.contains(c.longitude, c.latitude) {
            report.outside_area += 1;
            continue;
        }

        let date = c.observation_date;
        let julian_day = date.ordinal();
        let before = params.start_date.map_or(false, |s| date < s);
        let after = params.end_date.map_or(false, |e| date > e);
        if before || after || !in_season(julian_day, params.season) {
            report.outside_dates += 1;
            continue;
        }

        let distance = if is_stationary(&c.protocol) {
            Some(0.0)
        } else {
            c.effort_distance_km
        };
        let n_observers = event
            .number_observers
            .unwrap_or(event.observers.len() as u32)
            .max(1);
        let effort_ok = match (c.duration_minutes, distance) {
            (Some(d), Some(km)) => {
                d > 0.0
                    && d <= params.max_duration_min
                    && km >= 0.0
                    && km <= params.max_distance_km
                    && n_observers <= params.max_observers
            }
            _ => false,
        };
        if !effort_ok {
            report.effort += 1;
            continue;
        }

        let time_start_min = match c.time_start.as_deref().map(parse_time_start) {
            Some(Ok(minutes)) => Some(minutes),
            Some(Err(e)) => {
                debug!("{}: {}", c.checklist_id, e);
                report.bad_times += 1;
                None
            }
            None => None,
        };

        for &member in &event.members {
            representative.insert(member, c.checklist_id.as_str());
        }
        checklists.push(Checklist {
            checklist_id: c.checklist_id.clone(),
            observer_ids: event.observers.iter().cloned().collect::<Vec<_>>().join(";"),
            locality_id: c.locality_id.clone(),
            latitude: c.latitude,
            longitude: c.longitude,
            observation_date: date,
            year: date.year(),
            julian_day,
            time_start_min,
            protocol: c.protocol.trim().to_string(),
            duration_minutes: c.duration_minutes.unwrap_or_default(),
            effort_distance_km: distance.unwrap_or_default(),
            number_observers: n_observers,
        });
    }
    report.kept = checklists.len();

    // One detection per (checklist, species); the largest count wins and a
    // presence-only report never hides a numeric count.
    let mut merged: BTreeMap<(&str, &str), Option<u32>> = BTreeMap::new();
    for obs in observations {
        let Some(&rep) = representative.get(obs.checklist_id.as_str()) else {
            continue;
        };
        let count = match parse_count(&obs.count) {
            Ok(c) => c,
            Err(_) => {
                report.bad_counts += 1;
                continue;
            }
        };
        merged
            .entry((rep, obs.species.trim()))
            .and_modify(|cur| *cur = (*cur).max(count))
            .or_insert(count);
    }
    let detections: Vec<Detection> = merged
        .into_iter()
        .map(|((checklist_id, species), count)| Detection {
            checklist_id: checklist_id.to_string(),
            species: species.to_string(),
            count,
        })
        .collect();
    report.detections = detections.len();

    if report.bad_times > 0 {
        warn!("{} checklists with unreadable start times kept without one", report.bad_times);
    }
    if report.bad_counts > 0 {
        warn!("{} observation rows with unreadable counts skipped", report.bad_counts);
    }
    info!(
        "kept {} of {} checklists (group duplicates {}, incomplete {}, protocol {}, area {}, dates {}, effort {})",
        report.kept,
        report.raw_checklists,
        report.group_duplicates,
        report.incomplete,
        report.protocol,
        report.outside_area,
        report.outside_dates,
        report.effort
    );

    Ok(IngestOutput {
        checklists,
        detections,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(id: &str) -> RawChecklist {
        RawChecklist {
            checklist_id: id.to_string(),
            group_id: None,
            observer_ids: "obs1".into(),
            locality_id: "L1".into(),
            latitude: 11.0,
            longitude: 76.9,
            observation_date: NaiveDate::from_ymd_opt(2019, 2, 1).unwrap(),
            time_start: Some("06:45".into()),
            protocol: "Traveling".into(),
            duration_minutes: Some(60.0),
            effort_distance_km: Some(1.0),
            number_observers: Some(1),
            all_species_reported: 1,
        }
    }

    fn obs(id: &str, species: &str, count: &str) -> RawObservation {
        RawObservation {
            checklist_id: id.into(),
            species: species.into(),
            count: count.into(),
        }
    }

    #[test]
    fn test_filters_each_reason() {
        let mut incomplete = raw("S2");
        incomplete.all_species_reported = 0;
        let mut historical = raw("S3");
        historical.protocol = "Historical".into();
        let mut far = raw("S4");
        far.longitude = 120.0;
        let mut long = raw("S5");
        long.duration_minutes = Some(301.0);
        let mut no_duration = raw("S6");
        no_duration.duration_minutes = None;
        let mut old = raw("S7");
        old.observation_date = NaiveDate::from_ymd_opt(2012, 2, 1).unwrap();

        let params = IngestConfig {
            start_date: NaiveDate::from_ymd_opt(2013, 1, 1),
            ..Default::default()
        };
        let area = StudyArea::from_bbox(74.0, 8.0, 78.0, 13.0);
        let out = clean_checklists(
            &[raw("S1"), incomplete, historical, far, long, no_duration, old],
            &[],
            &params,
            &area,
        )
        .unwrap();

        assert_eq!(out.checklists.len(), 1);
        let r = &out.report;
        assert_eq!(
            (r.incomplete, r.protocol, r.outside_area, r.effort, r.outside_dates),
            (1, 1, 1, 2, 1)
        );
        let c = &out.checklists[0];
        assert_eq!(c.julian_day, 32);
        assert_eq!(c.year, 2019);
        assert_eq!(c.time_start_min, Some(405.0));
    }

    #[test]
    fn test_stationary_distance_is_zero() {
        let mut c = raw("S1");
        c.protocol = "Stationary".into();
        c.effort_distance_km = None;
        let out =
            clean_checklists(&[c], &[], &IngestConfig::default(), &StudyArea::default()).unwrap();
        assert_eq!(out.checklists[0].effort_distance_km, 0.0);
    }

    #[test]
    fn test_group_checklists_collapse() {
        let mut a = raw("S10");
        a.group_id = Some("G1".into());
        a.observer_ids = "obs2".into();
        let mut b = raw("S11");
        b.group_id = Some("G1".into());
        b.observer_ids = "obs1".into();
        b.number_observers = Some(2);

        let observations = vec![
            obs("S10", "Copsychus fulicatus", "2"),
            obs("S11", "Copsychus fulicatus", "X"),
            obs("S11", "Dicrurus paradiseus", "X"),
        ];
        let out = clean_checklists(
            &[a, b],
            &observations,
            &IngestConfig::default(),
            &StudyArea::default(),
        )
        .unwrap();

        assert_eq!(out.checklists.len(), 1);
        assert_eq!(out.report.group_duplicates, 1);
        let c = &out.checklists[0];
        assert_eq!(c.checklist_id, "S10");
        assert_eq!(c.observer_ids, "obs1;obs2");
        assert_eq!(c.number_observers, 2);
        assert_eq!(out.detections.len(), 2);
        assert_eq!(out.detections[0].species, "Copsychus fulicatus");
        assert_eq!(out.detections[0].count, Some(2));
        assert_eq!(out.detections[1].count, None);
    }

    #[test]
    fn test_season_wraps_new_year() {
        assert!(in_season(360, Some([335, 59])));
        assert!(in_season(10, Some([335, 59])));
        assert!(!in_season(100, Some([335, 59])));
        assert!(in_season(100, None));
    }

    #[test]
    fn test_bad_counts_counted_not_fatal() {
        let out = clean_checklists(
            &[raw("S1")],
            &[obs("S1", "A", "many"), obs("S1", "B", "3"), obs("S9", "C", "1")],
            &IngestConfig::default(),
            &StudyArea::default(),
        )
        .unwrap();
        assert_eq!(out.report.bad_counts, 1);
        assert_eq!(out.detections.len(), 1);
    }

    #[test]
    fn test_unreadable_start_time_keeps_checklist() {
        let mut rows: Vec<RawChecklist> = (0..999).map(|i| raw(&format!("S{}", i))).collect();
        let mut odd = raw("S999");
        odd.time_start = Some("6.30am".into());
        rows.push(odd);

        let out = clean_checklists(&rows, &[], &IngestConfig::default(), &StudyArea::default())
            .unwrap();
        assert_eq!(out.checklists.len(), 1000);
        assert_eq!(out.report.bad_times, 1);
        let odd = out.checklists.iter().find(|c| c.checklist_id == "S999").unwrap();
        assert_eq!(odd.time_start_min, None);
        assert!(out
            .checklists
            .iter()
            .filter(|c| c.checklist_id != "S999")
            .all(|c| c.time_start_min == Some(405.0)));
    }
}
