use birdocc_core::{Error, Result};
use chrono::{NaiveTime, Timelike};

/// `X` (present, not counted) → `None`; a non-negative integer → `Some(n)`
pub fn parse_count(field: &str) -> Result<Option<u32>> {
    let field = field.trim();
    if field.eq_ignore_ascii_case("x") {
        return Ok(None);
    }
    field.parse::<u32>().map(Some).map_err(|_| Error::Parse {
        field: "count",
        value: field.to_string(),
    })
}

/// `HH:MM[:SS]` → minutes after midnight
pub fn parse_time_start(field: &str) -> Result<f64> {
    let field = field.trim();
    let time = NaiveTime::parse_from_str(field, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(field, "%H:%M"))
        .map_err(|_| Error::Parse {
            field: "time_start",
            value: field.to_string(),
        })?;
    Ok(time.hour() as f64 * 60.0 + time.minute() as f64 + time.second() as f64 / 60.0)
}
