//! Calendar walking and work-unit enumeration.
//!
//! A run's time range expands into (year, day-of-year) dates, and the dates
//! cross with the station list to form the full work-unit sequence. Ordering
//! is date-major, station-minor; it carries no meaning beyond making runs
//! reproducible.

use chrono::{DateTime, Datelike, Utc};

use crate::stations::Station;

/// One calendar day, identified by year and day-of-year (1..=366).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayOfYear {
    pub year: i32,
    pub julian_day: u32,
}

/// One unit of work: pick one station's channels for one day.
///
/// Built by crossing dates with stations, consumed exactly once by the
/// picking engine, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub year: i32,
    pub julian_day: u32,
    pub station_id: String,
    pub channel_code: String,
}

/// Enumerate every calendar day from `start` through `end`, inclusive.
///
/// Both endpoints are normalized to their date before walking, so intra-day
/// times never duplicate or skip a day. A same-day range yields exactly one
/// entry; the caller guarantees `start <= end` (config validation rejects
/// inverted ranges before this runs).
pub fn enumerate_dates(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DayOfYear> {
    let end_date = end.date_naive();
    start
        .date_naive()
        .iter_days()
        .take_while(|day| *day <= end_date)
        .map(|day| DayOfYear {
            year: day.year(),
            julian_day: day.ordinal(),
        })
        .collect()
}

/// Cross dates with stations into the full work-unit list.
///
/// Output length is `dates.len() * stations.len()`, ordered date-major.
pub fn build_work_units(dates: &[DayOfYear], stations: &[Station]) -> Vec<WorkUnit> {
    let mut units = Vec::with_capacity(dates.len() * stations.len());
    for date in dates {
        for station in stations {
            units.push(WorkUnit {
                year: date.year,
                julian_day: date.julian_day,
                station_id: station.id.clone(),
                channel_code: station.channel_code.clone(),
            });
        }
    }
    units
}
