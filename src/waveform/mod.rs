//! Waveform resolution from a day-file archive.
//!
//! Each work unit maps to one day window (clipped by the run's global time
//! range on the first and last days). The resolver tries the structured SDS
//! client backend first and falls back to a glob pattern search; both clip
//! to the window, merge per-channel traces and zero-fill interior gaps.
//! Backend failures are absorbed here — the resolver always returns a
//! segment, possibly empty, and a unit with no data at all gets exactly one
//! warning.

pub mod sds;
pub mod slist;

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use tracing::warn;

use crate::calendar::DayOfYear;
use crate::error::{Error, Result};
use crate::stations::StationId;

/// A single-channel, gap-free run of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub network: String,
    pub station: String,
    /// Empty string when the station carries no location code.
    pub location: String,
    pub channel: String,
    pub start_time: DateTime<Utc>,
    pub sample_rate: f64,
    pub samples: Vec<f64>,
}

impl Trace {
    /// Full SEED-style channel id, `NET.STA.LOC.CHAN`.
    pub fn id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    /// Station-level id: `NET.STA` or `NET.STA.LOC`.
    pub fn station_id(&self) -> String {
        if self.location.is_empty() {
            format!("{}.{}", self.network, self.station)
        } else {
            format!("{}.{}.{}", self.network, self.station, self.location)
        }
    }

    /// Restrict the trace to samples inside `window`, inclusive on both
    /// ends. Returns `None` when nothing survives. Never admits a sample
    /// outside the window, so adjacent days cannot leak in.
    pub fn clip(&self, window: &TimeWindow) -> Option<Trace> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as i64;
        let first = offset_ceil(window.start - self.start_time, self.sample_rate).max(0);
        let last = offset_floor(window.end - self.start_time, self.sample_rate).min(n - 1);
        if first > last {
            return None;
        }
        Some(Trace {
            start_time: self.start_time + sample_duration(first as usize, self.sample_rate),
            samples: self.samples[first as usize..=last as usize].to_vec(),
            network: self.network.clone(),
            station: self.station.clone(),
            location: self.location.clone(),
            channel: self.channel.clone(),
            sample_rate: self.sample_rate,
        })
    }
}

/// Multi-channel waveform for one work unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveformSegment {
    pub traces: Vec<Trace>,
}

impl WaveformSegment {
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Resolve the picking window for one day.
///
/// The window spans midnight through the day's last microsecond, except
/// when the run-global start (end) time falls on this exact day — then it
/// replaces the day bound, making the run's first and last days partial.
pub fn day_window(
    date: DayOfYear,
    starttime: Option<DateTime<Utc>>,
    endtime: Option<DateTime<Utc>>,
) -> Option<TimeWindow> {
    let midnight = NaiveDate::from_yo_opt(date.year, date.julian_day)?
        .and_hms_opt(0, 0, 0)?
        .and_utc();
    let day_end = midnight + Duration::days(1) - Duration::microseconds(1);

    let start = match starttime {
        Some(t) if t.year() == date.year && t.ordinal() == date.julian_day => t,
        _ => midnight,
    };
    let end = match endtime {
        Some(t) if t.year() == date.year && t.ordinal() == date.julian_day => t,
        _ => day_end,
    };
    Some(TimeWindow { start, end })
}

/// Merge clipped traces channel by channel: duplicate samples that agree
/// collapse cleanly, conflicting overlap samples are replaced by the zero
/// fill value, and interior gaps are zero-filled. Channels come out in
/// deterministic id order.
pub fn merge_traces(mut traces: Vec<Trace>) -> WaveformSegment {
    traces.sort_by(|a, b| {
        a.id()
            .cmp(&b.id())
            .then(a.start_time.cmp(&b.start_time))
    });

    let mut merged: Vec<Trace> = Vec::new();
    for trace in traces {
        match merged.last_mut() {
            Some(last) if last.id() == trace.id() && last.sample_rate == trace.sample_rate => {
                splice(last, &trace);
            }
            _ => merged.push(trace),
        }
    }
    WaveformSegment { traces: merged }
}

/// Extend `base` to cover `next`, zero-filling any gap between them. Where
/// the two overlap, agreeing samples are kept and disagreeing samples are
/// replaced by the fill value.
fn splice(base: &mut Trace, next: &Trace) {
    let offset = offset_round(next.start_time - base.start_time, base.sample_rate);
    if offset < 0 {
        // Sorted input: should not happen, keep the earlier trace.
        return;
    }
    let offset = offset as usize;
    let overlap_end = base.samples.len();
    let needed = offset + next.samples.len();
    if needed > base.samples.len() {
        base.samples.resize(needed, 0.0);
    }
    for (i, &sample) in next.samples.iter().enumerate() {
        let j = offset + i;
        if j < overlap_end {
            if base.samples[j] != sample {
                base.samples[j] = 0.0;
            }
        } else {
            base.samples[j] = sample;
        }
    }
}

fn sample_duration(samples: usize, sample_rate: f64) -> Duration {
    Duration::microseconds((samples as f64 * 1_000_000.0 / sample_rate).round() as i64)
}

fn offset_ceil(dt: Duration, sample_rate: f64) -> i64 {
    let us = dt.num_microseconds().unwrap_or(i64::MAX) as f64;
    let x = us * sample_rate / 1_000_000.0;
    (x - rounding_tolerance(x)).ceil() as i64
}

fn offset_floor(dt: Duration, sample_rate: f64) -> i64 {
    let us = dt.num_microseconds().unwrap_or(i64::MIN) as f64;
    let x = us * sample_rate / 1_000_000.0;
    (x + rounding_tolerance(x)).floor() as i64
}

/// Tolerance for snapping a fractional sample offset to an integer: scaled
/// to f64 rounding error, and always far below one microsecond worth of
/// samples at any realistic sample rate, so a sample sitting 1 µs past the
/// day window's end can never be pulled back inside it.
fn rounding_tolerance(x: f64) -> f64 {
    x.abs() * 1e-12 + 1e-9
}

fn offset_round(dt: Duration, sample_rate: f64) -> i64 {
    let us = dt.num_microseconds().unwrap_or(0) as f64;
    (us * sample_rate / 1_000_000.0).round() as i64
}

/// Two-tier waveform resolver over an SDS-layout archive root.
pub struct WaveformResolver {
    root: PathBuf,
    starttime: Option<DateTime<Utc>>,
    endtime: Option<DateTime<Utc>>,
}

impl WaveformResolver {
    /// Create a resolver. A missing archive root is a fatal configuration
    /// error, checked once here rather than per unit.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "Archive root {} does not exist",
                root.display()
            )));
        }
        Ok(Self {
            root,
            starttime: None,
            endtime: None,
        })
    }

    /// Clip the first and last days of the run to the global time range.
    pub fn with_range(mut self, starttime: DateTime<Utc>, endtime: DateTime<Utc>) -> Self {
        self.starttime = Some(starttime);
        self.endtime = Some(endtime);
        self
    }

    /// Fetch one unit's waveform: SDS client first, glob fallback second.
    /// Always returns a segment; a unit with no data in either backend gets
    /// exactly one warning and an empty segment.
    pub fn fetch(&self, id: &StationId, channel_code: &str, date: DayOfYear) -> WaveformSegment {
        let Some(window) = day_window(date, self.starttime, self.endtime) else {
            warn!(
                "Invalid date year={} julday={} for {}.{}",
                date.year, date.julian_day, id.network, id.station
            );
            return WaveformSegment::default();
        };

        let mut segment = sds::client_fetch(&self.root, id, channel_code, date, &window);
        if segment.is_empty() {
            segment = sds::glob_fetch(&self.root, id, channel_code, date, &window);
        }
        if segment.is_empty() {
            warn!(
                "No data for {}.{}.{}.{}* found on year={} and day of year={}",
                id.network, id.station, id.location, channel_code, date.year, date.julian_day
            );
        }
        segment
    }
}
