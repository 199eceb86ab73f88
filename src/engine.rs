//! Parallel picking engine.
//!
//! Work units are independent: each resolves its own waveform, runs the
//! shared picker, and writes one intermediate `.pick` file whose name is
//! unique per unit — so the pool needs no coordination beyond the barrier at
//! the end. The intermediate files are byte-for-byte identical regardless of
//! worker count or execution order.
//!
//! Failure handling per unit:
//! - no waveform data: the resolver already warned; the unit writes an
//!   empty (header-only) file and counts as empty, not failed.
//! - classify error: logged via `error!`, counted in `units_failed`, no
//!   file written — record-and-skip, never disguised as data absence.
//! - intermediate write error: fatal, aborts the run (the output directory
//!   itself is broken).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::calendar::{DayOfYear, WorkUnit};
use crate::error::Result;
use crate::picker::{PhasePicker, Pick, PickOptions};
use crate::stations::StationId;
use crate::waveform::WaveformResolver;

/// Column order of intermediate and final pick tables.
pub const PICK_COLUMNS: [&str; 6] = [
    "id",
    "start_time",
    "peak_time",
    "end_time",
    "peak_value",
    "phase",
];

/// What a run did, summed over all units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub units_total: usize,
    /// Units where neither backend had data.
    pub units_empty: usize,
    /// Units whose classify call failed (skipped, no file written).
    pub units_failed: usize,
    pub picks_written: usize,
}

enum UnitOutcome {
    Picked(usize),
    Empty,
    Failed,
}

/// Run every work unit on a pool of `workers` threads sharing `picker`
/// read-only, then report. The caller aggregates strictly after this
/// returns — the pool drain is the barrier.
pub fn run(
    units: &[WorkUnit],
    picker: Arc<dyn PhasePicker>,
    resolver: &WaveformResolver,
    options: &PickOptions,
    output_dir: &Path,
    workers: usize,
) -> Result<EngineReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;
    info!(
        "Picking {} work units on {} workers",
        units.len(),
        workers
    );

    let picker = picker.as_ref();
    let outcomes: Result<Vec<UnitOutcome>> = pool.install(|| {
        units
            .par_iter()
            .map(|unit| process_unit(unit, picker, resolver, options, output_dir))
            .collect()
    });

    let mut report = EngineReport {
        units_total: units.len(),
        ..EngineReport::default()
    };
    for outcome in outcomes? {
        match outcome {
            UnitOutcome::Picked(n) => report.picks_written += n,
            UnitOutcome::Empty => report.units_empty += 1,
            UnitOutcome::Failed => report.units_failed += 1,
        }
    }
    Ok(report)
}

/// Intermediate filename for one unit: `{station_id}_{year}.{julday}.pick`.
/// Unique per unit because (station, year, julday) is unique per unit.
pub fn intermediate_path(output_dir: &Path, unit: &WorkUnit) -> PathBuf {
    output_dir.join(format!(
        "{}_{}.{}.pick",
        unit.station_id, unit.year, unit.julian_day
    ))
}

fn process_unit(
    unit: &WorkUnit,
    picker: &dyn PhasePicker,
    resolver: &WaveformResolver,
    options: &PickOptions,
    output_dir: &Path,
) -> Result<UnitOutcome> {
    // Station ids were validated at startup; a parse failure here is a bug
    // upstream and aborts the run rather than being skipped.
    let id = StationId::parse(&unit.station_id)?;
    let date = DayOfYear {
        year: unit.year,
        julian_day: unit.julian_day,
    };

    let segment = resolver.fetch(&id, &unit.channel_code, date);
    let had_data = !segment.is_empty();

    let picks = match picker.classify(&segment, options) {
        Ok(list) => list.picks,
        Err(e) => {
            error!(
                "Inference failed for {} {}.{}: {e}; skipping unit",
                unit.station_id, unit.year, unit.julian_day
            );
            return Ok(UnitOutcome::Failed);
        }
    };
    drop(segment);

    // Every completed unit leaves a file, picks or not, so aggregation (and
    // a rerun's operator) can tell "done, nothing found" from "never ran".
    let path = intermediate_path(output_dir, unit);
    write_picks(&path, &picks)?;
    debug!(
        "Unit {} {}.{}: {} picks",
        unit.station_id,
        unit.year,
        unit.julian_day,
        picks.len()
    );

    Ok(if had_data {
        UnitOutcome::Picked(picks.len())
    } else {
        UnitOutcome::Empty
    })
}

/// Write one unit's picks as a CSV table with the canonical columns.
fn write_picks(path: &Path, picks: &[Pick]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(PICK_COLUMNS)?;
    for pick in picks {
        let record = [
            pick.trace_id.clone(),
            format_time(pick.start_time),
            format_time(pick.peak_time),
            format_time(pick.end_time),
            pick.peak_value.to_string(),
            pick.phase.clone(),
        ];
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Microsecond-precision UTC timestamp, stable across write/aggregate.
fn format_time(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
