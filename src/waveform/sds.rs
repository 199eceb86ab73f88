//! Archive backends over the SDS directory layout.
//!
//! Layout: `root/{year}/{net}/{sta}/{chan}.D/{net}.{sta}.{loc}.{chan}.D.{year}.{jday:03}`.
//!
//! The client backend resolves channel directories by prefix and reads the
//! canonical day-file name; the glob backend is the looser fallback, pattern
//! matching `{chan}*` directories and `*{jday:03}` filenames. Every failure
//! mode (missing directory, unreadable file, bad pattern) degrades to an
//! empty result — data absence is decided by the resolver, not here.

use std::path::Path;

use tracing::debug;

use super::{merge_traces, slist, TimeWindow, Trace, WaveformSegment};
use crate::calendar::DayOfYear;
use crate::stations::StationId;

/// Structured SDS lookup: scan the station's channel directories for those
/// matching the channel prefix and read each canonical day file.
pub fn client_fetch(
    root: &Path,
    id: &StationId,
    channel_code: &str,
    date: DayOfYear,
    window: &TimeWindow,
) -> WaveformSegment {
    let station_dir = root
        .join(date.year.to_string())
        .join(&id.network)
        .join(&id.station);

    let entries = match std::fs::read_dir(&station_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(
                "SDS client: cannot read {}: {e}; falling back",
                station_dir.display()
            );
            return WaveformSegment::default();
        }
    };

    let mut traces = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(channel_code) || !entry.path().is_dir() {
            continue;
        }
        // Channel directories are `{chan}.D`; tolerate a bare `{chan}`.
        let channel = name.strip_suffix(".D").unwrap_or(name);
        let day_file = entry.path().join(format!(
            "{}.{}.{}.{}.D.{}.{:03}",
            id.network, id.station, id.location, channel, date.year, date.julian_day
        ));
        read_clipped(&day_file, window, &mut traces);
    }
    merge_traces(traces)
}

/// Glob fallback: `root/{year}/{net}/{sta}/{chan}*/{net}.{sta}.{loc}.{chan}*{jday:03}`.
pub fn glob_fetch(
    root: &Path,
    id: &StationId,
    channel_code: &str,
    date: DayOfYear,
    window: &TimeWindow,
) -> WaveformSegment {
    let pattern = format!(
        "{}/{}/{}/{}/{}*/{}.{}.{}.{}*{:03}",
        root.display(),
        date.year,
        id.network,
        id.station,
        channel_code,
        id.network,
        id.station,
        id.location,
        channel_code,
        date.julian_day
    );

    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            debug!("Glob backend: bad pattern '{pattern}': {e}");
            return WaveformSegment::default();
        }
    };

    let mut traces = Vec::new();
    for path in paths.flatten() {
        read_clipped(&path, window, &mut traces);
    }
    merge_traces(traces)
}

/// Read one day file, keep the traces that survive window clipping. Read
/// errors are logged at debug level and swallowed.
fn read_clipped(path: &Path, window: &TimeWindow, traces: &mut Vec<Trace>) {
    match slist::read_file(path) {
        Ok(read) => {
            traces.extend(read.iter().filter_map(|t| t.clip(window)));
        }
        Err(e) => {
            debug!("Skipping unreadable day file {}: {e}", path.display());
        }
    }
}
