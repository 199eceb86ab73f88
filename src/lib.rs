//! # seispick
//!
//! Batch seismic phase picking over day-file waveform archives.
//!
//! A run walks a time range day by day, crosses the dates with a station
//! list, and processes each (date, station) work unit on a fixed-size worker
//! pool: resolve the day's waveform from the archive (SDS client first, glob
//! fallback second), run the shared picker model over it, and write one
//! intermediate `.pick` file per unit. A final aggregation pass folds the
//! intermediates into per-station CSVs or one combined `picks.csv`.
//!
//! The picker model is loaded once per run and shared read-only across all
//! workers; intermediate filenames are unique per unit, so the output
//! directory needs no locking.

pub mod aggregate;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod picker;
pub mod stations;
pub mod waveform;

pub use error::{Error, Result};
