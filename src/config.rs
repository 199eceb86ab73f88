//! Run configuration: the TOML parameter file, validation, and the
//! provenance copies written into the output directory.
//!
//! Validation front-loads every fatal configuration error — inverted time
//! range, missing archive root or station file, unknown picker type — so a
//! bad run dies before it touches the output directory. Oversubscribing the
//! CPU is the one soft case: warn and proceed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::picker::{PickOptions, PickerKind};

/// The `[picking]` table: picker selection plus verbatim pass-through
/// inference options.
#[derive(Debug, Clone, Deserialize)]
pub struct PickingConfig {
    /// Picker architecture name, e.g. "phasenet".
    pub picker: String,
    /// Local weights path or pretrained weights name.
    pub model: String,
    /// Everything else in the table, forwarded to `classify` untouched.
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

/// The parameter file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(deserialize_with = "de_timestamp")]
    pub starttime: DateTime<Utc>,
    #[serde(deserialize_with = "de_timestamp")]
    pub endtime: DateTime<Utc>,
    /// Waveform archive root (SDS layout).
    pub sds_path: PathBuf,
    /// Station list CSV with `id` and `channel_code` columns.
    pub stations: PathBuf,
    /// Output directory for intermediates and final tables.
    pub output_pathname: PathBuf,
    /// Worker pool size.
    pub workers: usize,
    /// One output file per station instead of a combined `picks.csv`.
    #[serde(default)]
    pub station_wise: bool,
    pub picking: PickingConfig,
}

impl RunConfig {
    /// Load a parameter file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Validate everything fatal up front; returns the parsed picker kind so
    /// the caller never re-parses the string. Warns (but proceeds) when
    /// `workers` exceeds the available CPUs.
    pub fn validate(&self) -> Result<PickerKind> {
        if self.starttime >= self.endtime {
            return Err(Error::Config(format!(
                "starttime {} is not before endtime {}",
                self.starttime, self.endtime
            )));
        }
        if !self.sds_path.is_dir() {
            return Err(Error::Config(format!(
                "sds_path {} does not exist",
                self.sds_path.display()
            )));
        }
        if !self.stations.is_file() {
            return Err(Error::Config(format!(
                "stations file {} does not exist",
                self.stations.display()
            )));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        let kind: PickerKind = self.picking.picker.parse().map_err(Error::Picker)?;

        if let Ok(cpus) = std::thread::available_parallelism() {
            if self.workers > cpus.get() {
                warn!(
                    "Number of workers ({}) is greater than available CPUs ({})",
                    self.workers, cpus
                );
            }
        }
        Ok(kind)
    }

    /// Inference options minus the registry keys.
    pub fn pick_options(&self) -> PickOptions {
        self.picking.options.clone()
    }
}

/// Copy the parameter file and station list into the output directory so a
/// finished run documents its own inputs. An existing copy is kept, not
/// overwritten — colliding with the previous run's provenance is expected on
/// re-runs and merely logged.
pub fn copy_provenance(parfile: &Path, config: &RunConfig) -> Result<()> {
    std::fs::create_dir_all(&config.output_pathname)?;
    let copies = [
        (parfile, "parfile.toml"),
        (config.stations.as_path(), "stations.csv"),
    ];
    for (src, name) in copies {
        let dst = config.output_pathname.join(name);
        if dst.exists() {
            info!("Keeping existing {} (not overwritten)", dst.display());
        } else {
            std::fs::copy(src, &dst)?;
        }
    }
    Ok(())
}

/// Accept RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.ffffff]`, or bare
/// `YYYY-MM-DD` (interpreted as UTC midnight).
pub fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }
    Err(format!("unparseable timestamp '{s}'"))
}

fn de_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s).map_err(serde::de::Error::custom)
}
