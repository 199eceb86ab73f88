//! Picker registry: model kinds, the inference seam, and pick records.
//!
//! The supported network architectures form a closed enum; an unrecognized
//! name fails at configuration-validation time, before the expensive model
//! load and long before the worker pool starts. Loading happens exactly
//! once per run and the result is shared read-only across workers.

mod model;

pub use model::{load_picker, PhaseSpec, PickerModel, WeightsBundle};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::waveform::WaveformSegment;

/// Picker registry and inference errors.
#[derive(Debug, Error)]
pub enum PickerError {
    #[error("Unsupported model type '{0}' (expected one of: phasenet, eqt, gpd)")]
    UnsupportedType(String),

    #[error("Weights '{name}' not found locally and the remote fetch failed: {reason}")]
    Fetch { name: String, reason: String },

    #[error("Malformed weights bundle '{name}': {reason}")]
    Malformed { name: String, reason: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported picker network architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerKind {
    PhaseNet,
    EqTransformer,
    Gpd,
}

impl PickerKind {
    /// Directory name under which weights are cached and fetched.
    pub fn slug(&self) -> &'static str {
        match self {
            PickerKind::PhaseNet => "phasenet",
            PickerKind::EqTransformer => "eqtransformer",
            PickerKind::Gpd => "gpd",
        }
    }
}

impl FromStr for PickerKind {
    type Err = PickerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "phasenet" => Ok(PickerKind::PhaseNet),
            "eqt" | "eqtransformer" => Ok(PickerKind::EqTransformer),
            "gpd" => Ok(PickerKind::Gpd),
            other => Err(PickerError::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for PickerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// One detected phase arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    /// Station-level trace id, `NET.STA` or `NET.STA.LOC`.
    pub trace_id: String,
    pub start_time: DateTime<Utc>,
    pub peak_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Peak of the detection characteristic, normalized to 0..=1.
    pub peak_value: f64,
    /// Phase label, e.g. "P" or "S".
    pub phase: String,
}

/// Classification result: the picks for one waveform segment.
#[derive(Debug, Clone, Default)]
pub struct PickList {
    pub picks: Vec<Pick>,
}

/// Pass-through inference options from the `[picking]` config table
/// (everything except `picker` and `model`), forwarded verbatim.
pub type PickOptions = BTreeMap<String, toml::Value>;

/// The inference seam. The engine only ever calls this; tests and
/// alternative backends supply their own implementations.
pub trait PhasePicker: Send + Sync {
    fn classify(
        &self,
        segment: &WaveformSegment,
        options: &PickOptions,
    ) -> Result<PickList, PickerError>;
}
