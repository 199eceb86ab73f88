//! Weights-bundle loading and the built-in detector.
//!
//! Load order for a configured `model` identifier:
//! 1. a local weights-bundle path,
//! 2. the per-user cache (`~/.cache/seispick/{kind}/{name}.json`),
//! 3. the remote model repository (cached on success).
//!
//! A bundle that exists but fails to parse is a hard error — it never falls
//! through to the remote fetch, which would silently shadow a corrupt file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{PhasePicker, Pick, PickList, PickOptions, PickerError, PickerKind};
use crate::waveform::{Trace, WaveformSegment};

/// Default remote model repository; override with `SEISPICK_MODEL_REPO`.
const DEFAULT_MODEL_REPO: &str = "https://models.seispick.io/v1";

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// One phase stream emitted by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseSpec {
    /// Phase label, e.g. "P".
    pub label: String,
    /// Default detection threshold on the normalized characteristic.
    pub threshold: f64,
}

/// Serialized model weights plus the metadata the detector needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsBundle {
    pub name: String,
    /// Sampling rate the weights were trained at.
    pub sampling_rate: f64,
    pub phases: Vec<PhaseSpec>,
    /// Flat weight vector; the detector uses it as a smoothing kernel.
    pub weights: Vec<f64>,
}

/// A loaded picker: immutable after load, shared read-only by all workers.
#[derive(Debug)]
pub struct PickerModel {
    kind: PickerKind,
    bundle: WeightsBundle,
    kernel: Vec<f64>,
}

/// Load a picker model, local path first, then named pretrained weights.
pub fn load_picker(kind: PickerKind, model: &str) -> Result<Arc<PickerModel>, PickerError> {
    let bundle = load_bundle(kind, model)?;
    info!(
        "Loaded {} model '{}' ({} phases, {} weights)",
        kind,
        bundle.name,
        bundle.phases.len(),
        bundle.weights.len()
    );
    Ok(Arc::new(PickerModel::new(kind, bundle)))
}

fn load_bundle(kind: PickerKind, model: &str) -> Result<WeightsBundle, PickerError> {
    let path = Path::new(model);
    if path.is_file() {
        debug!("Loading {kind} weights from local file {}", path.display());
        return parse_bundle(model, &std::fs::read_to_string(path)?);
    }

    if let Some(cached) = cache_path(kind, model) {
        if cached.is_file() {
            debug!("Loading {kind} weights from cache {}", cached.display());
            return parse_bundle(model, &std::fs::read_to_string(&cached)?);
        }
    }

    fetch_pretrained(kind, model)
}

fn parse_bundle(name: &str, content: &str) -> Result<WeightsBundle, PickerError> {
    let bundle: WeightsBundle =
        serde_json::from_str(content).map_err(|e| PickerError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    if bundle.sampling_rate <= 0.0 {
        return Err(PickerError::Malformed {
            name: name.to_string(),
            reason: "non-positive sampling_rate".to_string(),
        });
    }
    if bundle.phases.is_empty() {
        return Err(PickerError::Malformed {
            name: name.to_string(),
            reason: "no phase streams declared".to_string(),
        });
    }
    Ok(bundle)
}

fn cache_path(kind: PickerKind, model: &str) -> Option<PathBuf> {
    dirs::cache_dir().map(|d| {
        d.join("seispick")
            .join(kind.slug())
            .join(format!("{model}.json"))
    })
}

/// Fetch named pretrained weights from the remote repository and cache them.
fn fetch_pretrained(kind: PickerKind, model: &str) -> Result<WeightsBundle, PickerError> {
    let base =
        std::env::var("SEISPICK_MODEL_REPO").unwrap_or_else(|_| DEFAULT_MODEL_REPO.to_string());
    let url = format!("{base}/{}/{model}.json", kind.slug());
    info!("Fetching pretrained {kind} weights '{model}' from {url}");

    let fetch = || -> Result<String, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()?;
        client.get(&url).send()?.error_for_status()?.text()
    };
    let body = fetch().map_err(|e| PickerError::Fetch {
        name: model.to_string(),
        reason: e.to_string(),
    })?;
    let bundle = parse_bundle(model, &body)?;

    if let Some(cached) = cache_path(kind, model) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = cached.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&cached, &body)
        };
        if let Err(e) = write() {
            warn!("Could not cache weights at {}: {e}", cached.display());
        }
    }
    Ok(bundle)
}

impl PickerModel {
    fn new(kind: PickerKind, bundle: WeightsBundle) -> Self {
        let kernel = normalized_kernel(&bundle.weights);
        Self {
            kind,
            bundle,
            kernel,
        }
    }

    pub fn kind(&self) -> PickerKind {
        self.kind
    }

    pub fn bundle(&self) -> &WeightsBundle {
        &self.bundle
    }

    /// Station-level detection characteristic: mean rectified amplitude
    /// across channels, smoothed by the weight kernel, normalized to its
    /// maximum.
    fn characteristic(&self, traces: &[Trace]) -> Vec<f64> {
        let len = traces.iter().map(|t| t.samples.len()).min().unwrap_or(0);
        if len == 0 {
            return Vec::new();
        }

        let mut stacked = vec![0.0f64; len];
        for trace in traces {
            let mean = trace.samples[..len].iter().sum::<f64>() / len as f64;
            for (acc, s) in stacked.iter_mut().zip(&trace.samples[..len]) {
                *acc += (s - mean).abs();
            }
        }
        for v in &mut stacked {
            *v /= traces.len() as f64;
        }

        let mut cf = vec![0.0f64; len];
        let k = self.kernel.len();
        for i in 0..len {
            let mut acc = 0.0;
            for (j, w) in self.kernel.iter().enumerate() {
                if i + j >= k - 1 {
                    acc += w * stacked[i + j - (k - 1)];
                }
            }
            cf[i] = acc;
        }

        let max = cf.iter().cloned().fold(0.0f64, f64::max);
        if max > 0.0 {
            for v in &mut cf {
                *v /= max;
            }
        }
        cf
    }
}

impl PhasePicker for PickerModel {
    fn classify(
        &self,
        segment: &WaveformSegment,
        options: &PickOptions,
    ) -> Result<PickList, PickerError> {
        if segment.is_empty() {
            return Ok(PickList::default());
        }

        let threshold_override = match options.get("threshold") {
            None => None,
            Some(v) => Some(v.as_float().or_else(|| v.as_integer().map(|i| i as f64)).ok_or_else(
                || PickerError::Inference(format!("option 'threshold' is not numeric: {v}")),
            )?),
        };

        let trace = &segment.traces[0];
        let trace_id = trace.station_id();
        let sample_rate = trace.sample_rate;
        let start = trace.start_time;
        let cf = self.characteristic(&segment.traces);

        let mut picks = Vec::new();
        for phase in &self.bundle.phases {
            let threshold = threshold_override.unwrap_or(phase.threshold);
            for run in runs_above(&cf, threshold) {
                let at = |i: usize| {
                    start
                        + chrono::Duration::microseconds(
                            (i as f64 * 1_000_000.0 / sample_rate).round() as i64,
                        )
                };
                picks.push(Pick {
                    trace_id: trace_id.clone(),
                    start_time: at(run.first),
                    peak_time: at(run.peak),
                    end_time: at(run.last),
                    peak_value: run.peak_value,
                    phase: phase.label.clone(),
                });
            }
        }
        Ok(PickList { picks })
    }
}

struct Run {
    first: usize,
    last: usize,
    peak: usize,
    peak_value: f64,
}

/// Contiguous index runs where the characteristic meets the threshold.
fn runs_above(cf: &[f64], threshold: f64) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut current: Option<Run> = None;
    for (i, &v) in cf.iter().enumerate() {
        if v >= threshold {
            match current.as_mut() {
                Some(run) => {
                    run.last = i;
                    if v > run.peak_value {
                        run.peak = i;
                        run.peak_value = v;
                    }
                }
                None => {
                    current = Some(Run {
                        first: i,
                        last: i,
                        peak: i,
                        peak_value: v,
                    });
                }
            }
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }
    if let Some(run) = current.take() {
        runs.push(run);
    }
    runs
}

fn normalized_kernel(weights: &[f64]) -> Vec<f64> {
    let positive: Vec<f64> = weights.iter().map(|w| w.abs()).collect();
    let sum: f64 = positive.iter().sum();
    if positive.is_empty() || sum <= 0.0 {
        // Degenerate bundle: fall back to a short uniform smoother.
        return vec![0.1; 10];
    }
    positive.iter().map(|w| w / sum).collect()
}
