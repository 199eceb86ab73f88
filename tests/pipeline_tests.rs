//! End-to-end pipeline tests: archive fixtures on disk, the engine fanning
//! units across worker pools, and aggregation into final tables.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use seispick::calendar::{build_work_units, enumerate_dates, WorkUnit};
use seispick::engine::{self, EngineReport};
use seispick::picker::{
    load_picker, PhasePicker, Pick, PickList, PickOptions, PickerError, PickerKind,
};
use seispick::stations::Station;
use seispick::waveform::{slist, Trace, WaveformResolver, WaveformSegment};
use seispick::{aggregate, Result};

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Write one day file into an SDS-layout archive.
fn seed_day(
    root: &Path,
    net: &str,
    sta: &str,
    chan: &str,
    year: i32,
    jday: u32,
    start: &str,
    samples: Vec<f64>,
) {
    let dir = root
        .join(year.to_string())
        .join(net)
        .join(sta)
        .join(format!("{chan}.D"));
    fs::create_dir_all(&dir).unwrap();
    let trace = Trace {
        network: net.into(),
        station: sta.into(),
        location: "".into(),
        channel: chan.into(),
        start_time: utc(start),
        sample_rate: 1.0,
        samples,
    };
    slist::write_file(
        &dir.join(format!("{net}.{sta}..{chan}.D.{year}.{jday:03}")),
        &[trace],
    )
    .unwrap();
}

fn spike_day(n: usize, at: usize) -> Vec<f64> {
    let mut samples = vec![0.0; n];
    samples[at] = 50.0;
    samples
}

/// Deterministic stand-in for the external neural picker: one pick per
/// trace, peaking at the trace's largest sample.
struct TracePeakPicker;

impl PhasePicker for TracePeakPicker {
    fn classify(
        &self,
        segment: &WaveformSegment,
        _options: &PickOptions,
    ) -> std::result::Result<PickList, PickerError> {
        let mut picks = Vec::new();
        for trace in &segment.traces {
            let Some((peak_idx, peak)) = trace
                .samples
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
            else {
                continue;
            };
            if *peak <= 0.0 {
                continue;
            }
            let at = |i: usize| {
                trace.start_time + chrono::Duration::seconds(i as i64)
            };
            picks.push(Pick {
                trace_id: trace.station_id(),
                start_time: at(peak_idx.saturating_sub(1)),
                peak_time: at(peak_idx),
                end_time: at(peak_idx + 1),
                peak_value: *peak,
                phase: "P".into(),
            });
        }
        Ok(PickList { picks })
    }
}

/// A picker whose inference breaks on one specific station.
struct FailingPicker {
    poison_station: String,
}

impl PhasePicker for FailingPicker {
    fn classify(
        &self,
        segment: &WaveformSegment,
        _options: &PickOptions,
    ) -> std::result::Result<PickList, PickerError> {
        if segment
            .traces
            .iter()
            .any(|t| t.station_id() == self.poison_station)
        {
            return Err(PickerError::Inference("tensor shape mismatch".into()));
        }
        TracePeakPicker.classify(segment, _options)
    }
}

struct Fixture {
    _tmp: TempDir,
    sds: std::path::PathBuf,
    out: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let sds = tmp.path().join("sds");
        let out = tmp.path().join("out");
        fs::create_dir_all(&sds).unwrap();
        fs::create_dir_all(&out).unwrap();
        Self {
            _tmp: tmp,
            sds,
            out,
        }
    }

    fn resolver(&self, start: &str, end: &str) -> WaveformResolver {
        WaveformResolver::new(&self.sds)
            .unwrap()
            .with_range(utc(start), utc(end))
    }

    fn run(
        &self,
        units: &[WorkUnit],
        picker: Arc<dyn PhasePicker>,
        resolver: &WaveformResolver,
        workers: usize,
    ) -> Result<EngineReport> {
        engine::run(
            units,
            picker,
            resolver,
            &PickOptions::new(),
            &self.out,
            workers,
        )
    }
}

fn pick_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".pick"))
        .collect();
    names.sort();
    names
}

#[test]
fn worker_count_does_not_change_intermediate_files() {
    let stations = vec![
        Station {
            id: "GR.BFO".into(),
            channel_code: "HH".into(),
        },
        Station {
            id: "XX.STA01.00".into(),
            channel_code: "EH".into(),
        },
    ];

    let mut runs: Vec<std::collections::BTreeMap<String, String>> = Vec::new();
    for workers in [1, 4] {
        let fx = Fixture::new();
        for jday in 1..=3 {
            let start = format!("2023-01-0{jday}T00:00:00Z");
            seed_day(
                &fx.sds,
                "GR",
                "BFO",
                "HHZ",
                2023,
                jday,
                &start,
                spike_day(600, 100 + jday as usize),
            );
            // Station with a location code; note the doubled dot in SDS
            // filenames comes from the empty location only.
            let dir = fx
                .sds
                .join("2023")
                .join("XX")
                .join("STA01")
                .join("EHZ.D");
            fs::create_dir_all(&dir).unwrap();
            let trace = Trace {
                network: "XX".into(),
                station: "STA01".into(),
                location: "00".into(),
                channel: "EHZ".into(),
                start_time: utc(&start),
                sample_rate: 1.0,
                samples: spike_day(600, 200),
            };
            slist::write_file(
                &dir.join(format!("XX.STA01.00.EHZ.D.2023.{jday:03}")),
                &[trace],
            )
            .unwrap();
        }

        let resolver = fx.resolver("2023-01-01T00:00:00Z", "2023-01-03T23:59:59Z");
        let dates = enumerate_dates(utc("2023-01-01T00:00:00Z"), utc("2023-01-03T23:59:59Z"));
        let units = build_work_units(&dates, &stations);
        assert_eq!(units.len(), 6);

        let report = fx
            .run(&units, Arc::new(TracePeakPicker), &resolver, workers)
            .unwrap();
        assert_eq!(report.units_total, 6);
        assert_eq!(report.units_failed, 0);
        assert_eq!(report.units_empty, 0);

        let contents: std::collections::BTreeMap<String, String> = pick_files(&fx.out)
            .into_iter()
            .map(|name| {
                let body = fs::read_to_string(fx.out.join(&name)).unwrap();
                (name, body)
            })
            .collect();
        runs.push(contents);
    }

    // Byte-for-byte identical intermediates at 1 and 4 workers.
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].len(), 6);
    assert!(runs[0].contains_key("GR.BFO_2023.1.pick"));
    assert!(runs[0].contains_key("XX.STA01.00_2023.3.pick"));
}

#[test]
fn day_without_data_yields_empty_intermediate_and_no_picks() {
    let fx = Fixture::new();
    // Data for day 1 only; day 2 missing from the archive.
    seed_day(
        &fx.sds,
        "GR",
        "BFO",
        "HHZ",
        2023,
        1,
        "2023-01-01T00:00:00Z",
        spike_day(600, 300),
    );

    let stations = vec![Station {
        id: "GR.BFO".into(),
        channel_code: "HH".into(),
    }];
    let resolver = fx.resolver("2023-01-01T00:00:00Z", "2023-01-02T23:59:59Z");
    let dates = enumerate_dates(utc("2023-01-01T00:00:00Z"), utc("2023-01-02T23:59:59Z"));
    let units = build_work_units(&dates, &stations);

    let report = fx
        .run(&units, Arc::new(TracePeakPicker), &resolver, 2)
        .unwrap();
    assert_eq!(report.units_total, 2);
    assert_eq!(report.units_empty, 1);
    assert_eq!(report.picks_written, 1);

    // The empty day still leaves its (header-only) intermediate file.
    let day2 = fs::read_to_string(fx.out.join("GR.BFO_2023.2.pick")).unwrap();
    assert_eq!(day2.lines().count(), 1);

    aggregate::aggregate(&fx.out, false).unwrap();
    let combined = fs::read_to_string(fx.out.join("picks.csv")).unwrap();
    let rows: Vec<&str> = combined.lines().skip(1).collect();
    assert_eq!(rows.len(), 1);
    // Only day-1-derived picks: the peak sits 300 s into day 1.
    assert!(rows[0].contains("2023-01-01T00:05:00"));
    assert!(pick_files(&fx.out).is_empty());
}

#[test]
fn station_wise_aggregation_splits_by_station() {
    let fx = Fixture::new();
    seed_day(
        &fx.sds,
        "GR",
        "BFO",
        "HHZ",
        2023,
        1,
        "2023-01-01T00:00:00Z",
        spike_day(600, 100),
    );
    seed_day(
        &fx.sds,
        "YY",
        "AAA",
        "HHZ",
        2023,
        1,
        "2023-01-01T00:00:00Z",
        spike_day(600, 400),
    );

    let stations = vec![
        Station {
            id: "GR.BFO".into(),
            channel_code: "HH".into(),
        },
        Station {
            id: "YY.AAA".into(),
            channel_code: "HH".into(),
        },
    ];
    let resolver = fx.resolver("2023-01-01T00:00:00Z", "2023-01-01T23:59:59Z");
    let dates = enumerate_dates(utc("2023-01-01T00:00:00Z"), utc("2023-01-01T23:59:59Z"));
    let units = build_work_units(&dates, &stations);

    fx.run(&units, Arc::new(TracePeakPicker), &resolver, 2)
        .unwrap();
    aggregate::aggregate(&fx.out, true).unwrap();

    let bfo = fs::read_to_string(fx.out.join("GR.BFO.csv")).unwrap();
    let aaa = fs::read_to_string(fx.out.join("YY.AAA.csv")).unwrap();
    assert_eq!(bfo.lines().count(), 2);
    assert_eq!(aaa.lines().count(), 2);
    assert!(bfo.contains("GR.BFO"));
    assert!(!bfo.contains("YY.AAA"));
    assert!(aaa.contains("YY.AAA"));
    assert!(!fx.out.join("picks.csv").exists());
}

#[test]
fn inference_failure_is_skipped_not_absorbed() {
    let fx = Fixture::new();
    for (net, sta) in [("GR", "BFO"), ("YY", "AAA")] {
        seed_day(
            &fx.sds,
            net,
            sta,
            "HHZ",
            2023,
            1,
            "2023-01-01T00:00:00Z",
            spike_day(600, 100),
        );
    }
    let stations = vec![
        Station {
            id: "GR.BFO".into(),
            channel_code: "HH".into(),
        },
        Station {
            id: "YY.AAA".into(),
            channel_code: "HH".into(),
        },
    ];
    let resolver = fx.resolver("2023-01-01T00:00:00Z", "2023-01-01T23:59:59Z");
    let dates = enumerate_dates(utc("2023-01-01T00:00:00Z"), utc("2023-01-01T23:59:59Z"));
    let units = build_work_units(&dates, &stations);

    let picker = Arc::new(FailingPicker {
        poison_station: "YY.AAA".into(),
    });
    let report = fx.run(&units, picker, &resolver, 2).unwrap();

    assert_eq!(report.units_failed, 1);
    assert_eq!(report.picks_written, 1);
    // The failed unit left no intermediate file; the healthy one did.
    assert_eq!(pick_files(&fx.out), vec!["GR.BFO_2023.1.pick".to_string()]);
}

#[test]
fn picks_round_trip_through_aggregation_unchanged() {
    let fx = Fixture::new();
    seed_day(
        &fx.sds,
        "GR",
        "BFO",
        "HHZ",
        2023,
        1,
        "2023-01-01T00:00:00Z",
        spike_day(600, 42),
    );
    let stations = vec![Station {
        id: "GR.BFO".into(),
        channel_code: "HH".into(),
    }];
    let resolver = fx.resolver("2023-01-01T00:00:00Z", "2023-01-01T23:59:59Z");
    let dates = enumerate_dates(utc("2023-01-01T00:00:00Z"), utc("2023-01-01T23:59:59Z"));
    let units = build_work_units(&dates, &stations);

    fx.run(&units, Arc::new(TracePeakPicker), &resolver, 1)
        .unwrap();
    let intermediate = fs::read_to_string(fx.out.join("GR.BFO_2023.1.pick")).unwrap();
    let intermediate_rows: Vec<&str> = intermediate.lines().skip(1).collect();

    aggregate::aggregate(&fx.out, false).unwrap();
    let combined = fs::read_to_string(fx.out.join("picks.csv")).unwrap();
    let combined_rows: Vec<&str> = combined.lines().skip(1).collect();

    // Same rows, byte for byte: timestamps and values preserved exactly.
    assert_eq!(intermediate_rows, combined_rows);
    assert_eq!(combined_rows.len(), 1);
    assert!(combined_rows[0].starts_with("GR.BFO,"));
    assert!(combined_rows[0].contains("2023-01-01T00:00:42.000000Z"));
}

#[test]
fn loaded_model_drives_the_whole_pipeline() {
    let fx = Fixture::new();
    seed_day(
        &fx.sds,
        "GR",
        "BFO",
        "HHZ",
        2023,
        1,
        "2023-01-01T00:00:00Z",
        spike_day(600, 250),
    );

    // Local weights bundle: single-tap kernel, one P stream.
    let weights = serde_json::json!({
        "name": "test-weights",
        "sampling_rate": 1.0,
        "phases": [{"label": "P", "threshold": 0.5}],
        "weights": [1.0]
    });
    let weights_path = fx._tmp.path().join("weights.json");
    fs::write(&weights_path, weights.to_string()).unwrap();
    let picker = load_picker(PickerKind::PhaseNet, weights_path.to_str().unwrap()).unwrap();

    let stations = vec![Station {
        id: "GR.BFO".into(),
        channel_code: "HH".into(),
    }];
    let resolver = fx.resolver("2023-01-01T00:00:00Z", "2023-01-01T23:59:59Z");
    let dates = enumerate_dates(utc("2023-01-01T00:00:00Z"), utc("2023-01-01T23:59:59Z"));
    let units = build_work_units(&dates, &stations);

    let report = fx.run(&units, picker, &resolver, 1).unwrap();
    assert!(report.picks_written >= 1);

    aggregate::aggregate(&fx.out, false).unwrap();
    let combined = fs::read_to_string(fx.out.join("picks.csv")).unwrap();
    let row = combined.lines().nth(1).unwrap();
    assert!(row.starts_with("GR.BFO,"));
    assert!(row.ends_with(",P"));
    assert!(row.contains("2023-01-01T00:04:10.000000Z")); // peak at sample 250
}
