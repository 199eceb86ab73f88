//! ASCII sample-list day-file codec.
//!
//! Day files are the `TIMESERIES` sample-list convention: a header line
//!
//! ```text
//! TIMESERIES GR_BFO__HHZ_D, 8640000 samples, 100 sps, 2023-01-01T00:00:00.000000, SLIST, FLOAT, COUNTS
//! ```
//!
//! followed by one sample value per line. A file may carry several blocks.
//! The trace id is underscore-separated NET_STA_LOC_CHAN with an optional
//! quality suffix; an empty LOC field shows up as a doubled underscore.
//!
//! This codec is the only place the archive file format is known; the
//! resolver backends treat it as opaque, so a binary-format reader can
//! replace it without touching them.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use super::Trace;

/// Day-file read/write errors. Absorbed at the backend boundary; these never
/// propagate past the waveform resolver.
#[derive(Debug, Error)]
pub enum SlistError {
    #[error("Bad header line: {0}")]
    Header(String),

    #[error("Bad sample data: {0}")]
    Sample(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read every trace block in a day file.
pub fn read_file(path: &Path) -> Result<Vec<Trace>, SlistError> {
    let content = std::fs::read_to_string(path)?;
    read_str(&content)
}

/// Read trace blocks from file content.
pub fn read_str(content: &str) -> Result<Vec<Trace>, SlistError> {
    let mut traces = Vec::new();
    let mut header: Option<Header> = None;
    let mut samples: Vec<f64> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("TIMESERIES") {
            if let Some(h) = header.take() {
                traces.push(h.into_trace(std::mem::take(&mut samples))?);
            }
            header = Some(parse_header(line)?);
        } else if header.is_some() {
            for token in line.split_whitespace() {
                let value: f64 = token
                    .parse()
                    .map_err(|_| SlistError::Sample(format!("not a number: '{token}'")))?;
                samples.push(value);
            }
        } else {
            return Err(SlistError::Header(format!(
                "data before TIMESERIES header: '{line}'"
            )));
        }
    }
    if let Some(h) = header.take() {
        traces.push(h.into_trace(samples)?);
    }
    Ok(traces)
}

/// Write one trace as a sample-list block, appending to `out`.
pub fn write_block(out: &mut String, trace: &Trace) {
    use std::fmt::Write;
    let quality = "D";
    let _ = writeln!(
        out,
        "TIMESERIES {}_{}_{}_{}_{}, {} samples, {} sps, {}, SLIST, FLOAT, COUNTS",
        trace.network,
        trace.station,
        trace.location,
        trace.channel,
        quality,
        trace.samples.len(),
        trace.sample_rate,
        trace.start_time.format("%Y-%m-%dT%H:%M:%S%.6f"),
    );
    for sample in &trace.samples {
        let _ = writeln!(out, "{sample}");
    }
}

/// Write traces to a day file, one block per trace.
pub fn write_file(path: &Path, traces: &[Trace]) -> Result<(), SlistError> {
    let mut out = String::new();
    for trace in traces {
        write_block(&mut out, trace);
    }
    std::fs::write(path, out)?;
    Ok(())
}

struct Header {
    network: String,
    station: String,
    location: String,
    channel: String,
    count: usize,
    sample_rate: f64,
    start_time: DateTime<Utc>,
}

impl Header {
    fn into_trace(self, samples: Vec<f64>) -> Result<Trace, SlistError> {
        if samples.len() != self.count {
            return Err(SlistError::Sample(format!(
                "header declares {} samples, found {}",
                self.count,
                samples.len()
            )));
        }
        Ok(Trace {
            network: self.network,
            station: self.station,
            location: self.location,
            channel: self.channel,
            start_time: self.start_time,
            sample_rate: self.sample_rate,
            samples,
        })
    }
}

fn parse_header(line: &str) -> Result<Header, SlistError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 5 {
        return Err(SlistError::Header(line.to_string()));
    }

    let id = fields[0]
        .strip_prefix("TIMESERIES")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SlistError::Header(format!("missing trace id: '{line}'")))?;
    let id_parts: Vec<&str> = id.split('_').collect();
    if id_parts.len() < 4 {
        return Err(SlistError::Header(format!("bad trace id '{id}'")));
    }

    let count: usize = fields[1]
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SlistError::Header(format!("bad sample count: '{}'", fields[1])))?;
    let sample_rate: f64 = fields[2]
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .filter(|r| *r > 0.0)
        .ok_or_else(|| SlistError::Header(format!("bad sample rate: '{}'", fields[2])))?;
    let start_time = NaiveDateTime::parse_from_str(fields[3], "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| SlistError::Header(format!("bad start time '{}': {e}", fields[3])))?
        .and_utc();

    if fields[4] != "SLIST" {
        return Err(SlistError::Header(format!(
            "unsupported block format '{}'",
            fields[4]
        )));
    }

    Ok(Header {
        network: id_parts[0].to_string(),
        station: id_parts[1].to_string(),
        location: id_parts[2].to_string(),
        channel: id_parts[3].to_string(),
        count,
        sample_rate,
        start_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace() -> Trace {
        Trace {
            network: "GR".into(),
            station: "BFO".into(),
            location: "".into(),
            channel: "HHZ".into(),
            start_time: "2023-01-01T00:00:00Z".parse().unwrap(),
            sample_rate: 100.0,
            samples: vec![0.0, 1.5, -2.25, 3.0],
        }
    }

    #[test]
    fn round_trips_a_trace() {
        let trace = sample_trace();
        let mut out = String::new();
        write_block(&mut out, &trace);
        let read = read_str(&out).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].network, "GR");
        assert_eq!(read[0].location, "");
        assert_eq!(read[0].channel, "HHZ");
        assert_eq!(read[0].sample_rate, 100.0);
        assert_eq!(read[0].start_time, trace.start_time);
        assert_eq!(read[0].samples, trace.samples);
    }

    #[test]
    fn reads_multiple_blocks() {
        let mut out = String::new();
        let mut t = sample_trace();
        write_block(&mut out, &t);
        t.channel = "HHN".into();
        write_block(&mut out, &t);
        let read = read_str(&out).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].channel, "HHN");
    }

    #[test]
    fn rejects_sample_count_mismatch() {
        let block = "TIMESERIES GR_BFO__HHZ_D, 5 samples, 100 sps, \
                     2023-01-01T00:00:00.000000, SLIST, FLOAT, COUNTS\n1\n2\n3\n";
        assert!(read_str(block).is_err());
    }

    #[test]
    fn rejects_data_before_header() {
        assert!(read_str("1.0\n2.0\n").is_err());
    }

    #[test]
    fn fractional_start_times_are_preserved() {
        let block = "TIMESERIES XX_STA01_00_EHZ_D, 2 samples, 50 sps, \
                     2023-06-01T12:30:00.250000, SLIST, FLOAT, COUNTS\n0.5\n0.25\n";
        let read = read_str(block).unwrap();
        assert_eq!(read[0].location, "00");
        assert_eq!(
            read[0].start_time,
            "2023-06-01T12:30:00.250Z".parse::<DateTime<Utc>>().unwrap()
        );
    }
}
