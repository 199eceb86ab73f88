//! Station list loading and station identifier parsing.
//!
//! Stations come from a CSV file with at least `id` and `channel_code`
//! columns; extra columns are ignored. A station id is `NET.STA` or
//! `NET.STA.LOC` — anything else is a fatal configuration error, caught at
//! validation time so the worker pool never sees a malformed id.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One row of the station file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Station {
    /// Station identifier, `NET.STA` or `NET.STA.LOC`.
    pub id: String,
    /// Channel code prefix, e.g. "HH"; matched as a wildcard prefix against
    /// the archive's channel directories.
    pub channel_code: String,
}

/// A station identifier split into its SEED components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationId {
    pub network: String,
    pub station: String,
    /// Empty string when the id carries no location code.
    pub location: String,
}

impl StationId {
    /// Parse `NET.STA` or `NET.STA.LOC`.
    pub fn parse(id: &str) -> Result<Self> {
        let parts: Vec<&str> = id.split('.').collect();
        match parts.as_slice() {
            [network, station] => Ok(Self {
                network: network.to_string(),
                station: station.to_string(),
                location: String::new(),
            }),
            [network, station, location] => Ok(Self {
                network: network.to_string(),
                station: station.to_string(),
                location: location.to_string(),
            }),
            _ => Err(Error::StationId(format!(
                "'{id}' must be NET.STA or NET.STA.LOC"
            ))),
        }
    }
}

/// Read the station file.
pub fn read_stations(path: &Path) -> Result<Vec<Station>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut stations = Vec::new();
    for row in reader.deserialize() {
        let station: Station = row?;
        stations.push(station);
    }
    Ok(stations)
}

/// Validate every station id: parseable, and free of `_`.
///
/// The intermediate-result filename encodes the station id before the first
/// `_`, so an id containing one would corrupt the aggregation grouping key.
pub fn validate_stations(stations: &[Station]) -> Result<()> {
    for station in stations {
        StationId::parse(&station.id)?;
        if station.id.contains('_') {
            return Err(Error::Config(format!(
                "Station id '{}' contains '_', which collides with the \
                 intermediate filename encoding",
                station.id
            )));
        }
    }
    Ok(())
}
