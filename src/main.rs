//! seispick - batch seismic phase picking
//!
//! Reads a TOML parameter file, loads the configured picker model once,
//! fans the (date × station) work units out across a worker pool, and
//! aggregates the per-unit pick files into final CSV tables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use seispick::picker::PhasePicker;
use seispick::waveform::WaveformResolver;
use seispick::{aggregate, calendar, config, engine, picker, stations};

#[derive(Parser)]
#[command(name = "seispick", version, about = "Batch seismic phase picking")]
struct Args {
    /// Path to the TOML parameter file
    parfile: PathBuf,
}

fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    if !args.parfile.is_file() {
        bail!(
            "The given file {} does not exist. Perhaps take the full path of the file.",
            args.parfile.display()
        );
    }

    info!("seispick {}", env!("CARGO_PKG_VERSION"));
    info!("Parameter file: {}", args.parfile.display());

    // Step 1: Load and validate configuration; all fatal configuration
    // errors surface here, before any output directory side effects.
    let config = config::RunConfig::from_file(&args.parfile)?;
    let kind = config.validate()?;
    let station_list = stations::read_stations(&config.stations)?;
    stations::validate_stations(&station_list)?;
    if station_list.is_empty() {
        bail!("Station file {} lists no stations", config.stations.display());
    }
    let resolver = WaveformResolver::new(&config.sds_path)?
        .with_range(config.starttime, config.endtime);

    // Step 2: Output directory and provenance copies.
    config::copy_provenance(&args.parfile, &config)?;

    // Step 3: Load the picker once; workers share this instance read-only.
    info!("Loaded picker settings:");
    info!("picker: {}", config.picking.picker);
    info!("model: {}", config.picking.model);
    for (key, value) in &config.picking.options {
        info!("{key}: {value}");
    }
    let picker: Arc<dyn PhasePicker> = picker::load_picker(kind, &config.picking.model)?;

    // Step 4: Enumerate work and pick.
    let dates = calendar::enumerate_dates(config.starttime, config.endtime);
    let units = calendar::build_work_units(&dates, &station_list);
    info!(
        "{} work units ({} days x {} stations)",
        units.len(),
        dates.len(),
        station_list.len()
    );

    let started = Instant::now();
    let report = engine::run(
        &units,
        picker,
        &resolver,
        &config.pick_options(),
        &config.output_pathname,
        config.workers,
    )?;

    // Step 5: Aggregate strictly after every unit has completed.
    aggregate::aggregate(&config.output_pathname, config.station_wise)?;

    info!(
        "Finished picking after {:.2} s: {} picks, {} of {} units empty, {} failed",
        started.elapsed().as_secs_f64(),
        report.picks_written,
        report.units_empty,
        report.units_total,
        report.units_failed
    );
    Ok(())
}
