//! Result aggregation: fold intermediate `.pick` files into final CSVs.
//!
//! The station key is the filename stem up to the first `_` (station ids are
//! validated `_`-free at startup, so the split is lossless). Rows move at
//! the string level — timestamps and values pass through byte-identical —
//! and any column outside the canonical schema (index-like leftovers from a
//! foreign writer) is stripped, never propagated.
//!
//! Each intermediate file is deleted right after folding; running again on
//! the emptied directory is a no-op.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::engine::PICK_COLUMNS;
use crate::error::Result;

/// Aggregate every intermediate file in `output_dir`.
///
/// `station_wise` selects one `{station_id}.csv` per station; otherwise all
/// rows union into a single `picks.csv`. Row order across source files is
/// unspecified.
pub fn aggregate(output_dir: &Path, station_wise: bool) -> Result<()> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(output_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "pick"))
        .collect();
    files.sort();

    if files.is_empty() {
        debug!("No intermediate pick files in {}", output_dir.display());
        return Ok(());
    }

    let mut groups: BTreeMap<String, Vec<Vec<String>>> = BTreeMap::new();
    for path in &files {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!("Skipping pick file with undecodable name: {}", path.display());
            continue;
        };
        let station = stem.splitn(2, '_').next().unwrap_or(stem).to_string();
        let rows = read_pick_file(path)?;
        groups.entry(station).or_default().extend(rows);
        // Fold exactly once: remove the intermediate as soon as it is read.
        std::fs::remove_file(path)?;
    }

    if station_wise {
        for (station, rows) in &groups {
            let out = output_dir.join(format!("{station}.csv"));
            write_table(&out, rows)?;
            info!("Wrote {} picks to {}", rows.len(), out.display());
        }
    } else {
        let total: usize = groups.values().map(Vec::len).sum();
        let out = output_dir.join("picks.csv");
        let rows: Vec<&Vec<String>> = groups.values().flatten().collect();
        write_table_refs(&out, &rows)?;
        info!("Wrote {} picks to {}", total, out.display());
    }
    Ok(())
}

/// Read one intermediate file, projecting each row onto the canonical
/// columns by header name. Unknown columns are dropped; a missing canonical
/// column becomes an empty field (and a warning).
fn read_pick_file(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let indices: Vec<Option<usize>> = PICK_COLUMNS
        .iter()
        .map(|col| headers.iter().position(|h| h == *col))
        .collect();
    if indices.iter().any(Option::is_none) {
        warn!(
            "{} lacks some pick columns; missing values left empty",
            path.display()
        );
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            indices
                .iter()
                .map(|idx| {
                    idx.and_then(|i| record.get(i))
                        .unwrap_or_default()
                        .to_string()
                })
                .collect(),
        );
    }
    Ok(rows)
}

fn write_table(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(PICK_COLUMNS)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_table_refs(path: &Path, rows: &[&Vec<String>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(PICK_COLUMNS)?;
    for row in rows {
        writer.write_record(row.iter())?;
    }
    writer.flush()?;
    Ok(())
}
