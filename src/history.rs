use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8Path;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{HistoryRow, LogExtraction, WorkflowRun};
use crate::error::LrseqError;
use crate::fs_util;
use crate::miner::RunMiner;

pub const CSV_HEADER: [&str; 4] = ["run_id", "date", "wgs_samples", "mgx_samples"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccumulateOutcome {
    pub rows: Vec<HistoryRow>,
    /// Runs whose logs were mined during this call.
    pub mined: Vec<u64>,
    /// Runs that could not be mined; they stay unprocessed.
    pub skipped: Vec<u64>,
}

pub fn processed_run_ids(rows: &[HistoryRow]) -> BTreeSet<u64> {
    rows.iter().map(|row| row.run_id).collect()
}

/// Latest date already recorded; used as an inclusive lower bound when
/// listing runs.
pub fn watermark(rows: &[HistoryRow]) -> Option<NaiveDate> {
    rows.iter().map(|row| row.date).max()
}

pub fn accumulate<M>(
    existing: &[HistoryRow],
    new_runs: &[WorkflowRun],
    miner: &M,
) -> AccumulateOutcome
where
    M: RunMiner + ?Sized,
{
    let processed = processed_run_ids(existing);

    let mut extracted = BTreeMap::<u64, LogExtraction>::new();
    let mut skipped = Vec::new();
    for run in new_runs {
        if processed.contains(&run.run_id) || extracted.contains_key(&run.run_id) {
            continue;
        }
        match miner.mine(run) {
            Ok(extraction) => {
                extracted.insert(run.run_id, extraction);
            }
            Err(err) => {
                warn!(run_id = run.run_id, "skipping run, logs unavailable: {err}");
                skipped.push(run.run_id);
            }
        }
    }

    let mined = extracted.keys().copied().collect::<Vec<_>>();
    let mut combined = existing.to_vec();
    combined.extend(extracted.into_values().map(HistoryRow::from));

    AccumulateOutcome {
        rows: dedup_by_date(combined),
        mined,
        skipped,
    }
}

/// Keeps qualifying rows only, one per date (largest run id), sorted by date.
pub fn dedup_by_date(rows: Vec<HistoryRow>) -> Vec<HistoryRow> {
    let mut by_date = BTreeMap::<NaiveDate, HistoryRow>::new();
    for row in rows.into_iter().filter(HistoryRow::is_qualifying) {
        by_date
            .entry(row.date)
            .and_modify(|current| {
                if row.run_id > current.run_id {
                    *current = row;
                }
            })
            .or_insert(row);
    }
    by_date.into_values().collect()
}

/// Adds a row built from locally counted datasets, replacing any row on the
/// same date. Zero counts leave the table untouched.
pub fn record_local_counts(existing: &[HistoryRow], row: HistoryRow) -> Vec<HistoryRow> {
    if !row.is_qualifying() {
        return existing.to_vec();
    }
    let mut combined = existing
        .iter()
        .filter(|current| current.date != row.date)
        .copied()
        .collect::<Vec<_>>();
    combined.push(row);
    dedup_by_date(combined)
}

/// Missing, empty, or header-less files load as an empty table; malformed
/// rows are skipped.
pub fn load_history(path: &Utf8Path) -> Vec<HistoryRow> {
    let std_path = path.as_std_path();
    let is_empty = std_path
        .metadata()
        .map(|meta| meta.len() == 0)
        .unwrap_or(true);
    if is_empty {
        return Vec::new();
    }

    let mut reader = match csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(std_path) {
        Ok(reader) => reader,
        Err(err) => {
            warn!(path = %path, "failed to open history: {err}");
            return Vec::new();
        }
    };

    let has_columns = reader
        .headers()
        .map(|headers| CSV_HEADER.iter().all(|name| headers.iter().any(|h| h == *name)))
        .unwrap_or(false);
    if !has_columns {
        warn!(path = %path, "history file has no usable header, treating as empty");
        return Vec::new();
    }

    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<HistoryRow>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(err) => warn!(path = %path, row = line + 1, "skipping history row: {err}"),
        }
    }
    rows
}

pub fn save_history(path: &Utf8Path, rows: &[HistoryRow]) -> Result<(), LrseqError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .map_err(|err| LrseqError::History(err.to_string()))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| LrseqError::History(err.to_string()))?;
    }
    let content = writer
        .into_inner()
        .map_err(|err| LrseqError::History(err.to_string()))?;
    fs_util::write_replace(path, &content)?;
    info!(path = %path, rows = rows.len(), "history updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(run_id: u64, date: &str, wgs: u64, mgx: u64) -> HistoryRow {
        HistoryRow {
            run_id,
            date: date.parse().unwrap(),
            wgs_samples: wgs,
            mgx_samples: mgx,
        }
    }

    #[test]
    fn dedup_keeps_largest_run_per_date() {
        let rows = vec![
            row(200, "2024-05-01", 5, 1),
            row(100, "2024-05-01", 4, 1),
            row(50, "2024-04-30", 3, 0),
        ];
        let deduped = dedup_by_date(rows);
        assert_eq!(deduped, vec![row(50, "2024-04-30", 3, 0), row(200, "2024-05-01", 5, 1)]);
    }

    #[test]
    fn watermark_is_latest_date() {
        let rows = vec![row(1, "2024-01-03", 1, 1), row(2, "2024-02-01", 1, 1)];
        assert_eq!(watermark(&rows), Some("2024-02-01".parse().unwrap()));
        assert_eq!(watermark(&[]), None);
    }

    #[test]
    fn zero_local_counts_are_not_recorded() {
        let existing = vec![row(1, "2024-01-03", 1, 1)];
        let result = record_local_counts(&existing, row(2, "2024-01-04", 0, 0));
        assert_eq!(result, existing);
    }
}
