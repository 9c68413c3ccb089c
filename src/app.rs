use std::time::{Duration, Instant};

use camino::Utf8Path;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{DatasetRequest, HistorySettings};
use crate::dashboard::{self, DashboardState, Filters, Summary};
use crate::domain::{HistoryRow, Platform};
use crate::ena::{EnaClient, Fetcher, SearchQuery};
use crate::error::LrseqError;
use crate::fs_util;
use crate::history;
use crate::miner::{CiClient, LogMiner, LogPatterns};
use crate::plot;
use crate::writer;

#[derive(Debug, Clone, Serialize)]
pub struct PlatformFetch {
    pub platform: Platform,
    pub records: usize,
    pub attempts: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub name: String,
    pub label: String,
    pub taxon: String,
    pub records: usize,
    pub platforms: Vec<PlatformFetch>,
    pub output: String,
    pub mode: String,
    pub files: Vec<String>,
    pub index: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResult {
    pub csv: String,
    pub plot: String,
    pub rows: usize,
    pub listed: usize,
    pub mined: Vec<u64>,
    pub skipped: Vec<u64>,
    /// Why mining did not run, if it did not.
    pub mining_skipped: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    pub csv: String,
    pub plot: String,
    pub row: HistoryRow,
    pub recorded: bool,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlotResult {
    pub csv: String,
    pub output: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardResult {
    pub data: String,
    pub records: usize,
    pub visible: usize,
    pub summary: Summary,
    pub message: Option<String>,
    pub export: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String, started: Option<Instant>) {
    sink.event(ProgressEvent {
        message,
        elapsed: started.map(|started| started.elapsed()),
    });
}

pub struct App<E: EnaClient, C: CiClient> {
    fetcher: Fetcher<E>,
    ci: Option<C>,
}

impl<E: EnaClient, C: CiClient> App<E, C> {
    /// `ci` is `None` when CI credentials are unavailable; history updates
    /// then only re-plot what is already on disk.
    pub fn new(fetcher: Fetcher<E>, ci: Option<C>) -> Self {
        Self { fetcher, ci }
    }

    pub fn fetch_all(
        &self,
        requests: &[DatasetRequest],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<FetchResult>, LrseqError> {
        requests
            .iter()
            .map(|request| self.fetch_dataset(request, sink))
            .collect()
    }

    pub fn fetch_dataset(
        &self,
        request: &DatasetRequest,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, LrseqError> {
        let started = Instant::now();
        emit(
            sink,
            format!(
                "phase=Resolve; dataset {} tax_tree({})",
                request.name, request.taxon
            ),
            None,
        );

        let mut records = Vec::new();
        let mut platforms = Vec::with_capacity(request.platforms.len());
        for platform in &request.platforms {
            emit(
                sink,
                format!("phase=Fetch; ena.request platform={platform}"),
                Some(started),
            );
            let query = SearchQuery::new(*platform, request.taxon.clone(), request.limit)
                .with_format(request.format);
            let report = self.fetcher.fetch_report(&query);
            emit(
                sink,
                format!(
                    "ena.response platform={platform} records={} attempts={} latency_ms={}",
                    report.records.len(),
                    report.attempts,
                    started.elapsed().as_millis()
                ),
                Some(started),
            );
            platforms.push(PlatformFetch {
                platform: *platform,
                records: report.records.len(),
                attempts: report.attempts,
                error: report.error,
            });
            records.extend(report.records);
        }

        emit(
            sink,
            format!("phase=Store; writing {} ({})", request.output, request.mode),
            Some(started),
        );
        let summary = writer::write(&records, &request.output, request.mode)?;
        let message = format!(
            "Saved {} {} samples to {}",
            records.len(),
            request.label,
            request.output
        );
        info!("{message}");
        emit(sink, message.clone(), Some(started));

        Ok(FetchResult {
            name: request.name.clone(),
            label: request.label.clone(),
            taxon: request.taxon.to_string(),
            records: summary.records,
            platforms,
            output: request.output.to_string(),
            mode: summary.mode,
            files: summary.files,
            index: summary.index,
            message,
        })
    }

    /// Mines new CI runs into the history CSV and re-renders the plot.
    /// Listing failures and missing credentials fall back to plotting the
    /// existing CSV.
    pub fn update_history(
        &self,
        settings: &HistorySettings,
        sink: &dyn ProgressSink,
    ) -> Result<HistoryResult, LrseqError> {
        let started = Instant::now();
        emit(
            sink,
            format!("phase=Resolve; loading {}", settings.csv),
            None,
        );
        let existing = history::load_history(&settings.csv);

        let mut result = HistoryResult {
            csv: settings.csv.to_string(),
            plot: settings.plot.to_string(),
            rows: existing.len(),
            listed: 0,
            mined: Vec::new(),
            skipped: Vec::new(),
            mining_skipped: None,
        };

        let rows = match &self.ci {
            None => {
                warn!("GITHUB_REPOSITORY or GITHUB_TOKEN not set, skipping log mining");
                result.mining_skipped = Some("missing CI credentials".to_string());
                existing
            }
            Some(client) => {
                let patterns = LogPatterns::compile(&settings.patterns)?;
                let since = history::watermark(&existing);
                emit(
                    sink,
                    format!(
                        "phase=Fetch; listing runs of {} since {}",
                        settings.workflow,
                        since
                            .map(|date| date.to_string())
                            .unwrap_or_else(|| "the beginning".to_string())
                    ),
                    Some(started),
                );
                match client.list_runs(since) {
                    Ok(runs) => {
                        result.listed = runs.len();
                        emit(
                            sink,
                            format!("phase=Verify; mining {} runs", runs.len()),
                            Some(started),
                        );
                        let miner = LogMiner::new(client, patterns);
                        let outcome = history::accumulate(&existing, &runs, &miner);
                        emit(
                            sink,
                            format!("phase=Store; writing {}", settings.csv),
                            Some(started),
                        );
                        history::save_history(&settings.csv, &outcome.rows)?;
                        result.mined = outcome.mined;
                        result.skipped = outcome.skipped;
                        outcome.rows
                    }
                    Err(err) => {
                        warn!("failed to list workflow runs, plotting existing history: {err}");
                        result.mining_skipped = Some(err.to_string());
                        existing
                    }
                }
            }
        };

        plot::plot_to_file(&rows, &settings.plot)?;
        result.rows = rows.len();
        emit(
            sink,
            format!("history has {} rows; plot at {}", rows.len(), settings.plot),
            Some(started),
        );
        Ok(result)
    }

    /// Counts the local dataset files and records them under `run_id` and
    /// `date`, then re-renders the plot from the CSV.
    pub fn record_local(
        &self,
        settings: &HistorySettings,
        run_id: u64,
        date: NaiveDate,
        sink: &dyn ProgressSink,
    ) -> Result<RecordResult, LrseqError> {
        emit(
            sink,
            "phase=Resolve; counting samples from local files".to_string(),
            None,
        );
        let row = HistoryRow {
            run_id,
            date,
            wgs_samples: writer::count_samples(&settings.wgs_dataset),
            mgx_samples: writer::count_samples(&settings.mgx_dataset),
        };
        emit(
            sink,
            format!(
                "Found {} WGS samples and {} MGx samples.",
                row.wgs_samples, row.mgx_samples
            ),
            None,
        );

        let existing = history::load_history(&settings.csv);
        let recorded = row.is_qualifying();
        let rows = if recorded {
            let rows = history::record_local_counts(&existing, row);
            history::save_history(&settings.csv, &rows)?;
            rows
        } else {
            info!("no new data found, counts are 0");
            existing
        };

        plot::plot_to_file(&rows, &settings.plot)?;
        Ok(RecordResult {
            csv: settings.csv.to_string(),
            plot: settings.plot.to_string(),
            row,
            recorded,
            rows: rows.len(),
        })
    }

    pub fn plot(
        &self,
        csv: &Utf8Path,
        output: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<PlotResult, LrseqError> {
        emit(sink, format!("phase=Store; plotting {csv} to {output}"), None);
        let rows = plot::plot_csv(csv, output)?;
        Ok(PlotResult {
            csv: csv.to_string(),
            output: output.to_string(),
            rows,
        })
    }

    /// Applies `filters` to the dataset at `data` and optionally exports the
    /// visible table as TSV.
    pub fn dashboard(
        &self,
        data: &Utf8Path,
        filters: Filters,
        export: Option<&Utf8Path>,
        sink: &dyn ProgressSink,
    ) -> Result<DashboardResult, LrseqError> {
        emit(sink, format!("phase=Resolve; loading {data}"), None);
        let state = load_dashboard(data, filters);
        let view = state.view();

        if let Some(path) = export {
            let mut buffer = Vec::new();
            dashboard::export_tsv(view, &mut buffer)?;
            fs_util::write_replace(path, &buffer)?;
            info!(path = %path, rows = view.table.rows.len(), "table exported");
        }

        Ok(DashboardResult {
            data: data.to_string(),
            records: state.dataset().len(),
            visible: view.records.len(),
            summary: view.summary.clone(),
            message: view.message.clone(),
            export: export.map(|path| path.to_string()),
        })
    }
}

/// Dashboard state over the dataset at `data`. An unreadable dataset opens
/// as an empty one.
pub fn load_dashboard(data: &Utf8Path, filters: Filters) -> DashboardState {
    let dataset = match writer::load_dataset(data) {
        Ok(records) => records,
        Err(err) => {
            warn!(path = %data, "failed to load dataset, showing no data: {err}");
            Vec::new()
        }
    };
    DashboardState::with_filters(dataset, filters)
}
