use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::sync::Mutex;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{NaiveDate, TimeZone, Utc};
use lrseq_db::app::{App, ProgressEvent, ProgressSink};
use lrseq_db::config::{HistorySettings, LogPatternSettings};
use lrseq_db::dashboard::{Filters, NO_DATA_MESSAGE};
use lrseq_db::domain::{Platform, SampleRecord, WorkflowRun, WriteMode};
use lrseq_db::ena::{EnaClient, Fetcher, RetryPolicy, SearchQuery};
use lrseq_db::error::LrseqError;
use lrseq_db::history;
use lrseq_db::miner::CiClient;
use lrseq_db::output::JsonOutput;
use lrseq_db::plot::PNG_SIGNATURE;
use lrseq_db::writer;
use zip::write::SimpleFileOptions;

struct OfflineEna;

impl EnaClient for OfflineEna {
    fn search(&self, _query: &SearchQuery) -> Result<String, LrseqError> {
        Err(LrseqError::EnaHttp("offline".to_string()))
    }
}

#[derive(Default)]
struct MockCi {
    runs: Vec<WorkflowRun>,
    archives: HashMap<u64, Vec<u8>>,
    fail_listing: bool,
    since: Mutex<Vec<Option<NaiveDate>>>,
}

impl CiClient for MockCi {
    fn list_runs(&self, since: Option<NaiveDate>) -> Result<Vec<WorkflowRun>, LrseqError> {
        self.since.lock().unwrap().push(since);
        if self.fail_listing {
            return Err(LrseqError::GithubStatus {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(self
            .runs
            .iter()
            .filter(|run| since.is_none_or(|since| run.date() >= since))
            .cloned()
            .collect())
    }

    fn download_logs(&self, run_id: u64) -> Result<Vec<u8>, LrseqError> {
        self.archives
            .get(&run_id)
            .cloned()
            .ok_or_else(|| LrseqError::GithubHttp(format!("no logs for {run_id}")))
    }
}

#[derive(Default)]
struct Recorder {
    messages: RefCell<Vec<String>>,
}

impl ProgressSink for Recorder {
    fn event(&self, event: ProgressEvent) {
        self.messages.borrow_mut().push(event.message);
    }
}

fn log_archive(wgs: u64, mgx: u64) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("update/3_Fetch.txt", options).unwrap();
        writeln!(zip, "2024-06-01T04:00:00Z INFO Saved {wgs} WGS samples to data/wgs.json.gz")
            .unwrap();
        writeln!(zip, "2024-06-01T04:05:00Z INFO Saved {mgx} MGx samples to data/mgx.json.gz")
            .unwrap();
        zip.finish().unwrap();
    }
    buffer.into_inner()
}

fn run(run_id: u64, day: u32) -> WorkflowRun {
    WorkflowRun {
        run_id,
        created_at: Utc.with_ymd_and_hms(2024, 6, day, 4, 0, 0).unwrap(),
        status: "success".to_string(),
    }
}

fn sample(id: &str, organism: &str, platform: Platform) -> SampleRecord {
    SampleRecord {
        sample_id: id.to_string(),
        scientific_name: organism.to_string(),
        instrument_platform: platform,
        study_accession: "PRJNA1".to_string(),
        read_count: 10,
        base_count: 1_000,
        library_strategy: "WGS".to_string(),
        source: "ENA".to_string(),
    }
}

fn settings(root: &Utf8Path) -> HistorySettings {
    HistorySettings {
        csv: root.join("sample_counts.csv"),
        plot: root.join("assets").join("sample_plot.png"),
        workflow: "update.yml".to_string(),
        wgs_dataset: root.join("wgs.json.gz"),
        mgx_dataset: root.join("mgx.json.gz"),
        patterns: LogPatternSettings::default(),
    }
}

fn app(ci: Option<MockCi>) -> App<OfflineEna, MockCi> {
    App::new(
        Fetcher::new(OfflineEna).with_retry(RetryPolicy {
            attempts: 1,
            delay: Duration::ZERO,
        }),
        ci,
    )
}

fn assert_png(path: &Utf8Path) {
    let bytes = fs::read(path.as_std_path()).unwrap();
    assert_eq!(&bytes[..8], &PNG_SIGNATURE);
}

fn workspace() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn history_update_mines_new_runs_and_plots() {
    let (_temp, root) = workspace();
    let settings = settings(&root);
    history::save_history(
        &settings.csv,
        &[lrseq_db::domain::HistoryRow {
            run_id: 5,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            wgs_samples: 10,
            mgx_samples: 1,
        }],
    )
    .unwrap();

    let ci = MockCi {
        runs: vec![run(5, 1), run(6, 2), run(7, 2), run(8, 3)],
        archives: [(6, log_archive(11, 1)), (7, log_archive(12, 2))]
            .into_iter()
            .collect(),
        ..MockCi::default()
    };
    let app = app(Some(ci));

    let result = app.update_history(&settings, &JsonOutput).unwrap();

    assert_eq!(result.listed, 4);
    assert_eq!(result.mined, vec![6, 7]);
    assert_eq!(result.skipped, vec![8]);
    assert_eq!(result.mining_skipped, None);
    assert_eq!(result.rows, 2);

    let rows = history::load_history(&settings.csv);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].run_id, 7);
    assert_eq!(rows[1].wgs_samples, 12);
    assert_eq!(rows[1].mgx_samples, 2);

    assert_png(&settings.plot);
}

#[test]
fn history_listing_starts_at_the_latest_recorded_date() {
    let (_temp, root) = workspace();
    let settings = settings(&root);
    history::save_history(
        &settings.csv,
        &[lrseq_db::domain::HistoryRow {
            run_id: 5,
            date: NaiveDate::from_ymd_opt(2024, 6, 4).unwrap(),
            wgs_samples: 1,
            mgx_samples: 0,
        }],
    )
    .unwrap();

    let ci = MockCi {
        runs: vec![run(5, 4), run(9, 5)],
        archives: [(9, log_archive(3, 0))].into_iter().collect(),
        ..MockCi::default()
    };
    let app: App<OfflineEna, &MockCi> = App::new(Fetcher::new(OfflineEna), Some(&ci));
    let result = app.update_history(&settings, &JsonOutput).unwrap();

    assert_eq!(
        *ci.since.lock().unwrap(),
        vec![NaiveDate::from_ymd_opt(2024, 6, 4)]
    );
    assert_eq!(result.mined, vec![9]);
    assert_eq!(history::load_history(&settings.csv).len(), 2);
}

#[test]
fn missing_credentials_still_plot_existing_history() {
    let (_temp, root) = workspace();
    let settings = settings(&root);

    let result = app(None).update_history(&settings, &JsonOutput).unwrap();

    assert!(result.mining_skipped.is_some());
    assert_eq!(result.rows, 0);
    assert!(!settings.csv.as_std_path().exists());
    assert_png(&settings.plot);
}

#[test]
fn listing_failure_keeps_csv_and_plots() {
    let (_temp, root) = workspace();
    let settings = settings(&root);
    let existing = lrseq_db::domain::HistoryRow {
        run_id: 3,
        date: NaiveDate::from_ymd_opt(2024, 5, 30).unwrap(),
        wgs_samples: 2,
        mgx_samples: 2,
    };
    history::save_history(&settings.csv, &[existing]).unwrap();
    let before = fs::read_to_string(settings.csv.as_std_path()).unwrap();

    let ci = MockCi {
        fail_listing: true,
        ..MockCi::default()
    };
    let result = app(Some(ci)).update_history(&settings, &JsonOutput).unwrap();

    assert!(result.mining_skipped.is_some());
    assert_eq!(result.rows, 1);
    assert_eq!(fs::read_to_string(settings.csv.as_std_path()).unwrap(), before);
    assert_png(&settings.plot);
}

#[test]
fn local_record_counts_dataset_files() {
    let (_temp, root) = workspace();
    let settings = settings(&root);
    writer::write(
        &[
            sample("S1", "Escherichia coli", Platform::OxfordNanopore),
            sample("S2", "Escherichia coli", Platform::PacbioSmrt),
        ],
        &settings.wgs_dataset,
        WriteMode::Gzip,
    )
    .unwrap();
    writer::write(
        &[sample("M1", "gut metagenome", Platform::OxfordNanopore)],
        &settings.mgx_dataset,
        WriteMode::Gzip,
    )
    .unwrap();

    let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
    let recorder = Recorder::default();
    let result = app(None)
        .record_local(&settings, 42, date, &recorder)
        .unwrap();

    assert!(result.recorded);
    assert_eq!(result.row.wgs_samples, 2);
    assert_eq!(result.row.mgx_samples, 1);
    assert_eq!(
        history::load_history(&settings.csv),
        vec![result.row]
    );
    assert!(recorder
        .messages
        .borrow()
        .iter()
        .any(|message| message == "Found 2 WGS samples and 1 MGx samples."));
    assert_png(&settings.plot);
}

#[test]
fn local_record_without_data_leaves_csv_alone() {
    let (_temp, root) = workspace();
    let settings = settings(&root);
    let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();

    let result = app(None)
        .record_local(&settings, 0, date, &JsonOutput)
        .unwrap();

    assert!(!result.recorded);
    assert_eq!(result.rows, 0);
    assert!(!settings.csv.as_std_path().exists());
    assert_png(&settings.plot);
}

#[test]
fn fetch_failure_saves_empty_dataset() {
    let (_temp, root) = workspace();
    let output = root.join("wgs.json");
    let request = lrseq_db::config::DatasetRequest {
        name: "bacteria".to_string(),
        label: "WGS".to_string(),
        platforms: vec![Platform::OxfordNanopore],
        taxon: "2".parse().unwrap(),
        limit: 0,
        output: output.clone(),
        mode: WriteMode::Single,
        format: lrseq_db::domain::ResponseFormat::Json,
    };

    let results = app(None).fetch_all(&[request], &JsonOutput).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].records, 0);
    assert!(results[0].platforms[0].error.is_some());
    assert_eq!(results[0].message, format!("Saved 0 WGS samples to {output}"));
    assert_eq!(fs::read_to_string(output.as_std_path()).unwrap().trim(), "[]");
}

#[test]
fn dashboard_exports_filtered_table() {
    let (_temp, root) = workspace();
    let data = root.join("wgs.json");
    writer::write(
        &[
            sample("S1", "Escherichia coli", Platform::OxfordNanopore),
            sample("S2", "Klebsiella pneumoniae", Platform::PacbioSmrt),
        ],
        &data,
        WriteMode::Single,
    )
    .unwrap();
    let export = root.join("export.tsv");
    let filters = Filters {
        search: Some("klebs".to_string()),
        ..Filters::default()
    };

    let result = app(None)
        .dashboard(&data, filters, Some(&export), &JsonOutput)
        .unwrap();

    assert_eq!(result.records, 2);
    assert_eq!(result.visible, 1);
    let tsv = fs::read_to_string(export.as_std_path()).unwrap();
    let mut lines = tsv.lines();
    assert!(lines.next().unwrap().starts_with("sample_id\tscientific_name"));
    assert!(lines.next().unwrap().starts_with("S2\tKlebsiella pneumoniae"));
    assert_eq!(lines.next(), None);
}

#[test]
fn dashboard_over_missing_dataset_reports_no_data() {
    let (_temp, root) = workspace();
    let result = app(None)
        .dashboard(&root.join("absent.json"), Filters::default(), None, &JsonOutput)
        .unwrap();
    assert_eq!(result.records, 0);
    assert_eq!(result.message.as_deref(), Some(NO_DATA_MESSAGE));
}
