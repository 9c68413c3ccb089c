use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Mutex;

use assert_matches::assert_matches;
use chrono::{NaiveDate, TimeZone, Utc};
use lrseq_db::config::{CiCredentials, LogPatternSettings};
use lrseq_db::domain::WorkflowRun;
use lrseq_db::error::LrseqError;
use lrseq_db::miner::{
    CiClient, GithubHttpClient, LogMiner, LogPatterns, RunMiner, RunPage, extract_counts,
    follow_run_pages, parse_next_link,
};
use zip::write::SimpleFileOptions;

fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.add_directory("update/", options).unwrap();
        for (name, text) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(text.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer.into_inner()
}

fn run(run_id: u64, day: u32) -> WorkflowRun {
    WorkflowRun {
        run_id,
        created_at: Utc.with_ymd_and_hms(2024, 6, day, 4, 30, 0).unwrap(),
        status: "success".to_string(),
    }
}

fn patterns() -> LogPatterns {
    LogPatterns::compile(&LogPatternSettings::default()).unwrap()
}

#[test]
fn extracts_counts_per_category() {
    let bytes = archive(&[
        (
            "update/3_Fetch bacteria.txt",
            "2024-06-02T04:31:00Z INFO Saved 1532 WGS samples to genome-dashboard/data_bacteria.json.gz\n",
        ),
        (
            "update/4_Fetch metagenomes.txt",
            "2024-06-02T04:40:00Z INFO Saved 87 MGx samples to genome-dashboard/data_metagenome.json.gz\n",
        ),
    ]);

    let extraction = extract_counts(&bytes, &run(41, 2), &patterns()).unwrap();

    assert_eq!(extraction.run_id, 41);
    assert_eq!(extraction.date, NaiveDate::from_ymd_opt(2024, 6, 2).unwrap());
    assert_eq!(extraction.wgs_samples, 1532);
    assert_eq!(extraction.mgx_samples, 87);
}

#[test]
fn unreported_category_counts_zero_and_last_match_wins() {
    let bytes = archive(&[
        ("update/1_setup.txt", "Saved 5 WGS samples to a\n"),
        ("update/2_retry.txt", "Saved 9 WGS samples to a\n"),
        ("update/notes.md", "Saved 100 MGx samples to b\n"),
    ]);

    let extraction = extract_counts(&bytes, &run(42, 3), &patterns()).unwrap();

    assert_eq!(extraction.wgs_samples, 9);
    assert_eq!(extraction.mgx_samples, 0);
}

#[test]
fn custom_patterns_restrict_entries() {
    let settings = LogPatternSettings {
        wgs_entry: r"Fetch bacteria".to_string(),
        wgs_line: r"wrote (\d+) records".to_string(),
        ..LogPatternSettings::default()
    };
    let bytes = archive(&[
        ("update/Fetch bacteria.txt", "wrote 12 records\n"),
        ("update/Fetch other.txt", "wrote 99 records\n"),
    ]);

    let extraction =
        extract_counts(&bytes, &run(1, 4), &LogPatterns::compile(&settings).unwrap()).unwrap();
    assert_eq!(extraction.wgs_samples, 12);
}

#[test]
fn non_zip_archive_is_an_error() {
    let err = extract_counts(b"PK but not really", &run(1, 1), &patterns()).unwrap_err();
    assert_matches!(err, LrseqError::LogArchive(_));
}

struct MockCi {
    archives: HashMap<u64, Vec<u8>>,
    downloads: Mutex<Vec<u64>>,
}

impl CiClient for MockCi {
    fn list_runs(&self, _since: Option<NaiveDate>) -> Result<Vec<WorkflowRun>, LrseqError> {
        Ok(Vec::new())
    }

    fn download_logs(&self, run_id: u64) -> Result<Vec<u8>, LrseqError> {
        self.downloads.lock().unwrap().push(run_id);
        self.archives
            .get(&run_id)
            .cloned()
            .ok_or(LrseqError::GithubStatus {
                status: 410,
                message: "logs expired".to_string(),
            })
    }
}

#[test]
fn log_miner_downloads_and_extracts() {
    let client = MockCi {
        archives: HashMap::from([(7, archive(&[("a.txt", "Saved 3 MGx samples to x")]))]),
        downloads: Mutex::new(Vec::new()),
    };
    let miner = LogMiner::new(client, patterns());

    let extraction = miner.mine(&run(7, 5)).unwrap();
    assert_eq!(extraction.mgx_samples, 3);
    assert_matches!(miner.mine(&run(8, 5)), Err(LrseqError::GithubStatus { status: 410, .. }));
    assert_eq!(*miner.client().downloads.lock().unwrap(), vec![7, 8]);
}

#[test]
fn link_header_without_next_ends_pagination() {
    assert_eq!(parse_next_link(""), None);
    assert_eq!(
        parse_next_link("<https://api.github.com/r?page=2>; rel=\"next\"").as_deref(),
        Some("https://api.github.com/r?page=2")
    );
    assert_eq!(
        parse_next_link("<https://api.github.com/r?page=1>; rel=\"first\""),
        None
    );
}

fn runs_body(ids: &[(u64, u32)]) -> String {
    let runs = ids
        .iter()
        .map(|(id, day)| {
            format!(
                r#"{{"id":{id},"created_at":"2024-06-{day:02}T04:00:00Z","conclusion":"success"}}"#
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!(r#"{{"total_count":{},"workflow_runs":[{runs}]}}"#, ids.len())
}

#[test]
fn run_pages_are_followed_until_no_next_link() {
    let pages: HashMap<&str, RunPage> = [
        (
            "https://api.test/runs?page=1",
            RunPage {
                body: runs_body(&[(1, 1), (2, 2)]),
                link: Some(
                    "<https://api.test/runs?page=2>; rel=\"next\", <https://api.test/runs?page=3>; rel=\"last\""
                        .to_string(),
                ),
            },
        ),
        (
            "https://api.test/runs?page=2",
            RunPage {
                body: runs_body(&[(3, 3)]),
                link: Some("<https://api.test/runs?page=3>; rel=\"next\"".to_string()),
            },
        ),
        (
            "https://api.test/runs?page=3",
            RunPage {
                body: runs_body(&[(4, 4)]),
                link: Some("<https://api.test/runs?page=1>; rel=\"first\"".to_string()),
            },
        ),
    ]
    .into_iter()
    .collect();

    let mut visited = Vec::new();
    let runs = follow_run_pages("https://api.test/runs?page=1", |url| {
        visited.push(url.to_string());
        pages
            .get(url)
            .cloned()
            .ok_or_else(|| LrseqError::GithubHttp(format!("unexpected {url}")))
    })
    .unwrap();

    assert_eq!(
        visited,
        vec![
            "https://api.test/runs?page=1",
            "https://api.test/runs?page=2",
            "https://api.test/runs?page=3",
        ]
    );
    assert_eq!(
        runs.iter().map(|run| run.run_id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(runs[2].date(), NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
}

#[test]
fn single_page_without_link_header() {
    let mut calls = 0;
    let runs = follow_run_pages("https://api.test/runs", |_| {
        calls += 1;
        Ok(RunPage {
            body: runs_body(&[(7, 5)]),
            link: None,
        })
    })
    .unwrap();
    assert_eq!(calls, 1);
    assert_eq!(runs.len(), 1);
}

#[test]
fn failing_page_aborts_listing() {
    let result = follow_run_pages("https://api.test/runs?page=1", |url| {
        if url.ends_with("page=1") {
            Ok(RunPage {
                body: runs_body(&[(1, 1)]),
                link: Some("<https://api.test/runs?page=2>; rel=\"next\"".to_string()),
            })
        } else {
            Err(LrseqError::GithubStatus {
                status: 500,
                message: "boom".to_string(),
            })
        }
    });
    assert_matches!(result, Err(LrseqError::GithubStatus { status: 500, .. }));

    let malformed = follow_run_pages("https://api.test/runs", |_| {
        Ok(RunPage {
            body: "<html>".to_string(),
            link: None,
        })
    });
    assert_matches!(malformed, Err(LrseqError::GithubHttp(_)));
}

#[test]
fn run_listing_url_filters_successful_runs_since_watermark() {
    let credentials = CiCredentials {
        repository: "octo/lrseq".to_string(),
        token: "token".to_string(),
    };
    let client =
        GithubHttpClient::with_api_url(&credentials, "update.yml", "https://api.test/").unwrap();

    let url = client
        .runs_list_url(NaiveDate::from_ymd_opt(2024, 6, 1))
        .unwrap();
    assert!(url.starts_with("https://api.test/repos/octo/lrseq/actions/workflows/update.yml/runs?"));
    assert!(url.contains("status=success"));
    assert!(url.contains("per_page=100"));
    assert!(url.contains("created=%3E%3D2024-06-01"));

    let unbounded = client.runs_list_url(None).unwrap();
    assert!(!unbounded.contains("created="));
}
