use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::config::{CiCredentials, LogPatternSettings};
use crate::domain::{LogExtraction, WorkflowRun};
use crate::error::LrseqError;
use crate::fs_util::{self, TextEntry};

pub const GITHUB_API_URL: &str = "https://api.github.com";

pub trait CiClient: Send + Sync {
    /// Successful runs, optionally only those created on or after `since`.
    fn list_runs(&self, since: Option<NaiveDate>) -> Result<Vec<WorkflowRun>, LrseqError>;
    fn download_logs(&self, run_id: u64) -> Result<Vec<u8>, LrseqError>;
}

impl<C: CiClient + ?Sized> CiClient for &C {
    fn list_runs(&self, since: Option<NaiveDate>) -> Result<Vec<WorkflowRun>, LrseqError> {
        (**self).list_runs(since)
    }

    fn download_logs(&self, run_id: u64) -> Result<Vec<u8>, LrseqError> {
        (**self).download_logs(run_id)
    }
}

/// Turns one workflow run into its extracted sample counts.
pub trait RunMiner {
    fn mine(&self, run: &WorkflowRun) -> Result<LogExtraction, LrseqError>;
}

#[derive(Clone)]
pub struct GithubHttpClient {
    client: Client,
    api_url: String,
    repository: String,
    workflow: String,
}

#[derive(Debug, Deserialize)]
struct RunsPage {
    #[serde(default)]
    workflow_runs: Vec<GithubRun>,
}

#[derive(Debug, Deserialize)]
struct GithubRun {
    id: u64,
    created_at: DateTime<Utc>,
    #[serde(default)]
    conclusion: Option<String>,
}

impl GithubHttpClient {
    pub fn new(credentials: &CiCredentials, workflow: &str) -> Result<Self, LrseqError> {
        Self::with_api_url(credentials, workflow, GITHUB_API_URL)
    }

    pub fn with_api_url(
        credentials: &CiCredentials,
        workflow: &str,
        api_url: &str,
    ) -> Result<Self, LrseqError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("lrseq/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| LrseqError::GithubHttp(err.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credentials.token))
            .map_err(|err| LrseqError::MissingCredentials(err.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(None)
            .build()
            .map_err(|err| LrseqError::GithubHttp(err.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: credentials.repository.clone(),
            workflow: workflow.to_string(),
        })
    }

    fn runs_url(&self) -> String {
        format!(
            "{}/repos/{}/actions/workflows/{}/runs",
            self.api_url, self.repository, self.workflow
        )
    }

    /// First page of successful runs, filtered to `created>=since` when set.
    pub fn runs_list_url(&self, since: Option<NaiveDate>) -> Result<String, LrseqError> {
        let mut params = vec![
            ("status", "success".to_string()),
            ("per_page", "100".to_string()),
        ];
        if let Some(since) = since {
            params.push(("created", format!(">={}", since.format("%Y-%m-%d"))));
        }
        Url::parse_with_params(&self.runs_url(), &params)
            .map(String::from)
            .map_err(|err| LrseqError::GithubHttp(err.to_string()))
    }

    fn logs_url(&self, run_id: u64) -> String {
        format!(
            "{}/repos/{}/actions/runs/{run_id}/logs",
            self.api_url, self.repository
        )
    }

    fn check_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, LrseqError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "GitHub request failed".to_string());
        Err(LrseqError::GithubStatus { status, message })
    }
}

impl CiClient for GithubHttpClient {
    fn list_runs(&self, since: Option<NaiveDate>) -> Result<Vec<WorkflowRun>, LrseqError> {
        let first = self.runs_list_url(since)?;
        follow_run_pages(&first, |url| {
            let response = self
                .client
                .get(url)
                .send()
                .map_err(|err| LrseqError::GithubHttp(err.to_string()))?;
            let response = Self::check_status(response)?;
            let link = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response
                .text()
                .map_err(|err| LrseqError::GithubHttp(err.to_string()))?;
            Ok(RunPage { body, link })
        })
    }

    fn download_logs(&self, run_id: u64) -> Result<Vec<u8>, LrseqError> {
        let response = self
            .client
            .get(self.logs_url(run_id))
            .send()
            .map_err(|err| LrseqError::GithubHttp(err.to_string()))?;
        let response = Self::check_status(response)?;
        let bytes = response
            .bytes()
            .map_err(|err| LrseqError::GithubHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Raw response of one run-listing page.
#[derive(Debug, Clone)]
pub struct RunPage {
    pub body: String,
    /// `Link` header value, when present.
    pub link: Option<String>,
}

/// Fetches `first_url` and every page reachable through `rel="next"`
/// links, accumulating runs in page order.
pub fn follow_run_pages<F>(
    first_url: &str,
    mut fetch_page: F,
) -> Result<Vec<WorkflowRun>, LrseqError>
where
    F: FnMut(&str) -> Result<RunPage, LrseqError>,
{
    let mut runs = Vec::new();
    let mut url = first_url.to_string();
    loop {
        let page = fetch_page(&url)?;
        let parsed: RunsPage = serde_json::from_str(&page.body)
            .map_err(|err| LrseqError::GithubHttp(format!("invalid run listing: {err}")))?;
        debug!(runs = parsed.workflow_runs.len(), "fetched workflow run page");
        runs.extend(parsed.workflow_runs.into_iter().map(|run| WorkflowRun {
            run_id: run.id,
            created_at: run.created_at,
            status: run.conclusion.unwrap_or_else(|| "success".to_string()),
        }));

        match page.link.as_deref().and_then(parse_next_link) {
            Some(next) => url = next,
            None => return Ok(runs),
        }
    }
}

/// Extracts the `rel="next"` target from an RFC 8288 `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[derive(Debug, Clone)]
pub struct LogPatterns {
    wgs_entry: Regex,
    wgs_line: Regex,
    mgx_entry: Regex,
    mgx_line: Regex,
}

impl LogPatterns {
    pub fn compile(settings: &LogPatternSettings) -> Result<Self, LrseqError> {
        Ok(Self {
            wgs_entry: compile_pattern(&settings.wgs_entry)?,
            wgs_line: compile_pattern(&settings.wgs_line)?,
            mgx_entry: compile_pattern(&settings.mgx_entry)?,
            mgx_line: compile_pattern(&settings.mgx_line)?,
        })
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, LrseqError> {
    Regex::new(pattern).map_err(|err| LrseqError::InvalidPattern(format!("{pattern}: {err}")))
}

/// Counts reported in a run's log archive. A category whose line never
/// appears reports 0.
pub fn extract_counts(
    archive: &[u8],
    run: &WorkflowRun,
    patterns: &LogPatterns,
) -> Result<LogExtraction, LrseqError> {
    let entries = fs_util::zip_text_entries(archive)?;
    Ok(LogExtraction {
        run_id: run.run_id,
        date: run.date(),
        wgs_samples: last_count(&entries, &patterns.wgs_entry, &patterns.wgs_line).unwrap_or(0),
        mgx_samples: last_count(&entries, &patterns.mgx_entry, &patterns.mgx_line).unwrap_or(0),
    })
}

fn last_count(entries: &[TextEntry], entry_re: &Regex, line_re: &Regex) -> Option<u64> {
    entries
        .iter()
        .filter(|entry| entry_re.is_match(&entry.name))
        .flat_map(|entry| line_re.captures_iter(&entry.text))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .last()
}

pub struct LogMiner<C: CiClient> {
    client: C,
    patterns: LogPatterns,
}

impl<C: CiClient> LogMiner<C> {
    pub fn new(client: C, patterns: LogPatterns) -> Self {
        Self { client, patterns }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: CiClient> RunMiner for LogMiner<C> {
    fn mine(&self, run: &WorkflowRun) -> Result<LogExtraction, LrseqError> {
        let archive = self.client.download_logs(run.run_id)?;
        extract_counts(&archive, run, &self.patterns)
    }
}
