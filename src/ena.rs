use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::warn;

use crate::domain::{Platform, ResponseFormat, SOURCE_ENA, SampleRecord, TaxonId};
use crate::error::LrseqError;

pub const ENA_SEARCH_URL: &str = "https://www.ebi.ac.uk/ena/portal/api/search";

pub const ENA_FIELDS: &[&str] = &[
    "sample_accession",
    "run_accession",
    "scientific_name",
    "instrument_platform",
    "study_accession",
    "read_count",
    "base_count",
    "library_strategy",
];

const UNKNOWN: &str = "Unknown";
const NOT_AVAILABLE: &str = "NA";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub platform: Platform,
    pub taxon: TaxonId,
    /// 0 asks ENA for every matching row.
    pub limit: u64,
    pub format: ResponseFormat,
}

impl SearchQuery {
    pub fn new(platform: Platform, taxon: TaxonId, limit: u64) -> Self {
        Self {
            platform,
            taxon,
            limit,
            format: ResponseFormat::Json,
        }
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn query_expression(&self) -> String {
        format!(
            "instrument_platform=\"{}\" AND tax_tree({})",
            self.platform.as_ena(),
            self.taxon.as_str()
        )
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("result", "read_run".to_string()),
            ("query", self.query_expression()),
            ("fields", ENA_FIELDS.join(",")),
            ("format", self.format.to_string()),
            ("limit", self.limit.to_string()),
        ]
    }
}

/// A single, non-retrying search call returning the raw response body.
pub trait EnaClient: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<String, LrseqError>;
}

#[derive(Clone)]
pub struct EnaHttpClient {
    client: Client,
    base_url: String,
}

impl EnaHttpClient {
    pub fn new() -> Result<Self, LrseqError> {
        Self::with_base_url(ENA_SEARCH_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, LrseqError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("lrseq/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| LrseqError::EnaHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| LrseqError::EnaHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

impl EnaClient for EnaHttpClient {
    fn search(&self, query: &SearchQuery) -> Result<String, LrseqError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&query.params())
            .send()
            .map_err(|err| LrseqError::EnaHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "ENA request failed".to_string());
            return Err(LrseqError::EnaStatus { status, message });
        }
        response
            .text()
            .map_err(|err| LrseqError::EnaHttp(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub records: Vec<SampleRecord>,
    pub attempts: usize,
    pub error: Option<String>,
}

pub struct Fetcher<C: EnaClient> {
    client: C,
    retry: RetryPolicy,
}

impl<C: EnaClient> Fetcher<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Never fails: exhausted retries and unparsable bodies yield an empty
    /// vector and a logged warning.
    pub fn fetch(&self, platform: Platform, taxon: &TaxonId, limit: u64) -> Vec<SampleRecord> {
        self.fetch_report(&SearchQuery::new(platform, taxon.clone(), limit))
            .records
    }

    pub fn fetch_report(&self, query: &SearchQuery) -> FetchReport {
        let (result, attempts) = self.send_with_retries(query);
        let parsed = result.and_then(|body| match query.format {
            ResponseFormat::Json => parse_json_records(&body, query.platform),
            ResponseFormat::Tsv => parse_tsv_records(&body, query.platform),
        });
        match parsed {
            Ok(records) => FetchReport {
                records,
                attempts,
                error: None,
            },
            Err(err) => {
                warn!(
                    platform = %query.platform,
                    taxon = %query.taxon,
                    attempts,
                    "ENA fetch failed, continuing with no records: {err}"
                );
                FetchReport {
                    records: Vec::new(),
                    attempts,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn send_with_retries(&self, query: &SearchQuery) -> (Result<String, LrseqError>, usize) {
        let max_attempts = self.retry.attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.client.search(query) {
                Ok(body) => return (Ok(body), attempt),
                Err(err) => {
                    if attempt < max_attempts && is_retryable(&err) {
                        warn!(attempt, "ENA request failed, retrying: {err}");
                        thread::sleep(self.retry.delay);
                        continue;
                    }
                    return (Err(err), attempt);
                }
            }
        }
    }
}

fn is_retryable(err: &LrseqError) -> bool {
    match err {
        LrseqError::EnaHttp(_) => true,
        LrseqError::EnaStatus { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
        _ => false,
    }
}

pub fn parse_json_records(
    body: &str,
    fallback_platform: Platform,
) -> Result<Vec<SampleRecord>, LrseqError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value =
        serde_json::from_str(body).map_err(|err| LrseqError::EnaParse(err.to_string()))?;
    let rows = value
        .as_array()
        .ok_or_else(|| LrseqError::EnaParse("expected a JSON array of rows".to_string()))?;
    Ok(rows
        .iter()
        .map(|row| normalize_record(|field| json_field(row, field), fallback_platform))
        .collect())
}

pub fn parse_tsv_records(
    body: &str,
    fallback_platform: Platform,
) -> Result<Vec<SampleRecord>, LrseqError> {
    let mut lines = body.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = header.split('\t').map(str::trim).collect::<Vec<_>>();
    let known = columns
        .iter()
        .any(|column| ENA_FIELDS.contains(column) || *column == "accession");
    if !known {
        return Err(LrseqError::EnaParse(format!(
            "unexpected TSV header: {header}"
        )));
    }
    Ok(lines
        .map(|line| {
            let values = line.split('\t').collect::<Vec<_>>();
            normalize_record(
                |field| {
                    columns
                        .iter()
                        .position(|column| *column == field)
                        .and_then(|index| values.get(index))
                        .map(|value| value.trim())
                        .filter(|value| !value.is_empty())
                        .map(str::to_string)
                },
                fallback_platform,
            )
        })
        .collect())
}

fn json_field(row: &Value, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(value) => {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        }
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn normalize_record<F>(field: F, fallback_platform: Platform) -> SampleRecord
where
    F: Fn(&str) -> Option<String>,
{
    let sample_id = field("sample_accession")
        .or_else(|| field("run_accession"))
        .or_else(|| field("accession"))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let instrument_platform = field("instrument_platform")
        .map(|value| Platform::from_ena(&value))
        .unwrap_or(fallback_platform);
    SampleRecord {
        sample_id,
        scientific_name: field("scientific_name").unwrap_or_else(|| UNKNOWN.to_string()),
        instrument_platform,
        study_accession: field("study_accession").unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        read_count: parse_count(field("read_count")),
        base_count: parse_count(field("base_count")),
        library_strategy: field("library_strategy")
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        source: SOURCE_ENA.to_string(),
    }
}

fn parse_count(value: Option<String>) -> u64 {
    value
        .and_then(|value| {
            value
                .parse::<u64>()
                .ok()
                .or_else(|| value.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_combines_platform_and_taxon() {
        let query = SearchQuery::new(Platform::PacbioSmrt, "2".parse().unwrap(), 0);
        assert_eq!(
            query.query_expression(),
            "instrument_platform=\"PACBIO_SMRT\" AND tax_tree(2)"
        );
        let params = query.params();
        assert!(params.contains(&("limit", "0".to_string())));
        assert!(params.contains(&("format", "json".to_string())));
    }

    #[test]
    fn counts_accept_numbers_and_strings() {
        assert_eq!(parse_count(Some("42".to_string())), 42);
        assert_eq!(parse_count(Some("42.0".to_string())), 42);
        assert_eq!(parse_count(Some("-1".to_string())), 0);
        assert_eq!(parse_count(Some("n/a".to_string())), 0);
        assert_eq!(parse_count(None), 0);
    }
}
