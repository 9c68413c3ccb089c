use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::LrseqError;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const SOURCE_ENA: &str = "ENA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    #[value(alias = "ont")]
    OxfordNanopore,
    #[value(alias = "pacbio")]
    PacbioSmrt,
    Illumina,
    IonTorrent,
    Bgiseq,
    Unknown,
}

impl Platform {
    /// Value used by the ENA `instrument_platform` field.
    pub fn as_ena(self) -> &'static str {
        match self {
            Platform::OxfordNanopore => "OXFORD_NANOPORE",
            Platform::PacbioSmrt => "PACBIO_SMRT",
            Platform::Illumina => "ILLUMINA",
            Platform::IonTorrent => "ION_TORRENT",
            Platform::Bgiseq => "BGISEQ",
            Platform::Unknown => "UNKNOWN",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Platform::OxfordNanopore => "Oxford Nanopore",
            Platform::PacbioSmrt => "PacBio",
            Platform::Illumina => "Illumina",
            Platform::IonTorrent => "Ion Torrent",
            Platform::Bgiseq => "BGISEQ",
            Platform::Unknown => "Unknown",
        }
    }

    /// Lenient mapping used for remote data; anything unrecognized is `Unknown`.
    pub fn from_ena(value: &str) -> Self {
        Self::parse_known(value).unwrap_or(Platform::Unknown)
    }

    fn parse_known(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "OXFORD_NANOPORE" | "ONT" | "NANOPORE" => Some(Platform::OxfordNanopore),
            "PACBIO_SMRT" | "PACBIO" => Some(Platform::PacbioSmrt),
            "ILLUMINA" => Some(Platform::Illumina),
            "ION_TORRENT" => Some(Platform::IonTorrent),
            "BGISEQ" | "DNBSEQ" => Some(Platform::Bgiseq),
            "UNKNOWN" => Some(Platform::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ena())
    }
}

impl FromStr for Platform {
    type Err = LrseqError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse_known(value).ok_or_else(|| LrseqError::InvalidPlatform(value.to_string()))
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Platform::from_ena(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxonId(String);

impl TaxonId {
    pub(crate) fn known(value: &'static str) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = LrseqError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() || !normalized.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(LrseqError::InvalidTaxonId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for TaxonId {
    type Error = LrseqError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaxonId> for String {
    fn from(value: TaxonId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Tsv,
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFormat::Json => write!(f, "json"),
            ResponseFormat::Tsv => write!(f, "tsv"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteModeKind {
    #[default]
    Single,
    Gzip,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Single,
    Gzip,
    Chunked { chunk_size: usize },
}

impl WriteMode {
    pub fn resolve(kind: WriteModeKind, chunk_size: Option<usize>) -> Result<Self, LrseqError> {
        match kind {
            WriteModeKind::Single => Ok(WriteMode::Single),
            WriteModeKind::Gzip => Ok(WriteMode::Gzip),
            WriteModeKind::Chunked => {
                let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
                if chunk_size == 0 {
                    return Err(LrseqError::InvalidChunkSize);
                }
                Ok(WriteMode::Chunked { chunk_size })
            }
        }
    }

    pub fn kind(self) -> WriteModeKind {
        match self {
            WriteMode::Single => WriteModeKind::Single,
            WriteMode::Gzip => WriteModeKind::Gzip,
            WriteMode::Chunked { .. } => WriteModeKind::Chunked,
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Single => write!(f, "single"),
            WriteMode::Gzip => write!(f, "gzip"),
            WriteMode::Chunked { chunk_size } => write!(f, "chunked({chunk_size})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample_id: String,
    pub scientific_name: String,
    pub instrument_platform: Platform,
    pub study_accession: String,
    pub read_count: u64,
    pub base_count: u64,
    pub library_strategy: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    SOURCE_ENA.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: u64,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

impl WorkflowRun {
    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogExtraction {
    pub run_id: u64,
    pub date: NaiveDate,
    pub wgs_samples: u64,
    pub mgx_samples: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
    #[serde(deserialize_with = "integral_u64")]
    pub run_id: u64,
    pub date: NaiveDate,
    #[serde(deserialize_with = "integral_u64")]
    pub wgs_samples: u64,
    #[serde(deserialize_with = "integral_u64")]
    pub mgx_samples: u64,
}

/// Accepts unsigned integers and whole floats such as `123.0`, which
/// float-typed CSV writers produce for integer columns.
fn integral_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(IntegralVisitor)
}

struct IntegralVisitor;

impl Visitor<'_> for IntegralVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a non-negative whole number")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
        u64::try_from(value).map_err(|_| E::invalid_value(Unexpected::Signed(value), &self))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<u64, E> {
        if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value < u64::MAX as f64 {
            Ok(value as u64)
        } else {
            Err(E::invalid_value(Unexpected::Float(value), &self))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
        let trimmed = value.trim();
        if let Ok(parsed) = trimmed.parse::<u64>() {
            return Ok(parsed);
        }
        match trimmed.parse::<f64>() {
            Ok(parsed) => self.visit_f64(parsed),
            Err(_) => Err(E::invalid_value(Unexpected::Str(value), &self)),
        }
    }
}

impl HistoryRow {
    pub fn is_qualifying(&self) -> bool {
        self.wgs_samples > 0 || self.mgx_samples > 0
    }
}

impl From<LogExtraction> for HistoryRow {
    fn from(value: LogExtraction) -> Self {
        Self {
            run_id: value.run_id,
            date: value.date,
            wgs_samples: value.wgs_samples,
            mgx_samples: value.mgx_samples,
        }
    }
}
