use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{Platform, ResponseFormat, TaxonId, WriteMode, WriteModeKind};
use crate::error::LrseqError;

pub const DEFAULT_CONFIG_FILE: &str = "lrseq.json";
pub const BACTERIA_TAXON: &str = "2";
pub const METAGENOME_TAXON: &str = "408169";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
    #[serde(default)]
    pub history: Option<HistoryEntry>,
    #[serde(default)]
    pub dashboard: Option<DashboardEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DatasetEntry {
    Shorthand(String),
    Detailed(DatasetEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatasetEntryObject {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub output: Option<Utf8PathBuf>,
    #[serde(default)]
    pub mode: Option<WriteModeKind>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub format: Option<ResponseFormat>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub csv: Option<Utf8PathBuf>,
    #[serde(default)]
    pub plot: Option<Utf8PathBuf>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub wgs_dataset: Option<Utf8PathBuf>,
    #[serde(default)]
    pub mgx_dataset: Option<Utf8PathBuf>,
    #[serde(default)]
    pub patterns: Option<LogPatternSettings>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DashboardEntry {
    #[serde(default)]
    pub data: Option<Utf8PathBuf>,
}

/// Regular expressions used to pull sample counts out of CI log archives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogPatternSettings {
    pub wgs_entry: String,
    pub wgs_line: String,
    pub mgx_entry: String,
    pub mgx_line: String,
}

impl Default for LogPatternSettings {
    fn default() -> Self {
        Self {
            wgs_entry: r"(?i)\.(txt|log)$".to_string(),
            wgs_line: r"(?i)saved (\d+) wgs samples".to_string(),
            mgx_entry: r"(?i)\.(txt|log)$".to_string(),
            mgx_line: r"(?i)saved (\d+) mgx samples".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRequest {
    pub name: String,
    pub label: String,
    pub platforms: Vec<Platform>,
    pub taxon: TaxonId,
    pub limit: u64,
    pub output: Utf8PathBuf,
    pub mode: WriteMode,
    pub format: ResponseFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistorySettings {
    pub csv: Utf8PathBuf,
    pub plot: Utf8PathBuf,
    pub workflow: String,
    pub wgs_dataset: Utf8PathBuf,
    pub mgx_dataset: Utf8PathBuf,
    pub patterns: LogPatternSettings,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub datasets: Vec<DatasetRequest>,
    pub history: HistorySettings,
    pub dashboard_data: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `lrseq.json` (or `path`). A missing default file is not an
    /// error: the built-in layout is used instead.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, LrseqError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| LrseqError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| LrseqError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, LrseqError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let datasets = if config.datasets.is_empty() {
            default_datasets()
        } else {
            config
                .datasets
                .into_iter()
                .map(resolve_dataset)
                .collect::<Result<Vec<_>, LrseqError>>()?
        };

        let history_entry = config.history.unwrap_or_default();
        let defaults = default_history();
        let history = HistorySettings {
            csv: history_entry.csv.unwrap_or(defaults.csv),
            plot: history_entry.plot.unwrap_or(defaults.plot),
            workflow: history_entry.workflow.unwrap_or(defaults.workflow),
            wgs_dataset: history_entry.wgs_dataset.unwrap_or(defaults.wgs_dataset),
            mgx_dataset: history_entry.mgx_dataset.unwrap_or(defaults.mgx_dataset),
            patterns: history_entry.patterns.unwrap_or(defaults.patterns),
        };

        let dashboard_data = config
            .dashboard
            .and_then(|entry| entry.data)
            .or_else(|| datasets.first().map(|dataset| dataset.output.clone()))
            .unwrap_or_else(|| Utf8PathBuf::from("genome-dashboard/data_bacteria.json.gz"));

        Ok(ResolvedConfig {
            schema_version,
            datasets,
            history,
            dashboard_data,
        })
    }
}

fn resolve_dataset(entry: DatasetEntry) -> Result<DatasetRequest, LrseqError> {
    match entry {
        DatasetEntry::Shorthand(value) => {
            let platform: Platform = value.parse()?;
            let name = platform.as_ena().to_ascii_lowercase();
            Ok(DatasetRequest {
                output: Utf8PathBuf::from(format!("data/{name}.json")),
                label: platform.label().to_string(),
                name,
                platforms: vec![platform],
                taxon: TaxonId::known(BACTERIA_TAXON),
                limit: 0,
                mode: WriteMode::Single,
                format: ResponseFormat::Json,
            })
        }
        DatasetEntry::Detailed(obj) => {
            let platforms = match obj.platforms {
                Some(values) => values
                    .iter()
                    .map(|value| value.parse::<Platform>())
                    .collect::<Result<Vec<_>, LrseqError>>()?,
                None => default_platforms(),
            };
            let taxon = obj
                .tax_id
                .as_deref()
                .unwrap_or(BACTERIA_TAXON)
                .parse::<TaxonId>()?;
            let mode = WriteMode::resolve(obj.mode.unwrap_or_default(), obj.chunk_size)?;
            let output = obj
                .output
                .unwrap_or_else(|| Utf8PathBuf::from(format!("data/{}.json", obj.name)));
            Ok(DatasetRequest {
                label: obj.label.unwrap_or_else(|| obj.name.clone()),
                name: obj.name,
                platforms,
                taxon,
                limit: obj.limit.unwrap_or(0),
                output,
                mode,
                format: obj.format.unwrap_or_default(),
            })
        }
    }
}

pub fn default_platforms() -> Vec<Platform> {
    vec![Platform::OxfordNanopore, Platform::PacbioSmrt]
}

pub fn default_datasets() -> Vec<DatasetRequest> {
    vec![
        DatasetRequest {
            name: "bacteria".to_string(),
            label: "WGS".to_string(),
            platforms: default_platforms(),
            taxon: TaxonId::known(BACTERIA_TAXON),
            limit: 0,
            output: Utf8PathBuf::from("genome-dashboard/data_bacteria.json.gz"),
            mode: WriteMode::Gzip,
            format: ResponseFormat::Json,
        },
        DatasetRequest {
            name: "metagenome".to_string(),
            label: "MGx".to_string(),
            platforms: default_platforms(),
            taxon: TaxonId::known(METAGENOME_TAXON),
            limit: 0,
            output: Utf8PathBuf::from("genome-dashboard/data_metagenome.json.gz"),
            mode: WriteMode::Gzip,
            format: ResponseFormat::Json,
        },
    ]
}

pub fn default_history() -> HistorySettings {
    HistorySettings {
        csv: Utf8PathBuf::from("genome-dashboard/sample_counts.csv"),
        plot: Utf8PathBuf::from("genome-dashboard/assets/sample_plot.png"),
        workflow: "update-data.yml".to_string(),
        wgs_dataset: Utf8PathBuf::from("genome-dashboard/data_bacteria.json.gz"),
        mgx_dataset: Utf8PathBuf::from("genome-dashboard/data_metagenome.json.gz"),
        patterns: LogPatternSettings::default(),
    }
}

/// Repository and token for the CI provider, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiCredentials {
    pub repository: String,
    pub token: String,
}

impl CiCredentials {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let repository = lookup("GITHUB_REPOSITORY")?.trim().to_string();
        let token = lookup("GITHUB_TOKEN")?.trim().to_string();
        if repository.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self { repository, token })
    }
}

/// Run id recorded next to locally counted samples. Unset or non-numeric
/// `GITHUB_RUN_ID` gives 0.
pub fn local_run_id<F>(lookup: F) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup("GITHUB_RUN_ID")
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            schema_version: None,
            datasets: vec![DatasetEntry::Shorthand("PACBIO_SMRT".to_string())],
            history: None,
            dashboard: None,
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.datasets.len(), 1);
        assert_eq!(resolved.datasets[0].platforms, vec![Platform::PacbioSmrt]);
        assert_eq!(resolved.datasets[0].mode, WriteMode::Single);
        assert_eq!(resolved.dashboard_data, resolved.datasets[0].output);
        assert_eq!(resolved.history, default_history());
    }

    #[test]
    fn credentials_require_both_values() {
        let missing = CiCredentials::from_lookup(|key| match key {
            "GITHUB_REPOSITORY" => Some("owner/repo".to_string()),
            _ => None,
        });
        assert!(missing.is_none());

        let blank = CiCredentials::from_lookup(|_| Some("  ".to_string()));
        assert!(blank.is_none());

        let present = CiCredentials::from_lookup(|key| match key {
            "GITHUB_REPOSITORY" => Some("owner/repo".to_string()),
            "GITHUB_TOKEN" => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(present.repository, "owner/repo");
    }

    #[test]
    fn local_run_id_defaults_to_zero() {
        assert_eq!(local_run_id(|_| None), 0);
        assert_eq!(local_run_id(|_| Some("abc".to_string())), 0);
        assert_eq!(local_run_id(|_| Some(" 9876 ".to_string())), 9876);
    }
}
