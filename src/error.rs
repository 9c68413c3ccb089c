use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LrseqError {
    #[error("invalid taxonomy id: {0}")]
    InvalidTaxonId(String),

    #[error("invalid instrument platform: {0}")]
    InvalidPlatform(String),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("ENA request failed: {0}")]
    EnaHttp(String),

    #[error("ENA returned status {status}: {message}")]
    EnaStatus { status: u16, message: String },

    #[error("failed to parse ENA response: {0}")]
    EnaParse(String),

    #[error("GitHub request failed: {0}")]
    GithubHttp(String),

    #[error("GitHub returned status {status}: {message}")]
    GithubStatus { status: u16, message: String },

    #[error("missing CI credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid log pattern: {0}")]
    InvalidPattern(String),

    #[error("log archive error: {0}")]
    LogArchive(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("history file error: {0}")]
    History(String),

    #[error("failed to render plot: {0}")]
    Plot(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
