use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{SampleRecord, WriteMode};
use crate::error::LrseqError;

pub const INDEX_FILE: &str = "files.json";

#[derive(Debug, Clone, Serialize)]
pub struct WriteSummary {
    pub records: usize,
    pub mode: String,
    pub files: Vec<String>,
    pub index: Option<String>,
}

pub fn write(
    records: &[SampleRecord],
    destination: &Utf8Path,
    mode: WriteMode,
) -> Result<WriteSummary, LrseqError> {
    let summary = match mode {
        WriteMode::Single => {
            write_single(records, destination)?;
            WriteSummary {
                records: records.len(),
                mode: mode.to_string(),
                files: vec![destination.to_string()],
                index: None,
            }
        }
        WriteMode::Gzip => {
            write_gzip(records, destination)?;
            WriteSummary {
                records: records.len(),
                mode: mode.to_string(),
                files: vec![destination.to_string()],
                index: None,
            }
        }
        WriteMode::Chunked { chunk_size } => write_chunks(records, destination, chunk_size)?,
    };
    info!(
        records = summary.records,
        mode = %summary.mode,
        destination = %destination,
        "dataset written"
    );
    Ok(summary)
}

fn ensure_parent(path: &Utf8Path) -> Result<(), LrseqError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| LrseqError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

fn write_single(records: &[SampleRecord], destination: &Utf8Path) -> Result<(), LrseqError> {
    ensure_parent(destination)?;
    let file = File::create(destination.as_std_path())
        .map_err(|err| LrseqError::Filesystem(format!("create {destination}: {err}")))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .map_err(|err| LrseqError::Dataset(err.to_string()))?;
    writer
        .flush()
        .map_err(|err| LrseqError::Filesystem(err.to_string()))
}

fn write_gzip(records: &[SampleRecord], destination: &Utf8Path) -> Result<(), LrseqError> {
    ensure_parent(destination)?;
    let file = File::create(destination.as_std_path())
        .map_err(|err| LrseqError::Filesystem(format!("create {destination}: {err}")))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, records)
        .map_err(|err| LrseqError::Dataset(err.to_string()))?;
    let mut inner = encoder
        .finish()
        .map_err(|err| LrseqError::Filesystem(err.to_string()))?;
    inner
        .flush()
        .map_err(|err| LrseqError::Filesystem(err.to_string()))
}

fn write_chunks(
    records: &[SampleRecord],
    directory: &Utf8Path,
    chunk_size: usize,
) -> Result<WriteSummary, LrseqError> {
    if chunk_size == 0 {
        return Err(LrseqError::InvalidChunkSize);
    }
    fs::create_dir_all(directory.as_std_path())
        .map_err(|err| LrseqError::Filesystem(format!("create {directory}: {err}")))?;

    let mut files = Vec::new();
    for (index, chunk) in records.chunks(chunk_size).enumerate() {
        let path = directory.join(chunk_file_name(index));
        write_single(chunk, &path)?;
        files.push(path.to_string());
    }

    let index_path = directory.join(INDEX_FILE);
    let listed = rebuild_index(directory)?;
    if listed.len() > files.len() {
        warn!(
            listed = listed.len(),
            written = files.len(),
            "chunk index lists files from earlier runs"
        );
    }

    Ok(WriteSummary {
        records: records.len(),
        mode: WriteMode::Chunked { chunk_size }.to_string(),
        files,
        index: Some(index_path.to_string()),
    })
}

pub fn chunk_file_name(index: usize) -> String {
    format!("chunk_{index:04}.json")
}

/// Regenerates `files.json` from whatever JSON files the directory holds.
pub fn rebuild_index(directory: &Utf8Path) -> Result<Vec<String>, LrseqError> {
    let names = list_chunk_files(directory)?;
    let content =
        serde_json::to_vec(&names).map_err(|err| LrseqError::Dataset(err.to_string()))?;
    fs::write(directory.join(INDEX_FILE).as_std_path(), content)
        .map_err(|err| LrseqError::Filesystem(err.to_string()))?;
    Ok(names)
}

pub fn list_chunk_files(directory: &Utf8Path) -> Result<Vec<String>, LrseqError> {
    let entries = fs::read_dir(directory.as_std_path())
        .map_err(|err| LrseqError::Filesystem(format!("read {directory}: {err}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| LrseqError::Filesystem(err.to_string()))?;
        if !entry.path().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.ends_with(".json") && name != INDEX_FILE {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Reads a dataset in any layout `write` produces.
pub fn load_dataset(path: &Utf8Path) -> Result<Vec<SampleRecord>, LrseqError> {
    if path.as_std_path().is_dir() {
        return load_chunked(path);
    }
    let file = File::open(path.as_std_path())
        .map_err(|err| LrseqError::Dataset(format!("open {path}: {err}")))?;
    if path.extension() == Some("gz") {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))
            .map_err(|err| LrseqError::Dataset(format!("{path}: {err}")))
    } else {
        serde_json::from_reader(BufReader::new(file))
            .map_err(|err| LrseqError::Dataset(format!("{path}: {err}")))
    }
}

fn load_chunked(directory: &Utf8Path) -> Result<Vec<SampleRecord>, LrseqError> {
    let index_path = directory.join(INDEX_FILE);
    let names: Vec<String> = if index_path.as_std_path().exists() {
        let content = fs::read(index_path.as_std_path())
            .map_err(|err| LrseqError::Filesystem(err.to_string()))?;
        serde_json::from_slice(&content)
            .map_err(|err| LrseqError::Dataset(format!("{index_path}: {err}")))?
    } else {
        list_chunk_files(directory)?
    };

    let mut records = Vec::new();
    for name in names {
        let chunk: Utf8PathBuf = directory.join(&name);
        records.extend(load_dataset(&chunk)?);
    }
    Ok(records)
}

/// Number of records in a dataset; unreadable or missing datasets count as 0.
pub fn count_samples(path: &Utf8Path) -> u64 {
    if !path.as_std_path().exists() {
        warn!(path = %path, "dataset not found");
        return 0;
    }
    match load_dataset(path) {
        Ok(records) => records.len() as u64,
        Err(err) => {
            warn!(path = %path, "failed to read dataset: {err}");
            0
        }
    }
}
