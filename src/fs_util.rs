use std::fs;
use std::io::{Cursor, Read, Write};

use camino::Utf8Path;
use zip::ZipArchive;

use crate::error::LrseqError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntry {
    pub name: String,
    pub text: String,
}

/// Reads every file entry of an in-memory zip archive as lossy UTF-8 text,
/// in archive order.
pub fn zip_text_entries(archive: &[u8]) -> Result<Vec<TextEntry>, LrseqError> {
    let mut archive = ZipArchive::new(Cursor::new(archive))
        .map_err(|err| LrseqError::LogArchive(err.to_string()))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| LrseqError::LogArchive(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|err| LrseqError::LogArchive(format!("{name}: {err}")))?;
        entries.push(TextEntry {
            name,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    Ok(entries)
}

/// Replaces `path` with `content` through a temp file in the same directory.
pub fn write_replace(path: &Utf8Path, content: &[u8]) -> Result<(), LrseqError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| LrseqError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("lrseq-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| LrseqError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| LrseqError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| LrseqError::Filesystem(format!("persist {path}: {err}")))?;
    Ok(())
}
