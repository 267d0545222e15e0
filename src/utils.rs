use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::DirBuilder;
use std::path::Path;

/// Creates a directory if it doesn't exist
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    DirBuilder::new().recursive(true).create(path)?;
    Ok(())
}

/// Hex SHA-256 digest of a document's bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fingerprint of a source file read with a page limit.
///
/// The limit changes the extracted text, so it is part of the key.
pub fn fingerprint_with_pages(bytes: &[u8], max_pages: Option<usize>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    match max_pages {
        Some(pages) => hasher.update(format!("\0pages={pages}")),
        None => hasher.update(b"\0pages=all"),
    }
    hex::encode(hasher.finalize())
}

/// Cache key for a document indexed under particular settings.
///
/// Chunk size and embedding model both change the stored index, so entries
/// built under other settings are never served.
pub fn cache_key(fingerprint: &str, max_words: usize, model_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update(format!("\0words={max_words}\0model={model_id}"));
    hex::encode(hasher.finalize())
}

/// Writes `contents` next to `path` under a unique name, then renames it into
/// place so readers see either the old file or the complete new one.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
