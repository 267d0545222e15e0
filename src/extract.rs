//! Text extraction from source documents.
//!
//! Extraction itself (OCR, PDF parsing) is delegated to whatever produces
//! plain text; this module only normalises the result into one string with
//! pages separated by newlines.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Page separator used by `pdftotext` and most OCR tools.
const PAGE_BREAK: char = '\x0c';

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, source: &Path, max_pages: Option<usize>) -> Result<String>;
}

/// Keeps the first `max_pages` pages and joins them with newlines.
pub fn flatten_pages(raw: &str, max_pages: Option<usize>) -> String {
    let limit = max_pages.unwrap_or(usize::MAX);
    let mut text = String::new();
    for page in raw.split(PAGE_BREAK).take(limit) {
        text.push_str(page);
        text.push('\n');
    }
    text
}

/// Reads already-extracted UTF-8 text files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, source: &Path, max_pages: Option<usize>) -> Result<String> {
        let raw = tokio::fs::read_to_string(source).await?;
        Ok(flatten_pages(&raw, max_pages))
    }
}

/// Runs an external extractor such as `pdftotext` and reads its stdout.
///
/// Arguments are `<program> [args..] [-l <max_pages>] <source> -`, which is the
/// `pdftotext` calling convention.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandExtractor {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl TextExtractor for CommandExtractor {
    async fn extract(&self, source: &Path, max_pages: Option<usize>) -> Result<String> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(pages) = max_pages {
            command.arg("-l").arg(pages.to_string());
        }
        command.arg(source).arg("-");

        debug!(program = %self.program, source = %source.display(), "running extractor");
        let output = command.output().await?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        info!(chars = raw.len(), source = %source.display(), "extracted text");
        Ok(flatten_pages(&raw, max_pages))
    }
}

/// Picks an extractor for `source` by extension.
pub fn extractor_for(source: &Path, command: &CommandExtractor) -> Box<dyn TextExtractor> {
    let is_text = source
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md"));
    if is_text {
        Box::new(PlainTextExtractor)
    } else {
        Box::new(command.clone())
    }
}
