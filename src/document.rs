//! Source document loading and text extraction.
//!
//! Supports PDF sources (detected by magic bytes, extracted page by page)
//! and plain UTF-8 text files. Each PDF page is whitespace-collapsed and
//! emitted as one paragraph behind a page marker, so chunk text keeps its
//! provenance and the chunker sees one paragraph per page.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Errors that can occur while loading a source document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Text extraction failed: {0}")]
    Extract(String),
}

/// Load the source document at `path` and return its text.
///
/// PDF files are detected by the `%PDF` magic bytes and extracted page by
/// page; anything else is read as UTF-8 text. `page_start`/`page_end` are
/// 1-based inclusive bounds applied to PDF sources only, clamped to the
/// document; `None` for `page_end` means the last page.
pub fn load_text(
    path: &Path,
    page_start: usize,
    page_end: Option<usize>,
) -> Result<String, DocumentError> {
    if !path.exists() {
        return Err(DocumentError::NotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path)?;
    if bytes.starts_with(b"%PDF") {
        let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|err| DocumentError::Extract(err.to_string()))?;
        log::info!("extracted {} pages from {}", pages.len(), path.display());
        Ok(pages_to_text(&pages, page_start, page_end))
    } else {
        Ok(String::from_utf8(bytes)?)
    }
}

/// Join extracted pages into chunker input.
///
/// Each page is collapsed to single spaces, empty pages are dropped, and
/// surviving pages become `--- Page N ---` paragraphs (N is the absolute
/// 1-based page number) separated by blank lines.
fn pages_to_text(pages: &[String], page_start: usize, page_end: Option<usize>) -> String {
    let first = page_start.max(1) - 1;
    let last = page_end.unwrap_or(pages.len()).min(pages.len());

    let mut text = String::new();
    for (i, page) in pages.iter().enumerate().take(last).skip(first) {
        let cleaned = WHITESPACE.replace_all(page, " ");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            continue;
        }
        text.push_str(&format!("--- Page {} ---\n{}\n\n", i + 1, cleaned));
    }
    text
}
