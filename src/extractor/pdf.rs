//! Per-page PDF text extraction using pdf-extract.

use std::path::Path;

use anyhow::{Context, Result};

/// Extract text from a PDF, one entry per page.
///
/// Returns (page_index, text) pairs with 0-based page indexes. A PDF
/// whose pages carry no text layer yields a single empty page, which
/// signals the caller to consider the OCR path.
pub fn extract_page_texts(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![(0, String::new())]);
    }

    Ok(split_pages(&text)
        .into_iter()
        .enumerate()
        .collect())
}

/// Split extracted text into pages.
///
/// Tries the form-feed character first, then a page-marker line pattern
/// some PDFs carry; falls back to a single page.
fn split_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // e.g. "--- Page 1 ---" or "=== 2 ==="
    let page_pattern = regex::Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
        .expect("Invalid regex");

    if page_pattern.is_match(text) {
        let pages: Vec<String> = page_pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.to_string()]
}

// ============================================================================
// Tests
// ============================================================================
