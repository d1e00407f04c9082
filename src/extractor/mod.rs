//! Document extraction.
//!
//! Walks a corpus directory for PDF files, extracts text per page, and
//! falls back to OCR when a file's text layer is too thin to be useful.
//! Failures are file-local: a corrupt file is logged and skipped, never
//! fatal to the whole pass.

pub mod ocr;
pub mod pdf;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

pub use ocr::OcrConfig;

// ============================================================================
// Types
// ============================================================================

/// How a page's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// Direct text-layer extraction.
    Text,
    /// Image rendering plus text recognition.
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Text => "text",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

/// One page of extracted content. Immutable once produced.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Extracted text, possibly empty.
    pub text: String,
    /// Source file location.
    pub source_path: PathBuf,
    /// Source file name.
    pub file_name: String,
    /// How the text was obtained.
    pub extraction: ExtractionMethod,
    /// 0-based page index within the source file.
    pub page_index: usize,
}

/// Extractor settings.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Files whose total extracted character count falls below this are
    /// reprocessed through OCR.
    pub min_text_chars: usize,
    pub ocr: OcrConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 50,
            ocr: OcrConfig::default(),
        }
    }
}

// ============================================================================
// DocumentExtractor
// ============================================================================

/// Recursive PDF extractor over one corpus directory.
pub struct DocumentExtractor {
    base_dir: PathBuf,
    config: ExtractorConfig,
}

impl DocumentExtractor {
    pub fn new(base_dir: impl Into<PathBuf>, config: ExtractorConfig) -> Self {
        Self {
            base_dir: base_dir.into(),
            config,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Extract every PDF under the base directory.
    ///
    /// An empty result is a valid outcome meaning "no usable content";
    /// the orchestrator treats it as a build failure.
    pub async fn extract_documents(&self) -> Result<Vec<RawDocument>> {
        if !self.base_dir.is_dir() {
            anyhow::bail!("Documents directory not found: {:?}", self.base_dir);
        }

        tracing::info!("Extracting PDFs from {:?}", self.base_dir);

        let mut documents = Vec::new();
        for path in self.discover_pdfs() {
            match self.extract_file(&path).await {
                Ok(mut docs) => {
                    tracing::info!("  - {} pages extracted from {:?}", docs.len(), path);
                    documents.append(&mut docs);
                }
                Err(e) => {
                    // file-local failure: skip and continue
                    tracing::error!("Error while processing file {:?}: {:#}", path, e);
                }
            }
        }

        tracing::info!("Total of {} documents extracted", documents.len());
        Ok(documents)
    }

    /// Recursively discover PDF files, in deterministic path order.
    fn discover_pdfs(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(&self.base_dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    tracing::warn!("Failed to read directory entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        paths
    }

    /// Extract one file, deciding between the text layer and OCR.
    async fn extract_file(&self, path: &Path) -> Result<Vec<RawDocument>> {
        tracing::info!("Processing PDF: {:?}", path);

        // PDF parsing is CPU bound
        let text_path = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || pdf::extract_page_texts(&text_path))
            .await
            .context("PDF extraction task failed")??;

        if !low_content(&pages, self.config.min_text_chars) {
            return Ok(pages_to_documents(path, pages, ExtractionMethod::Text));
        }

        let total: usize = pages.iter().map(|(_, t)| t.trim().chars().count()).sum();
        tracing::warn!(
            "Low text content detected ({} chars). Attempting OCR for: {:?}",
            total,
            path
        );

        let ocr_path = path.to_path_buf();
        let ocr_config = self.config.ocr.clone();
        match tokio::task::spawn_blocking(move || ocr::ocr_pdf(&ocr_path, &ocr_config))
            .await
            .context("OCR task failed")?
        {
            Ok(ocr_pages) if !ocr_pages.is_empty() => {
                Ok(pages_to_documents(path, ocr_pages, ExtractionMethod::Ocr))
            }
            Ok(_) => Ok(pages_to_documents(path, pages, ExtractionMethod::Text)),
            Err(e) => {
                tracing::error!("OCR fallback failed for {:?}: {:#}", path, e);
                // keep whatever the text layer produced
                Ok(pages_to_documents(path, pages, ExtractionMethod::Text))
            }
        }
    }
}

/// Whether a file's extracted text falls below the OCR gate.
fn low_content(pages: &[(usize, String)], min_text_chars: usize) -> bool {
    let total: usize = pages.iter().map(|(_, t)| t.trim().chars().count()).sum();
    total < min_text_chars
}

fn pages_to_documents(
    path: &Path,
    pages: Vec<(usize, String)>,
    extraction: ExtractionMethod,
) -> Vec<RawDocument> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.pdf")
        .to_string();

    pages
        .into_iter()
        .map(|(page_index, text)| RawDocument {
            text,
            source_path: path.to_path_buf(),
            file_name: file_name.clone(),
            extraction,
            page_index,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
