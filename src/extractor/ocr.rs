//! OCR fallback for scanned PDFs.
//!
//! Renders each page to a PNG with `pdftoppm` at a fixed resolution,
//! then recognizes text with the `tesseract` binary. Both tools must be
//! on PATH; a missing tool is reported as a normal error and handled
//! file-locally by the extractor.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

/// OCR settings.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Tesseract language code.
    pub language: String,
    /// Render resolution for page images.
    pub dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "por".to_string(),
            dpi: 300,
        }
    }
}

/// OCR a whole PDF, returning (page_index, text) pairs with 0-based
/// page indexes. Blocking; run inside `spawn_blocking`. The scratch
/// directory holding rendered page images is removed before returning,
/// whether recognition succeeded or not.
pub fn ocr_pdf(path: &Path, config: &OcrConfig) -> Result<Vec<(usize, String)>> {
    let scratch = tempdir_for(path)?;
    let result = ocr_pages(path, config, &scratch);

    if let Err(e) = std::fs::remove_dir_all(&scratch) {
        tracing::warn!("Failed to remove OCR scratch directory {:?}: {}", scratch, e);
    }

    result
}

fn ocr_pages(path: &Path, config: &OcrConfig, scratch: &Path) -> Result<Vec<(usize, String)>> {
    let images = render_pages(path, config.dpi, scratch)?;

    let mut pages = Vec::with_capacity(images.len());
    for (page_index, image_path) in images.iter().enumerate() {
        let text = run_tesseract(image_path, &config.language)?;
        pages.push((page_index, text));
    }

    tracing::info!("OCR produced {} pages for {:?}", pages.len(), path);
    Ok(pages)
}

/// Render every page to a PNG under the scratch directory, returning
/// the image paths in page order.
fn render_pages(path: &Path, dpi: u32, scratch: &Path) -> Result<Vec<std::path::PathBuf>> {
    let prefix = scratch.join("page");

    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(path)
        .arg(&prefix)
        .output()
        .context("Failed to run pdftoppm (is poppler-utils installed?)")?;

    if !output.status.success() {
        anyhow::bail!(
            "pdftoppm failed for {:?}: {}",
            path,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    // pdftoppm names files page-1.png, page-2.png, ... in page order
    let mut images: Vec<_> = std::fs::read_dir(scratch)
        .context("Failed to list rendered pages")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
        .collect();
    images.sort();

    if images.is_empty() {
        anyhow::bail!("pdftoppm produced no page images for {:?}", path);
    }

    Ok(images)
}

fn run_tesseract(image_path: &Path, language: &str) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .arg("-l")
        .arg(language)
        .output()
        .context("Failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        anyhow::bail!(
            "tesseract failed for {:?}: {}",
            image_path,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Scratch directory path for one source file, without creating it.
fn scratch_dir_for(path: &Path) -> std::path::PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    std::env::temp_dir()
        .join("sefaz-rag-ocr")
        .join(format!("{}-{}", stem, std::process::id()))
}

/// Per-file scratch directory for rendered page images.
fn tempdir_for(path: &Path) -> Result<std::path::PathBuf> {
    let dir = scratch_dir_for(path);

    if dir.exists() {
        std::fs::remove_dir_all(&dir).context("Failed to clear OCR scratch directory")?;
    }
    std::fs::create_dir_all(&dir).context("Failed to create OCR scratch directory")?;
    Ok(dir)
}

// ============================================================================
// Tests
// ============================================================================
