//! Sliding-window text chunking.
//!
//! Splits extracted page documents into overlapping fixed-size character
//! windows. Chunk boundaries are deterministic: the same input and
//! configuration always produce the same chunks.

use anyhow::Result;

use crate::extractor::RawDocument;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// Chunking configuration.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive windows, in characters.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

// ============================================================================
// Chunk Types
// ============================================================================

/// Provenance metadata carried by every chunk.
///
/// Copied from the source document and never mutated afterwards.
/// Search-time scores live in wrapper structs, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    /// Source file location.
    pub source: String,
    /// Source file name.
    pub file_name: String,
    /// Source document kind (currently always "pdf").
    pub document_type: String,
    /// How the text was obtained ("text" or "ocr").
    pub extraction: String,
    /// 0-based page index within the source file.
    pub page_index: usize,
}

impl ChunkMetadata {
    pub fn from_document(doc: &RawDocument) -> Self {
        Self {
            source: doc.source_path.display().to_string(),
            file_name: doc.file_name.clone(),
            document_type: "pdf".to_string(),
            extraction: doc.extraction.as_str().to_string(),
            page_index: doc.page_index,
        }
    }
}

/// A bounded span of text derived from one source document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk text, at most `chunk_size` characters.
    pub content: String,
    /// Provenance of the source document.
    pub metadata: ChunkMetadata,
}

// ============================================================================
// SlidingWindowChunker
// ============================================================================

/// Character-window chunker.
///
/// Windows start every `chunk_size - chunk_overlap` characters, so
/// consecutive chunks from the same document share exactly
/// `chunk_overlap` characters, except at the document end where the
/// final window may be shorter. Text is never merged across documents.
pub struct SlidingWindowChunker {
    config: ChunkConfig,
}

impl SlidingWindowChunker {
    /// Create a chunker, validating that the overlap is smaller than the
    /// window size.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            anyhow::bail!("chunk_size must be positive");
        }
        if config.chunk_overlap >= config.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap,
                config.chunk_size
            );
        }
        Ok(Self { config })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Split one text into character windows.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return vec![];
        }

        let step = self.config.chunk_size - self.config.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.config.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());

            if end >= chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }

    /// Chunk a sequence of documents, forwarding each source document's
    /// metadata onto every chunk it produces.
    pub fn chunk_documents(&self, documents: &[RawDocument]) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for doc in documents {
            if doc.text.trim().is_empty() {
                continue;
            }

            let metadata = ChunkMetadata::from_document(doc);
            for content in self.chunk_text(&doc.text) {
                chunks.push(Chunk {
                    content,
                    metadata: metadata.clone(),
                });
            }
        }

        tracing::debug!(
            "Chunked {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );
        chunks
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractionMethod;
    use std::path::PathBuf;

    fn chunker(size: usize, overlap: usize) -> SlidingWindowChunker {
        SlidingWindowChunker::new(ChunkConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        })
        .unwrap()
    }

    fn doc(text: &str) -> RawDocument {
        RawDocument {
            text: text.to_string(),
            source_path: PathBuf::from("/docs/decreto.pdf"),
            file_name: "decreto.pdf".to_string(),
            extraction: ExtractionMethod::Text,
            page_index: 3,
        }
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(SlidingWindowChunker::new(ChunkConfig {
            chunk_size: 0,
            chunk_overlap: 0,
        })
        .is_err());
        assert!(SlidingWindowChunker::new(ChunkConfig {
            chunk_size: 100,
            chunk_overlap: 100,
        })
        .is_err());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunker(4, 1).chunk_text("").is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunker(10, 2).chunk_text("abcde");
        assert_eq!(chunks, vec!["abcde".to_string()]);
    }

    #[test]
    fn chunk_count_matches_formula() {
        // count = ceil((L - O) / (S - O)) for L > S
        for (len, size, overlap) in [(10, 4, 1), (12, 4, 1), (1000, 100, 20), (2500, 1000, 200)] {
            let text: String = "x".repeat(len);
            let chunks = chunker(size, overlap).chunk_text(&text);
            let expected = (len - overlap + (size - overlap) - 1) / (size - overlap);
            assert_eq!(chunks.len(), expected, "L={} S={} O={}", len, size, overlap);
        }
    }

    #[test]
    fn consecutive_chunks_overlap_exactly() {
        let chunks = chunker(4, 1).chunk_text("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn suffix_concatenation_reconstructs_text() {
        let text = "ICMS é um imposto estadual cobrado sobre circulação de mercadorias.";
        let overlap = 7;
        let chunks = chunker(20, overlap).chunk_text(text);

        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(overlap));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Substituição tributária do ICMS em Pernambuco. ".repeat(50);
        let a = chunker(100, 20).chunk_text(&text);
        let b = chunker(100, 20).chunk_text(&text);
        assert_eq!(a, b);
    }

    #[test]
    fn metadata_forwarded_to_every_chunk() {
        let text = "y".repeat(25);
        let documents = vec![RawDocument { text, ..doc("") }];
        let chunks = chunker(10, 2).chunk_documents(&documents);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.file_name, "decreto.pdf");
            assert_eq!(chunk.metadata.document_type, "pdf");
            assert_eq!(chunk.metadata.extraction, "text");
            assert_eq!(chunk.metadata.page_index, 3);
        }
    }

    #[test]
    fn documents_are_never_merged() {
        let documents = vec![doc("primeira página"), doc("segunda página")];
        let chunks = chunker(1000, 200).chunk_documents(&documents);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "primeira página");
        assert_eq!(chunks[1].content, "segunda página");
    }

    #[test]
    fn blank_documents_are_skipped() {
        let documents = vec![doc("   \n  "), doc("conteúdo")];
        let chunks = chunker(1000, 200).chunk_documents(&documents);
        assert_eq!(chunks.len(), 1);
    }
}
