//! sefaz-rag - RAG pipeline over SEFAZ-PE tax legislation
//!
//! Extracts text from a directory of PDFs (with OCR fallback for
//! scanned documents), chunks and embeds it into a LanceDB vector
//! index, and answers questions through keyword-boosted hybrid
//! retrieval plus a grounded LLM prompt.

pub mod cli;
pub mod embedding;
pub mod extractor;
pub mod generation;
pub mod knowledge;
pub mod pipeline;

// Re-exports
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use extractor::{DocumentExtractor, ExtractionMethod, ExtractorConfig, RawDocument};
pub use generation::{GeminiGenerator, ResponseGenerator};
pub use knowledge::{
    extract_keywords, Chunk, ChunkConfig, ChunkMetadata, IndexManager, LanceVectorIndex,
    MetadataFilter, RankedChunk, ScoredChunk, SearchConfig, SearchEngine, SlidingWindowChunker,
    VectorEntry,
};
pub use pipeline::{
    ChatResponse, Confidence, InitState, PipelineConfig, PipelineError, RagPipeline, SearchHit,
};
