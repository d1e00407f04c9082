//! Knowledge base: chunking, vector storage, and retrieval.

pub mod chunker;
pub mod index;
pub mod lance;
pub mod search;
pub mod vector;

pub use chunker::{Chunk, ChunkConfig, ChunkMetadata, SlidingWindowChunker};
pub use index::{IndexInfo, IndexManager, IndexStatus};
pub use lance::{LanceVectorIndex, MetadataFilter};
pub use search::{extract_keywords, SearchConfig, SearchEngine};
pub use vector::{RankedChunk, ScoredChunk, VectorEntry};
