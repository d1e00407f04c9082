//! Vector index types and score wrappers.
//!
//! Indexed chunks stay immutable; retrieval-time scores are carried in
//! wrapper structs produced fresh per query and discarded after use.

use super::chunker::Chunk;

// ============================================================================
// Types
// ============================================================================

/// One embedded chunk, ready for insertion into the vector index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk enriched with retrieval-time scores.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Raw vector-space distance. Lower is better.
    pub distance: f32,
    /// `1 / (1 + distance)`, in (0, 1].
    pub similarity: f32,
}

impl ScoredChunk {
    pub fn new(chunk: Chunk, distance: f32) -> Self {
        Self {
            chunk,
            similarity: similarity_from_distance(distance),
            distance,
        }
    }
}

/// A scored chunk with the composite relevance used by the hybrid
/// keyword ranking. Never persisted in the index.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub scored: ScoredChunk,
    /// Similarity plus keyword/query-term/exact-phrase bonuses. Uncapped.
    pub relevance: f32,
}

// ============================================================================
// Score Transform
// ============================================================================

/// Convert a raw distance into a bounded similarity.
///
/// Monotonically decreasing in distance; 1.0 at distance zero.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_one_at_zero_distance() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
    }

    #[test]
    fn similarity_is_monotonically_decreasing() {
        let distances = [0.0, 0.1, 0.5, 1.0, 2.0, 10.0, 1000.0];
        for pair in distances.windows(2) {
            assert!(
                similarity_from_distance(pair[0]) > similarity_from_distance(pair[1]),
                "similarity must strictly decrease: d={} vs d={}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn similarity_stays_in_unit_interval() {
        for d in [0.0f32, 0.01, 1.0, 42.0, 1e6] {
            let s = similarity_from_distance(d);
            assert!(s > 0.0 && s <= 1.0, "similarity({}) = {}", d, s);
        }
    }

    #[test]
    fn scored_chunk_derives_similarity() {
        let chunk = Chunk {
            content: "crédito presumido".to_string(),
            metadata: crate::knowledge::ChunkMetadata {
                source: "/docs/anexo.pdf".to_string(),
                file_name: "anexo.pdf".to_string(),
                document_type: "pdf".to_string(),
                extraction: "text".to_string(),
                page_index: 0,
            },
        };
        let scored = ScoredChunk::new(chunk, 1.0);
        assert_eq!(scored.similarity, 0.5);
    }
}
