//! Search engine: semantic, metadata, and keyword-boosted hybrid search.
//!
//! All search entry points absorb failures instead of propagating them.
//! A caller mid-conversation gets an empty result set; the underlying
//! cause is kept in a side channel readable via `take_last_error`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use regex::Regex;

use crate::embedding::EmbeddingProvider;

use super::chunker::Chunk;
use super::lance::{LanceVectorIndex, MetadataFilter};
use super::vector::{RankedChunk, ScoredChunk};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Two chunks whose first N characters match are treated as
    /// duplicates when pooling hybrid results.
    pub dedup_prefix_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            dedup_prefix_chars: 50,
        }
    }
}

// ============================================================================
// Relevance scoring
// ============================================================================

/// Tokens too common in Portuguese legal text to carry query meaning.
const STOP_WORDS: &[&str] = &[
    "o", "a", "os", "as", "um", "uma", "de", "do", "da", "dos", "das", "em",
    "no", "na", "nos", "nas", "por", "para", "com", "sem", "sob", "sobre",
    "que", "qual", "quais", "como", "quando", "onde", "quem", "e", "ou",
    "mas", "se", "ao", "aos", "à", "às", "é", "são", "ser", "está", "estão",
    "foi", "foram", "tem", "têm", "ter", "há", "seu", "sua", "seus", "suas",
    "este", "esta", "isto", "esse", "essa", "isso", "aquele", "aquela",
    "pelo", "pela", "pelos", "pelas", "entre", "até", "após", "desde",
];

/// Extracts search keywords from a natural-language query.
///
/// Each surviving term is emitted in three case variants so that
/// literal matching also catches headings and acronym-style usage.
/// Order follows first appearance in the query.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let word_re = Regex::new(r"\b\w+\b").expect("Invalid regex");
    let stop_words: HashSet<&str> = STOP_WORDS.iter().copied().collect();

    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for m in word_re.find_iter(query) {
        let lower = m.as_str().to_lowercase();
        if lower.chars().count() <= 2 || stop_words.contains(lower.as_str()) {
            continue;
        }

        let capitalized = {
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => continue,
            }
        };
        let upper = lower.to_uppercase();

        for variant in [lower, capitalized, upper] {
            if seen.insert(variant.clone()) {
                keywords.push(variant);
            }
        }
    }

    keywords
}

/// Composite relevance for one candidate chunk.
///
/// Starts from vector similarity and adds three bounded literal-match
/// bonuses: supplied keywords present (up to 0.5), distinct query-term
/// coverage (up to 0.3), and a flat 0.4 for an exact phrase match.
fn relevance_score(scored: &ScoredChunk, query: &str, keywords: &[String]) -> f32 {
    let content_lower = scored.chunk.content.to_lowercase();
    let query_lower = query.to_lowercase();

    let mut score = scored.similarity;

    // each supplied keyword counts once, no matter how often it repeats
    let keywords_present = keywords
        .iter()
        .filter(|kw| content_lower.contains(&kw.to_lowercase()))
        .count();
    score += (0.1 * keywords_present as f32).min(0.5);

    let terms_present = query_lower
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .collect::<HashSet<_>>()
        .iter()
        .filter(|t| content_lower.contains(**t))
        .count();
    score += (0.05 * terms_present as f32).min(0.3);

    if content_lower.contains(&query_lower) {
        score += 0.4;
    }

    score
}

// ============================================================================
// SearchEngine
// ============================================================================

pub struct SearchEngine {
    index: Arc<LanceVectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
    last_error: Mutex<Option<String>>,
}

impl SearchEngine {
    pub fn new(
        index: Arc<LanceVectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
            last_error: Mutex::new(None),
        }
    }

    /// Returns and clears the cause of the most recent absorbed failure.
    /// Every public search entry point also clears the slot on entry,
    /// so a recorded cause always belongs to the latest call.
    pub fn take_last_error(&self) -> Option<String> {
        self.last_error.lock().map(|mut e| e.take()).unwrap_or(None)
    }

    fn clear_last_error(&self) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = None;
        }
    }

    fn record_error(&self, context: &str, err: impl std::fmt::Display) {
        let message = format!("{context}: {err}");
        tracing::error!("{message}");
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(message);
        }
    }

    /// Pure vector search, nearest first. `max_distance` drops hits
    /// beyond the given raw distance.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        max_distance: Option<f32>,
    ) -> Vec<ScoredChunk> {
        self.clear_last_error();
        self.similarity_search_inner(query, k, max_distance).await
    }

    // pooling passes call this so an earlier pass's failure survives
    async fn similarity_search_inner(
        &self,
        query: &str,
        k: usize,
        max_distance: Option<f32>,
    ) -> Vec<ScoredChunk> {
        let embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                self.record_error("Failed to embed search query", e);
                return vec![];
            }
        };

        let hits = match self.index.search(&embedding, k, None).await {
            Ok(hits) => hits,
            Err(e) => {
                self.record_error("Vector search failed", e);
                return vec![];
            }
        };

        hits.into_iter()
            .map(|(chunk, distance)| ScoredChunk::new(chunk, distance))
            .filter(|s| max_distance.map_or(true, |max| s.distance <= max))
            .collect()
    }

    /// Fetches chunks by metadata alone, without embedding anything.
    pub async fn search_by_metadata(&self, filter: &MetadataFilter, k: usize) -> Vec<Chunk> {
        self.clear_last_error();
        match self.index.scan(filter, k).await {
            Ok(chunks) => chunks,
            Err(e) => {
                self.record_error("Metadata scan failed", e);
                vec![]
            }
        }
    }

    /// Vector search constrained by an optional metadata predicate.
    pub async fn hybrid_search(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
        k: usize,
        max_distance: Option<f32>,
    ) -> Vec<ScoredChunk> {
        self.clear_last_error();
        let embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                self.record_error("Failed to embed search query", e);
                return vec![];
            }
        };

        let hits = match self.index.search(&embedding, k, filter).await {
            Ok(hits) => hits,
            Err(e) => {
                self.record_error("Filtered vector search failed", e);
                return vec![];
            }
        };

        hits.into_iter()
            .map(|(chunk, distance)| ScoredChunk::new(chunk, distance))
            .filter(|s| max_distance.map_or(true, |max| s.distance <= max))
            .collect()
    }

    /// Keyword-boosted retrieval for conversational answering.
    ///
    /// Pools a semantic pass over the full query with one narrow pass
    /// per keyword, deduplicates by content prefix, then re-ranks the
    /// pool with `relevance_score` and keeps the top `k`.
    pub async fn hybrid_search_with_keywords(
        &self,
        query: &str,
        keywords: &[String],
        k: usize,
    ) -> Vec<RankedChunk> {
        self.clear_last_error();

        let semantic_k = (k / 2).max(1);
        let mut pool = self.similarity_search_inner(query, semantic_k, None).await;

        let keyword_k = k / 4;
        if keyword_k > 0 {
            for keyword in keywords {
                let hits = self.similarity_search_inner(keyword, keyword_k, None).await;
                pool.extend(hits);
            }
        }

        let mut seen_prefixes = HashSet::new();
        let mut ranked: Vec<RankedChunk> = pool
            .into_iter()
            .filter(|s| {
                let prefix: String = s
                    .chunk
                    .content
                    .chars()
                    .take(self.config.dedup_prefix_chars)
                    .collect();
                seen_prefixes.insert(prefix)
            })
            .map(|scored| {
                let relevance = relevance_score(&scored, query, keywords);
                RankedChunk { scored, relevance }
            })
            .collect();

        // stable sort keeps pooling order for equal scores
        ranked.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);
        ranked
    }
}

// ============================================================================
// Tests
// ============================================================================
