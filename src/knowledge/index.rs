//! Index manager: embeds chunks and persists them in the vector index.
//!
//! Build and update operations touch durable storage under the persist
//! directory; concurrent writers against the same location are not
//! coordinated here (single-writer assumption).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::EmbeddingProvider;

use super::chunker::Chunk;
use super::lance::LanceVectorIndex;
use super::vector::VectorEntry;

// ============================================================================
// Types
// ============================================================================

/// Whether a persisted index exists at the configured location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Loaded,
    Absent,
}

/// Report on the configured index location.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub status: IndexStatus,
    pub collection: String,
    pub persist_directory: PathBuf,
    pub rows: usize,
}

// ============================================================================
// IndexManager
// ============================================================================

/// Owns the embedding backend plus one vector index location.
pub struct IndexManager {
    index: Arc<LanceVectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    persist_directory: PathBuf,
}

impl IndexManager {
    /// Connect to the index location. Does not require an index to exist
    /// yet; `load_vector_store` checks that separately.
    pub async fn open(
        persist_dir: &Path,
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let index = LanceVectorIndex::open(persist_dir, collection, embedder.dimension()).await?;

        Ok(Self {
            index: Arc::new(index),
            embedder,
            persist_directory: persist_dir.to_path_buf(),
        })
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.embedder)
    }

    /// Embed all chunks and write a fresh index, replacing any existing
    /// one at this location. Fails on an empty chunk list or an
    /// unreachable embedding backend.
    pub async fn create_vector_store(&self, chunks: &[Chunk]) -> Result<Arc<LanceVectorIndex>> {
        if chunks.is_empty() {
            anyhow::bail!("Cannot create vector store from an empty chunk list");
        }

        let entries = self.embed_chunks(chunks).await?;

        self.index.drop_collection().await?;
        let inserted = self
            .index
            .insert_batch(&entries)
            .await
            .context("Failed to write vector store")?;

        tracing::info!(
            "Created vector store '{}' with {} entries",
            self.index.collection(),
            inserted
        );
        Ok(Arc::clone(&self.index))
    }

    /// Reopen a previously persisted index without re-embedding.
    pub async fn load_vector_store(&self) -> Result<Arc<LanceVectorIndex>> {
        if !self.index.table_exists().await {
            anyhow::bail!(
                "No vector store found at {:?} (collection '{}')",
                self.persist_directory,
                self.index.collection()
            );
        }

        let rows = self
            .index
            .count()
            .await
            .context("Persisted vector store is unreadable")?;

        tracing::info!(
            "Loaded vector store '{}' with {} entries",
            self.index.collection(),
            rows
        );
        Ok(Arc::clone(&self.index))
    }

    /// Embed and append new chunks, leaving existing entries untouched.
    /// Behaves as a fresh create when no index exists yet.
    pub async fn update_vector_store(&self, new_chunks: &[Chunk]) -> Result<Arc<LanceVectorIndex>> {
        if new_chunks.is_empty() {
            anyhow::bail!("Cannot update vector store with an empty chunk list");
        }

        if !self.index.table_exists().await {
            tracing::info!("No existing vector store; creating a fresh one");
            return self.create_vector_store(new_chunks).await;
        }

        let entries = self.embed_chunks(new_chunks).await?;
        let inserted = self
            .index
            .insert_batch(&entries)
            .await
            .context("Failed to append to vector store")?;

        tracing::info!(
            "Appended {} entries to vector store '{}'",
            inserted,
            self.index.collection()
        );
        Ok(Arc::clone(&self.index))
    }

    /// Report index existence without materializing chunk data.
    pub async fn get_vector_store_info(&self) -> IndexInfo {
        let status = if self.index.table_exists().await {
            IndexStatus::Loaded
        } else {
            IndexStatus::Absent
        };
        let rows = match status {
            IndexStatus::Loaded => self.index.count().await.unwrap_or(0),
            IndexStatus::Absent => 0,
        };

        IndexInfo {
            status,
            collection: self.index.collection().to_string(),
            persist_directory: self.persist_directory.clone(),
            rows,
        }
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<VectorEntry>> {
        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&contents)
            .await
            .context("Embedding backend failed")?;

        Ok(chunks
            .iter()
            .cloned()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorEntry { chunk, embedding })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::ChunkMetadata;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const DIM: usize = 8;

    /// Deterministic offline embedder: a vector keyed on text length.
    struct StubEmbedding;

    #[async_trait]
    impl crate::embedding::EmbeddingProvider for StubEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let seed = text.chars().count() as f32;
            Ok((0..DIM).map(|i| seed + i as f32).collect())
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn chunk(content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: "/docs/lei.pdf".to_string(),
                file_name: "lei.pdf".to_string(),
                document_type: "pdf".to_string(),
                extraction: "text".to_string(),
                page_index: 0,
            },
        }
    }

    async fn manager(dir: &Path) -> IndexManager {
        IndexManager::open(dir, "tax_docs", Arc::new(StubEmbedding))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_empty_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path()).await;
        assert!(manager.create_vector_store(&[]).await.is_err());
    }

    #[tokio::test]
    async fn create_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path()).await;

        let info = manager.get_vector_store_info().await;
        assert_eq!(info.status, IndexStatus::Absent);
        assert!(manager.load_vector_store().await.is_err());

        manager
            .create_vector_store(&[chunk("fato gerador"), chunk("base de cálculo")])
            .await
            .unwrap();

        let info = manager.get_vector_store_info().await;
        assert_eq!(info.status, IndexStatus::Loaded);
        assert_eq!(info.rows, 2);

        let index = manager.load_vector_store().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn create_overwrites_existing_index() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path()).await;

        manager
            .create_vector_store(&[chunk("a"), chunk("b"), chunk("c")])
            .await
            .unwrap();
        manager.create_vector_store(&[chunk("só um")]).await.unwrap();

        assert_eq!(manager.get_vector_store_info().await.rows, 1);
    }

    #[tokio::test]
    async fn update_appends_and_creates_when_absent() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path()).await;

        // absent -> behaves as create
        manager.update_vector_store(&[chunk("um")]).await.unwrap();
        assert_eq!(manager.get_vector_store_info().await.rows, 1);

        // existing -> appends
        manager
            .update_vector_store(&[chunk("dois"), chunk("três")])
            .await
            .unwrap();
        assert_eq!(manager.get_vector_store_info().await.rows, 3);
    }
}
