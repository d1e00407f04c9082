//! LanceDB-backed vector index.
//!
//! One table per collection name under the persistence directory; the
//! (directory, collection) pair uniquely identifies an index on disk.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::chunker::{Chunk, ChunkMetadata};
use super::vector::VectorEntry;

// ============================================================================
// MetadataFilter
// ============================================================================

/// Exact-match filter over chunk provenance columns.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub source: Option<String>,
    pub file_name: Option<String>,
    pub document_type: Option<String>,
    pub extraction: Option<String>,
    pub page_index: Option<usize>,
}

impl MetadataFilter {
    pub fn by_file_name(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Default::default()
        }
    }

    /// Render as a SQL-style predicate, or `None` when no field is set.
    pub fn to_predicate(&self) -> Option<String> {
        let mut terms = Vec::new();

        if let Some(ref v) = self.source {
            terms.push(format!("source = '{}'", escape_literal(v)));
        }
        if let Some(ref v) = self.file_name {
            terms.push(format!("file_name = '{}'", escape_literal(v)));
        }
        if let Some(ref v) = self.document_type {
            terms.push(format!("document_type = '{}'", escape_literal(v)));
        }
        if let Some(ref v) = self.extraction {
            terms.push(format!("extraction = '{}'", escape_literal(v)));
        }
        if let Some(v) = self.page_index {
            terms.push(format!("page_index = {}", v));
        }

        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" AND "))
        }
    }
}

/// Escape single quotes for SQL string literals.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// Persisted vector index over embedded chunks.
///
/// LanceDB is a columnar store built on Apache Arrow; small tables are
/// searched brute-force, so no separate index build step is needed here.
pub struct LanceVectorIndex {
    db: Connection,
    collection: String,
    dimension: i32,
}

impl LanceVectorIndex {
    /// Connect to the index location, creating the directory if needed.
    pub async fn open(persist_dir: &Path, collection: &str, dimension: usize) -> Result<Self> {
        if !persist_dir.exists() {
            tokio::fs::create_dir_all(persist_dir)
                .await
                .context("Failed to create index directory")?;
        }

        let path_str = persist_dir
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            collection: collection.to_string(),
            dimension: dimension as i32,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("content", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("file_name", DataType::Utf8, false),
            Field::new("document_type", DataType::Utf8, false),
            Field::new("extraction", DataType::Utf8, false),
            Field::new("page_index", DataType::Int32, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        let contents: Vec<&str> = entries.iter().map(|e| e.chunk.content.as_str()).collect();
        let sources: Vec<&str> = entries
            .iter()
            .map(|e| e.chunk.metadata.source.as_str())
            .collect();
        let file_names: Vec<&str> = entries
            .iter()
            .map(|e| e.chunk.metadata.file_name.as_str())
            .collect();
        let doc_types: Vec<&str> = entries
            .iter()
            .map(|e| e.chunk.metadata.document_type.as_str())
            .collect();
        let extractions: Vec<&str> = entries
            .iter()
            .map(|e| e.chunk.metadata.extraction.as_str())
            .collect();
        let page_indices: Vec<i32> = entries
            .iter()
            .map(|e| e.chunk.metadata.page_index as i32)
            .collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(file_names)),
                Arc::new(StringArray::from(doc_types)),
                Arc::new(StringArray::from(extractions)),
                Arc::new(Int32Array::from(page_indices)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// Whether the collection table exists at this location.
    pub async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&self.collection))
            .unwrap_or(false)
    }

    /// Append entries, creating the table on first insert.
    pub async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            let table = self
                .db
                .open_table(&self.collection)
                .execute()
                .await
                .context("Failed to open table")?;

            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            self.db
                .create_table(&self.collection, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(entries.len())
    }

    /// Drop any existing table at this location.
    pub async fn drop_collection(&self) -> Result<()> {
        if self.table_exists().await {
            self.db
                .drop_table(&self.collection)
                .await
                .context("Failed to drop existing table")?;
        }
        Ok(())
    }

    /// Nearest-neighbor search, optionally constrained by a metadata
    /// predicate. Returns (chunk, distance) pairs in the store's order.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(Chunk, f32)>> {
        if limit == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self
            .db
            .open_table(&self.collection)
            .execute()
            .await
            .context("Failed to open table for search")?;

        let mut query = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(limit);

        if let Some(predicate) = filter.and_then(|f| f.to_predicate()) {
            query = query.only_if(predicate);
        }

        let results = query
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut hits = Vec::new();
        for batch in batches {
            // _distance is appended by LanceDB
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for (i, chunk) in Self::batch_to_chunks(&batch)?.into_iter().enumerate() {
                hits.push((chunk, distances.value(i)));
            }
        }

        Ok(hits)
    }

    /// Fetch up to `limit` entries matching a metadata predicate,
    /// ignoring vector content entirely.
    pub async fn scan(&self, filter: &MetadataFilter, limit: usize) -> Result<Vec<Chunk>> {
        if limit == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self
            .db
            .open_table(&self.collection)
            .execute()
            .await
            .context("Failed to open table for scan")?;

        let mut query = table.query().limit(limit);
        if let Some(predicate) = filter.to_predicate() {
            query = query.only_if(predicate);
        }

        let results = query.execute().await.context("Failed to execute scan")?;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut chunks = Vec::new();
        for batch in batches {
            chunks.extend(Self::batch_to_chunks(&batch)?);
        }
        Ok(chunks)
    }

    /// Number of indexed entries.
    pub async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(&self.collection)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<Chunk>> {
        let contents = string_column(batch, "content")?;
        let sources = string_column(batch, "source")?;
        let file_names = string_column(batch, "file_name")?;
        let doc_types = string_column(batch, "document_type")?;
        let extractions = string_column(batch, "extraction")?;

        let page_indices = batch
            .column_by_name("page_index")
            .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing page_index column"))?;

        let mut chunks = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            chunks.push(Chunk {
                content: contents.value(i).to_string(),
                metadata: ChunkMetadata {
                    source: sources.value(i).to_string(),
                    file_name: file_names.value(i).to_string(),
                    document_type: doc_types.value(i).to_string(),
                    extraction: extractions.value(i).to_string(),
                    page_index: page_indices.value(i) as usize,
                },
            });
        }
        Ok(chunks)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

// ============================================================================
// Tests
// ============================================================================
