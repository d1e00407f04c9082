//! Pipeline orchestration: extraction, chunking, indexing, retrieval,
//! and conversational answering as one lifecycle.
//!
//! The pipeline owns explicit initialization state. Callers either
//! drive the build directly (CLI) or ask `ensure_ready` to kick off a
//! background build and come back later (embedding in a server).

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use crate::embedding::EmbeddingProvider;
use crate::extractor::{DocumentExtractor, ExtractorConfig};
use crate::generation::ResponseGenerator;
use crate::knowledge::{
    extract_keywords, ChunkConfig, ChunkMetadata, IndexManager, IndexStatus, RankedChunk,
    SearchConfig, SearchEngine, SlidingWindowChunker,
};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory scanned for source PDFs.
    pub documents_path: PathBuf,
    /// Directory holding the persisted vector index.
    pub persist_directory: PathBuf,
    /// Index collection name inside the persist directory.
    pub collection_name: String,
    pub chunk: ChunkConfig,
    pub extractor: ExtractorConfig,
    pub search: SearchConfig,
    /// Documents retrieved per chat turn before re-ranking.
    pub chat_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            documents_path: PathBuf::from("documents"),
            persist_directory: PathBuf::from("data/lance_db"),
            collection_name: "sefaz_documents".to_string(),
            chunk: ChunkConfig::default(),
            extractor: ExtractorConfig::default(),
            search: SearchConfig::default(),
            chat_k: 24,
        }
    }
}

// ============================================================================
// State and errors
// ============================================================================

/// Lifecycle of the knowledge base behind this pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    NotStarted,
    InProgress,
    Ready,
    Failed(String),
}

impl InitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitState::NotStarted => "not_started",
            InitState::InProgress => "in_progress",
            InitState::Ready => "ready",
            InitState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Knowledge base is not ready: {0}")]
    NotReady(String),
    #[error("Knowledge base build failed: {0}")]
    Build(String),
    #[error("Knowledge base update failed: {0}")]
    Update(String),
    #[error("Retrieval failed: {0}")]
    Retrieval(String),
    #[error("Answer generation failed: {0}")]
    Generation(String),
}

// ============================================================================
// Result types
// ============================================================================

/// One entry returned by `RagPipeline::search`.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub content: String,
    /// Similarity in (0, 1], higher is closer.
    pub score: f32,
    pub distance: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Buckets an average similarity.
    pub fn from_avg_score(avg: f32) -> Self {
        if avg > 0.8 {
            Confidence::High
        } else if avg > 0.6 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceRef {
    pub source: String,
    pub file_name: String,
    pub distance: f32,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<SourceRef>,
    pub confidence: Confidence,
    pub avg_score: f32,
    pub documents_used: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub documents_path: PathBuf,
    pub persist_directory: PathBuf,
    pub collection_name: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub state: InitState,
    pub index_loaded: bool,
    pub index_rows: usize,
}

// ============================================================================
// RagPipeline
// ============================================================================

pub struct RagPipeline {
    config: PipelineConfig,
    chunker: SlidingWindowChunker,
    index: IndexManager,
    generator: Arc<dyn ResponseGenerator>,
    state: Mutex<InitState>,
    engine: RwLock<Option<Arc<SearchEngine>>>,
    // held for the duration of a build/load so only one runs at a time
    building: tokio::sync::Mutex<()>,
}

impl RagPipeline {
    pub async fn new(
        config: PipelineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn ResponseGenerator>,
    ) -> anyhow::Result<Self> {
        let chunker = SlidingWindowChunker::new(config.chunk.clone())?;
        let index = IndexManager::open(
            &config.persist_directory,
            &config.collection_name,
            embedder,
        )
        .await?;

        Ok(Self {
            config,
            chunker,
            index,
            generator,
            state: Mutex::new(InitState::NotStarted),
            engine: RwLock::new(None),
            building: tokio::sync::Mutex::new(()),
        })
    }

    /// Wires up the Gemini-backed embedder and generator from the
    /// environment.
    pub async fn from_env(config: PipelineConfig) -> anyhow::Result<Self> {
        let embedder = Arc::new(crate::embedding::GeminiEmbedding::from_env()?);
        let generator = Arc::new(crate::generation::GeminiGenerator::from_env()?);
        Ok(Self::new(config, embedder, generator).await?)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn current_state(&self) -> InitState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(InitState::NotStarted)
    }

    fn set_state(&self, new: InitState) {
        if let Ok(mut state) = self.state.lock() {
            *state = new;
        }
    }

    fn install_engine(&self, index: Arc<crate::knowledge::LanceVectorIndex>) {
        let engine = Arc::new(SearchEngine::new(
            index,
            self.index.embedder(),
            self.config.search.clone(),
        ));
        if let Ok(mut slot) = self.engine.write() {
            *slot = Some(engine);
        }
        self.set_state(InitState::Ready);
    }

    fn engine(&self) -> Result<Arc<SearchEngine>, PipelineError> {
        self.engine
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or_else(|| match self.current_state() {
                InitState::Failed(cause) => PipelineError::NotReady(cause),
                state => PipelineError::NotReady(format!(
                    "knowledge base state is '{}'",
                    state.as_str()
                )),
            })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Builds the knowledge base end to end. Without `force_rebuild`,
    /// an existing index is loaded instead of re-extracted.
    ///
    /// Returns the number of chunks indexed (0 when an existing index
    /// was reused).
    pub async fn build_knowledge_base(
        &self,
        force_rebuild: bool,
    ) -> Result<usize, PipelineError> {
        let _guard = self.building.try_lock().map_err(|_| {
            PipelineError::Build("another build is already in progress".to_string())
        })?;
        self.set_state(InitState::InProgress);

        if !force_rebuild {
            let info = self.index.get_vector_store_info().await;
            if info.status == IndexStatus::Loaded {
                tracing::info!("Vector store already exists, loading it");
                match self.index.load_vector_store().await {
                    Ok(index) => {
                        self.install_engine(index);
                        tracing::info!("Knowledge base loaded successfully");
                        return Ok(0);
                    }
                    // an unreadable store is rebuilt from the documents
                    Err(e) => {
                        tracing::warn!("Existing vector store is unusable, rebuilding: {e:#}")
                    }
                }
            }
        }

        match self.build_from_documents().await {
            Ok(indexed) => Ok(indexed),
            Err(e) => {
                let cause = format!("{e:#}");
                tracing::error!("Knowledge base build failed: {cause}");
                self.set_state(InitState::Failed(cause.clone()));
                Err(PipelineError::Build(cause))
            }
        }
    }

    async fn build_from_documents(&self) -> anyhow::Result<usize> {
        tracing::info!("Step 1: extracting documents");
        let extractor = DocumentExtractor::new(
            self.config.documents_path.clone(),
            self.config.extractor.clone(),
        );
        let documents = extractor.extract_documents().await?;
        if documents.is_empty() {
            anyhow::bail!(
                "No documents found in {:?}",
                self.config.documents_path
            );
        }
        tracing::info!("Extracted {} documents", documents.len());

        tracing::info!("Step 2: chunking documents");
        let chunks = self.chunker.chunk_documents(&documents);
        if chunks.is_empty() {
            anyhow::bail!("Extracted documents produced no chunks");
        }
        tracing::info!("Created {} chunks", chunks.len());

        tracing::info!("Step 3: embedding and indexing");
        let index = self.index.create_vector_store(&chunks).await?;

        self.install_engine(index);
        tracing::info!("Knowledge base built successfully");
        Ok(chunks.len())
    }

    /// Loads a previously built knowledge base without re-extracting.
    pub async fn load_knowledge_base(&self) -> Result<(), PipelineError> {
        match self.index.load_vector_store().await {
            Ok(index) => {
                self.install_engine(index);
                tracing::info!("Knowledge base loaded successfully");
                Ok(())
            }
            Err(e) => {
                let cause = format!("{e:#}");
                self.set_state(InitState::Failed(cause.clone()));
                Err(PipelineError::Build(cause))
            }
        }
    }

    /// Appends documents from `new_documents_path` (defaulting to the
    /// configured documents directory) to the existing index.
    ///
    /// All-or-nothing: on failure the previously loaded knowledge base
    /// keeps serving and the lifecycle state is left untouched.
    pub async fn update_knowledge_base(
        &self,
        new_documents_path: Option<PathBuf>,
    ) -> Result<usize, PipelineError> {
        let _guard = self.building.lock().await;

        let docs_path = new_documents_path.unwrap_or_else(|| self.config.documents_path.clone());
        let extractor = DocumentExtractor::new(docs_path.clone(), self.config.extractor.clone());

        let documents = extractor
            .extract_documents()
            .await
            .map_err(|e| PipelineError::Update(format!("{e:#}")))?;
        if documents.is_empty() {
            tracing::warn!("No new documents found in {:?}", docs_path);
            return Ok(0);
        }

        let chunks = self.chunker.chunk_documents(&documents);
        if chunks.is_empty() {
            tracing::warn!("New documents produced no chunks");
            return Ok(0);
        }

        let index = self
            .index
            .update_vector_store(&chunks)
            .await
            .map_err(|e| PipelineError::Update(format!("{e:#}")))?;

        self.install_engine(index);
        tracing::info!("Knowledge base updated with {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// Lazy initialization hook. From `NotStarted` this spawns one
    /// background build and reports `InProgress`; later calls observe
    /// whatever state that build reached. A failed build is not
    /// retried implicitly.
    pub fn ensure_ready(self: &Arc<Self>) -> InitState {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return InitState::NotStarted,
        };

        if *state == InitState::NotStarted {
            *state = InitState::InProgress;
            let pipeline = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = pipeline.build_knowledge_base(false).await {
                    tracing::error!("Background initialization failed: {e}");
                }
            });
        }

        state.clone()
    }

    // ------------------------------------------------------------------
    // Retrieval and chat
    // ------------------------------------------------------------------

    /// Plain semantic search over the knowledge base.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        max_distance: Option<f32>,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        let engine = self.engine()?;
        let hits = engine.similarity_search(query, k, max_distance).await;

        Ok(hits
            .into_iter()
            .map(|s| SearchHit {
                content: s.chunk.content,
                score: s.similarity,
                distance: s.distance,
                metadata: s.chunk.metadata,
            })
            .collect())
    }

    /// Answers a question over the indexed legislation.
    ///
    /// Retrieval uses keyword-boosted hybrid search; the generator only
    /// ever sees retrieved context, never open-ended prompts.
    pub async fn chat(&self, query: &str) -> Result<ChatResponse, PipelineError> {
        let engine = self.engine()?;

        tracing::info!("Processing question: '{query}'");
        let keywords = extract_keywords(query);
        tracing::debug!("Extracted keywords: {keywords:?}");

        let relevant = engine
            .hybrid_search_with_keywords(query, &keywords, self.config.chat_k)
            .await;

        if relevant.is_empty() {
            if let Some(cause) = engine.take_last_error() {
                return Err(PipelineError::Retrieval(cause));
            }
            tracing::warn!("No relevant documents found");
            return Ok(ChatResponse {
                response: "Desculpe, não encontrei informações relevantes sobre sua \
                           pergunta na documentação disponível."
                    .to_string(),
                sources: vec![],
                confidence: Confidence::Low,
                avg_score: 0.0,
                documents_used: 0,
            });
        }

        let context = build_context(&relevant);
        let user_prompt = build_user_prompt(query, &context);

        let answer = self
            .generator
            .generate(SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| PipelineError::Generation(format!("{e:#}")))?;

        let sources: Vec<SourceRef> = relevant
            .iter()
            .map(|r| SourceRef {
                source: r.scored.chunk.metadata.source.clone(),
                file_name: r.scored.chunk.metadata.file_name.clone(),
                distance: r.scored.distance,
                similarity: r.scored.similarity,
            })
            .collect();

        let avg_score = relevant.iter().map(|r| r.scored.similarity).sum::<f32>()
            / relevant.len() as f32;
        let confidence = Confidence::from_avg_score(avg_score);

        tracing::info!("Response generated with confidence: {}", confidence.as_str());
        Ok(ChatResponse {
            response: answer,
            sources,
            confidence,
            avg_score,
            documents_used: relevant.len(),
        })
    }

    pub async fn get_statistics(&self) -> PipelineStats {
        let info = self.index.get_vector_store_info().await;

        PipelineStats {
            documents_path: self.config.documents_path.clone(),
            persist_directory: self.config.persist_directory.clone(),
            collection_name: self.config.collection_name.clone(),
            chunk_size: self.config.chunk.chunk_size,
            chunk_overlap: self.config.chunk.chunk_overlap,
            state: self.current_state(),
            index_loaded: info.status == IndexStatus::Loaded,
            index_rows: info.rows,
        }
    }
}

// ============================================================================
// Prompt assembly
// ============================================================================

const SYSTEM_PROMPT: &str = "\
Você é o \"Agente Compet - ICMS\", um assistente de IA ultra especializado e \
rigoroso em legislação tributária da SEFAZ-PE.

# REGRAS DE CONDUTA INVIOLÁVEIS

1. **Regra de Ouro: Fidelidade Absoluta às Fontes.** Suas respostas devem ser \
100% derivadas dos documentos fornecidos no contexto. Você NUNCA deve usar seu \
conhecimento prévio ou informações externas.

2. **Busca Ativa e Interpretação Correta:** Analise cuidadosamente todo o \
contexto fornecido para encontrar a informação solicitada. Considere que:
   - Informações negativas (como \"não se aplica\", \"não é permitido\", \"não há\") \
SÃO respostas válidas
   - Se o documento diz que algo \"não se aplica\" ou \"não é permitido\", isso é \
uma resposta direta à pergunta
   - Não confunda \"não encontrei a informação\" com \"a informação diz que não é \
permitido\"

3. **Resposta Direta:** Se encontrar informação que responde diretamente à \
pergunta (mesmo que seja uma resposta negativa), forneça a resposta completa e \
precisa.

4. **Recusa Apenas Quando Realmente Não Encontrou:** Só responda \"A informação \
solicitada não foi encontrada na documentação fornecida\" quando realmente não \
houver nenhuma informação relevante nos documentos.

5. **Citação de Fontes:** Ao formular uma resposta, indique sempre que possível \
qual documento forneceu a informação.

6. **Clareza e Acessibilidade:** Mantenha um tom profissional, claro e direto. \
Explique conceitos tributários complexos de forma acessível, mas evite \
simplificar excessivamente.

# OBJETIVO FINAL
Seu propósito é atuar como uma ferramenta de consulta precisa sobre a \
legislação da SEFAZ-PE. A exatidão e a aderência estrita aos documentos \
fornecidos são mais importantes do que fornecer uma resposta a qualquer custo.";

fn build_context(relevant: &[RankedChunk]) -> String {
    let mut parts = Vec::new();
    for (i, ranked) in relevant.iter().enumerate() {
        parts.push(format!(
            "Document {} (Distance: {:.4}, Similarity: {:.4}):",
            i + 1,
            ranked.scored.distance,
            ranked.scored.similarity
        ));
        parts.push(format!("Source: {}", ranked.scored.chunk.metadata.source));
        parts.push(format!("Content: {}", ranked.scored.chunk.content));
        parts.push("-".repeat(50));
    }
    parts.join("\n")
}

fn build_user_prompt(query: &str, context: &str) -> String {
    format!(
        "Pergunta do usuário: {query}\n\n\
         Contexto dos documentos:\n{context}\n\n\
         Analise cuidadosamente o contexto fornecido e responda à pergunta do \
         usuário baseando-se APENAS nas informações contidas nos documentos acima.\n\
         Se encontrar a informação, forneça uma resposta completa e precisa, \
         citando a fonte.\n\
         Se a informação não estiver presente nos documentos, responda: 'A \
         informação solicitada não foi encontrada na documentação fornecida.'"
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Chunk;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    const DIM: usize = 8;

    struct StubEmbedding;

    #[async_trait]
    impl crate::embedding::EmbeddingProvider for StubEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let seed = (text.chars().count() % 7) as f32;
            Ok((0..DIM).map(|i| seed + i as f32).collect())
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    struct BrokenEmbedding;

    #[async_trait]
    impl crate::embedding::EmbeddingProvider for BrokenEmbedding {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("backend offline")
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    struct StubGenerator;

    #[async_trait]
    impl ResponseGenerator for StubGenerator {
        async fn generate(&self, _system: &str, user: &str) -> anyhow::Result<String> {
            assert!(user.contains("Contexto dos documentos"));
            Ok("De acordo com o documento, a alíquota é 18%.".to_string())
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn test_config(docs: &Path, persist: &Path) -> PipelineConfig {
        PipelineConfig {
            documents_path: docs.to_path_buf(),
            persist_directory: persist.to_path_buf(),
            collection_name: "test_docs".to_string(),
            chat_k: 8,
            ..PipelineConfig::default()
        }
    }

    async fn pipeline(docs: &Path, persist: &Path) -> RagPipeline {
        RagPipeline::new(
            test_config(docs, persist),
            Arc::new(StubEmbedding),
            Arc::new(StubGenerator),
        )
        .await
        .unwrap()
    }

    /// Writes a one-page PDF with a single Helvetica text run. Object
    /// offsets are recorded while the body is assembled, so the xref
    /// table is always consistent.
    fn write_minimal_pdf(path: &Path, text: &str) {
        let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        let objects = [
            "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n".to_string(),
            "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n".to_string(),
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>\nendobj\n"
                .to_string(),
            format!(
                "4 0 obj\n<< /Length {} >>\nstream\n{}\nendstream\nendobj\n",
                content.len(),
                content
            ),
            "5 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>\nendobj\n"
                .to_string(),
        ];

        let mut pdf = String::from("%PDF-1.4\n");
        let mut offsets = Vec::new();
        for object in &objects {
            offsets.push(pdf.len());
            pdf.push_str(object);
        }
        let xref_at = pdf.len();
        pdf.push_str("xref\n0 6\n0000000000 65535 f \n");
        for offset in &offsets {
            pdf.push_str(&format!("{offset:010} 00000 n \n"));
        }
        pdf.push_str(&format!(
            "trailer\n<< /Size 6 /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n"
        ));
        std::fs::write(path, pdf).unwrap();
    }

    // long enough to stay above the OCR gate
    const FIXTURE_TEXT: &str = "Aliquota do ICMS nas operacoes internas e de \
                                dezoito por cento conforme decreto estadual";

    async fn seed_index(persist: &Path) {
        let manager = IndexManager::open(persist, "test_docs", Arc::new(StubEmbedding))
            .await
            .unwrap();
        let chunks: Vec<Chunk> = [
            "A alíquota do ICMS nas operações internas é de 18%.",
            "O IPVA incide sobre a propriedade de veículos automotores.",
        ]
        .iter()
        .map(|content| Chunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: "/docs/decreto.pdf".to_string(),
                file_name: "decreto.pdf".to_string(),
                document_type: "pdf".to_string(),
                extraction: "text".to_string(),
                page_index: 0,
            },
        })
        .collect();
        manager.create_vector_store(&chunks).await.unwrap();
    }

    #[tokio::test]
    async fn chat_before_init_reports_not_ready() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        let pipeline = pipeline(docs.path(), persist.path()).await;

        let err = pipeline.chat("qual a alíquota do icms?").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotReady(_)));
        assert_eq!(pipeline.current_state(), InitState::NotStarted);
    }

    #[tokio::test]
    async fn build_from_pdf_corpus_reaches_ready() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        write_minimal_pdf(&docs.path().join("decreto.pdf"), FIXTURE_TEXT);

        let pipeline = pipeline(docs.path(), persist.path()).await;
        let indexed = pipeline.build_knowledge_base(false).await.unwrap();
        assert!(indexed >= 1);
        assert_eq!(pipeline.current_state(), InitState::Ready);

        let stats = pipeline.get_statistics().await;
        assert!(stats.index_loaded);
        assert_eq!(stats.index_rows, indexed);

        let hits = pipeline.search("aliquota do icms", 5, None).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].metadata.file_name, "decreto.pdf");
        assert_eq!(hits[0].metadata.extraction, "text");
        assert!(hits[0].content.contains("ICMS"));
    }

    #[tokio::test]
    async fn build_without_force_reuses_existing_index() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        write_minimal_pdf(&docs.path().join("decreto.pdf"), FIXTURE_TEXT);

        let first = pipeline(docs.path(), persist.path()).await;
        assert!(first.build_knowledge_base(false).await.unwrap() >= 1);

        // a fresh pipeline over the same location loads instead of
        // re-extracting, reported as zero newly indexed chunks
        let second = pipeline(docs.path(), persist.path()).await;
        assert_eq!(second.build_knowledge_base(false).await.unwrap(), 0);
        assert_eq!(second.current_state(), InitState::Ready);
        assert!(second.chat("qual a alíquota do icms?").await.is_ok());
    }

    #[tokio::test]
    async fn unreadable_existing_store_is_rebuilt() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        write_minimal_pdf(&docs.path().join("decreto.pdf"), FIXTURE_TEXT);

        // a bare table directory: listed as existing, unreadable on open
        std::fs::create_dir_all(persist.path().join("test_docs.lance")).unwrap();

        let pipeline = pipeline(docs.path(), persist.path()).await;
        let indexed = pipeline.build_knowledge_base(false).await.unwrap();
        assert!(indexed >= 1);
        assert_eq!(pipeline.current_state(), InitState::Ready);
        assert!(!pipeline.search("icms", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn build_fails_on_empty_corpus_and_records_state() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        let pipeline = pipeline(docs.path(), persist.path()).await;

        let err = pipeline.build_knowledge_base(false).await.unwrap_err();
        assert!(matches!(err, PipelineError::Build(_)));
        assert!(matches!(pipeline.current_state(), InitState::Failed(_)));

        // chat after a failed build surfaces the cause, not a panic
        let err = pipeline.chat("icms").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotReady(_)));
    }

    #[tokio::test]
    async fn load_then_chat_over_seeded_index() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        seed_index(persist.path()).await;

        let pipeline = pipeline(docs.path(), persist.path()).await;
        pipeline.load_knowledge_base().await.unwrap();
        assert_eq!(pipeline.current_state(), InitState::Ready);

        let response = pipeline.chat("qual a alíquota do icms?").await.unwrap();
        assert!(response.response.contains("18%"));
        assert!(response.documents_used > 0);
        assert_eq!(response.sources.len(), response.documents_used);
        assert!(response.avg_score > 0.0 && response.avg_score <= 1.0);

        let stats = pipeline.get_statistics().await;
        assert!(stats.index_loaded);
        assert_eq!(stats.index_rows, 2);
    }

    #[tokio::test]
    async fn chat_reports_retrieval_failures_as_retrieval_errors() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        seed_index(persist.path()).await;

        // loading only touches the store, so a dead embedding backend
        // surfaces at query time
        let pipeline = RagPipeline::new(
            test_config(docs.path(), persist.path()),
            Arc::new(BrokenEmbedding),
            Arc::new(StubGenerator),
        )
        .await
        .unwrap();
        pipeline.load_knowledge_base().await.unwrap();

        let err = pipeline.chat("qual a alíquota do icms?").await.unwrap_err();
        assert!(matches!(err, PipelineError::Retrieval(_)));
        let cause = err.to_string();
        assert!(cause.contains("backend offline"), "unexpected cause: {cause}");
    }

    #[tokio::test]
    async fn search_maps_scores_and_metadata() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        seed_index(persist.path()).await;

        let pipeline = pipeline(docs.path(), persist.path()).await;
        pipeline.load_knowledge_base().await.unwrap();

        let hits = pipeline.search("icms", 5, None).await.unwrap();
        assert!(!hits.is_empty());
        for hit in &hits {
            assert!(hit.score > 0.0 && hit.score <= 1.0);
            assert_eq!(hit.metadata.file_name, "decreto.pdf");
        }
    }

    #[tokio::test]
    async fn ensure_ready_spawns_single_background_build() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        let pipeline = Arc::new(pipeline(docs.path(), persist.path()).await);

        assert_eq!(pipeline.ensure_ready(), InitState::InProgress);

        // empty corpus, so the background build must settle on Failed
        let mut settled = false;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            match pipeline.current_state() {
                InitState::Failed(_) => {
                    settled = true;
                    break;
                }
                InitState::InProgress => continue,
                other => panic!("unexpected state: {other:?}"),
            }
        }
        assert!(settled, "background build never settled");

        // a failed build is not retried implicitly
        assert!(matches!(pipeline.ensure_ready(), InitState::Failed(_)));
    }

    #[tokio::test]
    async fn update_on_missing_path_keeps_pipeline_serving() {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        seed_index(persist.path()).await;

        let pipeline = pipeline(docs.path(), persist.path()).await;
        pipeline.load_knowledge_base().await.unwrap();

        let err = pipeline
            .update_knowledge_base(Some(PathBuf::from("/nonexistent/dir")))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Update(_)));

        // previous knowledge base still answers
        assert_eq!(pipeline.current_state(), InitState::Ready);
        assert!(pipeline.chat("icms").await.is_ok());
    }
}
