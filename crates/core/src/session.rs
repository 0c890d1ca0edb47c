use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::config::RagConfig;
use crate::error::{DocumentLoadError, RagError};
use crate::extractor::{DocumentInput, LoadedDocument};
use crate::fusion::{FusionRetriever, FusionWeights};
use crate::lexical::{Bm25Index, Bm25Params};
use crate::models::{Chunk, DocumentFingerprint, FusedResult, QueryResponse, SessionStats, SharedChunk};
use crate::semantic::SemanticIndex;
use crate::synthesis::AnswerSynthesizer;
use crate::traits::{CompletionService, DocumentSource, EmbeddingService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Everything built from one ingested document. Immutable once built.
pub struct IndexState {
    fingerprint: DocumentFingerprint,
    chunks: Vec<SharedChunk>,
    retriever: FusionRetriever<Bm25Index, SemanticIndex>,
    candidates_per_method: usize,
    chunking: ChunkingConfig,
}

impl IndexState {
    pub async fn build(
        document: LoadedDocument,
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Result<Self, RagError> {
        let chunking = ChunkingConfig::from(config);
        let source_id = document.fingerprint.source_id.clone();
        let chunks: Vec<SharedChunk> = chunk_pages(&document.pages, &source_id, &chunking)
            .into_iter()
            .map(Arc::new)
            .collect();

        if chunks.is_empty() {
            return Err(DocumentLoadError::NoText(source_id).into());
        }

        let lexical = Bm25Index::build(
            &chunks,
            Bm25Params {
                k1: config.bm25_k1,
                b: config.bm25_b,
            },
        );
        let semantic = SemanticIndex::build(&chunks, embedder, config.embedding_batch_size)
            .await
            .map_err(|error| RagError::embedding(format!("document {source_id}"), error))?;

        let retriever = FusionRetriever::new(
            lexical,
            semantic,
            FusionWeights {
                lexical: config.lexical_weight,
                semantic: config.semantic_weight,
            },
            config.fused_top_n,
        );

        debug!(
            source = %source_id,
            lexical = retriever.keyword().len(),
            semantic = retriever.vector().len(),
            dimensions = retriever.vector().dimensions(),
            "indexes built"
        );

        Ok(Self {
            fingerprint: document.fingerprint,
            chunks,
            retriever,
            candidates_per_method: config.num_chunks_per_method,
            chunking,
        })
    }

    pub fn fingerprint(&self) -> &DocumentFingerprint {
        &self.fingerprint
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().map(Arc::as_ref)
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub async fn retrieve(&self, question: &str) -> Result<FusedResult, RagError> {
        self.retriever.retrieve(question, self.candidates_per_method).await
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            source_id: self.fingerprint.source_id.clone(),
            checksum: self.fingerprint.checksum.clone(),
            page_count: self.fingerprint.page_count,
            num_chunks: self.chunks.len(),
            chunk_size: self.chunking.max_chars,
            chunk_overlap: self.chunking.overlap_chars,
            embedding_model: self.retriever.vector().model_name().to_string(),
            embedding_dimensions: self.retriever.vector().dimensions(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Empty,
    Ingesting,
    Ready,
}

enum SessionState {
    Empty,
    Ingesting,
    Ready(Arc<IndexState>),
}

/// One document, one set of indexes. `ingest` replaces the previous document
/// entirely; `ask` requires a completed ingestion.
///
/// Ingesting while a question is being answered, or while another ingestion
/// runs, is rejected with [`RagError::Busy`].
pub struct LeaseSession {
    config: RagConfig,
    loader: Arc<dyn DocumentSource>,
    embedder: Arc<dyn EmbeddingService>,
    synthesizer: AnswerSynthesizer,
    state: Mutex<SessionState>,
    queries_in_flight: Arc<AtomicUsize>,
}

impl LeaseSession {
    pub fn new(
        config: RagConfig,
        loader: Arc<dyn DocumentSource>,
        embedder: Arc<dyn EmbeddingService>,
        completion: Arc<dyn CompletionService>,
    ) -> Result<Self, RagError> {
        config.validate()?;
        Ok(Self {
            synthesizer: AnswerSynthesizer::new(completion, &config),
            config,
            loader,
            embedder,
            state: Mutex::new(SessionState::Empty),
            queries_in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        match &*self.lock_state() {
            SessionState::Empty => SessionPhase::Empty,
            SessionState::Ingesting => SessionPhase::Ingesting,
            SessionState::Ready(_) => SessionPhase::Ready,
        }
    }

    pub fn stats(&self) -> Option<SessionStats> {
        match &*self.lock_state() {
            SessionState::Ready(index) => Some(index.stats()),
            _ => None,
        }
    }

    /// Loads the document on a blocking worker, then chunks and indexes it.
    pub async fn ingest(&self, input: DocumentInput) -> Result<SessionStats, RagError> {
        let guard = self.begin_ingest()?;

        let loader = self.loader.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&input))
            .await
            .map_err(|error| DocumentLoadError::Worker(error.to_string()))
            .and_then(|result| result);

        let document = match loaded {
            Ok(document) => document,
            Err(error) => {
                warn!(%error, "document load failed");
                return Err(error.into());
            }
        };

        self.finish_ingest(guard, document).await
    }

    /// Ingests text that was already extracted by the host.
    pub async fn ingest_loaded(&self, document: LoadedDocument) -> Result<SessionStats, RagError> {
        let guard = self.begin_ingest()?;
        self.finish_ingest(guard, document).await
    }

    pub async fn ask(&self, question: &str) -> Result<QueryResponse, RagError> {
        let (index, _query) = self.ready_index()?;
        let fused = index.retrieve(question).await?;
        let response = self.synthesizer.synthesize(question, &fused).await?;
        info!(
            sources = response.sources.len(),
            cited_pages = ?response.cited_pages,
            "answered question"
        );
        Ok(response)
    }

    /// Fused candidates without synthesis, for diagnostics.
    pub async fn retrieve(&self, question: &str) -> Result<FusedResult, RagError> {
        let (index, _query) = self.ready_index()?;
        index.retrieve(question).await
    }

    async fn finish_ingest(
        &self,
        guard: IngestGuard<'_>,
        document: LoadedDocument,
    ) -> Result<SessionStats, RagError> {
        let source_id = document.fingerprint.source_id.clone();
        info!(source = %source_id, pages = document.pages.len(), "ingesting document");

        match IndexState::build(document, &self.config, self.embedder.clone()).await {
            Ok(index) => {
                let stats = index.stats();
                guard.complete(index);
                info!(source = %source_id, chunks = stats.num_chunks, "document ready");
                Ok(stats)
            }
            Err(error) => {
                warn!(source = %source_id, %error, "ingestion failed");
                Err(error)
            }
        }
    }

    fn begin_ingest(&self) -> Result<IngestGuard<'_>, RagError> {
        let mut state = self.lock_state();
        if matches!(*state, SessionState::Ingesting) {
            return Err(RagError::Busy("an ingestion is already running"));
        }
        if self.queries_in_flight.load(Ordering::SeqCst) > 0 {
            return Err(RagError::Busy("a question is being answered"));
        }
        *state = SessionState::Ingesting;
        Ok(IngestGuard {
            session: self,
            completed: false,
        })
    }

    fn ready_index(&self) -> Result<(Arc<IndexState>, QueryGuard), RagError> {
        let state = self.lock_state();
        match &*state {
            SessionState::Ready(index) => {
                self.queries_in_flight.fetch_add(1, Ordering::SeqCst);
                Ok((
                    index.clone(),
                    QueryGuard {
                        counter: self.queries_in_flight.clone(),
                    },
                ))
            }
            SessionState::Ingesting => Err(RagError::Busy("a document is being ingested")),
            SessionState::Empty => Err(RagError::NotReady),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the `Ingesting` state; dropping it without completion (failure or
/// cancellation) returns the session to `Empty`.
struct IngestGuard<'a> {
    session: &'a LeaseSession,
    completed: bool,
}

impl IngestGuard<'_> {
    fn complete(mut self, index: IndexState) {
        *self.session.lock_state() = SessionState::Ready(Arc::new(index));
        self.completed = true;
    }
}

impl Drop for IngestGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            *self.session.lock_state() = SessionState::Empty;
        }
    }
}

struct QueryGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
