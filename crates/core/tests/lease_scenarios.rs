use async_trait::async_trait;
use chrono::Utc;
use lease_rag_core::{
    CompletionError, CompletionService, DocumentFingerprint, DocumentInput, DocumentLoadError,
    EmbeddingService, EmbeddingServiceError, IndexState, LeaseDocumentLoader, LeaseSession,
    LoadedDocument, PageText, RagConfig, RagError, SessionPhase, SynthesisError, SynthesisFailure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const RENT: &str = "The monthly rent is $1500, due on the 1st.";
const PETS: &str = "Pets are not allowed without written consent.";

/// Returns the vector of the first key contained in the lowercased text.
struct KeyedEmbedder {
    table: Vec<(&'static str, Vec<f32>)>,
}

impl KeyedEmbedder {
    fn lease() -> Arc<Self> {
        Arc::new(Self {
            table: vec![
                ("can i have pets", vec![1.0, 0.0]),
                ("how much is the rent", vec![0.0, 1.0]),
                ("pets are not allowed", vec![0.9, 0.43589]),
                ("monthly rent", vec![0.1, 0.99499]),
            ],
        })
    }
}

#[async_trait]
impl EmbeddingService for KeyedEmbedder {
    fn model_name(&self) -> &str {
        "keyed"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        let lowered = text.to_lowercase();
        Ok(self
            .table
            .iter()
            .find(|(key, _)| lowered.contains(key))
            .map(|(_, vector)| vector.clone())
            .unwrap_or_else(|| vec![0.5, 0.5]))
    }
}

/// Succeeds until the `fail_on`-th call.
struct FlakyEmbedder {
    calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl EmbeddingService for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(EmbeddingServiceError::Request("connection reset".to_string()));
        }
        Ok(vec![1.0, 0.0])
    }
}

struct CountingCompletion {
    calls: AtomicUsize,
    reply: &'static str,
}

impl CountingCompletion {
    fn replying(reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for CountingCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.to_string())
    }
}

fn loaded(pages: &[&str]) -> LoadedDocument {
    LoadedDocument {
        fingerprint: DocumentFingerprint {
            source_id: "lease.pdf".to_string(),
            title: "lease.pdf".to_string(),
            checksum: "0".repeat(64),
            page_count: pages.len(),
            ingested_at: Utc::now(),
        },
        pages: pages
            .iter()
            .enumerate()
            .map(|(index, text)| PageText::new(index as u32 + 1, *text))
            .collect(),
    }
}

fn session(
    config: RagConfig,
    embedder: Arc<dyn EmbeddingService>,
    completion: Arc<dyn CompletionService>,
) -> Result<LeaseSession, RagError> {
    let loader = Arc::new(LeaseDocumentLoader::from(&config));
    LeaseSession::new(config, loader, embedder, completion)
}

#[tokio::test]
async fn rent_question_is_answered_from_page_one() -> Result<(), RagError> {
    let completion = CountingCompletion::replying("The monthly rent is $1500 (Page 1).");
    let session = session(RagConfig::default(), KeyedEmbedder::lease(), completion.clone())?;
    session.ingest_loaded(loaded(&[RENT, PETS])).await?;

    let fused = session.retrieve("How much is the rent?").await?;
    assert_eq!(fused.hits[0].chunk.page_number, Some(1));

    let response = session.ask("How much is the rent?").await?;
    assert_eq!(response.sources[0].page_number, Some(1));
    assert_eq!(response.cited_pages, vec![1]);
    assert!(response.answer.contains("$1500"));
    assert_eq!(completion.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn pets_question_ranks_page_two_first() -> Result<(), RagError> {
    let session = session(
        RagConfig::default(),
        KeyedEmbedder::lease(),
        CountingCompletion::replying("Pets need written consent (Page 2)."),
    )?;
    session.ingest_loaded(loaded(&[RENT, PETS])).await?;

    let fused = session.retrieve("Can I have pets?").await?;
    let top = &fused.hits[0];
    assert_eq!(top.chunk.page_number, Some(2));
    assert!((top.fused_score - 1.0).abs() < 1e-9);
    assert!(fused.hits.iter().all(|hit| hit.fused_score <= top.fused_score));

    let response = session.ask("Can I have pets?").await?;
    assert_eq!(response.sources[0].page_number, Some(2));
    Ok(())
}

#[tokio::test]
async fn embedding_failure_leaves_session_empty() -> Result<(), RagError> {
    let embedder = Arc::new(FlakyEmbedder {
        calls: AtomicUsize::new(0),
        fail_on: 3,
    });
    let session = session(
        RagConfig::default(),
        embedder.clone(),
        CountingCompletion::replying("unused"),
    )?;

    let result = session
        .ingest_loaded(loaded(&[
            "Rent is due monthly.",
            "The deposit is refundable.",
            "Pets require consent.",
            "Parking is assigned.",
            "Utilities are paid by the tenant.",
        ]))
        .await;

    assert!(matches!(result, Err(RagError::Embedding { .. })));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(session.phase(), SessionPhase::Empty);
    assert!(matches!(session.ask("Rent?").await, Err(RagError::NotReady)));
    Ok(())
}

#[tokio::test]
async fn malformed_embedding_is_an_error_not_a_top_hit() -> Result<(), RagError> {
    let embedder = Arc::new(KeyedEmbedder {
        table: vec![
            ("pets are not allowed", vec![f32::NAN, 1.0]),
            ("monthly rent", vec![0.1, 0.99499]),
        ],
    });
    let session = session(
        RagConfig::default(),
        embedder,
        CountingCompletion::replying("unused"),
    )?;

    let result = session.ingest_loaded(loaded(&[RENT, PETS])).await;
    assert!(matches!(
        result,
        Err(RagError::Embedding {
            source: EmbeddingServiceError::NonFinite { .. },
            ..
        })
    ));
    assert_eq!(session.phase(), SessionPhase::Empty);
    Ok(())
}

#[tokio::test]
async fn oversized_upload_is_refused() -> Result<(), RagError> {
    let config = RagConfig {
        max_document_bytes: 10,
        ..RagConfig::default()
    };
    let session = session(config, KeyedEmbedder::lease(), CountingCompletion::replying("unused"))?;

    let result = session
        .ingest(DocumentInput::Bytes {
            name: "lease.txt".to_string(),
            bytes: RENT.as_bytes().to_vec(),
        })
        .await;
    assert!(matches!(
        result,
        Err(RagError::DocumentLoad(DocumentLoadError::TooLarge { .. }))
    ));
    assert_eq!(session.phase(), SessionPhase::Empty);
    Ok(())
}

#[tokio::test]
async fn reingesting_the_same_document_is_idempotent() -> Result<(), RagError> {
    let config = RagConfig {
        chunk_size: 30,
        chunk_overlap: 10,
        ..RagConfig::default()
    };
    let embedder = KeyedEmbedder::lease();

    let first = IndexState::build(loaded(&[RENT, PETS]), &config, embedder.clone()).await?;
    let second = IndexState::build(loaded(&[RENT, PETS]), &config, embedder.clone()).await?;
    assert!(first.num_chunks() > 2);
    assert!(first.chunks().eq(second.chunks()));

    let session = session(config, embedder, CountingCompletion::replying("ok"))?;
    let once = session.ingest_loaded(loaded(&[RENT, PETS])).await?;
    let twice = session.ingest_loaded(loaded(&[RENT, PETS])).await?;
    assert_eq!(once.num_chunks, twice.num_chunks);
    assert_eq!(twice.num_chunks, first.num_chunks());
    Ok(())
}

#[tokio::test]
async fn zero_candidates_never_call_the_completion_service() -> Result<(), RagError> {
    let config = RagConfig {
        num_chunks_per_method: 0,
        ..RagConfig::default()
    };
    let completion = CountingCompletion::replying("unused");
    let session = session(config, KeyedEmbedder::lease(), completion.clone())?;
    session.ingest_loaded(loaded(&[RENT, PETS])).await?;

    assert!(session.retrieve("How much is the rent?").await?.is_empty());
    assert!(matches!(
        session.ask("How much is the rent?").await,
        Err(RagError::Synthesis(SynthesisError {
            reason: SynthesisFailure::InsufficientContext,
            ..
        }))
    ));
    assert_eq!(completion.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn blank_question_is_rejected() -> Result<(), RagError> {
    let session = session(
        RagConfig::default(),
        KeyedEmbedder::lease(),
        CountingCompletion::replying("unused"),
    )?;
    session.ingest_loaded(loaded(&[RENT])).await?;
    assert!(matches!(session.ask("   ").await, Err(RagError::EmptyQuestion)));
    Ok(())
}

#[tokio::test]
async fn text_lease_is_ingested_from_disk() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("lease.txt");
    std::fs::write(&path, format!("{RENT}\u{000C}{PETS}"))?;

    let session = session(
        RagConfig::default(),
        KeyedEmbedder::lease(),
        CountingCompletion::replying("Page 2 says pets need consent."),
    )?;
    let stats = session.ingest(DocumentInput::Path(path)).await?;
    assert_eq!(stats.page_count, 2);
    assert_eq!(stats.num_chunks, 2);
    assert_eq!(stats.checksum.len(), 64);
    assert_eq!(session.phase(), SessionPhase::Ready);

    let response = session.ask("Can I have pets?").await?;
    assert_eq!(response.cited_pages, vec![2]);
    Ok(())
}
