use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Text of a single page as produced by a document source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number, `None` when the format has no page boundaries.
    pub number: Option<u32>,
    pub text: String,
}

impl PageText {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number: Some(number),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub source_id: String,
    pub title: String,
    pub checksum: String,
    pub page_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// A bounded span of document text with its provenance.
///
/// Chunks are created once during ingestion and shared read-only by both
/// indexes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the document's chunk sequence; identity and tie-break key.
    pub chunk_index: usize,
    pub text: String,
    pub page_number: Option<u32>,
    pub source_id: String,
    /// Character offset of the chunk within its page.
    pub start_offset: usize,
}

impl Chunk {
    pub fn page_label(&self) -> String {
        match self.page_number {
            Some(page) => page.to_string(),
            None => "Unknown".to_string(),
        }
    }
}

pub type SharedChunk = Arc<Chunk>;

/// A chunk scored by a single retrieval method.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: SharedChunk,
    pub score: f64,
    /// 1-based rank within the method's result list.
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodScore {
    pub raw: f64,
    pub normalized: f64,
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk: SharedChunk,
    pub fused_score: f64,
    pub lexical: Option<MethodScore>,
    pub semantic: Option<MethodScore>,
}

impl FusedHit {
    pub fn lexical_normalized(&self) -> f64 {
        self.lexical.map(|score| score.normalized).unwrap_or(0.0)
    }

    pub fn semantic_normalized(&self) -> f64 {
        self.semantic.map(|score| score.normalized).unwrap_or(0.0)
    }
}

/// Fused candidates ordered by non-increasing `fused_score`, without
/// duplicate chunks.
#[derive(Debug, Clone, Default)]
pub struct FusedResult {
    pub question: String,
    pub hits: Vec<FusedHit>,
}

impl FusedResult {
    pub fn empty(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            hits: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.hits.iter().map(|hit| hit.chunk.as_ref().clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub question: String,
    pub answer: String,
    /// Chunks placed in the prompt context, in prompt order.
    pub sources: Vec<Chunk>,
    /// Page numbers the answer text cites, in order of first mention.
    pub cited_pages: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub source_id: String,
    pub checksum: String,
    pub page_count: usize,
    pub num_chunks: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
}
