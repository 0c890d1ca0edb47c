use crate::models::Chunk;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentLoadError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pdf parse error in {source_id}: {details}")]
    PdfParse { source_id: String, details: String },

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("document {source_id} is {size} bytes, above the {limit} byte limit")]
    TooLarge {
        source_id: String,
        size: u64,
        limit: u64,
    },

    #[error("document has no readable text: {0}")]
    NoText(String),

    #[error("document loader worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingServiceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("embedding vector has no dimensions")]
    EmptyVector,

    #[error("embedding vector has a non-finite value at position {position}")]
    NonFinite { position: usize },

    #[error("embedding service returned {found} vectors for {expected} inputs")]
    CountMismatch { expected: usize, found: usize },

    #[error("embedding request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("malformed completion payload: {0}")]
    Malformed(String),

    #[error("completion request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum SynthesisFailure {
    #[error("no context passages were retrieved")]
    InsufficientContext,

    #[error("completion returned an empty answer")]
    EmptyAnswer,

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Answer synthesis failed. Carries the question and the fused chunks so a
/// caller can still show the raw sources.
#[derive(Debug, Error)]
#[error("answer synthesis failed for {question:?}: {reason}")]
pub struct SynthesisError {
    pub question: String,
    pub chunks: Vec<Chunk>,
    #[source]
    pub reason: SynthesisFailure,
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("failed to load document: {0}")]
    DocumentLoad(#[from] DocumentLoadError),

    #[error("embedding service failed for {context}: {source}")]
    Embedding {
        context: String,
        #[source]
        source: EmbeddingServiceError,
    },

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("no document has been ingested yet")]
    NotReady,

    #[error("session is busy: {0}")]
    Busy(&'static str),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("question is empty")]
    EmptyQuestion,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl RagError {
    pub fn embedding(context: impl Into<String>, source: EmbeddingServiceError) -> Self {
        Self::Embedding {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
