pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod fusion;
pub mod lexical;
pub mod models;
pub mod providers;
pub mod semantic;
pub mod session;
pub mod synthesis;
pub mod traits;

pub use chunking::{chunk_pages, split_text, ChunkingConfig};
pub use config::{RagConfig, DEFAULT_PROMPT_TEMPLATE};
pub use embeddings::{HashingEmbedder, DEFAULT_HASHING_DIMENSIONS};
pub use error::{
    CompletionError, DocumentLoadError, EmbeddingServiceError, RagError, SynthesisError,
    SynthesisFailure,
};
pub use extractor::{
    DocumentInput, LeaseDocumentLoader, LoadedDocument, DEFAULT_MAX_DOCUMENT_BYTES,
};
pub use fusion::{fuse, FusionRetriever, FusionWeights};
pub use lexical::{tokenize, Bm25Index, Bm25Params};
pub use models::{
    Chunk, DocumentFingerprint, FusedHit, FusedResult, MethodScore, PageText, QueryResponse,
    ScoredChunk, SessionStats, SharedChunk,
};
pub use providers::{OpenAiChat, OpenAiCredentials, OpenAiEmbeddings, DEFAULT_BASE_URL};
pub use semantic::SemanticIndex;
pub use session::{IndexState, LeaseSession, SessionPhase};
pub use synthesis::{cited_pages, AnswerSynthesizer};
pub use traits::{CompletionService, DocumentSource, EmbeddingService, KeywordIndex, VectorIndex};
