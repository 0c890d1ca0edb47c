use crate::error::{CompletionError, DocumentLoadError, EmbeddingServiceError, RagError};
use crate::extractor::{DocumentInput, LoadedDocument};
use crate::models::ScoredChunk;
use async_trait::async_trait;

#[async_trait]
pub trait KeywordIndex {
    async fn search_keyword(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, RagError>;
}

#[async_trait]
pub trait VectorIndex {
    async fn search_vector(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, RagError>;
}

/// Text to fixed-dimension vector. The same instance must serve both index
/// build and query.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

pub trait DocumentSource: Send + Sync {
    fn load(&self, input: &DocumentInput) -> Result<LoadedDocument, DocumentLoadError>;
}
