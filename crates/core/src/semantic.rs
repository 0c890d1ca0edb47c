use crate::error::{EmbeddingServiceError, RagError};
use crate::models::{ScoredChunk, SharedChunk};
use crate::traits::{EmbeddingService, VectorIndex};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Exact nearest-neighbour index: every chunk vector is unit-normalized at
/// build time and scored by inner product against the normalized query.
pub struct SemanticIndex {
    chunks: Vec<SharedChunk>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
    embedder: Arc<dyn EmbeddingService>,
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("chunks", &self.chunks.len())
            .field("dimensions", &self.dimensions)
            .field("model", &self.embedder.model_name())
            .finish()
    }
}

impl SemanticIndex {
    /// Embeds every chunk once. Any failure aborts the build; no partial
    /// index is returned.
    pub async fn build(
        chunks: &[SharedChunk],
        embedder: Arc<dyn EmbeddingService>,
        batch_size: usize,
    ) -> Result<Self, EmbeddingServiceError> {
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embedded = embedder.embed_batch(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(EmbeddingServiceError::CountMismatch {
                    expected: texts.len(),
                    found: embedded.len(),
                });
            }
            vectors.extend(embedded);
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        for vector in &mut vectors {
            if vector.len() != dimensions {
                return Err(EmbeddingServiceError::DimensionMismatch {
                    expected: dimensions,
                    found: vector.len(),
                });
            }
            check_vector(vector)?;
            normalize(vector);
        }

        debug!(
            chunks = chunks.len(),
            dimensions,
            model = embedder.model_name(),
            "semantic index built"
        );

        Ok(Self {
            chunks: chunks.to_vec(),
            vectors,
            dimensions,
            embedder,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Top `k` chunks by descending cosine similarity to the question.
    pub async fn query(
        &self,
        question: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, EmbeddingServiceError> {
        if k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_vector = self.embedder.embed(question).await?;
        if query_vector.len() != self.dimensions {
            return Err(EmbeddingServiceError::DimensionMismatch {
                expected: self.dimensions,
                found: query_vector.len(),
            });
        }
        check_vector(&query_vector)?;
        normalize(&mut query_vector);

        let mut ranked: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(doc, vector)| (doc, f64::from(dot(vector, &query_vector))))
            .collect();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));

        Ok(ranked
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(position, (doc, score))| ScoredChunk {
                chunk: self.chunks[doc].clone(),
                score,
                rank: position + 1,
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for SemanticIndex {
    async fn search_vector(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        self.query(question, k)
            .await
            .map_err(|error| RagError::embedding(format!("question {question:?}"), error))
    }
}

/// Rejects empty vectors and NaN or infinite components.
fn check_vector(vector: &[f32]) -> Result<(), EmbeddingServiceError> {
    if vector.is_empty() {
        return Err(EmbeddingServiceError::EmptyVector);
    }
    match vector.iter().position(|value| !value.is_finite()) {
        Some(position) => Err(EmbeddingServiceError::NonFinite { position }),
        None => Ok(()),
    }
}

fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}
