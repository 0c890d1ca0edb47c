use crate::error::RagError;
use crate::extractor::DEFAULT_MAX_DOCUMENT_BYTES;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Answer the question based ONLY on the context below.
For every fact, you MUST cite the Page Number found in the metadata.
Try to answer in a concise manner. No more than {max_sentences} sentences.

Context:
{context}

Question: {input}
Answer:";

/// Every tunable of the pipeline. Defaults live here and nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Split separators, most preferred first.
    pub separators: Vec<String>,
    pub num_chunks_per_method: usize,
    /// Maximum number of fused candidates kept after merging both methods.
    pub fused_top_n: usize,
    /// Weights are not required to sum to 1.0; fused scores then range over
    /// `[0, lexical_weight + semantic_weight]`.
    pub lexical_weight: f64,
    pub semantic_weight: f64,
    pub bm25_k1: f64,
    pub bm25_b: f64,
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    pub model_name: String,
    pub temperature: f32,
    pub max_response_sentences: usize,
    pub max_context_chars: usize,
    pub prompt_template: String,
    pub request_timeout_secs: u64,
    /// Larger documents are refused before they are read into memory.
    pub max_document_bytes: u64,
    /// Questions run by the CLI `batch` command when none are given.
    pub sample_questions: Vec<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 250,
            chunk_overlap: 50,
            separators: ["\n\n", "\n", ". ", " ", ""]
                .into_iter()
                .map(str::to_string)
                .collect(),
            num_chunks_per_method: 3,
            fused_top_n: 6,
            lexical_weight: 0.3,
            semantic_weight: 0.7,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_batch_size: 16,
            model_name: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            max_response_sentences: 5,
            max_context_chars: 8_000,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            request_timeout_secs: 300,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            sample_questions: [
                "How much is the rent?",
                "What is the security deposit?",
                "Can I have pets?",
                "What are the late fee charges?",
                "How much notice is required to terminate?",
                "Who is responsible for repairs?",
                "Is subletting allowed?",
                "What utilities are included?",
                "Is renters insurance required?",
                "What are the parking rules?",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl RagConfig {
    /// Reads a partial JSON config; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, RagError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            RagError::Configuration(format!("cannot read {}: {error}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            RagError::Configuration(format!("cannot parse {}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(invalid(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        for (name, weight) in [
            ("lexical_weight", self.lexical_weight),
            ("semantic_weight", self.semantic_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(invalid(format!(
                    "{name} must be a finite non-negative number, got {weight}"
                )));
            }
        }
        let weight_sum = self.lexical_weight + self.semantic_weight;
        if weight_sum <= 0.0 {
            return Err(invalid("lexical_weight and semantic_weight cannot both be zero"));
        }
        if (weight_sum - 1.0).abs() > 1e-9 {
            debug!(weight_sum, "fusion weights do not sum to 1.0");
        }
        if !self.bm25_k1.is_finite() || self.bm25_k1 < 0.0 {
            return Err(invalid(format!("bm25_k1 must be non-negative, got {}", self.bm25_k1)));
        }
        if !(0.0..=1.0).contains(&self.bm25_b) {
            return Err(invalid(format!("bm25_b must be within [0, 1], got {}", self.bm25_b)));
        }
        if self.fused_top_n == 0 {
            return Err(invalid("fused_top_n must be greater than zero"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be greater than zero"));
        }
        if self.max_document_bytes == 0 {
            return Err(invalid("max_document_bytes must be greater than zero"));
        }
        if self.embedding_batch_size == 0 {
            return Err(invalid("embedding_batch_size must be greater than zero"));
        }
        if self.max_response_sentences == 0 {
            return Err(invalid("max_response_sentences must be greater than zero"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.model_name.trim().is_empty() || self.embedding_model.trim().is_empty() {
            return Err(invalid("model names cannot be empty"));
        }
        for placeholder in ["{context}", "{input}"] {
            if !self.prompt_template.contains(placeholder) {
                return Err(invalid(format!(
                    "prompt_template is missing the {placeholder} placeholder"
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> RagError {
    RagError::Configuration(message.into())
}
