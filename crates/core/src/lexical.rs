//! BM25 keyword index over a fixed set of chunks.
//!
//! Every chunk is one document. Tokens are lowercased alphanumeric runs; no
//! stemming and no stop-word removal.

use crate::error::RagError;
use crate::models::{ScoredChunk, SharedChunk};
use crate::traits::KeywordIndex;
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: usize,
    term_frequency: u32,
}

#[derive(Debug)]
pub struct Bm25Index {
    chunks: Vec<SharedChunk>,
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    average_doc_length: f64,
    params: Bm25Params,
}

impl Bm25Index {
    pub fn build(chunks: &[SharedChunk], params: Bm25Params) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(chunks.len());

        for (doc, chunk) in chunks.iter().enumerate() {
            let tokens = tokenize(&chunk.text);
            doc_lengths.push(tokens.len() as u32);

            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            for (token, term_frequency) in frequencies {
                postings.entry(token).or_default().push(Posting {
                    doc,
                    term_frequency,
                });
            }
        }

        let total: u64 = doc_lengths.iter().map(|len| u64::from(*len)).sum();
        let average_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f64 / doc_lengths.len() as f64
        };

        Self {
            chunks: chunks.to_vec(),
            postings,
            doc_lengths,
            average_doc_length,
            params,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Top `k` chunks by descending BM25 score. Only chunks sharing at least
    /// one token with the question are returned; ties keep insertion order.
    pub fn query(&self, question: &str, k: usize) -> Vec<ScoredChunk> {
        if k == 0 || self.chunks.is_empty() || self.average_doc_length <= 0.0 {
            return Vec::new();
        }

        let n = self.chunks.len() as f64;
        let Bm25Params { k1, b } = self.params;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for token in tokenize(question) {
            let Some(postings) = self.postings.get(&token) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in postings {
                let dl = f64::from(self.doc_lengths[posting.doc]);
                let tf = f64::from(posting.term_frequency);
                let tf_norm =
                    (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / self.average_doc_length));
                *scores.entry(posting.doc).or_insert(0.0) += idf * tf_norm;
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));

        ranked
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(position, (doc, score))| ScoredChunk {
                chunk: self.chunks[doc].clone(),
                score,
                rank: position + 1,
            })
            .collect()
    }
}

#[async_trait]
impl KeywordIndex for Bm25Index {
    async fn search_keyword(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        Ok(self.query(question, k))
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}
