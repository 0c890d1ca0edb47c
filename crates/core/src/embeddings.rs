use crate::error::EmbeddingServiceError;
use crate::traits::EmbeddingService;
use async_trait::async_trait;

pub const DEFAULT_HASHING_DIMENSIONS: usize = 256;

/// Offline embedder: hashes lowercase character trigrams into a fixed number
/// of buckets and L2-normalizes the counts. Deterministic, no network.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingService for HashingEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram-hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        Ok(self.vectorize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        assert_eq!(
            embedder.vectorize("Security deposit refund"),
            embedder.vectorize("Security deposit refund")
        );
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() -> Result<(), EmbeddingServiceError> {
        let embedder = HashingEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").await?.len(), 32);
        assert_eq!(embedder.embed("").await?, vec![0.0; 32]);
        Ok(())
    }

    #[test]
    fn similar_texts_are_closer_than_unrelated_ones() {
        let embedder = HashingEmbedder::default();
        let rent = embedder.vectorize("monthly rent payment");
        let rent_again = embedder.vectorize("rent payment each month");
        let pets = embedder.vectorize("no dogs or cats");

        let cosine = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(cosine(&rent, &rent_again) > cosine(&rent, &pets));
    }
}
