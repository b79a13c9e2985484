use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{RankError, Result};
use crate::normalization::terms;

/// Maps text to fixed-length unit vectors.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// One vector per input, in input order. Empty strings are an error.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
    /// Weight of adjacent word pairs relative to single words.
    pub bigram_weight: f32,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            seed: 1337,
            bigram_weight: 0.5,
        }
    }
}

/// Feature-hashing embedder over lowercased words and word bigrams.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = terms(text);
        if tokens.is_empty() {
            return Err(RankError::Embedding(format!(
                "no embeddable tokens in {:?}",
                text.chars().take(40).collect::<String>()
            )));
        }
        let dims = self.config.dimensions.max(1);
        let mut vector = vec![0f32; dims];
        for token in &tokens {
            let (bucket, sign) = self.bucket_for(token);
            vector[bucket] += sign;
        }
        for pair in tokens.windows(2) {
            let (bucket, sign) = self.bucket_for(&format!("{} {}", pair[0], pair[1]));
            vector[bucket] += sign * self.config.bigram_weight;
        }
        normalize(&mut vector);
        if vector.iter().all(|v| *v == 0.0) {
            // Colliding features can cancel out; fall back to one bucket per token.
            for token in &tokens {
                vector[self.bucket_for(token).0] += 1.0;
            }
            normalize(&mut vector);
        }
        Ok(vector)
    }

    fn bucket_for(&self, token: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.hash(&mut hasher);
        let hash = hasher.finish();
        let bucket = (hash as usize) % self.config.dimensions.max(1);
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimensions.max(1)
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed_text(text)).collect()
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
