//! Shared helpers for tests.

use std::path::Path;

use crate::config::Config;
use crate::embedder::{EmbeddingError, TextEmbedder};

/// Deterministic embedder for tests: one dimension per vocabulary token
/// plus a shared catch-all, so token overlap maps to cosine similarity
/// exactly and no model download is needed.
pub struct BagEmbedder {
    name: String,
    vocab: Vec<String>,
}

impl BagEmbedder {
    pub fn new(vocab: &[&str]) -> Self {
        Self::with_name("bag-test-embedder", vocab)
    }

    pub fn with_name(name: &str, vocab: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            vocab: vocab.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn token_dim(&self, token: &str) -> usize {
        self.vocab
            .iter()
            .position(|known| known == token)
            .unwrap_or(self.vocab.len())
    }
}

impl TextEmbedder for BagEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.vocab.len() + 1
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimensions()];
        for raw in text.split_whitespace() {
            let token: String = raw
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            if token.is_empty() {
                continue;
            }
            vector[self.token_dim(&token)] += 1.0;
        }
        // blank input still gets a nonzero vector, like a real model would
        if vector.iter().all(|weight| *weight == 0.0) {
            vector[self.vocab.len()] = 1.0;
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Isolated config rooted in a unique temp directory, so parallel tests
/// never collide and no real data is touched.
pub fn test_config(base: &Path) -> Config {
    Config::load_with(base.to_str().unwrap())
}
