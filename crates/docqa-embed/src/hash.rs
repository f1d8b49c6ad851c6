use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use docqa_core::traits::Embedder;
use docqa_core::Result;
use twox_hash::XxHash64;

use crate::l2_normalize;

/// Deterministic bag-of-tokens embedder.
///
/// Tokens are lowercased words with surrounding punctuation stripped, hashed
/// into `dim` buckets. Identical texts give identical unit vectors and texts
/// sharing words land close together, which is enough for local runs and tests
/// without a model.
pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1), id: format!("hash:d{}", dim.max(1)) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % self.dim as u64) as usize;
            #[allow(clippy::cast_precision_loss)]
            let weight = 0.5 + ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += weight;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn punctuation_and_case_are_ignored() {
        let e = HashEmbedder::new(64);
        assert_eq!(e.embed_text("Pump pressure."), e.embed_text("pump PRESSURE"));
    }

    #[test]
    fn shared_words_are_closer() {
        let e = HashEmbedder::new(256);
        let q = e.embed_text("how do I bleed the hydraulic pump");
        let near = e.embed_text("to bleed the hydraulic pump open the valve");
        let far = e.embed_text("quarterly revenue grew in europe");
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[test]
    fn blank_text_is_zero_vector() {
        let e = HashEmbedder::new(8);
        assert!(e.embed_text("  ... ").iter().all(|x| *x == 0.0));
    }
}
