//! docqa-embed
//!
//! Embedding capability implementations. `HashEmbedder` is deterministic and
//! offline; `OpenAiEmbedder` calls any OpenAI-compatible embeddings endpoint.
//! Both return L2-normalized vectors of the configured dimension.

use std::sync::Arc;

use docqa_core::config::{EmbeddingConfig, EmbeddingProvider};
use docqa_core::traits::Embedder;
use docqa_core::Result;

pub mod hash;
pub mod openai;

pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Hash => {
            tracing::info!(dim = config.dim, "using hash embedder");
            Ok(Arc::new(HashEmbedder::new(config.dim)))
        }
        EmbeddingProvider::OpenAi => {
            let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
            if api_key.is_none() {
                tracing::warn!(var = %config.api_key_env, "no embedding API key set, sending unauthenticated requests");
            }
            tracing::info!(model = %config.model, base_url = %config.base_url, "using OpenAI-compatible embedder");
            Ok(Arc::new(OpenAiEmbedder::new(config, api_key)?))
        }
    }
}
