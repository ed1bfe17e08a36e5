//! localrag-embed
//!
//! Embedder adapters behind `localrag_core::traits::Embedder`: a deterministic
//! hashing embedder for tests and offline use, and a BGE-M3 model on candle.
//! Set `APP_USE_FAKE_EMBEDDINGS=1` to force the hashing embedder regardless of
//! configuration.
use std::sync::Arc;
use tracing::info;

use localrag_core::config::{EmbeddingProvider, EmbeddingSettings};
use localrag_core::error::{Error, Result};
use localrag_core::traits::Embedder;

pub mod hash;
pub mod model;
pub mod pool;
pub mod tokenize;

pub use hash::HashEmbedder;
pub use model::{resolve_model_dir, BgeM3Embedder};
pub use pool::masked_mean_l2;

fn fake_requested() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Builds the configured embedder and checks its dimension against `settings.dim`.
pub fn from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if fake_requested() || settings.provider == EmbeddingProvider::Hash {
        info!(dim = settings.dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.dim)));
    }
    let dir = resolve_model_dir(settings.model_dir.as_deref())?;
    let model = BgeM3Embedder::load(&dir, settings.max_len)?;
    if model.dim() != settings.dim {
        return Err(Error::InvalidConfig(format!(
            "embedding.dim is {} but model {} produces {}",
            settings.dim,
            model.model_id(),
            model.dim()
        )));
    }
    Ok(Arc::new(model))
}
