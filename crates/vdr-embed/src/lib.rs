//! vdr-embed
//!
//! Concrete embedding collaborators: a deterministic hashing encoder for tests
//! and offline runs, and an HTTP client for an external model service.
use anyhow::Result;
use std::sync::Arc;

use vdr_core::config::{EncoderBackend, EncoderSettings};
use vdr_core::traits::MultiVectorEncoder;

pub mod hash;
pub mod remote;

pub use hash::HashEncoder;
pub use remote::RemoteEncoder;

/// Build the configured encoder. `APP_USE_FAKE_EMBEDDINGS=1` forces the
/// hashing encoder regardless of `settings.backend`.
pub fn default_encoder(settings: &EncoderSettings, dim: usize) -> Result<Arc<dyn MultiVectorEncoder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    if use_fake || settings.backend == EncoderBackend::Hash {
        tracing::info!(dim, forced = use_fake, "using hash encoder");
        return Ok(Arc::new(HashEncoder::new(dim, settings.max_vectors)));
    }
    let encoder = RemoteEncoder::new(settings, dim)?;
    tracing::info!(id = encoder.encoder_id(), "using remote encoder");
    Ok(Arc::new(encoder))
}
