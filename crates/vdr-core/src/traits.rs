use async_trait::async_trait;

use crate::types::{ImageInput, MultiVector};

/// The embedding collaborator: turns page images and query strings into
/// multi-vector representations of a fixed dimension.
///
/// Implementations return exactly one `MultiVector` per input, in input
/// order, and fail the whole call if any single input cannot be encoded.
#[async_trait]
pub trait MultiVectorEncoder: Send + Sync {
    /// Stable identifier for the model and its output (e.g. `hash:xxh64:d128`).
    fn encoder_id(&self) -> &str;
    /// Per-vector dimensionality (d).
    fn dim(&self) -> usize;
    async fn encode_images(&self, images: &[ImageInput]) -> anyhow::Result<Vec<MultiVector>>;
    async fn encode_queries(&self, queries: &[String]) -> anyhow::Result<Vec<MultiVector>>;
}
