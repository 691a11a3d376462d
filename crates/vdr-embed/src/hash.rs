use anyhow::Result;
use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use vdr_core::traits::MultiVectorEncoder;
use vdr_core::types::{ImageInput, MultiVector};

/// Hash probes per token vector.
const PROBES: u64 = 4;
/// Bytes per patch when an image does not decode as text.
const PATCH_BYTES: usize = 256;

/// Deterministic multi-vector encoder built on xxHash64.
///
/// Text becomes one unit vector per lowercase alphanumeric token, so a query
/// token scores 1.0 against the same token in a page. Image bytes that are
/// valid UTF-8 are tokenized the same way; anything else is cut into fixed-size
/// patches, one vector per patch. Outputs are capped at `max_vectors` and always
/// hold at least one vector.
pub struct HashEncoder { dim: usize, max_vectors: usize, id: String }

impl HashEncoder {
    pub fn new(dim: usize, max_vectors: usize) -> Self {
        Self { dim, max_vectors: max_vectors.max(1), id: format!("hash:xxh64:d{}", dim) }
    }

    pub fn encode_text(&self, text: &str) -> Result<MultiVector> {
        let tokens = tokenize(text);
        if tokens.is_empty() { return self.pack(vec![self.hashed_vector(text)]); }
        let rows = tokens.iter().take(self.max_vectors).map(|t| self.hashed_vector(t)).collect();
        self.pack(rows)
    }

    pub fn encode_image(&self, bytes: &[u8]) -> Result<MultiVector> {
        if let Ok(text) = std::str::from_utf8(bytes) {
            if !tokenize(text).is_empty() { return self.encode_text(text); }
        }
        if bytes.is_empty() { return self.pack(vec![self.hashed_vector(bytes)]); }
        let rows = bytes.chunks(PATCH_BYTES).take(self.max_vectors).map(|p| self.hashed_vector(p)).collect();
        self.pack(rows)
    }

    fn hashed_vector<T: Hash + ?Sized>(&self, item: &T) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        if self.dim == 0 { return v; }
        for seed in 0..PROBES {
            let mut hasher = XxHash64::with_seed(seed);
            item.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let magnitude = 0.5 + (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += if h & 1 == 0 { magnitude } else { -magnitude };
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }

    fn pack(&self, rows: Vec<Vec<f32>>) -> Result<MultiVector> {
        Ok(MultiVector::from_rows(self.dim, &rows)?)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(str::to_lowercase).collect()
}

#[async_trait]
impl MultiVectorEncoder for HashEncoder {
    fn encoder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn encode_images(&self, images: &[ImageInput]) -> Result<Vec<MultiVector>> {
        images.iter().map(|img| self.encode_image(&img.bytes)).collect()
    }

    async fn encode_queries(&self, queries: &[String]) -> Result<Vec<MultiVector>> {
        queries.iter().map(|q| self.encode_text(q)).collect()
    }
}
