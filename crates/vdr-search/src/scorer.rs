//! Late-interaction (MaxSim) scoring of one query against one document.
//!
//! For every query vector take the best similarity over all document vectors,
//! then combine those maxima with the configured aggregation. Per-pair
//! similarities are computed in `f32`; maxima and the final sum are carried in
//! `f64` so rank order does not drift with batch layout.
use vdr_core::config::{Aggregation, ScoringSettings, Similarity};
use vdr_core::error::{Error, Result};
use vdr_core::types::MultiVectorView;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scorer {
    similarity: Similarity,
    aggregation: Aggregation,
}

impl Scorer {
    pub fn new(settings: ScoringSettings) -> Self {
        Self { similarity: settings.similarity, aggregation: settings.aggregation }
    }

    pub fn similarity(&self) -> Similarity { self.similarity }

    pub fn aggregation(&self) -> Aggregation { self.aggregation }

    /// Score `doc` for `query`. Fails only when the two dimensionalities differ.
    /// An empty query or document scores 0.
    pub fn score(&self, query: MultiVectorView<'_>, doc: MultiVectorView<'_>) -> Result<f64> {
        if query.dim() != doc.dim() {
            return Err(Error::DimensionMismatch { expected: doc.dim(), actual: query.dim() });
        }
        if query.is_empty() || doc.is_empty() {
            return Ok(0.0);
        }

        let total = match self.similarity {
            Similarity::Dot => query.vectors().map(|q| max_dot(q, doc)).sum::<f64>(),
            Similarity::Cosine => {
                let doc_norms: Vec<f32> = doc.vectors().map(norm).collect();
                query.vectors().map(|q| max_cosine(q, norm(q), doc, &doc_norms)).sum::<f64>()
            }
        };

        Ok(match self.aggregation {
            Aggregation::Sum => total,
            Aggregation::Mean => total / query.len() as f64,
        })
    }
}

fn max_dot(q: &[f32], doc: MultiVectorView<'_>) -> f64 {
    doc.vectors().map(|d| f64::from(dot(q, d))).fold(f64::NEG_INFINITY, f64::max)
}

fn max_cosine(q: &[f32], q_norm: f32, doc: MultiVectorView<'_>, doc_norms: &[f32]) -> f64 {
    doc.vectors()
        .zip(doc_norms)
        .map(|(d, &d_norm)| {
            let denom = f64::from(q_norm) * f64::from(d_norm);
            // zero vectors match nothing
            if denom <= f64::from(f32::EPSILON) { 0.0 } else { f64::from(dot(q, d)) / denom }
        })
        .fold(f64::NEG_INFINITY, f64::max)
}

#[inline]
fn norm(v: &[f32]) -> f32 { dot(v, v).sqrt() }

/// Four-lane dot product; the compiler vectorizes the independent accumulators.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0f32; 4];
    let mut a4 = a.chunks_exact(4);
    let mut b4 = b.chunks_exact(4);
    for (x, y) in a4.by_ref().zip(b4.by_ref()) {
        acc[0] += x[0] * y[0];
        acc[1] += x[1] * y[1];
        acc[2] += x[2] * y[2];
        acc[3] += x[3] * y[3];
    }
    let tail: f32 = a4.remainder().iter().zip(b4.remainder()).map(|(x, y)| x * y).sum();
    (acc[0] + acc[1]) + (acc[2] + acc[3]) + tail
}
