//! Domain types shared by the index, the scorer and the engine facade.

use std::cmp::Ordering;
use std::slice::ChunksExact;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An ordered set of `dim`-dimensional vectors describing one page image or
/// one query.
///
/// Vectors are packed row-major into a single buffer: vector `i` occupies
/// `data[i * dim..(i + 1) * dim]`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PackedVectors")]
pub struct MultiVector {
    dim: usize,
    data: Vec<f32>,
}

/// Unvalidated wire form; deserialization re-checks the packing invariant.
#[derive(Deserialize)]
struct PackedVectors {
    dim: usize,
    data: Vec<f32>,
}

impl TryFrom<PackedVectors> for MultiVector {
    type Error = Error;

    fn try_from(raw: PackedVectors) -> Result<Self> {
        Self::from_flat(raw.dim, raw.data)
    }
}

impl MultiVector {
    /// Wrap an already packed buffer. `data.len()` must be a multiple of `dim`.
    pub fn from_flat(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            return Err(Error::MalformedEmbedding("vector dimension must be non-zero".to_string()));
        }
        if data.len() % dim != 0 {
            return Err(Error::MalformedEmbedding(format!(
                "buffer of {} values is not a whole number of {}-dimensional vectors",
                data.len(),
                dim
            )));
        }
        Ok(Self { dim, data })
    }

    /// Pack individually owned rows, requiring every row to have length `dim`.
    pub fn from_rows(dim: usize, rows: &[Vec<f32>]) -> Result<Self> {
        if dim == 0 {
            return Err(Error::MalformedEmbedding("vector dimension must be non-zero".to_string()));
        }
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: row.len() });
            }
            data.extend_from_slice(row);
        }
        Ok(Self { dim, data })
    }

    #[inline]
    pub fn dim(&self) -> usize { self.dim }

    /// Number of vectors.
    #[inline]
    pub fn len(&self) -> usize { self.data.len() / self.dim }

    #[inline]
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    #[inline]
    pub fn as_slice(&self) -> &[f32] { &self.data }

    pub fn into_flat(self) -> Vec<f32> { self.data }

    #[inline]
    pub fn view(&self) -> MultiVectorView<'_> { MultiVectorView { dim: self.dim, data: &self.data } }

    pub fn vectors(&self) -> ChunksExact<'_, f32> { self.data.chunks_exact(self.dim) }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool { self.data.iter().all(|x| x.is_finite()) }

    /// Copy with every vector scaled to unit L2 norm (zero vectors stay zero).
    pub fn normalized(&self) -> Self {
        let mut data = self.data.clone();
        for row in data.chunks_exact_mut(self.dim) {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > f32::EPSILON {
                for x in row.iter_mut() { *x /= norm; }
            }
        }
        Self { dim: self.dim, data }
    }
}

/// Borrowed view over packed vectors, either an owned `MultiVector` or a
/// slice of the corpus arena.
#[derive(Debug, Clone, Copy)]
pub struct MultiVectorView<'a> {
    dim: usize,
    data: &'a [f32],
}

impl<'a> MultiVectorView<'a> {
    /// `data.len()` must be a multiple of `dim`; callers in the index guarantee it.
    pub fn new(dim: usize, data: &'a [f32]) -> Self {
        debug_assert!(dim > 0 && data.len() % dim == 0, "packed buffer/dimension mismatch");
        Self { dim, data }
    }

    #[inline]
    pub fn dim(&self) -> usize { self.dim }

    #[inline]
    pub fn len(&self) -> usize { self.data.len() / self.dim }

    #[inline]
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    #[inline]
    pub fn as_slice(&self) -> &'a [f32] { self.data }

    pub fn vectors(&self) -> ChunksExact<'a, f32> { self.data.chunks_exact(self.dim) }

    pub fn to_owned(&self) -> MultiVector { MultiVector { dim: self.dim, data: self.data.to_vec() } }
}

/// Raw page image handed to the embedding collaborator.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// Path relative to the corpus directory, `/`-separated.
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Score of one corpus document for one query. Transient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: usize,
    pub score: f64,
}

impl ScoredCandidate {
    /// Ranking order: higher score first, then lower id. `Less` means
    /// `self` ranks ahead of `other`.
    #[inline]
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other.score.total_cmp(&self.score).then_with(|| self.id.cmp(&other.id))
    }
}

/// One ranked hit within a query's result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedImage {
    /// 0-based position in the list.
    pub rank: usize,
    pub id: usize,
    pub filename: String,
    pub score: f64,
}

/// Ranked hits for one query: descending score, ties by ascending id.
pub type SearchResult = Vec<RankedImage>;
