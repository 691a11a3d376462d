//! Packed, immutable corpus index.
//!
//! All document vectors live in one contiguous arena; entry `id` owns the
//! float range `offsets[id]..offsets[id + 1]`. Ids are 0-based, contiguous, and
//! equal to the entry's position in the scan order.
use chrono::{DateTime, Utc};

use vdr_core::error::{Error, Result};
use vdr_core::types::{MultiVector, MultiVectorView};

/// Borrowed view of one corpus document.
#[derive(Debug, Clone, Copy)]
pub struct CorpusEntry<'a> {
    pub id: usize,
    pub filename: &'a str,
    pub embedding: MultiVectorView<'a>,
}

#[derive(Debug)]
pub struct CorpusIndex {
    dim: usize,
    filenames: Vec<String>,
    offsets: Vec<usize>,
    data: Vec<f32>,
    encoder_id: String,
    built_at: DateTime<Utc>,
}

impl CorpusIndex {
    pub fn len(&self) -> usize { self.filenames.len() }

    pub fn is_empty(&self) -> bool { self.filenames.is_empty() }

    pub fn dim(&self) -> usize { self.dim }

    pub fn encoder_id(&self) -> &str { &self.encoder_id }

    pub fn built_at(&self) -> DateTime<Utc> { self.built_at }

    /// Total number of document vectors across the corpus.
    pub fn total_vectors(&self) -> usize { self.data.len() / self.dim }

    pub fn filename(&self, id: usize) -> Option<&str> { self.filenames.get(id).map(String::as_str) }

    pub fn embedding(&self, id: usize) -> Option<MultiVectorView<'_>> {
        if id >= self.len() { return None; }
        Some(MultiVectorView::new(self.dim, &self.data[self.offsets[id]..self.offsets[id + 1]]))
    }

    pub fn entry(&self, id: usize) -> Option<CorpusEntry<'_>> {
        Some(CorpusEntry { id, filename: self.filename(id)?, embedding: self.embedding(id)? })
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = CorpusEntry<'_>> + '_ {
        (0..self.len()).map(move |id| CorpusEntry {
            id,
            filename: &self.filenames[id],
            embedding: MultiVectorView::new(self.dim, &self.data[self.offsets[id]..self.offsets[id + 1]]),
        })
    }
}

/// Accumulates entries in id order and validates each embedding on entry.
pub struct CorpusIndexBuilder {
    dim: usize,
    filenames: Vec<String>,
    offsets: Vec<usize>,
    data: Vec<f32>,
    encoder_id: String,
}

impl CorpusIndexBuilder {
    pub fn new(dim: usize, encoder_id: impl Into<String>) -> Self {
        Self { dim, filenames: Vec::new(), offsets: vec![0], data: Vec::new(), encoder_id: encoder_id.into() }
    }

    pub fn with_capacity(mut self, entries: usize) -> Self {
        self.filenames.reserve(entries);
        self.offsets.reserve(entries);
        self
    }

    /// Append the next entry; its id is the number of entries pushed before it.
    pub fn push(&mut self, filename: &str, embedding: &MultiVector) -> Result<usize> {
        if embedding.dim() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: embedding.dim() });
        }
        if embedding.is_empty() {
            return Err(Error::IndexBuild(format!("embedding for {} has no vectors", filename)));
        }
        if !embedding.is_finite() {
            return Err(Error::IndexBuild(format!("embedding for {} contains non-finite values", filename)));
        }
        let id = self.filenames.len();
        self.data.extend_from_slice(embedding.as_slice());
        self.offsets.push(self.data.len());
        self.filenames.push(filename.to_string());
        Ok(id)
    }

    pub fn finish(self) -> Result<CorpusIndex> {
        if self.filenames.is_empty() {
            return Err(Error::IndexBuild("index has no entries".to_string()));
        }
        Ok(CorpusIndex {
            dim: self.dim,
            filenames: self.filenames,
            offsets: self.offsets,
            data: self.data,
            encoder_id: self.encoder_id,
            built_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(rows: &[&[f32]]) -> MultiVector {
        MultiVector::from_rows(2, &rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn entries_slice_the_arena_in_id_order() {
        let mut b = CorpusIndexBuilder::new(2, "test");
        assert_eq!(b.push("a.jpg", &mv(&[&[1.0, 0.0]])).unwrap(), 0);
        assert_eq!(b.push("b.jpg", &mv(&[&[0.0, 1.0], &[0.5, 0.5]])).unwrap(), 1);
        let index = b.finish().unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.total_vectors(), 3);
        let e = index.entry(1).unwrap();
        assert_eq!(e.filename, "b.jpg");
        assert_eq!(e.embedding.len(), 2);
        assert_eq!(e.embedding.as_slice(), &[0.0, 1.0, 0.5, 0.5]);
        let ids: Vec<usize> = index.entries().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!(index.entry(2).is_none());
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let mut b = CorpusIndexBuilder::new(3, "test");
        let err = b.push("a.jpg", &mv(&[&[1.0, 0.0]])).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn empty_and_non_finite_embeddings_are_rejected() {
        let mut b = CorpusIndexBuilder::new(2, "test");
        let empty = MultiVector::from_flat(2, Vec::new()).unwrap();
        assert!(matches!(b.push("a.jpg", &empty), Err(Error::IndexBuild(_))));
        let inf = MultiVector::from_flat(2, vec![f32::INFINITY, 0.0]).unwrap();
        assert!(matches!(b.push("b.jpg", &inf), Err(Error::IndexBuild(_))));
    }

    #[test]
    fn empty_builder_does_not_finish() {
        assert!(CorpusIndexBuilder::new(2, "test").finish().is_err());
    }
}
