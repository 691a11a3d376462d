//! vdr-index
//!
//! Corpus index construction and publication: the packed `CorpusIndex`, the
//! all-or-nothing build pipeline, the on-disk embedding cache, and the
//! atomically swapped `IndexHandle`.
pub mod cache;
pub mod index;
pub mod index_build;
pub mod snapshot;

pub use cache::EmbeddingCache;
pub use index::{CorpusEntry, CorpusIndex, CorpusIndexBuilder};
pub use index_build::{IndexBuilder, IndexStats};
pub use snapshot::IndexHandle;
