//! vdr-search
//!
//! Late-interaction scoring, deterministic top-k selection, the batch search
//! coordinator, and the `RetrievalEngine` facade that ties them to a published
//! corpus index.
pub mod coordinator;
pub mod engine;
pub mod scorer;
pub mod topk;

pub use coordinator::BatchSearchCoordinator;
pub use engine::RetrievalEngine;
pub use scorer::Scorer;
pub use topk::{select, TopK};
