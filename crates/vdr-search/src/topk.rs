//! Bounded top-k selection with a deterministic order: score descending, then
//! id ascending.
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use vdr_core::types::ScoredCandidate;

/// Heap entry ordered so that the heap's maximum is the worst-ranked
/// candidate; popping it keeps the best `k`.
#[derive(Debug, Clone, Copy)]
struct Ranked(ScoredCandidate);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering { self.0.rank_cmp(&other.0) }
}

/// Running top-k over a stream of candidates. O(log k) per push.
#[derive(Debug, Clone)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Ranked>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self { k, heap: BinaryHeap::with_capacity(k.saturating_add(1).min(1024)) }
    }

    pub fn len(&self) -> usize { self.heap.len() }

    pub fn is_empty(&self) -> bool { self.heap.is_empty() }

    pub fn push(&mut self, candidate: ScoredCandidate) {
        if self.k == 0 { return; }
        if self.heap.len() == self.k {
            match self.heap.peek() {
                // ranks behind the current worst: cannot enter
                Some(worst) if candidate.rank_cmp(&worst.0) != Ordering::Less => return,
                _ => {}
            }
        }
        self.heap.push(Ranked(candidate));
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    /// Fold another partial result into this one.
    pub fn merge(mut self, other: TopK) -> TopK {
        for r in other.heap {
            self.push(r.0);
        }
        self
    }

    /// Best first.
    pub fn into_sorted_vec(self) -> Vec<ScoredCandidate> {
        self.heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
    }
}

/// Up to `k` candidates from `scores`, best first, ties by ascending id.
pub fn select<I>(scores: I, k: usize) -> Vec<ScoredCandidate>
where
    I: IntoIterator<Item = ScoredCandidate>,
{
    let mut top = TopK::new(k);
    for c in scores {
        top.push(c);
    }
    top.into_sorted_vec()
}
