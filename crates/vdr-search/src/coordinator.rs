//! Batch search: one encoder call for the whole query batch, then parallel
//! scoring on a dedicated compute pool.
//!
//! Parallelism runs across queries and, within a query, across fixed-size
//! chunks of the corpus. Every chunk keeps a local top-k that is merged at the
//! end; results come back in input order because the query-level collect is
//! indexed. A shared cancel flag is checked before each chunk so an abandoned
//! call releases its workers promptly.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;

use vdr_core::error::{Error, Result};
use vdr_core::traits::MultiVectorEncoder;
use vdr_core::types::{MultiVector, RankedImage, ScoredCandidate, SearchResult};
use vdr_index::CorpusIndex;

use crate::scorer::Scorer;
use crate::topk::TopK;

pub struct BatchSearchCoordinator {
    encoder: Arc<dyn MultiVectorEncoder>,
    scorer: Scorer,
    pool: Arc<ThreadPool>,
    chunk_size: usize,
}

/// Raises the cancel flag when the owning future is dropped mid-flight.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) { self.0.store(true, Ordering::Release); }
}

impl BatchSearchCoordinator {
    pub fn new(encoder: Arc<dyn MultiVectorEncoder>, scorer: Scorer, pool: Arc<ThreadPool>, chunk_size: usize) -> Self {
        Self { encoder, scorer, pool, chunk_size: chunk_size.max(1) }
    }

    pub async fn search(&self, index: Arc<CorpusIndex>, queries: &[String], k: usize) -> Result<Vec<SearchResult>> {
        self.search_with_cancel(index, queries, k, Arc::new(AtomicBool::new(false))).await
    }

    /// Like [`search`](Self::search), but stops with `Cancelled` once `cancel`
    /// is raised. Dropping the returned future raises it as well.
    pub async fn search_with_cancel(
        &self,
        index: Arc<CorpusIndex>,
        queries: &[String],
        k: usize,
        cancel: Arc<AtomicBool>,
    ) -> Result<Vec<SearchResult>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = CancelOnDrop(cancel.clone());
        let started = Instant::now();

        let encoded = self.encode(queries, index.dim()).await?;
        let encode_ms = started.elapsed().as_millis() as u64;

        let (pool, scorer, chunk_size) = (self.pool.clone(), self.scorer, self.chunk_size);
        let scoring_index = index.clone();
        let ranked = tokio::task::spawn_blocking(move || {
            pool.install(|| {
                encoded
                    .par_iter()
                    .map(|q| rank_query(&scorer, &scoring_index, q, k, chunk_size, &cancel))
                    .collect::<Result<Vec<Vec<ScoredCandidate>>>>()
            })
        })
        .await
        .map_err(|e| Error::Internal(format!("scoring task failed: {}", e)))??;

        let results = ranked
            .into_iter()
            .map(|top| to_search_result(&index, top))
            .collect::<Result<Vec<SearchResult>>>()?;
        tracing::debug!(
            queries = queries.len(),
            corpus = index.len(),
            k,
            encode_ms,
            total_ms = started.elapsed().as_millis() as u64,
            "batch search complete"
        );
        Ok(results)
    }

    async fn encode(&self, queries: &[String], dim: usize) -> Result<Vec<MultiVector>> {
        let encoded = self
            .encoder
            .encode_queries(queries)
            .await
            .map_err(|e| Error::QueryEncoding(format!("{:#}", e)))?;
        if encoded.len() != queries.len() {
            return Err(Error::QueryEncoding(format!(
                "encoder returned {} embeddings for {} queries",
                encoded.len(),
                queries.len()
            )));
        }
        for (i, q) in encoded.iter().enumerate() {
            if q.is_empty() {
                return Err(Error::QueryEncoding(format!("query {} encoded to no vectors", i)));
            }
            if q.dim() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: q.dim() });
            }
            if !q.is_finite() {
                return Err(Error::QueryEncoding(format!("query {} has non-finite components", i)));
            }
        }
        Ok(encoded)
    }
}

fn rank_query(
    scorer: &Scorer,
    index: &CorpusIndex,
    query: &MultiVector,
    k: usize,
    chunk_size: usize,
    cancel: &AtomicBool,
) -> Result<Vec<ScoredCandidate>> {
    let n = index.len();
    let chunks = n.div_ceil(chunk_size);
    let partials = (0..chunks)
        .into_par_iter()
        .map(|c| {
            if cancel.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }
            let mut top = TopK::new(k);
            for id in c * chunk_size..((c + 1) * chunk_size).min(n) {
                let doc = index.embedding(id).ok_or_else(|| Error::Internal(format!("missing corpus entry {}", id)))?;
                top.push(ScoredCandidate { id, score: scorer.score(query.view(), doc)? });
            }
            Ok(top)
        })
        .collect::<Result<Vec<TopK>>>()?;
    Ok(partials.into_iter().fold(TopK::new(k), TopK::merge).into_sorted_vec())
}

fn to_search_result(index: &CorpusIndex, top: Vec<ScoredCandidate>) -> Result<SearchResult> {
    top.into_iter()
        .enumerate()
        .map(|(rank, c)| {
            let filename = index.filename(c.id).ok_or_else(|| Error::Internal(format!("missing corpus entry {}", c.id)))?;
            Ok(RankedImage { rank, id: c.id, filename: filename.to_string(), score: c.score })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vdr_embed::HashEncoder;
    use vdr_index::CorpusIndexBuilder;

    const DIM: usize = 8;

    fn pool() -> Arc<ThreadPool> {
        Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap())
    }

    fn corpus(encoder: &HashEncoder, pages: &[&str]) -> Arc<CorpusIndex> {
        let mut b = CorpusIndexBuilder::new(DIM, "hash");
        for (i, text) in pages.iter().enumerate() {
            b.push(&format!("{:03}.jpg", i), &encoder.encode_text(text).unwrap()).unwrap();
        }
        Arc::new(b.finish().unwrap())
    }

    #[tokio::test]
    async fn chunking_does_not_change_results() {
        let encoder = HashEncoder::new(DIM, 8);
        let pages: Vec<String> = (0..40).map(|i| format!("page {} about topic {}", i, i % 7)).collect();
        let refs: Vec<&str> = pages.iter().map(String::as_str).collect();
        let index = corpus(&encoder, &refs);
        let queries = vec!["topic 3".to_string(), "page 12".to_string()];

        let one = BatchSearchCoordinator::new(Arc::new(HashEncoder::new(DIM, 8)), Scorer::default(), pool(), 1);
        let big = BatchSearchCoordinator::new(Arc::new(HashEncoder::new(DIM, 8)), Scorer::default(), pool(), 1000);
        let a = one.search(index.clone(), &queries, 5).await.unwrap();
        let b = big.search(index, &queries, 5).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|r| r.len() == 5));
    }

    #[tokio::test]
    async fn raised_flag_cancels_scoring() {
        let encoder = HashEncoder::new(DIM, 8);
        let index = corpus(&encoder, &["alpha", "beta"]);
        let coordinator = BatchSearchCoordinator::new(Arc::new(encoder), Scorer::default(), pool(), 1);
        let cancel = Arc::new(AtomicBool::new(true));
        let err = coordinator.search_with_cancel(index, &["alpha".to_string()], 1, cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn abandoned_search_frees_the_pool() {
        let single = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap());
        let wide = HashEncoder::new(DIM, 32);
        let page = |i: usize| (0..32).map(|t| format!("w{}x{}", i % 97, t)).collect::<Vec<_>>().join(" ");
        let mut b = CorpusIndexBuilder::new(DIM, "hash");
        for i in 0..4000 {
            b.push(&format!("{:04}.jpg", i), &wide.encode_text(&page(i)).unwrap()).unwrap();
        }
        let heavy = Arc::new(b.finish().unwrap());
        let queries: Vec<String> = (0..512).map(page).collect();
        let coordinator = BatchSearchCoordinator::new(Arc::new(wide), Scorer::default(), single, 1);

        let cancel = Arc::new(AtomicBool::new(false));
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            coordinator.search_with_cancel(heavy, &queries, 5, cancel.clone()),
        )
        .await;
        assert!(abandoned.is_err(), "heavy batch finished inside the limit");
        assert!(cancel.load(Ordering::Acquire));

        // the only pool thread must come back long before the heavy batch could finish
        let small = corpus(&HashEncoder::new(DIM, 32), &["alpha", "beta"]);
        let next = tokio::time::timeout(Duration::from_secs(2), coordinator.search(small, &["alpha".to_string()], 1))
            .await
            .expect("pool still busy with the abandoned batch")
            .unwrap();
        assert_eq!(next[0][0].filename, "000.jpg");
    }

    #[tokio::test]
    async fn empty_batch_skips_the_encoder() {
        let encoder = HashEncoder::new(DIM, 8);
        let index = corpus(&encoder, &["alpha"]);
        let coordinator = BatchSearchCoordinator::new(Arc::new(encoder), Scorer::default(), pool(), 4);
        assert!(coordinator.search(index, &[], 3).await.unwrap().is_empty());
    }
}
