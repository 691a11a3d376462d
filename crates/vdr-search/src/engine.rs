//! `RetrievalEngine`: the process-wide retrieval state.
//!
//! Constructed once at startup from validated `Settings` and an encoder. Owns
//! the published index handle, the optional embedding cache, the scoring pool
//! and the rebuild lock. Searches read whatever snapshot is current when they
//! start; rebuilds are serialized and only publish complete indexes.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use vdr_core::config::{expand_path, Settings};
use vdr_core::corpus::CorpusScanner;
use vdr_core::error::{Error, Result};
use vdr_core::traits::MultiVectorEncoder;
use vdr_core::types::SearchResult;
use vdr_index::{CorpusIndex, EmbeddingCache, IndexBuilder, IndexHandle, IndexStats};

use crate::coordinator::BatchSearchCoordinator;
use crate::scorer::Scorer;

pub struct RetrievalEngine {
    settings: Settings,
    encoder: Arc<dyn MultiVectorEncoder>,
    handle: IndexHandle,
    cache: Option<EmbeddingCache>,
    coordinator: BatchSearchCoordinator,
    rebuild_lock: Mutex<()>,
}

impl RetrievalEngine {
    pub fn new(settings: Settings, encoder: Arc<dyn MultiVectorEncoder>) -> Result<Self> {
        settings.validate()?;
        if encoder.dim() != settings.index.dim {
            return Err(Error::DimensionMismatch { expected: settings.index.dim, actual: encoder.dim() });
        }

        let cache = match settings.index.cache_dir.as_deref() {
            Some(dir) => Some(
                EmbeddingCache::open(expand_path(dir))
                    .map_err(|e| Error::InvalidConfig(format!("index.cache_dir: {:#}", e)))?,
            ),
            None => None,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.search.threads.unwrap_or(0))
            .thread_name(|i| format!("vdr-score-{}", i))
            .build()
            .map_err(|e| Error::Internal(format!("cannot start scoring pool: {}", e)))?;
        tracing::info!(
            threads = pool.current_num_threads(),
            encoder = encoder.encoder_id(),
            dim = settings.index.dim,
            cache = cache.is_some(),
            "retrieval engine ready"
        );

        let coordinator = BatchSearchCoordinator::new(
            encoder.clone(),
            Scorer::new(settings.scoring),
            Arc::new(pool),
            settings.search.chunk_size,
        );
        Ok(Self { settings, encoder, handle: IndexHandle::new(), cache, coordinator, rebuild_lock: Mutex::new(()) })
    }

    /// Build an index over `dir` and publish it. On failure the previously
    /// published index, if any, keeps serving.
    pub async fn rebuild(&self, dir: &Path) -> Result<IndexStats> {
        let _serialized = self.rebuild_lock.lock().await;
        let mut builder = IndexBuilder::new(
            self.encoder.clone(),
            CorpusScanner::new(&self.settings.corpus),
            self.settings.index.clone(),
        );
        if let Some(cache) = &self.cache {
            builder = builder.with_cache(cache.clone());
        }
        match builder.build(dir).await {
            Ok((index, stats)) => {
                let generation = self.handle.publish(index);
                tracing::info!(generation, entries = stats.entries, dir = %dir.display(), "published corpus index");
                Ok(stats)
            }
            Err(e) => {
                tracing::warn!(error = %e, dir = %dir.display(), serving = self.handle.is_ready(), "index rebuild failed");
                Err(e)
            }
        }
    }

    /// One ranked list per query, in input order.
    pub async fn search(&self, queries: &[String], k: usize) -> Result<Vec<SearchResult>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.handle.load().ok_or(Error::NotReady)?;
        let search = self.coordinator.search(index, queries, k);
        match self.settings.search.timeout_ms {
            Some(ms) => {
                let limit = Duration::from_millis(ms);
                // dropping the timed-out future raises its cancel flag
                tokio::time::timeout(limit, search).await.map_err(|_| Error::Timeout(limit))?
            }
            None => search.await,
        }
    }

    pub async fn search_default(&self, queries: &[String]) -> Result<Vec<SearchResult>> {
        self.search(queries, self.settings.search.top_k).await
    }

    pub fn is_ready(&self) -> bool { self.handle.is_ready() }

    pub fn snapshot(&self) -> Option<Arc<CorpusIndex>> { self.handle.load() }

    /// Number of indexes published so far.
    pub fn generation(&self) -> u64 { self.handle.generation() }

    pub fn settings(&self) -> &Settings { &self.settings }
}
