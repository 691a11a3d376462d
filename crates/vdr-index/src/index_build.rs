//! All-or-nothing corpus index build.
//!
//! Typical flow:
//! 1) Scan the corpus directory in lexicographic filename order (ids follow it)
//! 2) Per batch: read bytes, consult the cache, encode misses in one call
//! 3) Validate and append every embedding to the packed arena
//! 4) Write new cache entries through and prune entries for vanished files
//!
//! Any failure aborts the build; nothing is published from a partial run.
use futures::future::try_join_all;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vdr_core::config::IndexSettings;
use vdr_core::corpus::{CorpusFile, CorpusScanner};
use vdr_core::error::{Error, Result};
use vdr_core::traits::MultiVectorEncoder;
use vdr_core::types::{ImageInput, MultiVector};

use crate::cache::{content_hash, CacheEntry, CacheKey, EmbeddingCache};
use crate::index::{CorpusIndex, CorpusIndexBuilder};

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub total_vectors: usize,
    pub dim: usize,
    pub cache_hits: usize,
    pub encoded: usize,
    pub elapsed: Duration,
}

pub struct IndexBuilder {
    encoder: Arc<dyn MultiVectorEncoder>,
    scanner: CorpusScanner,
    settings: IndexSettings,
    cache: Option<EmbeddingCache>,
}

impl IndexBuilder {
    pub fn new(encoder: Arc<dyn MultiVectorEncoder>, scanner: CorpusScanner, settings: IndexSettings) -> Self {
        Self { encoder, scanner, settings, cache: None }
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn build(&self, dir: &Path) -> Result<(CorpusIndex, IndexStats)> {
        let started = Instant::now();
        let dim = self.settings.dim;
        if self.encoder.dim() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: self.encoder.dim() });
        }
        let (scanner, root) = (self.scanner.clone(), dir.to_path_buf());
        let files = tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .map_err(|e| Error::Internal(format!("corpus scan task failed: {}", e)))??;
        let encoder_id = self.encoder.encoder_id().to_string();
        tracing::info!(dir = %dir.display(), files = files.len(), encoder = %encoder_id, "building corpus index");

        let pb = self.progress_bar(files.len());
        let mut builder = CorpusIndexBuilder::new(dim, encoder_id.clone()).with_capacity(files.len());
        let mut live_keys = HashSet::with_capacity(files.len());
        let (mut cache_hits, mut encoded) = (0usize, 0usize);

        for batch in files.chunks(self.settings.batch_size.max(1)) {
            let bytes = read_batch(batch).await?;
            let keys: Vec<CacheKey> = batch
                .iter()
                .zip(&bytes)
                .map(|(f, b)| CacheKey { filename: f.filename.clone(), content_hash: content_hash(b) })
                .collect();
            let mut hits = self.cache_lookup(&encoder_id, &keys).await;

            let mut misses = Vec::new();
            for ((file, key), data) in batch.iter().zip(&keys).zip(bytes) {
                if !hits.contains_key(key) {
                    misses.push(ImageInput { filename: file.filename.clone(), bytes: data });
                }
            }
            let fresh = self.encode_misses(&misses).await?;
            cache_hits += batch.len() - misses.len();
            encoded += misses.len();

            let mut fresh_iter = fresh.into_iter();
            let mut new_entries = Vec::new();
            for key in &keys {
                let embedding = match hits.remove(key) {
                    Some(hit) => hit,
                    None => {
                        let embedding = fresh_iter
                            .next()
                            .ok_or_else(|| Error::IndexBuild("encoder returned fewer embeddings than images".to_string()))?;
                        if embedding.dim() == dim && !embedding.is_empty() && embedding.is_finite() {
                            new_entries.push(CacheEntry {
                                filename: key.filename.clone(),
                                content_hash: key.content_hash.clone(),
                                encoder_id: encoder_id.clone(),
                                created_at: chrono::Utc::now(),
                                embedding: embedding.clone(),
                            });
                        }
                        embedding
                    }
                };
                builder.push(&key.filename, &embedding)?;
                live_keys.insert(key.clone());
            }
            self.cache_store(new_entries).await;
            pb.inc(batch.len() as u64);
            tracing::debug!(batch = batch.len(), encoded = misses.len(), "indexed batch");
        }

        let index = builder.finish()?;
        pb.finish_with_message("index built");
        self.cache_prune(&encoder_id, live_keys).await;

        let stats = IndexStats {
            entries: index.len(),
            total_vectors: index.total_vectors(),
            dim,
            cache_hits,
            encoded,
            elapsed: started.elapsed(),
        };
        tracing::info!(entries = stats.entries, vectors = stats.total_vectors, cache_hits, encoded, elapsed_ms = stats.elapsed.as_millis() as u64, "corpus index built");
        Ok((index, stats))
    }

    async fn encode_misses(&self, misses: &[ImageInput]) -> Result<Vec<MultiVector>> {
        if misses.is_empty() { return Ok(Vec::new()); }
        let out = self.encoder.encode_images(misses).await.map_err(|e| {
            Error::IndexBuild(format!("encoder failed on batch starting at {}: {:#}", misses[0].filename, e))
        })?;
        if out.len() != misses.len() {
            return Err(Error::IndexBuild(format!("encoder returned {} embeddings for {} images", out.len(), misses.len())));
        }
        Ok(out)
    }

    async fn cache_lookup(&self, encoder_id: &str, keys: &[CacheKey]) -> HashMap<CacheKey, MultiVector> {
        let Some(cache) = self.cache.clone() else { return HashMap::new() };
        let (encoder_id, keys, dim) = (encoder_id.to_string(), keys.to_vec(), self.settings.dim);
        match tokio::task::spawn_blocking(move || cache.get_many(&encoder_id, dim, &keys)).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "cache lookup task failed; encoding batch");
                HashMap::new()
            }
        }
    }

    async fn cache_store(&self, entries: Vec<CacheEntry>) {
        let Some(cache) = self.cache.clone() else { return };
        if entries.is_empty() { return; }
        match tokio::task::spawn_blocking(move || cache.put_many(&entries)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to write embedding cache"),
            Err(e) => tracing::warn!(error = %e, "cache write task failed"),
        }
    }

    async fn cache_prune(&self, encoder_id: &str, live: HashSet<CacheKey>) {
        let Some(cache) = self.cache.clone() else { return };
        let encoder_id = encoder_id.to_string();
        match tokio::task::spawn_blocking(move || cache.prune(&encoder_id, &live)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(removed)) => tracing::debug!(removed, "pruned stale cache entries"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to prune embedding cache"),
            Err(e) => tracing::warn!(error = %e, "cache prune task failed"),
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.settings.show_progress { return ProgressBar::hidden(); }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images ({percent}%) {msg}") {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

async fn read_batch(batch: &[CorpusFile]) -> Result<Vec<Vec<u8>>> {
    try_join_all(batch.iter().map(|f| async move {
        tokio::fs::read(&f.path).await.map_err(|e| Error::IndexBuild(format!("cannot read {}: {}", f.filename, e)))
    }))
    .await
}
