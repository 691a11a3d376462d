//! Directory-backed embedding cache keyed by `(encoder_id, filename, content_hash)`.
//!
//! The cache is consulted before calling the encoder and written through on
//! misses, so restarts over an unchanged corpus skip re-encoding. A renamed or
//! edited file hashes to a new key and is simply a miss.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use vdr_core::types::MultiVector;

/// blake3 hex digest of raw file content.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub filename: String,
    pub content_hash: String,
}

impl CacheKey {
    fn digest(&self, encoder_id: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(encoder_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.filename.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.content_hash.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub filename: String,
    pub content_hash: String,
    pub encoder_id: String,
    pub created_at: DateTime<Utc>,
    pub embedding: MultiVector,
}

impl CacheEntry {
    pub fn key(&self) -> CacheKey {
        CacheKey { filename: self.filename.clone(), content_hash: self.content_hash.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    root: PathBuf,
}

impl EmbeddingCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("cannot create cache dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn encoder_dir(&self, encoder_id: &str) -> PathBuf {
        let slug: String = encoder_id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' }).collect();
        // the slug alone is lossy; the digest keeps distinct ids apart
        let digest = blake3::hash(encoder_id.as_bytes()).to_hex();
        self.root.join(format!("{}-{}", slug, &digest.as_str()[..12]))
    }

    fn entry_path(&self, encoder_id: &str, key: &CacheKey) -> PathBuf {
        self.encoder_dir(encoder_id).join(format!("{}.json", key.digest(encoder_id)))
    }

    /// Look up many keys; returns only valid hits of dimension `dim`.
    /// Unreadable or mismatched entries count as misses.
    pub fn get_many(&self, encoder_id: &str, dim: usize, keys: &[CacheKey]) -> HashMap<CacheKey, MultiVector> {
        let mut out = HashMap::new();
        for key in keys {
            let path = self.entry_path(encoder_id, key);
            if !path.exists() { continue; }
            match read_entry(&path) {
                Ok(entry) if entry.encoder_id == encoder_id && entry.key() == *key && entry.embedding.dim() == dim => {
                    out.insert(key.clone(), entry.embedding);
                }
                Ok(_) => tracing::warn!(path = %path.display(), "cache entry does not match its key; ignoring"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable cache entry; ignoring"),
            }
        }
        out
    }

    /// Write entries atomically (temp file + rename), replacing existing ones.
    pub fn put_many(&self, entries: &[CacheEntry]) -> Result<()> {
        for entry in entries {
            let dir = self.encoder_dir(&entry.encoder_id);
            fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            {
                let mut writer = BufWriter::new(tmp.as_file_mut());
                serde_json::to_writer(&mut writer, entry)?;
                writer.flush()?;
            }
            tmp.persist(self.entry_path(&entry.encoder_id, &entry.key()))
                .map_err(|e| anyhow::anyhow!("cannot persist cache entry for {}: {}", entry.filename, e.error))?;
        }
        Ok(())
    }

    /// Delete entries for `encoder_id` whose key is not in `live`. Returns the
    /// number of files removed.
    pub fn prune(&self, encoder_id: &str, live: &HashSet<CacheKey>) -> Result<usize> {
        let dir = self.encoder_dir(encoder_id);
        if !dir.exists() { return Ok(0); }
        let keep: HashSet<String> = live.iter().map(|k| format!("{}.json", k.digest(encoder_id))).collect();
        let mut removed = 0usize;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") && !keep.contains(&name) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn read_entry(path: &Path) -> Result<CacheEntry> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(filename: &str, bytes: &[u8], values: Vec<f32>) -> CacheEntry {
        CacheEntry {
            filename: filename.to_string(),
            content_hash: content_hash(bytes),
            encoder_id: "hash:xxh64:d2".to_string(),
            created_at: Utc::now(),
            embedding: MultiVector::from_flat(2, values).unwrap(),
        }
    }

    #[test]
    fn put_then_get_round_trips_hits_only() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(tmp.path()).unwrap();
        let e = entry("a.jpg", b"aaa", vec![1.0, 0.0, 0.0, 1.0]);
        cache.put_many(&[e.clone()]).unwrap();

        let miss = CacheKey { filename: "a.jpg".to_string(), content_hash: content_hash(b"changed") };
        let hits = cache.get_many("hash:xxh64:d2", 2, &[e.key(), miss.clone()]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[&e.key()], e.embedding);
        assert!(!hits.contains_key(&miss));
    }

    #[test]
    fn other_encoder_or_dimension_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(tmp.path()).unwrap();
        let e = entry("a.jpg", b"aaa", vec![1.0, 0.0]);
        cache.put_many(&[e.clone()]).unwrap();
        assert!(cache.get_many("remote:x:d2", 2, &[e.key()]).is_empty());
        assert!(cache.get_many("hash:xxh64:d2", 3, &[e.key()]).is_empty());
    }

    #[test]
    fn corrupt_entry_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(tmp.path()).unwrap();
        let e = entry("a.jpg", b"aaa", vec![1.0, 0.0]);
        cache.put_many(&[e.clone()]).unwrap();
        fs::write(cache.entry_path(&e.encoder_id, &e.key()), b"{ not json").unwrap();
        assert!(cache.get_many(&e.encoder_id, 2, &[e.key()]).is_empty());
    }

    #[test]
    fn prune_removes_dead_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(tmp.path()).unwrap();
        let a = entry("a.jpg", b"aaa", vec![1.0, 0.0]);
        let b = entry("b.jpg", b"bbb", vec![0.0, 1.0]);
        cache.put_many(&[a.clone(), b.clone()]).unwrap();

        let live: HashSet<CacheKey> = [a.key()].into_iter().collect();
        assert_eq!(cache.prune(&a.encoder_id, &live).unwrap(), 1);
        assert_eq!(cache.get_many(&a.encoder_id, 2, &[a.key(), b.key()]).len(), 1);
    }

    #[test]
    fn similar_encoder_ids_keep_separate_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(tmp.path()).unwrap();
        let mut dotted = entry("a.jpg", b"aaa", vec![1.0, 0.0]);
        dotted.encoder_id = "remote:http://a.b:d2".to_string();
        let mut underscored = dotted.clone();
        underscored.encoder_id = "remote:http://a_b:d2".to_string();
        cache.put_many(&[dotted.clone(), underscored.clone()]).unwrap();
        assert_ne!(cache.encoder_dir(&dotted.encoder_id), cache.encoder_dir(&underscored.encoder_id));

        // pruning one encoder leaves the other's entries alone
        cache.prune(&dotted.encoder_id, &HashSet::new()).unwrap();
        assert!(cache.get_many(&dotted.encoder_id, 2, &[dotted.key()]).is_empty());
        assert_eq!(cache.get_many(&underscored.encoder_id, 2, &[underscored.key()]).len(), 1);
    }
}
