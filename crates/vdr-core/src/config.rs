//! Lightweight configuration loader, typed engine settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_SEARCH__TOP_K=5`). Provides helpers
//! to expand `~` and `${VAR}` and to resolve relative paths against a known
//! base directory.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::corpus::DEFAULT_IMAGE_EXTENSIONS;
use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    /// Wrap an explicitly assembled figment (tests, embedding applications).
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the typed engine settings; absent keys take defaults.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read engine settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub corpus: CorpusSettings,
    pub index: IndexSettings,
    pub scoring: ScoringSettings,
    pub search: SearchSettings,
    pub encoder: EncoderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    pub dir: String,
    pub extensions: Vec<String>,
    pub recursive: bool,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            dir: "./search_engine/corpus/img".to_string(),
            extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            recursive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Images per `encode_images` call.
    pub batch_size: usize,
    /// Expected per-vector dimensionality of every embedding.
    pub dim: usize,
    /// Enables the on-disk embedding cache when set.
    pub cache_dir: Option<String>,
    pub show_progress: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { batch_size: 8, dim: 128, cache_dir: None, show_progress: false }
    }
}

/// Per-vector similarity used inside late-interaction scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    #[default]
    Dot,
    Cosine,
}

/// How per-query-vector maxima are combined into one document score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub similarity: Similarity,
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub top_k: usize,
    pub timeout_ms: Option<u64>,
    /// Size of the dedicated scoring pool; defaults to the number of CPUs.
    pub threads: Option<usize>,
    /// Corpus documents scored per parallel task.
    pub chunk_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { top_k: 10, timeout_ms: None, threads: None, chunk_size: 256 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    #[default]
    Hash,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub backend: EncoderBackend,
    pub url: Option<String>,
    pub timeout_ms: u64,
    /// Upper bound on vectors per input for the hashing encoder.
    pub max_vectors: usize,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self { backend: EncoderBackend::Hash, url: None, timeout_ms: 60_000, max_vectors: 32 }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.index.dim == 0 { return Err(Error::InvalidConfig("index.dim must be > 0".to_string())); }
        if self.index.batch_size == 0 { return Err(Error::InvalidConfig("index.batch_size must be > 0".to_string())); }
        if self.search.top_k == 0 { return Err(Error::InvalidConfig("search.top_k must be > 0".to_string())); }
        if self.search.chunk_size == 0 { return Err(Error::InvalidConfig("search.chunk_size must be > 0".to_string())); }
        if self.search.threads == Some(0) { return Err(Error::InvalidConfig("search.threads must be > 0 when set".to_string())); }
        if self.encoder.max_vectors == 0 { return Err(Error::InvalidConfig("encoder.max_vectors must be > 0".to_string())); }
        if self.encoder.backend == EncoderBackend::Remote && self.encoder.url.as_deref().map_or(true, str::is_empty) {
            return Err(Error::InvalidConfig("encoder.url is required for the remote backend".to_string()));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
