//! Shared startup for the command-line tools: logging, settings, engine.
use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use vdr_core::config::{resolve_with_base, Config, Settings};
use vdr_core::types::SearchResult;
use vdr_search::RetrievalEngine;

/// Logs go to stderr so stdout stays machine-readable. `RUST_LOG` overrides
/// the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

pub fn load_settings() -> anyhow::Result<Settings> {
    Config::load()?.settings()
}

/// `--corpus` if given, else `corpus.dir` resolved against the working directory.
pub fn corpus_dir(arg: Option<PathBuf>, settings: &Settings) -> anyhow::Result<PathBuf> {
    if let Some(dir) = arg { return Ok(dir); }
    let cwd = std::env::current_dir().context("cannot read working directory")?;
    Ok(resolve_with_base(&cwd, &settings.corpus.dir))
}

pub fn build_engine(settings: Settings) -> anyhow::Result<RetrievalEngine> {
    let encoder = vdr_embed::default_encoder(&settings.encoder, settings.index.dim)?;
    Ok(RetrievalEngine::new(settings, encoder)?)
}

/// One hit in the external response shape.
#[derive(Debug, Serialize)]
pub struct ImageHit {
    pub idx: usize,
    pub image_file: String,
    pub score: f64,
}

/// Map ranked results to `[[{idx, image_file, score}]]`, with `image_file`
/// prefixed by the corpus directory.
pub fn to_response(corpus: &str, results: Vec<SearchResult>) -> Vec<Vec<ImageHit>> {
    let prefix = corpus.trim_end_matches('/');
    results
        .into_iter()
        .map(|list| {
            list.into_iter()
                .map(|hit| ImageHit { idx: hit.rank, image_file: format!("{}/{}", prefix, hit.filename), score: hit.score })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdr_core::types::RankedImage;

    #[test]
    fn response_prefixes_corpus_dir_and_keeps_rank() {
        let results = vec![vec![
            RankedImage { rank: 0, id: 3, filename: "a.jpg".to_string(), score: 0.9 },
            RankedImage { rank: 1, id: 1, filename: "sub/b.jpg".to_string(), score: 0.3 },
        ]];
        let json = serde_json::to_value(to_response("./corpus/img/", results)).unwrap();
        assert_eq!(json[0][0]["idx"], 0);
        assert_eq!(json[0][0]["image_file"], "./corpus/img/a.jpg");
        assert_eq!(json[0][1]["image_file"], "./corpus/img/sub/b.jpg");
        assert_eq!(json[0][1]["score"], 0.3);
    }
}
