//! Corpus enumeration: lists eligible page images under a directory in a
//! reproducible order so that ids are stable across rebuilds.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::CorpusSettings;
use crate::error::{Error, Result};

pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"];

/// One eligible image found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusFile {
    /// Path relative to the scanned root with `/` separators; unique per scan.
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CorpusScanner {
    extensions: Vec<String>,
    recursive: bool,
}

impl Default for CorpusScanner {
    fn default() -> Self { Self::new(&CorpusSettings::default()) }
}

impl CorpusScanner {
    pub fn new(settings: &CorpusSettings) -> Self {
        let extensions = settings.extensions.iter().map(|e| e.trim_start_matches('.').to_ascii_lowercase()).collect();
        Self { extensions, recursive: settings.recursive }
    }

    /// Enumerate eligible images sorted lexicographically by `filename`.
    ///
    /// Fails if `root` is missing or unreadable, holds no eligible image, has
    /// an eligible file whose relative path is not valid UTF-8, or two files
    /// normalize to the same `filename`.
    pub fn scan(&self, root: &Path) -> Result<Vec<CorpusFile>> {
        if !root.is_dir() {
            return Err(Error::IndexBuild(format!("corpus directory {} does not exist", root.display())));
        }
        let mut walker = walkdir::WalkDir::new(root).follow_links(true);
        if !self.recursive { walker = walker.max_depth(1); }

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| Error::IndexBuild(format!("cannot read corpus {}: {}", root.display(), e)))?;
            if !entry.file_type().is_file() || !self.is_eligible(entry.path()) { continue; }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            files.push(CorpusFile { filename: normalize_filename(relative)?, path: entry.path().to_path_buf() });
        }
        if files.is_empty() {
            return Err(Error::IndexBuild(format!("no eligible images under {}", root.display())));
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        ensure_unique(&files)?;
        Ok(files)
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// `/`-joined relative path. Components that are not valid UTF-8 are an
/// error, never lossily replaced.
fn normalize_filename(relative: &Path) -> Result<String> {
    let parts = relative
        .components()
        .map(|c| {
            c.as_os_str().to_str().ok_or_else(|| {
                Error::IndexBuild(format!("corpus file name is not valid UTF-8: {}", relative.display()))
            })
        })
        .collect::<Result<Vec<&str>>>()?;
    Ok(parts.join("/"))
}

fn ensure_unique(files: &[CorpusFile]) -> Result<()> {
    let mut seen = HashSet::with_capacity(files.len());
    for f in files {
        if !seen.insert(f.filename.as_str()) { return Err(Error::DuplicateFilename(f.filename.clone())); }
    }
    Ok(())
}
