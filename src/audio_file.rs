//! Audio file discovery and identity

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ConfigError;

/// Extensions accepted by the batch speech-to-text provider
pub const DEFAULT_EXTENSIONS: [&str; 5] = ["wav", "mp3", "m4a", "flac", "ogg"];

/// A resolved audio file. Identity is the canonical absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFile {
    path: PathBuf,
    file_name: String,
    size: u64,
    extension: String,
}

impl AudioFile {
    /// Resolve a path to its canonical form and capture file metadata
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let canonical = path.canonicalize()?;
        let metadata = std::fs::metadata(&canonical)?;

        let file_name = canonical
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let extension = canonical
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        Ok(Self {
            path: canonical,
            file_name,
            size: metadata.len(),
            extension,
        })
    }

    /// Canonical absolute path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lowercased extension without the leading dot
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// Lists candidate audio files in a directory, filtered by extension and
/// deduplicated by canonical path.
#[derive(Debug, Clone)]
pub struct FileSetResolver {
    extensions: Vec<String>,
    recursive: bool,
}

impl Default for FileSetResolver {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

impl FileSetResolver {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            extensions,
            recursive: false,
        }
    }

    /// Descend into subdirectories as well
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Check if a path carries a recognized extension (case-insensitive)
    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Discover audio files in `dir`, sorted by canonical path.
    ///
    /// An empty result is not an error. A missing or unreadable directory is.
    pub fn resolve(&self, dir: &Path) -> Result<Vec<AudioFile>, ConfigError> {
        if !dir.exists() {
            return Err(ConfigError::InputDirMissing(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(ConfigError::NotADirectory(dir.to_path_buf()));
        }
        std::fs::read_dir(dir).map_err(|source| ConfigError::InputDirUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut candidates = Vec::new();

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };

            if entry.file_type().is_file() && self.is_supported(entry.path()) {
                candidates.push(entry.into_path());
            }
        }

        Ok(self.resolve_paths(candidates))
    }

    /// Resolve an explicit list of paths, collapsing spellings that point at
    /// the same file. Unsupported or unreadable paths are skipped.
    pub fn resolve_paths<I>(&self, paths: I) -> Vec<AudioFile>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut unique: BTreeMap<PathBuf, AudioFile> = BTreeMap::new();

        for path in paths {
            if !self.is_supported(&path) {
                debug!("Ignoring unsupported file: {}", path.display());
                continue;
            }

            match AudioFile::from_path(&path) {
                Ok(file) => {
                    if unique.contains_key(file.path()) {
                        debug!("Duplicate path collapsed: {}", path.display());
                    } else {
                        unique.insert(file.path().to_path_buf(), file);
                    }
                }
                Err(e) => warn!("Cannot resolve {}: {}", path.display(), e),
            }
        }

        unique.into_values().collect()
    }
}
