//! Polling watcher for the instrument output directory.
//!
//! Each scan walks the directory and reports files that are new or whose
//! (size, mtime) stamp changed since the previous scan. The first scan
//! reports everything; the fingerprint ledger decides what is really new.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ignore::WalkBuilder;

use crate::error::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug)]
pub struct ResultFileWatcher {
    root: PathBuf,
    extension: String,
    seen: HashMap<PathBuf, FileStamp>,
}

impl ResultFileWatcher {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            seen: HashMap::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Changed result files, sorted by path. Creates the directory if missing.
    pub fn scan(&mut self) -> Result<Vec<PathBuf>, WatchError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|source| WatchError::CreateDir {
                path: self.root.clone(),
                source,
            })?;
            tracing::info!(path = %self.root.display(), "Created result watch directory");
        }

        let mut builder = WalkBuilder::new(&self.root);
        builder.standard_filters(false).follow_links(false);

        let mut current = HashMap::new();
        let mut changed = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(error = %err, "Skipping unreadable watch entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) || !self.matches(entry.path()) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let path = entry.into_path();
            let stamp = FileStamp {
                len: metadata.len(),
                modified: metadata.modified().ok(),
            };
            if self.seen.get(&path) != Some(&stamp) {
                changed.push(path.clone());
            }
            current.insert(path, stamp);
        }

        self.seen = current;
        changed.sort();
        Ok(changed)
    }

    /// Drop what we know about `path` so the next scan reports it again.
    pub fn forget(&mut self, path: &Path) {
        self.seen.remove(path);
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}
