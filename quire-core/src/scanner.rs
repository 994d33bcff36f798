use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::config::CONFIG_DIR;

/// Directories never scanned for pages.
pub const IGNORED_DIRS: [&str; 2] = [CONFIG_DIR, "node_modules"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Source directory does not exist: {}", .0.display())]
    MissingSourceDir(PathBuf),
}

pub struct SiteScanner {
    source_dir: PathBuf,
}

impl SiteScanner {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            source_dir: path.as_ref().to_path_buf(),
        }
    }

    /// Every markdown page under the source root, relative to it and sorted.
    pub fn scan(&self) -> Result<Vec<PathBuf>, ScanError> {
        if !self.source_dir.is_dir() {
            return Err(ScanError::MissingSourceDir(self.source_dir.clone()));
        }

        tracing::debug!(source = %self.source_dir.display(), "Scanning pages");

        let mut pages = Vec::new();
        let walker = WalkDir::new(&self.source_dir)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_ignored(entry));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_markdown(entry.path()) {
                continue;
            }

            if let Ok(relative) = entry.path().strip_prefix(&self.source_dir) {
                pages.push(relative.to_path_buf());
            }
        }

        pages.sort();
        Ok(pages)
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && IGNORED_DIRS
            .iter()
            .any(|dir| entry.file_name() == std::ffi::OsStr::new(dir))
}

fn is_markdown(path: &Path) -> bool {
    path.extension().map(|ext| ext == "md").unwrap_or(false)
}
