//! Detects title, front matter and heading changes between compiles of a page.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::markdown::{Header, PageMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStatus {
    /// First time this page has been seen.
    New,
    Unchanged,
    /// Title, front matter or headers differ from the previous observation.
    Changed,
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    title: Option<String>,
    frontmatter: serde_json::Value,
    headers: Vec<Header>,
}

#[derive(Debug, Default)]
pub struct MetadataTracker {
    seen: HashMap<PathBuf, Snapshot>,
}

impl MetadataTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the metadata of `path` and report how it compares to the last
    /// observation.
    pub fn observe(&mut self, path: &Path, meta: &PageMeta) -> MetadataStatus {
        let snapshot = Snapshot {
            title: meta.title.clone(),
            frontmatter: meta.frontmatter.clone(),
            headers: meta.headers.clone(),
        };

        match self.seen.insert(path.to_path_buf(), snapshot.clone()) {
            None => MetadataStatus::New,
            Some(previous) if previous == snapshot => MetadataStatus::Unchanged,
            Some(_) => MetadataStatus::Changed,
        }
    }

    /// Drop pages that no longer exist.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Path) -> bool,
    {
        self.seen.retain(|path, _| keep(path));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(doc: &str) -> PageMeta {
        PageMeta::extract(doc).unwrap()
    }

    #[test]
    fn test_observe_lifecycle() {
        let mut tracker = MetadataTracker::new();
        let path = Path::new("guide.md");

        assert_eq!(tracker.observe(path, &meta("# A\n\nbody")), MetadataStatus::New);
        assert_eq!(
            tracker.observe(path, &meta("# A\n\nedited body")),
            MetadataStatus::Unchanged
        );
        assert_eq!(
            tracker.observe(path, &meta("# A\n\n## New section\n")),
            MetadataStatus::Changed
        );
        assert_eq!(
            tracker.observe(path, &meta("---\nlayout: wide\n---\n# A\n\n## New section\n")),
            MetadataStatus::Changed
        );
    }

    #[test]
    fn test_retain_forgets_removed_pages() {
        let mut tracker = MetadataTracker::new();
        tracker.observe(Path::new("a.md"), &meta("# A"));
        tracker.observe(Path::new("b.md"), &meta("# B"));

        tracker.retain(|path| path == Path::new("a.md"));
        assert_eq!(tracker.len(), 1);
        assert_eq!(
            tracker.observe(Path::new("b.md"), &meta("# B")),
            MetadataStatus::New
        );
    }
}
