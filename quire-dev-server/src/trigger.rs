use std::fmt;
use std::path::PathBuf;

/// Why the site model needs to be regenerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTrigger {
    PageAdded(PathBuf),
    PageRemoved(PathBuf),
    DirAdded(PathBuf),
    DirRemoved(PathBuf),
    ConfigChanged(PathBuf),
    /// Front matter or headings changed inside an existing page.
    MetadataChanged(PathBuf),
}

impl WatchTrigger {
    pub fn path(&self) -> &PathBuf {
        match self {
            WatchTrigger::PageAdded(path)
            | WatchTrigger::PageRemoved(path)
            | WatchTrigger::DirAdded(path)
            | WatchTrigger::DirRemoved(path)
            | WatchTrigger::ConfigChanged(path)
            | WatchTrigger::MetadataChanged(path) => path,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            WatchTrigger::PageAdded(_) => "add page",
            WatchTrigger::PageRemoved(_) => "unlink page",
            WatchTrigger::DirAdded(_) => "addDir",
            WatchTrigger::DirRemoved(_) => "unlinkDir",
            WatchTrigger::ConfigChanged(_) => "config change",
            WatchTrigger::MetadataChanged(_) => "frontmatter or headers change",
        }
    }
}

impl fmt::Display for WatchTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.path().display())
    }
}
