//! Source tree watching.
//!
//! One recursive `notify` watcher covers the whole source root. Raw events
//! are classified into regeneration triggers (pages or directories added and
//! removed, config edits) and content edits, which only need a recompile.

use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::coordinator::UpdateCoordinator;
use crate::error::DevError;
use crate::trigger::WatchTrigger;

/// Pages and components whose addition or removal changes the site.
pub const PAGE_PATTERNS: [&str; 2] = ["**/*.md", ".vuepress/components/**/*.vue"];
/// Markdown that belongs to the tool, not the site.
pub const PAGE_EXCLUDES: [&str; 1] = [".vuepress/**/*.md"];
pub const CONFIG_PATTERNS: [&str; 3] = [
    ".vuepress/config.js",
    ".vuepress/config.yml",
    ".vuepress/config.toml",
];
const DEPENDENCY_DIR: &str = "node_modules";
/// The only dot-directory whose contents are watched.
const COMPONENTS_DIR: &str = ".vuepress/components";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Trigger(WatchTrigger),
    /// An existing page or component was edited.
    ContentChanged(PathBuf),
}

/// Glob scopes of the page and config watchers.
pub struct WatchScopes {
    pages: Vec<Pattern>,
    excludes: Vec<Pattern>,
    config: Vec<Pattern>,
}

impl Default for WatchScopes {
    fn default() -> Self {
        Self {
            pages: compile(&PAGE_PATTERNS),
            excludes: compile(&PAGE_EXCLUDES),
            config: compile(&CONFIG_PATTERNS),
        }
    }
}

fn compile(patterns: &[&str]) -> Vec<Pattern> {
    patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect()
}

#[derive(Clone, Copy)]
enum Change {
    Added,
    Removed,
}

impl WatchScopes {
    /// Turn one raw filesystem event into watch events.
    pub fn classify(&self, event: &Event, source_dir: &Path) -> Vec<WatchEvent> {
        let mut out = Vec::new();

        match event.kind {
            EventKind::Create(CreateKind::Folder) => {
                for path in &event.paths {
                    self.dir_change(path, source_dir, Change::Added, &mut out);
                }
            }
            EventKind::Create(CreateKind::File) => {
                for path in &event.paths {
                    self.file_change(path, source_dir, Change::Added, &mut out);
                }
            }
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.guess_change(path, source_dir, Change::Added, &mut out);
                }
            }
            EventKind::Remove(RemoveKind::Folder) => {
                for path in &event.paths {
                    self.dir_change(path, source_dir, Change::Removed, &mut out);
                }
            }
            EventKind::Remove(RemoveKind::File) => {
                for path in &event.paths {
                    self.file_change(path, source_dir, Change::Removed, &mut out);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.guess_change(path, source_dir, Change::Removed, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.rename(mode, &event.paths, source_dir, &mut out);
            }
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
                for path in &event.paths {
                    self.content_change(path, source_dir, &mut out);
                }
            }
            _ => {}
        }

        out
    }

    fn rename(&self, mode: RenameMode, paths: &[PathBuf], source_dir: &Path, out: &mut Vec<WatchEvent>) {
        match (mode, paths) {
            (RenameMode::Both, [from, to, ..]) => {
                self.guess_change(from, source_dir, Change::Removed, out);
                self.guess_change(to, source_dir, Change::Added, out);
            }
            (RenameMode::From, _) => {
                for path in paths {
                    self.guess_change(path, source_dir, Change::Removed, out);
                }
            }
            (RenameMode::To, _) => {
                for path in paths {
                    self.guess_change(path, source_dir, Change::Added, out);
                }
            }
            _ => {
                // Backends that can't tell which side of the rename this is
                for path in paths {
                    let change = if path.exists() {
                        Change::Added
                    } else {
                        Change::Removed
                    };
                    self.guess_change(path, source_dir, change, out);
                }
            }
        }
    }

    /// For events that don't say whether the path is a file or directory.
    fn guess_change(&self, path: &Path, source_dir: &Path, change: Change, out: &mut Vec<WatchEvent>) {
        let is_dir = match change {
            Change::Added => path.is_dir(),
            Change::Removed => path.extension().is_none(),
        };

        if is_dir {
            self.dir_change(path, source_dir, change, out);
        } else {
            self.file_change(path, source_dir, change, out);
        }
    }

    fn file_change(&self, path: &Path, source_dir: &Path, change: Change, out: &mut Vec<WatchEvent>) {
        let Some(relative) = relative_to(path, source_dir) else {
            return;
        };

        if self.is_page(&relative) {
            let trigger = match change {
                Change::Added => WatchTrigger::PageAdded(relative),
                Change::Removed => WatchTrigger::PageRemoved(relative),
            };
            out.push(WatchEvent::Trigger(trigger));
        } else if self.is_config(&relative) {
            // Editors that save through a temp file report the config as
            // created, not modified
            if let Change::Added = change {
                out.push(WatchEvent::Trigger(WatchTrigger::ConfigChanged(relative)));
            }
        }
    }

    fn dir_change(&self, path: &Path, source_dir: &Path, change: Change, out: &mut Vec<WatchEvent>) {
        let Some(relative) = relative_to(path, source_dir) else {
            return;
        };
        if in_dependencies(&relative) || is_hidden(&relative) {
            return;
        }

        let trigger = match change {
            Change::Added => WatchTrigger::DirAdded(relative),
            Change::Removed => WatchTrigger::DirRemoved(relative),
        };
        out.push(WatchEvent::Trigger(trigger));
    }

    fn content_change(&self, path: &Path, source_dir: &Path, out: &mut Vec<WatchEvent>) {
        let Some(relative) = relative_to(path, source_dir) else {
            return;
        };

        if self.is_config(&relative) {
            out.push(WatchEvent::Trigger(WatchTrigger::ConfigChanged(relative)));
        } else if self.is_page(&relative) {
            out.push(WatchEvent::ContentChanged(relative));
        }
    }

    pub fn is_page(&self, relative: &Path) -> bool {
        if in_dependencies(relative) || is_hidden(relative) {
            return false;
        }

        let path = slash_path(relative);
        self.pages.iter().any(|p| p.matches_with(&path, MATCH_OPTIONS))
            && !self.excludes.iter().any(|p| p.matches_with(&path, MATCH_OPTIONS))
    }

    pub fn is_config(&self, relative: &Path) -> bool {
        let path = slash_path(relative);
        self.config.iter().any(|p| p.matches_with(&path, MATCH_OPTIONS))
    }
}

fn relative_to(path: &Path, source_dir: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(source_dir).ok()?;
    (!relative.as_os_str().is_empty()).then(|| relative.to_path_buf())
}

fn in_dependencies(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| c == Component::Normal(DEPENDENCY_DIR.as_ref()))
}

/// Dot-files and anything below a dot-directory, except components.
fn is_hidden(relative: &Path) -> bool {
    if relative.starts_with(COMPONENTS_DIR) {
        return false;
    }

    relative.components().any(|c| match c {
        Component::Normal(s) => s.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

fn slash_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Keeps the underlying watcher alive. Dropping it stops watching.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch the source tree, feeding regeneration triggers to the coordinator
/// and page edits to `content`.
///
/// # Errors
///
/// Returns [`DevError::Watch`] if the watcher cannot be created.
pub fn subscribe_watchers(
    source_dir: &Path,
    coordinator: UpdateCoordinator,
    content: mpsc::UnboundedSender<PathBuf>,
) -> Result<SourceWatcher, DevError> {
    let root = source_dir.canonicalize().map_err(notify::Error::io)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    // Create watcher with callback that sends events to channel
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if tx.send(res).is_err() {
            tracing::debug!("Watch event dropped, classifier task is gone");
        }
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    tracing::debug!(root = %root.display(), "Watching source tree");

    let scopes = WatchScopes::default();
    tokio::spawn(async move {
        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!("File watcher error: {e}");
                    continue;
                }
            };

            for watch_event in scopes.classify(&event, &root) {
                match watch_event {
                    WatchEvent::Trigger(trigger) => coordinator.trigger(trigger),
                    WatchEvent::ContentChanged(path) => {
                        tracing::debug!(path = %path.display(), "Page content changed");
                        if content.send(path).is_err() {
                            tracing::debug!("Compiler is gone, dropping page edit");
                        }
                    }
                }
            }
        }
    });

    Ok(SourceWatcher { _watcher: watcher })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, MetadataKind};

    const ROOT: &str = "/site";

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| {
                event.add_path(Path::new(ROOT).join(path))
            })
    }

    fn classify(kind: EventKind, paths: &[&str]) -> Vec<WatchEvent> {
        WatchScopes::default().classify(&event(kind, paths), Path::new(ROOT))
    }

    fn trigger(trigger: WatchTrigger) -> Vec<WatchEvent> {
        vec![WatchEvent::Trigger(trigger)]
    }

    #[test]
    fn test_page_added_and_removed() {
        assert_eq!(
            classify(EventKind::Create(CreateKind::File), &["guide/new.md"]),
            trigger(WatchTrigger::PageAdded(PathBuf::from("guide/new.md")))
        );
        assert_eq!(
            classify(EventKind::Remove(RemoveKind::File), &["README.md"]),
            trigger(WatchTrigger::PageRemoved(PathBuf::from("README.md")))
        );
    }

    #[test]
    fn test_component_added() {
        assert_eq!(
            classify(
                EventKind::Create(CreateKind::File),
                &[".vuepress/components/Demo.vue"]
            ),
            trigger(WatchTrigger::PageAdded(PathBuf::from(
                ".vuepress/components/Demo.vue"
            )))
        );
    }

    #[test]
    fn test_excluded_paths_are_ignored() {
        let create = EventKind::Create(CreateKind::File);
        assert!(classify(create, &[".vuepress/notes.md"]).is_empty());
        assert!(classify(create, &["node_modules/pkg/README.md"]).is_empty());
        assert!(classify(create, &["guide/image.png"]).is_empty());
        assert!(classify(create, &["components/Other.vue"]).is_empty());
    }

    #[test]
    fn test_paths_outside_source_are_ignored() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/elsewhere/page.md"));
        assert!(WatchScopes::default()
            .classify(&event, Path::new(ROOT))
            .is_empty());
    }

    #[test]
    fn test_directories() {
        assert_eq!(
            classify(EventKind::Create(CreateKind::Folder), &["guide"]),
            trigger(WatchTrigger::DirAdded(PathBuf::from("guide")))
        );
        assert_eq!(
            classify(EventKind::Remove(RemoveKind::Folder), &["guide"]),
            trigger(WatchTrigger::DirRemoved(PathBuf::from("guide")))
        );
        assert!(classify(EventKind::Create(CreateKind::Folder), &["node_modules/pkg"]).is_empty());
        assert_eq!(
            classify(EventKind::Create(CreateKind::Folder), &[".vuepress/components/demo"]),
            trigger(WatchTrigger::DirAdded(PathBuf::from(".vuepress/components/demo")))
        );
    }

    #[test]
    fn test_dot_directories_are_ignored() {
        for dir in [".git/objects/ab", ".vuepress/dist", ".cache", "guide/.tmp"] {
            assert!(classify(EventKind::Create(CreateKind::Folder), &[dir]).is_empty());
            assert!(classify(EventKind::Remove(RemoveKind::Folder), &[dir]).is_empty());
        }
        assert!(classify(EventKind::Remove(RemoveKind::Any), &[".git/refs"]).is_empty());
        assert!(classify(EventKind::Create(CreateKind::File), &[".git/notes.md"]).is_empty());
        assert!(classify(EventKind::Create(CreateKind::File), &["guide/.draft.md"]).is_empty());
    }

    #[test]
    fn test_config_changes() {
        for name in [".vuepress/config.toml", ".vuepress/config.yml", ".vuepress/config.js"] {
            assert_eq!(
                classify(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &[name]),
                trigger(WatchTrigger::ConfigChanged(PathBuf::from(name)))
            );
        }

        assert_eq!(
            classify(EventKind::Create(CreateKind::File), &[".vuepress/config.toml"]),
            trigger(WatchTrigger::ConfigChanged(PathBuf::from(".vuepress/config.toml")))
        );
        assert!(classify(EventKind::Modify(ModifyKind::Any), &[".vuepress/config.json"]).is_empty());
    }

    #[test]
    fn test_page_edits_only_need_recompile() {
        assert_eq!(
            classify(EventKind::Modify(ModifyKind::Data(DataChange::Any)), &["guide/intro.md"]),
            vec![WatchEvent::ContentChanged(PathBuf::from("guide/intro.md"))]
        );
        assert!(classify(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["guide/intro.md"]
        )
        .is_empty());
    }

    #[test]
    fn test_rename_is_remove_then_add() {
        assert_eq!(
            classify(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["old.md", "new.md"]
            ),
            vec![
                WatchEvent::Trigger(WatchTrigger::PageRemoved(PathBuf::from("old.md"))),
                WatchEvent::Trigger(WatchTrigger::PageAdded(PathBuf::from("new.md"))),
            ]
        );
    }

    #[test]
    fn test_untyped_remove_guesses_from_extension() {
        assert_eq!(
            classify(EventKind::Remove(RemoveKind::Any), &["guide"]),
            trigger(WatchTrigger::DirRemoved(PathBuf::from("guide")))
        );
        assert_eq!(
            classify(EventKind::Remove(RemoveKind::Any), &["guide/a.md"]),
            trigger(WatchTrigger::PageRemoved(PathBuf::from("guide/a.md")))
        );
    }
}
