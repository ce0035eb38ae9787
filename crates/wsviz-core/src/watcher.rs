use crate::{DataLayout, SyncError};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const WATCH_PATTERNS: [&str; 5] = [
    "todo/*.md",
    "workspace/*/PROGRESS.md",
    "workspace/*/README.md",
    "workspace/*/docs/**/*.md",
    "workspace/*/logs/**/*.md",
];
const IGNORED_NAMES: [&str; 3] = [".DS_Store", "node_modules", "archive"];
const IGNORED_SUFFIXES: [&str; 2] = [".tmp", ".swp"];
const MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Changed => "changed",
            ChangeKind::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// What the watcher hands to its sink.
#[derive(Debug)]
pub enum WatchSignal {
    Change(FileChange),
    Failure(SyncError),
}

/// Decides which paths under the data directory are worth reporting.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    root: PathBuf,
    globs: GlobSet,
}

impl WatchFilter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in WATCH_PATTERNS {
            builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
        }
        Ok(Self {
            root: root.into(),
            globs: builder.build()?,
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        let mut depth = 0;
        for component in rel.components() {
            let Component::Normal(part) = component else {
                return false;
            };
            let Some(part) = part.to_str() else {
                return false;
            };
            if is_ignored_name(part) {
                return false;
            }
            depth += 1;
        }
        depth > 0 && depth <= MAX_DEPTH + 1 && self.globs.is_match(rel)
    }
}

fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.')
        || IGNORED_NAMES.contains(&name)
        || IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Turns notify events into file changes.
///
/// Remembers which watched files exist so a directory that is moved away or
/// deleted as a whole is still reported file by file, and scans directories
/// that appear so their files are reported as added.
#[derive(Debug)]
pub struct ChangeTracker {
    filter: WatchFilter,
    known: BTreeSet<PathBuf>,
}

impl ChangeTracker {
    pub fn new(filter: WatchFilter) -> Self {
        Self {
            filter,
            known: BTreeSet::new(),
        }
    }

    pub fn seed(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.known.extend(paths);
    }

    pub fn changes(&mut self, event: &Event) -> Vec<FileChange> {
        let mut changes = Vec::new();
        match &event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.appeared(path, &mut changes);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.vanished(path, &mut changes);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => {
                    for path in &event.paths {
                        self.vanished(path, &mut changes);
                    }
                }
                RenameMode::To => {
                    for path in &event.paths {
                        self.appeared(path, &mut changes);
                    }
                }
                RenameMode::Both => {
                    if let [from, to] = event.paths.as_slice() {
                        self.vanished(from, &mut changes);
                        self.appeared(to, &mut changes);
                    }
                }
                _ => {
                    for path in &event.paths {
                        if path.exists() {
                            self.appeared(path, &mut changes);
                        } else {
                            self.vanished(path, &mut changes);
                        }
                    }
                }
            },
            EventKind::Modify(_) | EventKind::Any => {
                for path in &event.paths {
                    if self.filter.matches(path) {
                        self.known.insert(path.clone());
                        changes.push(FileChange::new(path.clone(), ChangeKind::Changed));
                    }
                }
            }
            EventKind::Access(_) | EventKind::Other => {}
        }
        changes
    }

    fn appeared(&mut self, path: &Path, changes: &mut Vec<FileChange>) {
        if path.is_dir() {
            for file in scan(&self.filter, path) {
                self.known.insert(file.clone());
                changes.push(FileChange::new(file, ChangeKind::Added));
            }
        } else if self.filter.matches(path) {
            self.known.insert(path.to_path_buf());
            changes.push(FileChange::new(path, ChangeKind::Added));
        }
    }

    fn vanished(&mut self, path: &Path, changes: &mut Vec<FileChange>) {
        let gone: Vec<PathBuf> = self
            .known
            .iter()
            .filter(|known| known.starts_with(path))
            .cloned()
            .collect();
        if gone.is_empty() {
            if self.filter.matches(path) {
                changes.push(FileChange::new(path, ChangeKind::Removed));
            }
            return;
        }
        for file in gone {
            self.known.remove(&file);
            changes.push(FileChange::new(file, ChangeKind::Removed));
        }
    }
}

/// Every matching file currently on disk, sorted.
pub fn initial_scan(filter: &WatchFilter) -> Vec<PathBuf> {
    scan(filter, &filter.root)
}

fn scan(filter: &WatchFilter, dir: &Path) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .hidden(true)
        .max_depth(Some(MAX_DEPTH + 1))
        .build();

    let mut paths = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(event = "scan_error", error = %err);
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if filter.matches(entry.path()) {
            paths.push(entry.path().to_path_buf());
        }
    }
    paths.sort();
    paths
}

/// Recursive watch over a data directory. Dropping it stops the watch.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Start watching, then report every existing matching file as
    /// [`ChangeKind::Added`] so the sink can build complete initial state.
    pub fn start<F>(layout: &DataLayout, sink: F) -> Result<Self, SyncError>
    where
        F: Fn(WatchSignal) + Clone + Send + 'static,
    {
        let filter = WatchFilter::new(&layout.data_dir)?;
        let tracker = Arc::new(Mutex::new(ChangeTracker::new(filter.clone())));
        let event_tracker = tracker.clone();
        let event_sink = sink.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let changes = event_tracker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .changes(&event);
                for change in changes {
                    event_sink(WatchSignal::Change(change));
                }
            }
            Err(err) => {
                warn!(event = "watch_error", error = %err);
                event_sink(WatchSignal::Failure(SyncError::Watch(err)));
            }
        })?;
        watcher.watch(&layout.data_dir, RecursiveMode::Recursive)?;

        let existing = initial_scan(&filter);
        debug!(event = "initial_scan", files = existing.len());
        tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seed(existing.iter().cloned());
        for path in existing {
            sink(WatchSignal::Change(FileChange::new(path, ChangeKind::Added)));
        }

        Ok(Self { _watcher: watcher })
    }
}
