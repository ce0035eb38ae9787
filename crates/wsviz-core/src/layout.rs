use std::path::{Component, Path, PathBuf};

pub const TODO_DIR: &str = "todo";
pub const WORKSPACE_DIR: &str = "workspace";
pub const ARCHIVE_DIR: &str = "archive";
pub const ACTIVE_FILE: &str = "active.md";
pub const PROGRESS_FILE: &str = "PROGRESS.md";
pub const README_FILE: &str = "README.md";

/// What a changed file feeds into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    ActiveTasks,
    WorkspaceProgress(String),
    WorkspaceInfo(String),
    /// Watched, but carries no structured state (docs, logs, other todo files).
    Supporting,
}

#[derive(Debug, Clone)]
pub struct DataLayout {
    pub data_dir: PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn todo_dir(&self) -> PathBuf {
        self.data_dir.join(TODO_DIR)
    }

    pub fn active_file(&self) -> PathBuf {
        self.todo_dir().join(ACTIVE_FILE)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.todo_dir().join(ARCHIVE_DIR)
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join(WORKSPACE_DIR)
    }

    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.workspaces_dir().join(id)
    }

    pub fn archived_workspace_dir(&self, id: &str) -> PathBuf {
        self.workspaces_dir().join(ARCHIVE_DIR).join(id)
    }

    pub fn workspace_exists(&self, id: &str) -> bool {
        crate::is_identifier(id) && self.workspace_dir(id).is_dir()
    }

    /// Path relative to the data directory, for display and wire messages.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.data_dir).unwrap_or(path)
    }

    pub fn classify(&self, path: &Path) -> Option<SourceKind> {
        let rel = path.strip_prefix(&self.data_dir).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|component| match component {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        let kind = match parts.as_slice() {
            [TODO_DIR, ACTIVE_FILE] => SourceKind::ActiveTasks,
            [WORKSPACE_DIR, id, PROGRESS_FILE] if is_workspace_id(id) => {
                SourceKind::WorkspaceProgress(id.to_string())
            }
            [WORKSPACE_DIR, id, README_FILE] if is_workspace_id(id) => {
                SourceKind::WorkspaceInfo(id.to_string())
            }
            _ => SourceKind::Supporting,
        };
        Some(kind)
    }
}

fn is_workspace_id(id: &str) -> bool {
    id != ARCHIVE_DIR && !id.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_path_shape() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.classify(Path::new("/data/todo/active.md")),
            Some(SourceKind::ActiveTasks)
        );
        assert_eq!(
            layout.classify(Path::new("/data/workspace/abc/PROGRESS.md")),
            Some(SourceKind::WorkspaceProgress("abc".to_string()))
        );
        assert_eq!(
            layout.classify(Path::new("/data/workspace/abc/README.md")),
            Some(SourceKind::WorkspaceInfo("abc".to_string()))
        );
        assert_eq!(
            layout.classify(Path::new("/data/workspace/abc/docs/PROGRESS.md")),
            Some(SourceKind::Supporting)
        );
        assert_eq!(
            layout.classify(Path::new("/data/workspace/archive/PROGRESS.md")),
            Some(SourceKind::Supporting)
        );
        assert_eq!(
            layout.classify(Path::new("/data/todo/backlog.md")),
            Some(SourceKind::Supporting)
        );
        assert_eq!(layout.classify(Path::new("/elsewhere/todo/active.md")), None);
    }

    #[test]
    fn relative_strips_data_dir() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.relative(Path::new("/data/workspace/a/README.md")),
            Path::new("workspace/a/README.md")
        );
    }
}
