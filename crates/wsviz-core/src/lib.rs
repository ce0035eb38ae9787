pub mod archive;
pub mod config;
pub mod layout;
pub mod markdown;
pub mod store;
pub mod sync;
pub mod watcher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub use archive::recent_archived_tasks;
pub use layout::{DataLayout, SourceKind};
pub use store::WorkspaceStore;
pub use sync::{progress_detail, read_change, ChangeOutcome, PendingChange, ProgressDetail};
pub use watcher::{ChangeKind, DirectoryWatcher, FileChange, WatchSignal};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to read {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("invalid watch pattern: {0}")]
    Pattern(#[from] globset::Error),
    #[error("config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::P2
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "p0",
            Priority::P1 => "p1",
            Priority::P2 => "p2",
            Priority::P3 => "p3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "p0" => Ok(Priority::P0),
            "p1" => Ok(Priority::P1),
            "p2" => Ok(Priority::P2),
            "p3" => Ok(Priority::P3),
            other => Err(format!("Unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    Ongoing,
    Finished,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "Not Started",
            TaskStatus::Ongoing => "Ongoing",
            TaskStatus::Finished => "Finished",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of one active task block, as written in the task file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub created: String,
    pub due: Option<String>,
    pub tags: Vec<String>,
    pub context: String,
}

/// An active task together with its status derived from the workspace tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    #[serde(flatten)]
    pub entry: TaskEntry,
    #[serde(rename = "taskStatus")]
    pub status: TaskStatus,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.entry.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedTask {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub created: Option<String>,
    pub completed: Option<String>,
    pub tags: Vec<String>,
    pub context: String,
    #[serde(rename = "taskStatus")]
    pub status: TaskStatus,
}

/// Parsed contents of a workspace `PROGRESS.md`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub title: String,
    pub status: String,
    pub current_focus: String,
    pub completed_phases: u32,
    pub total_phases: u32,
    pub progress: u8,
}

/// Parsed contents of a workspace `README.md`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InfoRecord {
    pub title: String,
    pub priority: Priority,
    pub due: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_focus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_phases: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_phases: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Partial update for a [`Workspace`]: `Some` fields override, `None` fields
/// leave the current value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspacePatch {
    pub title: Option<String>,
    pub status: Option<String>,
    pub progress: Option<u8>,
    pub current_focus: Option<String>,
    pub completed_phases: Option<u32>,
    pub total_phases: Option<u32>,
    pub priority: Option<Priority>,
    pub due: Option<String>,
    pub task_id: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl WorkspacePatch {
    pub fn from_progress(record: ProgressRecord, now: DateTime<Utc>) -> Self {
        Self {
            title: Some(record.title),
            status: Some(record.status),
            progress: Some(record.progress),
            current_focus: Some(record.current_focus),
            completed_phases: Some(record.completed_phases),
            total_phases: Some(record.total_phases),
            last_updated: Some(now),
            ..Self::default()
        }
    }

    pub fn from_info(record: InfoRecord) -> Self {
        Self {
            title: Some(record.title),
            priority: Some(record.priority),
            due: record.due,
            task_id: record.task_id,
            ..Self::default()
        }
    }
}

impl Workspace {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, patch: WorkspacePatch) {
        fn set<T>(slot: &mut Option<T>, value: Option<T>) {
            if let Some(value) = value {
                *slot = Some(value);
            }
        }
        set(&mut self.title, patch.title);
        set(&mut self.status, patch.status);
        set(&mut self.progress, patch.progress);
        set(&mut self.current_focus, patch.current_focus);
        set(&mut self.completed_phases, patch.completed_phases);
        set(&mut self.total_phases, patch.total_phases);
        set(&mut self.priority, patch.priority);
        set(&mut self.due, patch.due);
        set(&mut self.task_id, patch.task_id);
        set(&mut self.last_updated, patch.last_updated);
    }
}

/// Identifiers are plain words: ASCII letters, digits and `_`.
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(is_word_char)
}

pub(crate) fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_serializes_with_flat_fields_and_status() {
        let task = Task {
            entry: TaskEntry {
                id: "abc123".to_string(),
                title: "Fix login bug".to_string(),
                priority: Priority::P0,
                created: "2024-01-01".to_string(),
                due: None,
                tags: vec!["auth".to_string()],
                context: String::new(),
            },
            status: TaskStatus::NotStarted,
        };
        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["id"], "abc123");
        assert_eq!(value["priority"], "p0");
        assert_eq!(value["due"], serde_json::Value::Null);
        assert_eq!(value["taskStatus"], "Not Started");
    }

    #[test]
    fn patch_keeps_fields_it_does_not_carry() {
        let mut workspace = Workspace::new("abc");
        workspace.apply(WorkspacePatch::from_info(InfoRecord {
            title: "Login".to_string(),
            priority: Priority::P1,
            due: Some("2024-02-01".to_string()),
            task_id: Some("abc".to_string()),
        }));
        workspace.apply(WorkspacePatch {
            status: Some("Building".to_string()),
            ..WorkspacePatch::default()
        });
        assert_eq!(workspace.priority, Some(Priority::P1));
        assert_eq!(workspace.due.as_deref(), Some("2024-02-01"));
        assert_eq!(workspace.status.as_deref(), Some("Building"));
        assert_eq!(workspace.title.as_deref(), Some("Login"));
    }

    #[test]
    fn priority_parse_is_case_insensitive() {
        assert_eq!("P1".parse::<Priority>(), Ok(Priority::P1));
        assert!("urgent".parse::<Priority>().is_err());
    }
}
