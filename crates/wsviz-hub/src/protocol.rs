use chrono::{DateTime, Utc};
use serde::Serialize;
use wsviz_core::{ArchivedTask, ChangeKind, Task, Workspace};

/// Full copy of what a viewer needs to render: never a diff.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    pub tasks: Vec<Task>,
    pub workspaces: Vec<Workspace>,
    pub archived_tasks: Vec<ArchivedTask>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    /// Sent once, right after a viewer connects.
    InitialData {
        #[serde(flatten)]
        data: SnapshotData,
        timestamp: DateTime<Utc>,
    },
    /// Sent to every viewer after each processed file change.
    FileUpdate {
        file: String,
        event: ChangeKind,
        timestamp: DateTime<Utc>,
        data: SnapshotData,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn empty() -> SnapshotData {
        SnapshotData {
            tasks: Vec::new(),
            workspaces: vec![Workspace::new("abc")],
            archived_tasks: Vec::new(),
        }
    }

    #[test]
    fn initial_data_is_flat() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).single().expect("ts");
        let value = serde_json::to_value(ViewerMessage::InitialData {
            data: empty(),
            timestamp: ts,
        })
        .expect("serialize");
        assert_eq!(value["type"], "initial_data");
        assert!(value["tasks"].is_array());
        assert_eq!(value["workspaces"][0]["id"], "abc");
        assert!(value["archivedTasks"].is_array());
        assert_eq!(value["timestamp"], "2024-03-15T09:00:00Z");
    }

    #[test]
    fn file_update_nests_snapshot() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).single().expect("ts");
        let value = serde_json::to_value(ViewerMessage::FileUpdate {
            file: "todo/active.md".to_string(),
            event: ChangeKind::Changed,
            timestamp: ts,
            data: empty(),
        })
        .expect("serialize");
        assert_eq!(value["type"], "file_update");
        assert_eq!(value["file"], "todo/active.md");
        assert_eq!(value["event"], "changed");
        assert!(value["data"]["archivedTasks"].is_array());
    }
}
