use crate::{
    DataLayout, InfoRecord, ProgressRecord, Task, TaskEntry, TaskStatus, Workspace,
    WorkspacePatch,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Live view of the active tasks and workspaces under one data directory.
///
/// Tasks are replaced wholesale on every parse of the active file; workspaces
/// are patched field by field as their `PROGRESS.md` and `README.md` change.
pub struct WorkspaceStore {
    layout: DataLayout,
    tasks: Vec<Task>,
    workspaces: BTreeMap<String, Workspace>,
}

impl WorkspaceStore {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            tasks: Vec::new(),
            workspaces: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id() == id)
    }

    pub fn workspaces(&self) -> impl Iterator<Item = &Workspace> {
        self.workspaces.values()
    }

    pub fn workspace(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.get(id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    pub fn replace_active_tasks(&mut self, entries: Vec<TaskEntry>) {
        let mut tasks: Vec<Task> = Vec::with_capacity(entries.len());
        for entry in entries {
            let status = self.derived_status(&entry.id);
            let task = Task { entry, status };
            match tasks.iter_mut().find(|existing| existing.id() == task.id()) {
                Some(existing) => *existing = task,
                None => tasks.push(task),
            }
        }
        self.tasks = tasks;
    }

    pub fn clear_active_tasks(&mut self) {
        self.tasks.clear();
    }

    pub fn merge_workspace_progress(&mut self, id: &str, record: ProgressRecord, now: DateTime<Utc>) {
        self.patch_workspace(id, WorkspacePatch::from_progress(record, now));
    }

    pub fn merge_workspace_info(&mut self, id: &str, record: InfoRecord) {
        self.patch_workspace(id, WorkspacePatch::from_info(record));
    }

    pub fn patch_workspace(&mut self, id: &str, patch: WorkspacePatch) {
        self.workspaces
            .entry(id.to_string())
            .or_insert_with(|| Workspace::new(id))
            .apply(patch);
        self.refresh_task_statuses();
    }

    /// Returns whether a record was dropped.
    pub fn remove_workspace(&mut self, id: &str) -> bool {
        let removed = self.workspaces.remove(id).is_some();
        self.refresh_task_statuses();
        removed
    }

    /// Re-derive every active task's status from the workspace tree on disk.
    pub fn refresh_task_statuses(&mut self) {
        for idx in 0..self.tasks.len() {
            let status = self.derived_status(self.tasks[idx].id());
            self.tasks[idx].status = status;
        }
    }

    fn derived_status(&self, id: &str) -> TaskStatus {
        if self.layout.workspace_exists(id) {
            TaskStatus::Ongoing
        } else {
            TaskStatus::NotStarted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Priority;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn entry(id: &str) -> TaskEntry {
        TaskEntry {
            id: id.to_string(),
            title: format!("Task {id}"),
            priority: Priority::P2,
            created: "2024-03-01".to_string(),
            due: None,
            tags: Vec::new(),
            context: String::new(),
        }
    }

    fn progress(status: &str, pct: u8) -> ProgressRecord {
        ProgressRecord {
            title: "Progress title".to_string(),
            status: status.to_string(),
            current_focus: "focus".to_string(),
            completed_phases: 1,
            total_phases: 2,
            progress: pct,
        }
    }

    fn info() -> InfoRecord {
        InfoRecord {
            title: "Info title".to_string(),
            priority: Priority::P0,
            due: Some("2024-04-01".to_string()),
            task_id: Some("abc".to_string()),
        }
    }

    #[test]
    fn status_follows_workspace_directory() {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir_all(dir.path().join("workspace/abc")).expect("mkdir");
        let mut store = WorkspaceStore::new(DataLayout::new(dir.path()));

        store.replace_active_tasks(vec![entry("abc"), entry("xyz")]);
        assert_eq!(store.task("abc").map(|t| t.status), Some(TaskStatus::Ongoing));
        assert_eq!(store.task("xyz").map(|t| t.status), Some(TaskStatus::NotStarted));

        fs::create_dir_all(dir.path().join("workspace/xyz")).expect("mkdir");
        store.merge_workspace_info("xyz", info());
        assert_eq!(store.task("xyz").map(|t| t.status), Some(TaskStatus::Ongoing));
    }

    #[test]
    fn replace_drops_tasks_missing_from_new_list() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = WorkspaceStore::new(DataLayout::new(dir.path()));
        store.replace_active_tasks(vec![entry("a"), entry("b")]);
        store.replace_active_tasks(vec![entry("b")]);
        let ids: Vec<_> = store.tasks().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["b"]);

        store.clear_active_tasks();
        assert_eq!(store.task_count(), 0);
    }

    #[test]
    fn progress_merge_preserves_info_fields() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = WorkspaceStore::new(DataLayout::new(dir.path()));
        store.merge_workspace_info("abc", info());
        let before = store.workspace("abc").cloned().expect("workspace");
        assert_eq!(before.progress, None);
        assert_eq!(before.last_updated, None);

        store.merge_workspace_progress("abc", progress("Building", 45), ts(9));
        let after = store.workspace("abc").expect("workspace");
        assert_eq!(after.priority, before.priority);
        assert_eq!(after.due, before.due);
        assert_eq!(after.task_id, before.task_id);
        assert_eq!(after.status.as_deref(), Some("Building"));
        assert_eq!(after.progress, Some(45));
        assert_eq!(after.last_updated, Some(ts(9)));
        assert_eq!(after.title.as_deref(), Some("Progress title"));
    }

    #[test]
    fn repeated_merges_are_idempotent() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = WorkspaceStore::new(DataLayout::new(dir.path()));
        store.replace_active_tasks(vec![entry("a")]);
        store.merge_workspace_progress("abc", progress("Building", 45), ts(9));
        let tasks = store.tasks().to_vec();
        let workspaces: Vec<_> = store.workspaces().cloned().collect();

        store.replace_active_tasks(vec![entry("a")]);
        store.merge_workspace_progress("abc", progress("Building", 45), ts(9));
        assert_eq!(store.tasks(), tasks.as_slice());
        assert_eq!(store.workspaces().cloned().collect::<Vec<_>>(), workspaces);
        assert_eq!(store.workspace_count(), 1);
    }

    #[test]
    fn remove_workspace_drops_whole_record() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = WorkspaceStore::new(DataLayout::new(dir.path()));
        store.merge_workspace_info("abc", info());
        store.merge_workspace_progress("abc", progress("Building", 45), ts(9));
        assert!(store.remove_workspace("abc"));
        assert!(store.workspace("abc").is_none());
        assert!(!store.remove_workspace("abc"));
    }
}
