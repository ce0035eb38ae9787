use crate::markdown::{parse_active_tasks, parse_progress, parse_workspace_info};
use crate::watcher::{initial_scan, WatchFilter};
use crate::{
    ChangeKind, DataLayout, FileChange, InfoRecord, ProgressRecord, SourceKind, SyncError,
    TaskEntry, WorkspaceStore,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// Result of applying one file change to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    TasksReplaced(usize),
    TasksCleared,
    WorkspaceUpdated(String),
    WorkspaceRemoved(String),
    /// The file was watched but carried nothing to apply.
    Unchanged,
}

/// `Ok(None)` when the file does not exist; other I/O failures are errors.
pub fn read_source(path: &Path) -> Result<Option<String>, SyncError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SyncError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A file change that has been read and parsed but not yet applied.
///
/// Splitting the read from the apply lets callers do the file I/O without
/// holding whatever guards the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChange {
    ReplaceTasks(Vec<TaskEntry>),
    ClearTasks,
    MergeProgress(String, ProgressRecord),
    MergeInfo(String, InfoRecord),
    RemoveWorkspace(String),
    Nothing,
}

/// Read and parse whatever `change` points at. Touches the disk, never the store.
pub fn read_change(
    layout: &DataLayout,
    change: &FileChange,
    today: NaiveDate,
) -> Result<PendingChange, SyncError> {
    let Some(kind) = layout.classify(&change.path) else {
        return Ok(PendingChange::Nothing);
    };
    let pending = match kind {
        SourceKind::ActiveTasks => match read_source(&change.path)? {
            Some(content) => PendingChange::ReplaceTasks(parse_active_tasks(&content, today)),
            None => PendingChange::ClearTasks,
        },
        SourceKind::WorkspaceProgress(id) | SourceKind::WorkspaceInfo(id)
            if change.kind == ChangeKind::Removed =>
        {
            PendingChange::RemoveWorkspace(id)
        }
        SourceKind::WorkspaceProgress(id) => match read_source(&change.path)? {
            Some(content) => PendingChange::MergeProgress(id, parse_progress(&content)),
            None => PendingChange::Nothing,
        },
        SourceKind::WorkspaceInfo(id) => match read_source(&change.path)? {
            Some(content) => PendingChange::MergeInfo(id, parse_workspace_info(&content)),
            None => PendingChange::Nothing,
        },
        SourceKind::Supporting => PendingChange::Nothing,
    };
    Ok(pending)
}

impl WorkspaceStore {
    /// Fold one watcher change into the store.
    ///
    /// On error the store is left exactly as it was.
    pub fn apply_change(
        &mut self,
        change: &FileChange,
        now: DateTime<Utc>,
    ) -> Result<ChangeOutcome, SyncError> {
        let pending = read_change(self.layout(), change, now.date_naive())?;
        Ok(self.apply_pending(pending, now))
    }

    pub fn apply_pending(&mut self, pending: PendingChange, now: DateTime<Utc>) -> ChangeOutcome {
        match pending {
            PendingChange::ReplaceTasks(entries) => {
                let count = entries.len();
                self.replace_active_tasks(entries);
                ChangeOutcome::TasksReplaced(count)
            }
            PendingChange::ClearTasks => {
                self.clear_active_tasks();
                ChangeOutcome::TasksCleared
            }
            PendingChange::MergeProgress(id, record) => {
                debug!(
                    event = "workspace_progress",
                    workspace_id = %id,
                    status = %record.status,
                    progress = record.progress
                );
                self.merge_workspace_progress(&id, record, now);
                ChangeOutcome::WorkspaceUpdated(id)
            }
            PendingChange::MergeInfo(id, record) => {
                self.merge_workspace_info(&id, record);
                ChangeOutcome::WorkspaceUpdated(id)
            }
            PendingChange::RemoveWorkspace(id) => {
                if self.remove_workspace(&id) {
                    info!(event = "workspace_removed", workspace_id = %id);
                }
                ChangeOutcome::WorkspaceRemoved(id)
            }
            PendingChange::Nothing => ChangeOutcome::Unchanged,
        }
    }

    /// Build state from whatever is on disk right now, without watching.
    ///
    /// Files that cannot be read are skipped; their errors are returned so
    /// the caller can report them.
    pub fn load_initial(&mut self, now: DateTime<Utc>) -> Result<Vec<SyncError>, SyncError> {
        let filter = WatchFilter::new(&self.layout().data_dir)?;
        let mut failures = Vec::new();
        for path in initial_scan(&filter) {
            let change = FileChange::new(path, ChangeKind::Added);
            if let Err(err) = self.apply_change(&change, now) {
                failures.push(err);
            }
        }
        info!(
            event = "initial_load",
            tasks = self.task_count(),
            workspaces = self.workspace_count()
        );
        Ok(failures)
    }
}

/// Progress file contents for one workspace, live or archived.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetail {
    pub raw: String,
    #[serde(flatten)]
    pub record: ProgressRecord,
}

/// Look up `PROGRESS.md` for `id`, preferring the live workspace over the
/// archived one.
pub fn progress_detail(layout: &DataLayout, id: &str) -> Result<Option<ProgressDetail>, SyncError> {
    if !crate::is_identifier(id) {
        return Ok(None);
    }
    let candidates = [
        layout.workspace_dir(id).join(crate::layout::PROGRESS_FILE),
        layout
            .archived_workspace_dir(id)
            .join(crate::layout::PROGRESS_FILE),
    ];
    for path in candidates {
        if let Some(raw) = read_source(&path)? {
            let record = parse_progress(&raw);
            return Ok(Some(ProgressDetail { raw, record }));
        }
    }
    Ok(None)
}
