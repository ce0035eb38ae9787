//! Recently completed tasks, read straight from the dated archive files.
//!
//! Nothing here is cached: every call re-reads the archive directory.

use crate::markdown::parse_archived_tasks;
use crate::ArchivedTask;
use chrono::{Duration, NaiveDate};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Number of calendar days, ending today, whose archive files are included.
pub const ARCHIVE_WINDOW_DAYS: i64 = 3;

/// Completed tasks from archive files dated within the trailing window,
/// most recent file first.
///
/// The window result is returned whole. A short window is not padded from
/// older files, and a long one is not capped.
pub fn recent_archived_tasks(archive_dir: &Path, today: NaiveDate) -> Vec<ArchivedTask> {
    let entries = match fs::read_dir(archive_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let earliest = today - Duration::days(ARCHIVE_WINDOW_DAYS - 1);

    let mut files: Vec<(NaiveDate, String)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let stem = name.strip_suffix(".md")?;
            let date = NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()?;
            Some((date, name))
        })
        .filter(|(date, _)| *date >= earliest && *date <= today)
        .collect();
    files.sort_by(|a, b| b.0.cmp(&a.0));

    let mut tasks = Vec::new();
    for (date, name) in files {
        let path = archive_dir.join(&name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!(event = "archive_read_failed", path = %path.display(), error = %err);
                continue;
            }
        };
        let file_date = date.format("%Y-%m-%d").to_string();
        tasks.extend(parse_archived_tasks(&content).into_iter().map(|mut task| {
            if task.completed.is_none() {
                task.completed = Some(file_date.clone());
            }
            task
        }));
    }
    tasks
}
