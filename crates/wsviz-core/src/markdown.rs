//! Line-oriented parsers for the task, progress and workspace markdown files.
//!
//! None of these fail: anything that is not recognised is skipped and the
//! documented default is used instead.

use crate::{
    is_word_char, ArchivedTask, InfoRecord, Priority, ProgressRecord, TaskEntry, TaskStatus,
};
use chrono::NaiveDate;

const OPEN_CHECKBOX: &str = "- [ ] ";
const DONE_CHECKBOX: &str = "- [x] ";
const ID_MARKER: &str = " #id:";

const DEFAULT_PROGRESS_TITLE: &str = "Unknown Task";
const DEFAULT_PROGRESS_STATUS: &str = "In Progress";
const DEFAULT_WORKSPACE_TITLE: &str = "Unknown Workspace";

#[derive(Debug, Default)]
struct TaskBlock {
    title: String,
    id: String,
    priority: Option<Priority>,
    created: Option<String>,
    due: Option<String>,
    completed: Option<String>,
    tags: Option<Vec<String>>,
    context: Option<String>,
}

enum BlockState {
    NoTask,
    InTask(TaskBlock),
}

/// Split a checklist file into task blocks headed by `marker` lines.
fn task_blocks(content: &str, marker: &str) -> Vec<TaskBlock> {
    let mut blocks: Vec<TaskBlock> = Vec::new();
    let mut state = BlockState::NoTask;

    for line in content.lines() {
        if let Some((title, id)) = task_header(line, marker) {
            if let BlockState::InTask(done) = std::mem::replace(&mut state, BlockState::NoTask) {
                push_block(&mut blocks, done);
            }
            state = BlockState::InTask(TaskBlock {
                title: title.to_string(),
                id: id.to_string(),
                ..TaskBlock::default()
            });
            continue;
        }
        if let BlockState::InTask(block) = &mut state {
            apply_sub_field(block, line);
        }
    }
    if let BlockState::InTask(done) = state {
        push_block(&mut blocks, done);
    }
    blocks
}

/// A repeated identifier replaces the earlier block in its original slot.
fn push_block(blocks: &mut Vec<TaskBlock>, block: TaskBlock) {
    match blocks.iter_mut().find(|existing| existing.id == block.id) {
        Some(existing) => *existing = block,
        None => blocks.push(block),
    }
}

fn task_header<'a>(line: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let rest = line.strip_prefix(marker)?;
    let split = rest.rfind(ID_MARKER)?;
    let title = &rest[..split];
    let id = rest[split + ID_MARKER.len()..].trim_end();
    if title.is_empty() || !crate::is_identifier(id) {
        return None;
    }
    Some((title, id))
}

fn apply_sub_field(block: &mut TaskBlock, line: &str) {
    let Some(item) = line.trim().strip_prefix("- ") else {
        return;
    };
    let Some((name, value)) = item.split_once(": ") else {
        return;
    };
    let value = value.trim();
    match name {
        "priority" if crate::is_identifier(value) => {
            block.priority = Some(value.parse().unwrap_or_default());
        }
        "created" if is_date_like(value) => block.created = Some(value.to_string()),
        "due" if is_date_like(value) => block.due = Some(value.to_string()),
        "completed" if is_date_like(value) => block.completed = Some(value.to_string()),
        "tags" => {
            if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
                if !inner.contains(']') {
                    block.tags = Some(split_tags(inner));
                }
            }
        }
        "context" if !value.is_empty() => block.context = Some(value.to_string()),
        _ => {}
    }
}

fn split_tags(inner: &str) -> Vec<String> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_date_like(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit() || ch == '-')
}

/// Parse the active task list. `today` fills in a missing `created` date.
pub fn parse_active_tasks(content: &str, today: NaiveDate) -> Vec<TaskEntry> {
    let today = today.format("%Y-%m-%d").to_string();
    task_blocks(content, OPEN_CHECKBOX)
        .into_iter()
        .map(|block| TaskEntry {
            id: block.id,
            title: block.title,
            priority: block.priority.unwrap_or_default(),
            created: block.created.unwrap_or_else(|| today.clone()),
            due: block.due,
            tags: block.tags.unwrap_or_default(),
            context: block.context.unwrap_or_default(),
        })
        .collect()
}

/// Parse an archive file. Every task is `Finished`.
pub fn parse_archived_tasks(content: &str) -> Vec<ArchivedTask> {
    task_blocks(content, DONE_CHECKBOX)
        .into_iter()
        .map(|block| ArchivedTask {
            id: block.id,
            title: block.title,
            priority: block.priority.unwrap_or_default(),
            created: block.created,
            completed: block.completed,
            tags: block.tags.unwrap_or_default(),
            context: block.context.unwrap_or_default(),
            status: TaskStatus::Finished,
        })
        .collect()
}

enum FocusState {
    None,
    InFocusBlock,
    Done,
}

pub fn parse_progress(content: &str) -> ProgressRecord {
    let mut title: Option<String> = None;
    let mut status: Option<String> = None;
    let mut explicit: Option<u8> = None;
    let mut focus: Option<String> = None;
    let mut focus_state = FocusState::None;
    let mut completed = 0u32;
    let mut total = 0u32;

    for line in content.lines() {
        match focus_state {
            FocusState::None if is_focus_heading(line) => {
                focus_state = FocusState::InFocusBlock;
            }
            FocusState::InFocusBlock if !line.trim().is_empty() => {
                let text = line.split('#').next().unwrap_or_default().trim();
                if !text.is_empty() {
                    focus = Some(text.to_string());
                }
                focus_state = FocusState::Done;
            }
            _ => {}
        }

        if title.is_none() {
            title = labelled(line, "# Progress: ")
                .map(str::trim)
                .find(|value| !value.is_empty())
                .map(str::to_string);
        }
        if status.is_none() {
            status = labelled(line, "**Status:** ")
                .map(|value| value.split('|').next().unwrap_or_default().trim())
                .find(|value| !value.is_empty())
                .map(str::to_string);
        }
        if explicit.is_none() {
            explicit = labelled(line, "**Progress:** ").find_map(percentage);
        }

        let (done, seen) = count_checkboxes(line);
        completed = completed.saturating_add(done);
        total = total.saturating_add(seen);
    }

    let progress = explicit.unwrap_or_else(|| checkbox_percentage(completed, total));

    ProgressRecord {
        title: title.unwrap_or_else(|| DEFAULT_PROGRESS_TITLE.to_string()),
        status: status.unwrap_or_else(|| DEFAULT_PROGRESS_STATUS.to_string()),
        current_focus: focus.unwrap_or_default(),
        completed_phases: completed,
        total_phases: total,
        progress,
    }
}

pub fn parse_workspace_info(content: &str) -> InfoRecord {
    let mut title: Option<String> = None;
    let mut priority: Option<Priority> = None;
    let mut due: Option<String> = None;
    let mut task_id: Option<String> = None;

    for line in content.lines() {
        if title.is_none() {
            title = labelled(line, "# Workspace: ")
                .map(str::trim)
                .find(|value| !value.is_empty())
                .map(str::to_string);
        }
        if priority.is_none() {
            priority = labelled(line, "**Priority:** ")
                .map(|value| leading(value, is_word_char))
                .find(|value| !value.is_empty())
                .map(|value| value.parse().unwrap_or_default());
        }
        if due.is_none() {
            due = labelled(line, "**Due:** ")
                .map(|value| leading(value, |ch| ch.is_ascii_digit() || ch == '-'))
                .find(|value| !value.is_empty())
                .map(str::to_string);
        }
        if task_id.is_none() {
            task_id = labelled(line, "**Task ID:** ")
                .map(|value| leading(value, is_word_char))
                .find(|value| !value.is_empty())
                .map(str::to_string);
        }
    }

    InfoRecord {
        title: title.unwrap_or_else(|| DEFAULT_WORKSPACE_TITLE.to_string()),
        priority: priority.unwrap_or_default(),
        due,
        task_id,
    }
}

/// Text following each occurrence of `label` in `line`.
fn labelled<'a>(line: &'a str, label: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    line.match_indices(label)
        .map(move |(idx, _)| &line[idx + label.len()..])
}

fn leading(value: &str, keep: impl Fn(char) -> bool) -> &str {
    let end = value
        .char_indices()
        .find(|(_, ch)| !keep(*ch))
        .map(|(idx, _)| idx)
        .unwrap_or(value.len());
    &value[..end]
}

fn percentage(value: &str) -> Option<u8> {
    let digits = leading(value, |ch| ch.is_ascii_digit());
    if digits.is_empty() || !value[digits.len()..].starts_with('%') {
        return None;
    }
    let parsed = digits.parse::<u64>().unwrap_or(u64::MAX);
    Some(parsed.min(100) as u8)
}

fn is_focus_heading(line: &str) -> bool {
    line.split_once("## Current Focus")
        .map(|(_, rest)| rest.trim().is_empty())
        .unwrap_or(false)
}

/// Returns `(completed, total)` checklist markers found in `line`.
/// Share of ticked boxes, rounded half up. No boxes means 0.
fn checkbox_percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let (completed, total) = (u64::from(completed), u64::from(total));
    ((200 * completed + total) / (2 * total)).min(100) as u8
}

fn count_checkboxes(line: &str) -> (u32, u32) {
    let mut completed = 0;
    let mut total = 0;
    for (idx, _) in line.match_indices("- [") {
        let mut rest = line[idx + 3..].chars();
        match (rest.next(), rest.next()) {
            (Some('x'), Some(']')) => {
                completed += 1;
                total += 1;
            }
            (Some(ch), Some(']')) if ch.is_whitespace() => total += 1,
            _ => {}
        }
    }
    (completed, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid date")
    }

    #[test]
    fn checkbox_percentage_handles_huge_counts() {
        assert_eq!(checkbox_percentage(0, 0), 0);
        assert_eq!(checkbox_percentage(1, 3), 33);
        assert_eq!(checkbox_percentage(2, 3), 67);
        assert_eq!(checkbox_percentage(30_000_000, 60_000_000), 50);
        assert_eq!(checkbox_percentage(u32::MAX, u32::MAX), 100);
    }

    #[test]
    fn parses_active_task_with_sub_fields() {
        let content = "- [ ] Fix login bug #id:abc123\n  - priority: p0\n  - due: 2024-01-01";
        let tasks = parse_active_tasks(content, today());
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.id, "abc123");
        assert_eq!(task.title, "Fix login bug");
        assert_eq!(task.priority, Priority::P0);
        assert_eq!(task.due.as_deref(), Some("2024-01-01"));
        assert_eq!(task.created, "2024-03-15");
        assert!(task.tags.is_empty());
        assert_eq!(task.context, "");
    }

    #[test]
    fn rendered_task_fields_parse_back() {
        let cases = [
            (Priority::P0, "2023-12-01", Some("2024-01-01"), vec!["api", "auth"], "Login flow"),
            (Priority::P3, "2024-02-29", None, vec![], "Cleanup: old paths"),
            (Priority::P1, "2024-03-01", Some("2024-03-09"), vec!["ui"], "x"),
        ];
        for (idx, (priority, created, due, tags, context)) in cases.iter().enumerate() {
            let mut text = format!("- [ ] Task number {idx} #id:t{idx}\n");
            text.push_str(&format!("  - priority: {priority}\n"));
            text.push_str(&format!("  - created: {created}\n"));
            if let Some(due) = due {
                text.push_str(&format!("  - due: {due}\n"));
            }
            text.push_str(&format!("  - tags: [{}]\n", tags.join(", ")));
            text.push_str(&format!("  - context: {context}\n"));

            let parsed = parse_active_tasks(&text, today());
            assert_eq!(parsed.len(), 1);
            let task = &parsed[0];
            assert_eq!(task.id, format!("t{idx}"));
            assert_eq!(task.priority, *priority);
            assert_eq!(task.created, *created);
            assert_eq!(task.due.as_deref(), *due);
            assert_eq!(task.tags, tags.iter().map(|t| t.to_string()).collect::<Vec<_>>());
            assert_eq!(task.context, *context);
        }
    }

    #[test]
    fn tasks_keep_source_order_and_ignore_noise() {
        let content = "# Active\n\nstray line\n  - priority: p0\n\
                       - [ ] First #id:one\n  - tags: []\n\
                       - [x] Done already #id:zzz\n\
                       - [ ] Second with #id:marker inside #id:two\n  - priority: P1\n\
                       - [ ] No id here\n\
                       - [ ] Bad id #id:has-dash\n";
        let tasks = parse_active_tasks(content, today());
        let ids: Vec<_> = tasks.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
        assert_eq!(tasks[0].priority, Priority::P2);
        assert_eq!(tasks[1].title, "Second with #id:marker inside");
        assert_eq!(tasks[1].priority, Priority::P1);
    }

    #[test]
    fn duplicate_ids_keep_the_later_block() {
        let content = "- [ ] Old #id:dup\n  - priority: p3\n- [ ] Other #id:b\n- [ ] New #id:dup\n";
        let tasks = parse_active_tasks(content, today());
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "dup");
        assert_eq!(tasks[0].title, "New");
        assert_eq!(tasks[0].priority, Priority::P2);
    }

    #[test]
    fn invalid_sub_field_values_fall_back_to_defaults() {
        let content = "- [ ] Task #id:a\n  - due: next week\n  - priority: p9\n  - context:\r\n";
        let tasks = parse_active_tasks(content, today());
        assert_eq!(tasks[0].due, None);
        assert_eq!(tasks[0].priority, Priority::P2);
        assert_eq!(tasks[0].context, "");
    }

    #[test]
    fn archived_tasks_are_finished_and_keep_completed() {
        let content = "- [x] Ship it #id:s1\n  - completed: 2024-03-14\n  - due: 2024-03-20\n\
                       - [ ] Not done #id:s2\n\
                       - [x] Second #id:s3\n  - created: 2024-03-01\n";
        let tasks = parse_archived_tasks(content);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].completed.as_deref(), Some("2024-03-14"));
        assert_eq!(tasks[0].created, None);
        assert_eq!(tasks[1].id, "s3");
        assert_eq!(tasks[1].created.as_deref(), Some("2024-03-01"));
        assert!(tasks.iter().all(|task| task.status == TaskStatus::Finished));
    }

    #[test]
    fn explicit_progress_wins_over_checklist() {
        let content = "# Progress: Login rework\n\n**Status:** Building | **Progress:** 45%\n\n\
                       ## Current Focus\n\nWiring the session store\n\n## Next\n\
                       - [x] one\n- [x] two\n- [x] three\n- [ ] four\n- [ ] five\n";
        let record = parse_progress(content);
        assert_eq!(record.title, "Login rework");
        assert_eq!(record.status, "Building");
        assert_eq!(record.progress, 45);
        assert_eq!(record.completed_phases, 3);
        assert_eq!(record.total_phases, 5);
        assert_eq!(record.current_focus, "Wiring the session store");
    }

    #[test]
    fn progress_falls_back_to_checklist_ratio() {
        let content = "- [x] a\n- [ ] b\n- [ ] c\n";
        let record = parse_progress(content);
        assert_eq!(record.progress, 33);
        let content = "- [x] a\n- [ ] b\n- [x] c\n";
        assert_eq!(parse_progress(content).progress, 67);
        let content = "- [x] a\n- [ ] b\n";
        assert_eq!(parse_progress(content).progress, 50);
    }

    #[test]
    fn empty_progress_uses_defaults() {
        let record = parse_progress("");
        assert_eq!(record.title, "Unknown Task");
        assert_eq!(record.status, "In Progress");
        assert_eq!(record.current_focus, "");
        assert_eq!(record.progress, 0);
        assert_eq!(record.total_phases, 0);
    }

    #[test]
    fn focus_stops_at_heading() {
        let content = "## Current Focus\n## Notes\nsomething\n";
        assert_eq!(parse_progress(content).current_focus, "");
        let content = "## Current Focus  \n\n  Tests # later\n";
        assert_eq!(parse_progress(content).current_focus, "Tests");
    }

    #[test]
    fn explicit_percentage_is_capped() {
        let record = parse_progress("**Progress:** 250%\n");
        assert_eq!(record.progress, 100);
        let record = parse_progress("**Progress:** soon\n**Progress:** 10%\n");
        assert_eq!(record.progress, 10);
    }

    #[test]
    fn parses_workspace_info() {
        let content = "# Workspace: Login rework\n\n**Priority:** P1\n**Due:** 2024-04-01\n\
                       **Task ID:** abc123\n";
        let info = parse_workspace_info(content);
        assert_eq!(info.title, "Login rework");
        assert_eq!(info.priority, Priority::P1);
        assert_eq!(info.due.as_deref(), Some("2024-04-01"));
        assert_eq!(info.task_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn workspace_info_defaults() {
        let info = parse_workspace_info("just notes\n");
        assert_eq!(info.title, "Unknown Workspace");
        assert_eq!(info.priority, Priority::P2);
        assert_eq!(info.due, None);
        assert_eq!(info.task_id, None);
    }
}
