//! Reader for the `workspace-path.txt` file written by the workspace bootstrap.
//!
//! The file holds `KEY=VALUE` lines; only the directory keys are used here.

use crate::sync::read_source;
use crate::SyncError;
use std::path::{Path, PathBuf};

pub const WORKSPACE_PATH_FILE: &str = "workspace-path.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub data_dir: Option<PathBuf>,
    pub workspace_dir: Option<PathBuf>,
}

pub fn parse_workspace_paths(content: &str) -> WorkspacePaths {
    let mut paths = WorkspacePaths::default();
    for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "WORKSPACE_DATA_DIR" => paths.data_dir = Some(PathBuf::from(value)),
            "WORKSPACE_DIR" => paths.workspace_dir = Some(PathBuf::from(value)),
            _ => {}
        }
    }
    paths
}

/// `Ok(None)` when the file is absent.
pub fn load_workspace_paths(path: &Path) -> Result<Option<WorkspacePaths>, SyncError> {
    Ok(read_source(path)?.map(|content| parse_workspace_paths(&content)))
}

/// The data directory named by the config file at `path`.
pub fn data_dir_from_file(path: &Path) -> Result<PathBuf, SyncError> {
    load_workspace_paths(path)?
        .ok_or_else(|| SyncError::Config(format!("{} not found", path.display())))?
        .data_dir
        .ok_or_else(|| {
            SyncError::Config(format!("WORKSPACE_DATA_DIR missing from {}", path.display()))
        })
}
