//! Operation history kept in the workspace.
//!
//! Queries, anonymous Apex, describes and test results are written to
//! `<workspace>/.history/<category>/<name>-<timestamp>.log` so earlier runs
//! can be reopened.

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::Result;

const HISTORY_DIR: &str = ".history";

/// Record one run of an operation. Returns the written file.
pub fn record(workspace: &Path, category: &str, name: &str, content: &str) -> Result<PathBuf> {
    let dir = workspace.join(HISTORY_DIR).join(category);
    std::fs::create_dir_all(&dir)?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
    let path = dir.join(format!("{}-{stamp}.log", sanitize(name)));
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Every history file of a category, oldest first.
pub fn entries(workspace: &Path, category: &str) -> Result<Vec<PathBuf>> {
    let dir = workspace.join(HISTORY_DIR).join(category);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    files.sort();
    Ok(files)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
