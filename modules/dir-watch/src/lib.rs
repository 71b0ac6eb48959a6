//! Non-recursive watch of one directory for report files.
//!
//! Existing matching files are emitted first as [`FileEventKind::Added`],
//! oldest modification time first. After that, debounced create and modify
//! notifications are forwarded as they settle. Dropping the [`DirWatch`] stops
//! the watch.

use anyhow::{Context, Result};
use monitor_core::MonitorError;
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Added,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub pattern: glob::Pattern,
    pub debounce: Duration,
}

impl WatchOptions {
    pub fn new(pattern: &str, debounce: Duration) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern).with_context(|| format!("invalid file pattern {pattern:?}"))?;
        Ok(WatchOptions { pattern, debounce })
    }

    fn accepts(&self, path: &Path) -> bool {
        path.file_name().and_then(|n| n.to_str()).is_some_and(|n| self.pattern.matches(n))
    }
}

fn invalid(path: &Path, reason: impl ToString) -> MonitorError {
    MonitorError::InvalidDirectory { path: path.to_path_buf(), reason: reason.to_string() }
}

/// The path must name an existing, listable directory. Returns it canonicalized.
pub fn validate_directory(path: &Path) -> Result<PathBuf, MonitorError> {
    if path.as_os_str().is_empty() {
        return Err(invalid(path, "empty path"));
    }
    let meta = std::fs::metadata(path).map_err(|e| invalid(path, e))?;
    if !meta.is_dir() {
        return Err(invalid(path, "not a directory"));
    }
    std::fs::read_dir(path).map_err(|e| invalid(path, e))?;
    path.canonicalize().map_err(|e| invalid(path, e))
}

/// Matching files directly inside `dir`, ordered by modification time then name.
pub fn initial_files(dir: &Path, options: &WatchOptions) -> Result<Vec<PathBuf>, MonitorError> {
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| invalid(dir, e))? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !options.accepts(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_file() {
            files.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), path));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

pub struct DirWatch {
    dir: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl std::fmt::Debug for DirWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirWatch").field("dir", &self.dir).finish()
    }
}

impl DirWatch {
    /// Start watching `dir`, sending events to `tx`. Nothing is sent if the
    /// directory is rejected.
    pub fn start(dir: &Path, options: &WatchOptions, tx: UnboundedSender<FileEvent>) -> Result<DirWatch, MonitorError> {
        let dir = validate_directory(dir)?;
        let existing = initial_files(&dir, options)?;

        let live_tx = tx.clone();
        let opts = options.clone();
        let mut debouncer = new_debouncer(options.debounce, None, move |result: DebounceEventResult| match result {
            Ok(events) => {
                let mut seen = HashSet::new();
                for ev in events {
                    let kind = match ev.event.kind {
                        EventKind::Create(_) => FileEventKind::Added,
                        EventKind::Modify(_) => FileEventKind::Changed,
                        _ => continue,
                    };
                    for path in &ev.event.paths {
                        if !opts.accepts(path) || !path.is_file() || !seen.insert(path.clone()) {
                            continue;
                        }
                        debug!(file = %path.display(), ?kind, "file event");
                        let _ = live_tx.send(FileEvent { path: path.clone(), kind });
                    }
                }
            }
            Err(errors) => {
                for e in errors {
                    warn!(error = %e, "watcher error");
                }
            }
        })
        .map_err(|e| invalid(&dir, e))?;
        debouncer.watch(&dir, RecursiveMode::NonRecursive).map_err(|e| invalid(&dir, e))?;

        info!(dir = %dir.display(), existing = existing.len(), "watching directory");
        for path in existing {
            let _ = tx.send(FileEvent { path, kind: FileEventKind::Added });
        }
        Ok(DirWatch { dir, _debouncer: debouncer })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }
}
