//! Locate the newest rendered video among candidate output directories.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

/// File extensions treated as finished renders.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "mov"];

/// A rendered file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl Artifact {
    /// Final path component, used for the storage key.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Newest media file under any of `roots`, modified no earlier than
/// `min_modified` when given.
///
/// Roots that do not exist contribute nothing; unreadable entries are
/// skipped.
pub fn find_latest(roots: &[PathBuf], min_modified: Option<SystemTime>) -> Option<Artifact> {
    let mut best: Option<Artifact> = None;

    for root in roots {
        if !root.is_dir() {
            tracing::debug!(root = %root.display(), "Artifact root missing, skipping");
            continue;
        }

        for entry in WalkDir::new(root).follow_links(true).into_iter().flatten() {
            if !entry.file_type().is_file() || !is_media(entry.path()) {
                continue;
            }
            let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                continue;
            };
            if min_modified.is_some_and(|floor| modified < floor) {
                continue;
            }
            if best.as_ref().map_or(true, |b| modified > b.modified) {
                best = Some(Artifact {
                    path: entry.into_path(),
                    modified,
                });
            }
        }
    }

    best
}

fn is_media(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| MEDIA_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(ext)))
}
