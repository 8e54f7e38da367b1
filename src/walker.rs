//! Recursive directory traversal: discover scripts and control files, skip
//! hidden entries and symlink cycles, warn-and-skip on unreadable files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use crate::model::Language;

/// What kind of file a discovered entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Script(Language),
    ControlFile,
}

/// One discovered file plus the filesystem identity needed for change detection.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: i64,
}

/// A non-fatal problem encountered while walking (unreadable file, bad metadata).
#[derive(Debug, Clone)]
pub struct WalkWarning {
    pub path: PathBuf,
    pub message: String,
}

/// Which kinds of files the caller wants discovered.
#[derive(Debug, Clone, Copy)]
pub struct WalkKinds {
    pub scripts: bool,
    pub control_files: bool,
}

impl WalkKinds {
    pub fn both() -> Self {
        WalkKinds {
            scripts: true,
            control_files: true,
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn classify(path: &Path, kinds: WalkKinds) -> Option<EntryKind> {
    let ext = path.extension()?.to_str()?;
    if kinds.scripts {
        if let Some(lang) = Language::from_extension(ext) {
            return Some(EntryKind::Script(lang));
        }
    }
    if kinds.control_files && ext.eq_ignore_ascii_case("ctl") {
        return Some(EntryKind::ControlFile);
    }
    None
}

/// Walk `root` depth-first, yielding classified entries and collecting warnings.
///
/// Symbolic links are not followed (`WalkDir::follow_links(false)`, the
/// default) to avoid traversal cycles. Hidden files and directories are
/// skipped entirely.
pub fn walk(root: &Path, kinds: WalkKinds) -> (Vec<WalkEntry>, Vec<WalkWarning>) {
    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    let iter = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

    for item in iter {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                log::warn!("walk error at {}: {}", path.display(), err);
                warnings.push(WalkWarning {
                    path,
                    message: err.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(kind) = classify(entry.path(), kinds) else {
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                warnings.push(WalkWarning {
                    path: entry.path().to_path_buf(),
                    message: format!("failed to stat: {err}"),
                });
                continue;
            }
        };

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        entries.push(WalkEntry {
            path: entry.path().to_path_buf(),
            kind,
            size: metadata.len(),
            mtime,
        });
    }

    (entries, warnings)
}

/// Read a file's contents as UTF-8, replacing invalid sequences and warning.
pub fn read_lossy(path: &Path) -> std::result::Result<String, WalkWarning> {
    let bytes = fs::read(path).map_err(|err| WalkWarning {
        path: path.to_path_buf(),
        message: format!("failed to read: {err}"),
    })?;

    let text = String::from_utf8_lossy(&bytes);
    if let std::borrow::Cow::Owned(_) = &text {
        log::warn!("{}: invalid UTF-8 replaced with U+FFFD", path.display());
    }
    Ok(text.into_owned())
}
