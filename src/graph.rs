//! Batches a scanned corpus into the Store's atomic edge-replacement
//! operation, and produces the per-scan report described in SPEC_FULL §3.1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{AnalyzerError, Result};
use crate::extractor::{extract_inactive, extract_line, RawKind};
use crate::lexer::LexicalFilter;
use crate::model::{InvocationStyle, Language, Reference, ResolutionStatus, TargetKind};
use crate::resolver::{self, TargetClass};
use crate::store::Store;
use crate::walker::{self, EntryKind, WalkKinds};

/// Per-error-kind counts and sample paths accumulated over one scan.
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub scripts_seen: u64,
    pub control_files_seen: u64,
    pub unreadable: Vec<PathBuf>,
    pub parse_anomalies: Vec<PathBuf>,
    pub cancelled: bool,
    pub duration: std::time::Duration,
}

impl ScanReport {
    const SAMPLE_LIMIT: usize = 10;

    pub fn status(&self) -> &'static str {
        if self.cancelled {
            "aborted"
        } else if self.unreadable.is_empty() && self.parse_anomalies.is_empty() {
            "ok"
        } else {
            "ok_with_warnings"
        }
    }

    fn push_unreadable(&mut self, path: PathBuf) {
        if self.unreadable.len() < Self::SAMPLE_LIMIT {
            self.unreadable.push(path);
        }
    }

    fn push_anomaly(&mut self, path: PathBuf) {
        if self.parse_anomalies.len() < Self::SAMPLE_LIMIT {
            self.parse_anomalies.push(path);
        }
    }
}

/// One parsed file's raw output, ready for resolution + persistence.
struct ParsedFile {
    path: PathBuf,
    size: u64,
    mtime: i64,
    line_count: u64,
    language: Language,
    active_refs: Vec<(u64, String, InvocationStyle, RawKind)>,
    inactive_refs: Vec<(u64, String, InvocationStyle)>,
    anomaly: bool,
}

fn parse_script(path: &Path, size: u64, mtime: i64, language: Language) -> Option<ParsedFile> {
    let content = match walker::read_lossy(path) {
        Ok(c) => c,
        Err(_) => return None,
    };

    let mut filter = LexicalFilter::new();
    let tagged = filter.classify(&content);

    let mut active_refs = Vec::new();
    let mut inactive_refs = Vec::new();

    for line in &tagged {
        for r in extract_line(line) {
            active_refs.push((r.line, r.raw_text, r.style, r.kind));
        }
        for r in extract_inactive(line) {
            inactive_refs.push((r.line, r.raw_text, r.style));
        }
    }

    Some(ParsedFile {
        path: path.to_path_buf(),
        size,
        mtime,
        line_count: tagged.len() as u64,
        language,
        active_refs,
        inactive_refs,
        anomaly: filter.had_anomaly(),
    })
}

/// Run a full scan: walk both roots, parse every script in parallel, resolve
/// references against the corpus, and persist everything through the Store.
///
/// All persistence for one scan (control file upserts, script upserts, edge
/// replacement, the stale sweep) happens inside a single scan-level
/// transaction (`Store::begin_scan`/`commit_scan`/`abort_scan`, §4.1): a
/// failure or cancellation partway through aborts that transaction and
/// leaves the store exactly as it was before the scan started, rather than
/// leaving earlier iterations' writes permanently committed.
///
/// When `incremental` is true, a script whose `(path, size, mtime)` already
/// matches the store is skipped entirely: it is neither re-parsed nor
/// re-persisted, and its existing edges are left untouched (§4.6 cache-hit
/// skip).
pub fn analyze(
    store: &Store,
    script_root: &Path,
    ctl_root: &Path,
    cancel: Arc<AtomicBool>,
    incremental: bool,
) -> Result<ScanReport> {
    let start = std::time::Instant::now();
    let mut report = ScanReport::default();

    if !script_root.exists() {
        return Err(AnalyzerError::InputNotFound(script_root.to_path_buf()));
    }

    let (script_entries, script_warnings) =
        walker::walk(script_root, WalkKinds { scripts: true, control_files: false });
    let (ctl_entries, ctl_warnings) =
        walker::walk(ctl_root, WalkKinds { scripts: false, control_files: true });

    for w in script_warnings.iter().chain(ctl_warnings.iter()) {
        report.push_unreadable(w.path.clone());
    }

    let scripts = script_entries;
    let control_files = ctl_entries;

    report.scripts_seen = scripts.len() as u64;
    report.control_files_seen = control_files.len() as u64;

    // Split off cache hits before the parallel parse so unchanged scripts
    // never pay for re-lexing/re-extraction.
    let mut to_parse = Vec::with_capacity(scripts.len());
    let mut cache_hits: Vec<(PathBuf, i64)> = Vec::new();
    for entry in &scripts {
        if incremental {
            if let Some(existing) = store.get_script_by_path(&entry.path)? {
                if existing.size == entry.size && existing.mtime == entry.mtime {
                    cache_hits.push((entry.path.clone(), existing.id));
                    continue;
                }
            }
        }
        to_parse.push(entry);
    }

    // Parse in parallel (Reference Extractor is pure/CPU-bound); persistence
    // stays single-writer via the Store's own mutex, per §5.
    let parsed: Vec<ParsedFile> = to_parse
        .par_iter()
        .filter_map(|entry| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let EntryKind::Script(lang) = entry.kind else {
                return None;
            };
            parse_script(&entry.path, entry.size, entry.mtime, lang)
        })
        .collect();

    if cancel.load(Ordering::Relaxed) {
        report.cancelled = true;
        report.duration = start.elapsed();
        return Err(AnalyzerError::Cancelled);
    }

    store.begin_scan()?;
    let outcome = persist_scan(store, &control_files, &parsed, &cache_hits, &cancel, &mut report);

    match outcome {
        Ok(()) => store.commit_scan()?,
        Err(err) => {
            if let Err(abort_err) = store.abort_scan() {
                log::warn!("failed to roll back aborted scan: {abort_err}");
            }
            report.duration = start.elapsed();
            return Err(err);
        }
    }

    report.duration = start.elapsed();
    log::debug!(
        "scan complete: {} scripts, {} control files, status={}",
        report.scripts_seen,
        report.control_files_seen,
        report.status()
    );
    Ok(report)
}

/// The write side of a scan, run entirely inside the caller's scan-level
/// transaction. Returns `Err(Cancelled)` without persisting anything further
/// the moment `cancel` fires.
fn persist_scan(
    store: &Store,
    control_files: &[walker::WalkEntry],
    parsed: &[ParsedFile],
    cache_hits: &[(PathBuf, i64)],
    cancel: &AtomicBool,
    report: &mut ScanReport,
) -> Result<()> {
    for cf in control_files {
        store.upsert_control_file(&cf.path, cf.size)?;
    }

    // First pass: register every script so basename resolution can see the
    // full corpus regardless of scan order.
    let mut script_ids: HashMap<PathBuf, i64> = HashMap::new();
    for (path, id) in cache_hits {
        script_ids.insert(path.clone(), *id);
    }
    for file in parsed {
        if file.anomaly {
            report.push_anomaly(file.path.clone());
        }
        let id = store.upsert_script(&file.path, file.size, file.mtime, file.line_count, file.language)?;
        script_ids.insert(file.path.clone(), id);
    }

    // Second pass: resolve + persist edges now that every script id exists.
    for file in parsed {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            return Err(AnalyzerError::Cancelled);
        }

        let script_id = script_ids[&file.path];
        let referring_dir = file.path.parent().unwrap_or(Path::new("/"));

        let mut edges = Vec::with_capacity(file.active_refs.len());
        for (line, raw_text, style, kind) in &file.active_refs {
            let edge = match kind {
                RawKind::Procedure { qualified } => {
                    let proc_id = store.upsert_procedure(qualified)?;
                    Reference {
                        source_id: script_id,
                        target_id: Some(proc_id),
                        target_kind: TargetKind::Procedure,
                        line: *line,
                        raw_text: raw_text.clone(),
                        style: *style,
                        status: ResolutionStatus::Resolved,
                    }
                }
                RawKind::ControlFile { basename } => {
                    let (target, status) = resolver::resolve(
                        store,
                        TargetClass::ControlFile,
                        basename,
                        None,
                        referring_dir,
                    );
                    Reference {
                        source_id: script_id,
                        target_id: target,
                        target_kind: TargetKind::ControlFile,
                        line: *line,
                        raw_text: raw_text.clone(),
                        style: *style,
                        status,
                    }
                }
                RawKind::Script { basename, written_path } => {
                    let (target, status) = resolver::resolve(
                        store,
                        TargetClass::Script,
                        basename,
                        written_path.as_deref(),
                        referring_dir,
                    );
                    Reference {
                        source_id: script_id,
                        target_id: target,
                        target_kind: TargetKind::Script,
                        line: *line,
                        raw_text: raw_text.clone(),
                        style: *style,
                        status,
                    }
                }
            };
            edges.push(edge);
        }

        store.replace_edges_of(script_id, &edges)?;
        store.replace_inactive_references(script_id, &file.inactive_refs)?;
    }

    let seen_paths: Vec<String> = parsed
        .iter()
        .map(|f| f.path.to_string_lossy().into_owned())
        .chain(cache_hits.iter().map(|(p, _)| p.to_string_lossy().into_owned()))
        .collect();
    store.mark_missing_as_stale(&seen_paths)?;

    Ok(())
}
