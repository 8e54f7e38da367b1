//! Forward, backward, procedure-search, and corpus-summary queries. The
//! read-only surface an external viewer/export collaborator is expected to
//! consume (§4.7), shaped after the teacher's `commands/assay/internal`
//! query modules (same LIKE-based search, same result ordering discipline).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::model::{InvocationStyle, ResolutionStatus, TargetKind};
use crate::store::Store;

pub struct Query<'a> {
    store: &'a Store,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForwardRow {
    pub target_kind: TargetKind,
    pub target_identity: String,
    pub line: u64,
    pub style: InvocationStyle,
    pub status: ResolutionStatusView,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackwardRow {
    pub source_script: PathBuf,
    pub line: u64,
    pub style: InvocationStyle,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRow {
    pub procedure_qualified: String,
    pub source_script: PathBuf,
    pub line: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Summary {
    pub script_count: u64,
    pub control_file_count: u64,
    pub procedure_count: u64,
    pub edge_count_by_kind: HashMap<String, u64>,
}

/// A serializable mirror of `ResolutionStatus`, since the original carries a
/// `Vec<i64>` only in the ambiguous case and call sites want a flat shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResolutionStatusView {
    Resolved,
    Unresolved,
    Ambiguous { candidates: Vec<i64> },
}

impl From<&ResolutionStatus> for ResolutionStatusView {
    fn from(status: &ResolutionStatus) -> Self {
        match status {
            ResolutionStatus::Resolved => ResolutionStatusView::Resolved,
            ResolutionStatus::Unresolved => ResolutionStatusView::Unresolved,
            ResolutionStatus::Ambiguous(ids) => ResolutionStatusView::Ambiguous {
                candidates: ids.clone(),
            },
        }
    }
}

impl<'a> Query<'a> {
    pub fn new(store: &'a Store) -> Self {
        Query { store }
    }

    /// Outbound edges of the script named `script_basename`, ordered by
    /// `(line, style)`. If the basename is ambiguous in the corpus, edges
    /// from every matching script are returned (the caller already knows
    /// which script id it meant when it has one; this is the convenience
    /// name-based entry point for the CLI).
    pub fn forward_dependencies(&self, script_basename: &str) -> Result<Vec<ForwardRow>> {
        let mut rows = Vec::new();
        for script in self.store.get_scripts_by_basename(script_basename)? {
            for edge in self.store.outbound(script.id)? {
                let target_identity = self.describe_target(edge.target_kind, edge.target_id)?;
                rows.push(ForwardRow {
                    target_kind: edge.target_kind,
                    target_identity,
                    line: edge.line,
                    style: edge.style,
                    status: (&edge.status).into(),
                });
            }
        }
        Ok(rows)
    }

    /// Inbound edges to `target`, deduplicated by source script, ordered by
    /// source path.
    pub fn backward_dependencies(&self, target_basename: &str, kind: TargetKind) -> Result<Vec<BackwardRow>> {
        let target_ids: Vec<i64> = match kind {
            TargetKind::Script => self
                .store
                .get_scripts_by_basename(target_basename)?
                .into_iter()
                .map(|s| s.id)
                .collect(),
            TargetKind::ControlFile => self
                .store
                .get_control_files_by_basename(target_basename)?
                .into_iter()
                .map(|c| c.id)
                .collect(),
            TargetKind::Procedure => self
                .store
                .iter_all_procedures()?
                .into_iter()
                .filter(|p| p.qualified == target_basename || p.name == target_basename)
                .map(|p| p.id)
                .collect(),
        };

        let mut seen = std::collections::HashSet::new();
        let mut rows = Vec::new();
        for target_id in target_ids {
            for edge in self.store.inbound(target_id, kind)? {
                if !seen.insert(edge.source_id) {
                    continue;
                }
                let source_path = self
                    .store
                    .iter_all_scripts()?
                    .into_iter()
                    .find(|s| s.id == edge.source_id)
                    .map(|s| s.path)
                    .unwrap_or_default();
                rows.push(BackwardRow {
                    source_script: source_path,
                    line: edge.line,
                    style: edge.style,
                });
            }
        }
        rows.sort_by(|a, b| a.source_script.cmp(&b.source_script));
        Ok(rows)
    }

    /// Substring, case-insensitive search over procedure qualified names.
    /// Empty/whitespace-only needle returns empty. No wildcard semantics.
    pub fn search_procedures(&self, needle: &str) -> Result<Vec<SearchRow>> {
        let hits = self.store.search_procedures(needle, i64::MAX, 0)?;
        let scripts: HashMap<i64, PathBuf> = self
            .store
            .iter_all_scripts()?
            .into_iter()
            .map(|s| (s.id, s.path))
            .collect();

        Ok(hits
            .into_iter()
            .map(|(proc, source_id, line)| SearchRow {
                procedure_qualified: proc.qualified,
                source_script: scripts.get(&source_id).cloned().unwrap_or_default(),
                line,
            })
            .collect())
    }

    pub fn summary(&self) -> Result<Summary> {
        self.store.summary()
    }

    /// Debug-only surface for commented-out invocations (§9 Open Question (a)).
    pub fn debug_inactive_references(&self, script_basename: &str) -> Result<Vec<(u64, String)>> {
        let mut out = Vec::new();
        for script in self.store.get_scripts_by_basename(script_basename)? {
            let conn_rows: Vec<(u64, String)> = self.store.inactive_references(script.id)?;
            out.extend(conn_rows);
        }
        Ok(out)
    }

    fn describe_target(&self, kind: TargetKind, target_id: Option<i64>) -> Result<String> {
        let Some(target_id) = target_id else {
            return Ok(String::from("<unresolved>"));
        };
        Ok(match kind {
            TargetKind::Script => self
                .store
                .iter_all_scripts()?
                .into_iter()
                .find(|s| s.id == target_id)
                .map(|s| s.path.to_string_lossy().into_owned())
                .unwrap_or_default(),
            TargetKind::ControlFile => self
                .store
                .iter_all_control_files()?
                .into_iter()
                .find(|c| c.id == target_id)
                .map(|c| c.path.to_string_lossy().into_owned())
                .unwrap_or_default(),
            TargetKind::Procedure => self
                .store
                .iter_all_procedures()?
                .into_iter()
                .find(|p| p.id == target_id)
                .map(|p| p.qualified)
                .unwrap_or_default(),
        })
    }
}
