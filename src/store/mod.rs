//! Embedded relational persistence for the dependency graph.
//!
//! Schema creation, transactional per-scan writes and indexed reads, built
//! on `rusqlite` the way the teacher's `SqliteClient` wraps a single
//! `Mutex<Connection>` and brackets writes in transactions.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{AnalyzerError, Result};
use crate::model::{
    ControlFile, InvocationStyle, Language, Procedure, Reference, ResolutionStatus, Script,
    TargetKind,
};

/// Schema version this build understands. Bump alongside migrations below.
const SCHEMA_VERSION: i64 = 1;

/// Three attempts with exponential backoff on `SQLITE_BUSY`/locked errors
/// before giving up, per §5's retry policy for the single-writer store.
fn with_busy_retry<T>(mut f: impl FnMut() -> rusqlite::Result<T>) -> rusqlite::Result<T> {
    let mut delay = std::time::Duration::from_millis(20);
    for attempt in 0..3 {
        match f() {
            Err(rusqlite::Error::SqliteFailure(e, _))
                if attempt < 2
                    && matches!(
                        e.code,
                        rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                    ) =>
            {
                log::warn!("store busy, retrying (attempt {})", attempt + 1);
                std::thread::sleep(delay);
                delay *= 2;
            }
            other => return other,
        }
    }
    unreachable!("loop always returns on its final iteration")
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the store at `location`. Pass `":memory:"` for tests.
    pub fn open(location: &Path) -> Result<Self> {
        if let Some(parent) = location.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AnalyzerError::StoreUnavailable(rusqlite::Error::ToSqlConversionFailure(
                        Box::new(e),
                    ))
                })?;
            }
        }

        let conn = Connection::open(location)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA temp_store = MEMORY;",
        )?;

        let store = Store {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store, handy for tests and one-shot queries.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();

        let found: Option<i64> = conn
            .query_row("SELECT version FROM meta LIMIT 1", [], |row| row.get(0))
            .optional()
            .unwrap_or(None);

        if let Some(found) = found {
            if found > SCHEMA_VERSION {
                return Err(AnalyzerError::StoreIncompatible {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            log::debug!("store schema already at version {found}");
            return Ok(());
        }

        log::debug!("initializing store schema at version {SCHEMA_VERSION}");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (version INTEGER NOT NULL);

            CREATE TABLE IF NOT EXISTS script (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                basename TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                line_count INTEGER NOT NULL,
                language TEXT NOT NULL,
                stale INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_script_basename ON script(basename);

            CREATE TABLE IF NOT EXISTS control_file (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                basename TEXT NOT NULL,
                size INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_control_file_basename ON control_file(basename);

            CREATE TABLE IF NOT EXISTS procedure (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                qualified TEXT NOT NULL UNIQUE,
                qualified_lower TEXT NOT NULL,
                schema_part TEXT,
                package_part TEXT,
                name_part TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_procedure_lower ON procedure(qualified_lower);
            CREATE INDEX IF NOT EXISTS idx_procedure_schema ON procedure(schema_part);
            CREATE INDEX IF NOT EXISTS idx_procedure_package ON procedure(package_part);
            CREATE INDEX IF NOT EXISTS idx_procedure_name ON procedure(name_part);

            CREATE TABLE IF NOT EXISTS reference (
                source_id INTEGER NOT NULL,
                target_id INTEGER,
                target_kind TEXT NOT NULL,
                line INTEGER NOT NULL,
                raw_text TEXT NOT NULL,
                style TEXT NOT NULL,
                status TEXT NOT NULL,
                ambiguous_candidates TEXT,
                PRIMARY KEY (source_id, target_id, target_kind, line, style),
                FOREIGN KEY (source_id) REFERENCES script(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_reference_source ON reference(source_id);
            CREATE INDEX IF NOT EXISTS idx_reference_target ON reference(target_id, target_kind);

            CREATE TABLE IF NOT EXISTS inactive_reference (
                source_id INTEGER NOT NULL,
                line INTEGER NOT NULL,
                raw_text TEXT NOT NULL,
                style TEXT NOT NULL,
                FOREIGN KEY (source_id) REFERENCES script(id) ON DELETE CASCADE
            );
            ",
        )?;
        conn.execute("INSERT INTO meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        Ok(())
    }

    /// Identity-keyed insert-or-update; returns the script's id.
    pub fn upsert_script(
        &self,
        path: &Path,
        size: u64,
        mtime: i64,
        line_count: u64,
        language: Language,
    ) -> Result<i64> {
        let conn = self.lock();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path_str = path.to_string_lossy();

        conn.execute(
            "INSERT INTO script (path, basename, size, mtime, line_count, language, stale)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
             ON CONFLICT(path) DO UPDATE SET
                basename = excluded.basename,
                size = excluded.size,
                mtime = excluded.mtime,
                line_count = excluded.line_count,
                language = excluded.language,
                stale = 0",
            params![
                path_str,
                basename,
                size as i64,
                mtime,
                line_count as i64,
                language.as_str()
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM script WHERE path = ?1",
            params![path_str],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn upsert_control_file(&self, path: &Path, size: u64) -> Result<i64> {
        let conn = self.lock();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path_str = path.to_string_lossy();

        conn.execute(
            "INSERT INTO control_file (path, basename, size) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET basename = excluded.basename, size = excluded.size",
            params![path_str, basename, size as i64],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM control_file WHERE path = ?1",
            params![path_str],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn upsert_procedure(&self, qualified: &str) -> Result<i64> {
        let conn = self.lock();
        let (schema, package, name) = Procedure::parse_parts(qualified);
        let lower = qualified.to_lowercase();

        conn.execute(
            "INSERT INTO procedure (qualified, qualified_lower, schema_part, package_part, name_part)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(qualified) DO NOTHING",
            params![qualified, lower, schema, package, name],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM procedure WHERE qualified = ?1",
            params![qualified],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Begin the scan-level transaction a whole `graph::analyze` run writes
    /// through (§4.1/§5: one `Transaction` per scan, so a failure or
    /// cancellation mid-scan leaves the prior indexed state intact). Nested
    /// per-script writes (`replace_edges_of`, etc.) use savepoints, so they
    /// compose with this outer transaction and still work standalone.
    pub fn begin_scan(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    /// Commit every write made since `begin_scan`.
    pub fn commit_scan(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Roll back every write made since `begin_scan`, restoring the store to
    /// its pre-scan state.
    pub fn abort_scan(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Delete all outbound edges of `script_id` and insert the supplied set,
    /// atomically (a savepoint, so a reader never observes a half-rewritten
    /// edge set — see §5 — and so this composes under an outer scan-level
    /// transaction).
    pub fn replace_edges_of(&self, script_id: i64, edges: &[Reference]) -> Result<()> {
        with_busy_retry(|| {
            let mut conn = self.lock();
            let tx = conn.savepoint()?;

            tx.execute("DELETE FROM reference WHERE source_id = ?1", params![script_id])?;

            for edge in edges {
                let candidates = match &edge.status {
                    ResolutionStatus::Ambiguous(ids) => {
                        Some(serde_json::to_string(ids).unwrap_or_default())
                    }
                    _ => None,
                };
                tx.execute(
                    "INSERT INTO reference
                        (source_id, target_id, target_kind, line, raw_text, style, status, ambiguous_candidates)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        edge.source_id,
                        edge.target_id,
                        edge.target_kind.as_str(),
                        edge.line as i64,
                        edge.raw_text,
                        edge.style.as_str(),
                        edge.status.as_str(),
                        candidates
                    ],
                )?;
            }

            tx.commit()
        })
        .map_err(AnalyzerError::from)
    }

    pub fn replace_inactive_references(
        &self,
        script_id: i64,
        refs: &[(u64, String, InvocationStyle)],
    ) -> Result<()> {
        with_busy_retry(|| {
            let mut conn = self.lock();
            let tx = conn.savepoint()?;
            tx.execute(
                "DELETE FROM inactive_reference WHERE source_id = ?1",
                params![script_id],
            )?;
            for (line, raw_text, style) in refs {
                tx.execute(
                    "INSERT INTO inactive_reference (source_id, line, raw_text, style)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![script_id, *line as i64, raw_text, style.as_str()],
                )?;
            }
            tx.commit()
        })
        .map_err(AnalyzerError::from)
    }

    pub fn get_script_by_path(&self, path: &Path) -> Result<Option<Script>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, path, basename, size, mtime, line_count, language, stale
             FROM script WHERE path = ?1",
            params![path.to_string_lossy()],
            row_to_script,
        )
        .optional()
        .map_err(AnalyzerError::from)
    }

    pub fn get_scripts_by_basename(&self, basename: &str) -> Result<Vec<Script>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, path, basename, size, mtime, line_count, language, stale
             FROM script WHERE basename = ?1 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![basename], row_to_script)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_control_file_by_path(&self, path: &Path) -> Result<Option<ControlFile>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, path, basename, size FROM control_file WHERE path = ?1",
            params![path.to_string_lossy()],
            row_to_control_file,
        )
        .optional()
        .map_err(AnalyzerError::from)
    }

    pub fn get_control_files_by_basename(&self, basename: &str) -> Result<Vec<ControlFile>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, path, basename, size FROM control_file WHERE basename = ?1 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![basename], row_to_control_file)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn outbound(&self, script_id: i64) -> Result<Vec<Reference>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, target_kind, line, raw_text, style, status, ambiguous_candidates
             FROM reference WHERE source_id = ?1 ORDER BY line, style",
        )?;
        let rows = stmt
            .query_map(params![script_id], row_to_reference)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn inbound(&self, target_id: i64, kind: TargetKind) -> Result<Vec<Reference>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, target_kind, line, raw_text, style, status, ambiguous_candidates
             FROM reference
             WHERE target_id = ?1 AND target_kind = ?2
             ORDER BY source_id, line",
        )?;
        let rows = stmt
            .query_map(params![target_id, kind.as_str()], row_to_reference)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Substring, case-insensitive search over lowercased qualified procedure
    /// names, paired with the script + line of each call site.
    pub fn search_procedures(
        &self,
        needle: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<(Procedure, i64, u64)>> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let escaped = needle
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.qualified, p.qualified_lower, p.schema_part, p.package_part, p.name_part,
                    r.source_id, r.line
             FROM procedure p
             JOIN reference r ON r.target_id = p.id AND r.target_kind = 'procedure'
             WHERE p.qualified_lower LIKE ?1 ESCAPE '\\'
             ORDER BY p.qualified, r.source_id, r.line
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt
            .query_map(params![pattern, limit, offset], |row| {
                Ok((
                    Procedure {
                        id: row.get(0)?,
                        qualified: row.get(1)?,
                        qualified_lower: row.get(2)?,
                        schema: row.get(3)?,
                        package: row.get(4)?,
                        name: row.get(5)?,
                    },
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)? as u64,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Commented-out invocations recorded for a script, for the debug surface
    /// named in §9 Open Question (a).
    pub fn inactive_references(&self, script_id: i64) -> Result<Vec<(u64, String)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT line, raw_text FROM inactive_reference WHERE source_id = ?1 ORDER BY line",
        )?;
        let rows = stmt
            .query_map(params![script_id], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn iter_all_scripts(&self) -> Result<Vec<Script>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, path, basename, size, mtime, line_count, language, stale
             FROM script ORDER BY path",
        )?;
        let rows = stmt
            .query_map([], row_to_script)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn iter_all_control_files(&self) -> Result<Vec<ControlFile>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, path, basename, size FROM control_file ORDER BY path")?;
        let rows = stmt
            .query_map([], row_to_control_file)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn iter_all_procedures(&self) -> Result<Vec<Procedure>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, qualified, qualified_lower, schema_part, package_part, name_part
             FROM procedure ORDER BY qualified",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Procedure {
                    id: row.get(0)?,
                    qualified: row.get(1)?,
                    qualified_lower: row.get(2)?,
                    schema: row.get(3)?,
                    package: row.get(4)?,
                    name: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn iter_all_references(&self) -> Result<Vec<Reference>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, target_kind, line, raw_text, style, status, ambiguous_candidates
             FROM reference ORDER BY source_id, line, style",
        )?;
        let rows = stmt
            .query_map([], row_to_reference)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Mark every script not touched by the current scan as stale, without
    /// deleting it (§3 lifecycle: scripts are never silently deleted).
    pub fn mark_missing_as_stale(&self, seen_paths: &[String]) -> Result<()> {
        let conn = self.lock();
        let placeholders = seen_paths
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        if seen_paths.is_empty() {
            conn.execute("UPDATE script SET stale = 1", [])?;
            return Ok(());
        }
        let sql = format!(
            "UPDATE script SET stale = 1 WHERE path NOT IN ({})",
            placeholders
        );
        let params: Vec<&dyn rusqlite::ToSql> =
            seen_paths.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    /// Remove stale scripts and their edges entirely (a pruning scan).
    pub fn prune_stale(&self) -> Result<u64> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM script WHERE stale = 1", [])?;
        Ok(removed as u64)
    }

    pub fn summary(&self) -> Result<crate::query::Summary> {
        let conn = self.lock();
        let script_count: i64 = conn.query_row("SELECT COUNT(*) FROM script", [], |r| r.get(0))?;
        let control_file_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM control_file", [], |r| r.get(0))?;
        let procedure_count: i64 = conn.query_row("SELECT COUNT(*) FROM procedure", [], |r| r.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT target_kind, COUNT(*) FROM reference GROUP BY target_kind",
        )?;
        let mut edge_count_by_kind = std::collections::HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            edge_count_by_kind.insert(kind, count as u64);
        }

        Ok(crate::query::Summary {
            script_count: script_count as u64,
            control_file_count: control_file_count as u64,
            procedure_count: procedure_count as u64,
            edge_count_by_kind,
        })
    }
}

impl crate::resolver::CorpusLookup for Store {
    fn script_by_absolute_path(&self, path: &Path) -> Option<i64> {
        self.get_script_by_path(path).ok().flatten().map(|s| s.id)
    }

    fn scripts_by_basename(&self, basename: &str) -> Vec<i64> {
        self.get_scripts_by_basename(basename)
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.id)
            .collect()
    }

    fn control_file_by_absolute_path(&self, path: &Path) -> Option<i64> {
        self.get_control_file_by_path(path).ok().flatten().map(|c| c.id)
    }

    fn control_files_by_basename(&self, basename: &str) -> Vec<i64> {
        self.get_control_files_by_basename(basename)
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.id)
            .collect()
    }
}

fn row_to_script(row: &rusqlite::Row) -> rusqlite::Result<Script> {
    let language_str: String = row.get(6)?;
    Ok(Script {
        id: row.get(0)?,
        path: row.get::<_, String>(1)?.into(),
        basename: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        mtime: row.get(4)?,
        line_count: row.get::<_, i64>(5)? as u64,
        language: Language::from_extension(&language_str).unwrap_or(Language::Sh),
        stale: row.get::<_, i64>(7)? != 0,
    })
}

fn row_to_control_file(row: &rusqlite::Row) -> rusqlite::Result<ControlFile> {
    Ok(ControlFile {
        id: row.get(0)?,
        path: row.get::<_, String>(1)?.into(),
        basename: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
    })
}

fn row_to_reference(row: &rusqlite::Row) -> rusqlite::Result<Reference> {
    let target_kind_str: String = row.get(2)?;
    let style_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let candidates_json: Option<String> = row.get(7)?;

    let status = match status_str.as_str() {
        "ambiguous" => {
            let ids: Vec<i64> = candidates_json
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default();
            ResolutionStatus::Ambiguous(ids)
        }
        "resolved" => ResolutionStatus::Resolved,
        _ => ResolutionStatus::Unresolved,
    };

    Ok(Reference {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        target_kind: TargetKind::parse(&target_kind_str).unwrap_or(TargetKind::Script),
        line: row.get::<_, i64>(3)? as u64,
        raw_text: row.get(4)?,
        style: InvocationStyle::parse(&style_str).unwrap_or(InvocationStyle::BareName),
        status,
    })
}
