//! Deterministic, line-oriented export of the full dependency graph (§4.8).
//!
//! Plain tab-separated records rather than JSON, so two exports of the same
//! corpus are byte-identical and diffable with a plain text diff tool. Three
//! sections in a fixed order, each introduced by a `#` header line.

use std::io::Write;

use crate::error::Result;
use crate::model::ResolutionStatus;
use crate::store::Store;

/// Write the full export to `out`: scripts, control files, procedures, then
/// references, each section sorted by the Store's own deterministic order.
pub fn write_export(store: &Store, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "# scripts\tpath\tbasename\tsize\tmtime\tline_count\tlanguage\tstale").ok();
    for script in store.iter_all_scripts()? {
        writeln!(
            out,
            "script\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            script.path.display(),
            script.basename,
            script.size,
            script.mtime,
            script.line_count,
            script.language.as_str(),
            if script.stale { 1 } else { 0 },
        )
        .ok();
    }

    writeln!(out, "# control_files\tpath\tbasename\tsize").ok();
    for cf in store.iter_all_control_files()? {
        writeln!(out, "control_file\t{}\t{}\t{}", cf.path.display(), cf.basename, cf.size).ok();
    }

    writeln!(out, "# procedures\tqualified\tschema\tpackage\tname").ok();
    for proc in store.iter_all_procedures()? {
        writeln!(
            out,
            "procedure\t{}\t{}\t{}\t{}",
            proc.qualified,
            proc.schema.as_deref().unwrap_or(""),
            proc.package.as_deref().unwrap_or(""),
            proc.name,
        )
        .ok();
    }

    writeln!(
        out,
        "# references\tsource_id\ttarget_kind\ttarget_id\tline\tstyle\tstatus\traw_text"
    )
    .ok();
    for edge in store.iter_all_references()? {
        let (status_str, candidates) = match &edge.status {
            ResolutionStatus::Resolved => ("resolved".to_string(), String::new()),
            ResolutionStatus::Unresolved => ("unresolved".to_string(), String::new()),
            ResolutionStatus::Ambiguous(ids) => (
                "ambiguous".to_string(),
                ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(","),
            ),
        };
        writeln!(
            out,
            "reference\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            edge.source_id,
            edge.target_kind.as_str(),
            edge.target_id.map(|id| id.to_string()).unwrap_or_default(),
            edge.line,
            edge.style.as_str(),
            status_str,
            candidates,
            escape_tabs(&edge.raw_text),
        )
        .ok();
    }

    Ok(())
}

/// Raw text can itself contain tabs/newlines (heredoc bodies, quoted
/// arguments); escape them so the record stays one line per reference.
fn escape_tabs(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\t', "\\t").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn export_is_stable_across_repeated_runs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.ksh"), "echo hi\n").unwrap();
        fs::write(dir.path().join("a.ksh"), ". ./config.ksh\n").unwrap();

        let store = Store::open_in_memory().unwrap();
        crate::graph::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

        let mut first = Vec::new();
        write_export(&store, &mut first).unwrap();
        let mut second = Vec::new();
        write_export(&store, &mut second).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        assert!(text.contains("# scripts"));
        assert!(text.contains("# references"));
    }

    #[test]
    fn raw_text_with_embedded_tab_is_escaped_to_one_line() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("target.ksh"), "echo t\n").unwrap();
        fs::write(dir.path().join("a.ksh"), "./target.ksh\targ\n").unwrap();

        let store = Store::open_in_memory().unwrap();
        crate::graph::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

        let mut buf = Vec::new();
        write_export(&store, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let reference_lines: Vec<&str> = text.lines().filter(|l| l.starts_with("reference\t")).collect();
        assert!(reference_lines.iter().all(|l| !l.contains('\n')));
    }
}
