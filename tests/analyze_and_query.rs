//! Full-corpus integration tests: `analyze` persisting into a real on-disk
//! store, then the Query API and export reading back through it, exercising
//! scenarios S1-S6 end-to-end rather than module-by-module.

use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use shellweave::model::TargetKind;
use shellweave::query::Query;
use shellweave::store::Store;
use tempfile::TempDir;

fn fresh_store(dir: &std::path::Path) -> Store {
    Store::open(&dir.join("dep-index.db")).unwrap()
}

#[test]
fn s1_forward_dependencies_of_a_corpus_with_sourced_and_direct_path() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.ksh"), "echo config\n").unwrap();
    fs::write(dir.path().join("b.ksh"), "echo b\n").unwrap();
    fs::write(
        dir.path().join("a.ksh"),
        "echo one\necho two\n. ./config.ksh\necho four\necho five\necho six\n./b.ksh\n",
    )
    .unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let rows = Query::new(&store).forward_dependencies("a.ksh").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].line, 3);
    assert_eq!(rows[1].line, 7);
}

#[test]
fn s2_commented_invocation_produces_no_forward_edge() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("cleanup.ksh"), "echo cleanup\n").unwrap();
    fs::write(dir.path().join("caller.ksh"), "# ./cleanup.ksh\n").unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let rows = Query::new(&store).forward_dependencies("caller.ksh").unwrap();
    assert!(rows.is_empty());
}

#[test]
fn s3_heredoc_procedure_call_without_script_edge() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("load.ksh"),
        "sqlplus foo <<EOF\n  select pkg.do_it() from dual;\nEOF\n",
    )
    .unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let rows = Query::new(&store).forward_dependencies("load.ksh").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].target_kind, TargetKind::Procedure);
    assert_eq!(rows[0].target_identity, "pkg.do_it");
}

#[test]
fn s4_control_file_reference_resolves_against_ctl_root() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("customer_data.ctl"), "options(...)").unwrap();
    fs::write(
        dir.path().join("load.ksh"),
        "sqlldr userid=u/p@s control=customer_data.ctl\n",
    )
    .unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let rows = Query::new(&store).forward_dependencies("load.ksh").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].target_kind, TargetKind::ControlFile);
    assert_eq!(rows[0].target_identity, dir.path().join("customer_data.ctl").to_string_lossy());
}

#[test]
fn s5_bare_name_collision_is_ambiguous_with_two_candidates() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("a")).unwrap();
    fs::create_dir_all(dir.path().join("b")).unwrap();
    fs::write(dir.path().join("a/level4_script.ksh"), "echo a\n").unwrap();
    fs::write(dir.path().join("b/level4_script.ksh"), "echo b\n").unwrap();
    fs::write(dir.path().join("caller.ksh"), "level4_script.ksh\n").unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let rows = Query::new(&store).forward_dependencies("caller.ksh").unwrap();
    assert_eq!(rows.len(), 1);
    match &rows[0].status {
        shellweave::query::ResolutionStatusView::Ambiguous { candidates } => {
            assert_eq!(candidates.len(), 2)
        }
        other => panic!("expected ambiguous, got {other:?}"),
    }
}

#[test]
fn s6_search_procedures_by_substring() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("a.ksh"),
        "sqlplus <<EOF\n\
         select customer_pkg.process_customers() from dual;\n\
         select CRM_EXTRACT.get_customer_data() from dual;\n\
         select order_mgmt.validate_orders() from dual;\n\
         EOF\n",
    )
    .unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let rows = Query::new(&store).search_procedures("customer").unwrap();
    let names: Vec<&str> = rows.iter().map(|r| r.procedure_qualified.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"customer_pkg.process_customers"));
    assert!(names.contains(&"CRM_EXTRACT.get_customer_data"));
    assert!(!names.contains(&"order_mgmt.validate_orders"));
}

#[test]
fn backward_dependencies_find_the_caller() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.ksh"), "echo config\n").unwrap();
    fs::write(dir.path().join("a.ksh"), ". ./config.ksh\n").unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let rows = Query::new(&store)
        .backward_dependencies("config.ksh", TargetKind::Script)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_script, dir.path().join("a.ksh"));
}

#[test]
fn summary_counts_match_the_corpus() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("customer_data.ctl"), "options(...)").unwrap();
    fs::write(
        dir.path().join("load.ksh"),
        "sqlldr userid=u/p@s control=customer_data.ctl\nselect pkg.run() from dual;\n",
    )
    .unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let summary = Query::new(&store).summary().unwrap();
    assert_eq!(summary.script_count, 1);
    assert_eq!(summary.control_file_count, 1);
    assert_eq!(summary.procedure_count, 1);
}

#[test]
fn reopening_the_store_preserves_the_graph() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.ksh"), "echo config\n").unwrap();
    fs::write(dir.path().join("a.ksh"), ". ./config.ksh\n").unwrap();

    {
        let store = fresh_store(dir.path());
        shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();
    }

    let reopened = fresh_store(dir.path());
    let rows = Query::new(&reopened).forward_dependencies("a.ksh").unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn export_contains_every_section_for_a_mixed_corpus() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("customer_data.ctl"), "options(...)").unwrap();
    fs::write(
        dir.path().join("load.ksh"),
        "sqlldr userid=u/p@s control=customer_data.ctl\nselect pkg.run() from dual;\n",
    )
    .unwrap();

    let store = fresh_store(dir.path());
    shellweave::analyze(&store, dir.path(), dir.path(), Arc::new(AtomicBool::new(false)), false).unwrap();

    let mut buf = Vec::new();
    shellweave::export::write_export(&store, &mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.contains("load.ksh"));
    assert!(text.contains("customer_data.ctl"));
    assert!(text.contains("pkg.run"));
}
