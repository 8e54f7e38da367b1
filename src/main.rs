use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use shellweave::model::TargetKind as ModelTargetKind;
use shellweave::query::Query;
use shellweave::store::Store;

#[derive(Parser)]
#[command(author, version, about = "Static dependency analyzer for shell script codebases", long_about = None)]
struct Cli {
    /// Path to the dependency index. Default: <script-root>/dep-index.db
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TargetKindArg {
    Script,
    ControlFile,
    Procedure,
}

impl From<TargetKindArg> for ModelTargetKind {
    fn from(value: TargetKindArg) -> Self {
        match value {
            TargetKindArg::Script => ModelTargetKind::Script,
            TargetKindArg::ControlFile => ModelTargetKind::ControlFile,
            TargetKindArg::Procedure => ModelTargetKind::Procedure,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a corpus of scripts and control files and persist the dependency graph
    Analyze {
        /// Root directory to walk for `.ksh`/`.sh` scripts
        #[arg(long)]
        script_root: PathBuf,

        /// Root directory to walk for `.ctl` control files; defaults to script_root
        #[arg(long)]
        ctl_root: Option<PathBuf>,

        /// Skip scripts whose (path, size, mtime) already match the store
        #[arg(long)]
        incremental: bool,

        /// Remove scripts no longer present on disk, and their edges, after scanning
        #[arg(long)]
        prune: bool,

        /// Output results as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List the outbound dependencies of a script
    Forward {
        /// Basename of the script, e.g. `load_customers.ksh`
        script: String,

        #[arg(short, long)]
        json: bool,
    },

    /// List the scripts that depend on a given script, control file, or procedure
    Backward {
        /// Basename (or procedure name) of the target
        target: String,

        #[arg(long, value_enum, default_value = "script")]
        kind: TargetKindArg,

        #[arg(short, long)]
        json: bool,
    },

    /// Search stored-procedure names by substring
    Search {
        needle: String,

        #[arg(short, long)]
        json: bool,
    },

    /// Export the full dependency graph as a portable, deterministic document
    Export {
        /// Output path; defaults to stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print corpus-wide counts
    Summary {
        #[arg(short, long)]
        json: bool,
    },
}

/// Exit codes per §6: 0 success, 3 input-tree I/O failure, 4 store failure,
/// 5 store schema too new for this build, 130 cancelled. Usage errors (2)
/// are handled by clap itself before `run` is ever called.
fn main() -> std::process::ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<shellweave::AnalyzerError>() {
        Some(shellweave::AnalyzerError::InputNotFound(_)) => 3,
        Some(shellweave::AnalyzerError::StoreUnavailable(_)) => 4,
        Some(shellweave::AnalyzerError::StoreIncompatible { .. }) => 5,
        Some(shellweave::AnalyzerError::Cancelled) => 130,
        None => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Analyze { script_root, ctl_root, incremental, prune, json } => {
            let ctl_root = ctl_root.unwrap_or_else(|| script_root.clone());
            let store_path = cli.store.unwrap_or_else(|| script_root.join("dep-index.db"));
            let store = Store::open(&store_path).context("opening dependency store")?;

            let report = shellweave::analyze(
                &store,
                &script_root,
                &ctl_root,
                Arc::new(AtomicBool::new(false)),
                incremental,
            )
            .context("scanning corpus")?;

            let pruned = if prune {
                Some(store.prune_stale().context("pruning stale scripts")?)
            } else {
                None
            };

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ReportView::from(&report, pruned))?
                );
            } else {
                println!(
                    "scanned {} scripts, {} control files — status: {}",
                    report.scripts_seen,
                    report.control_files_seen,
                    report.status()
                );
                if let Some(removed) = pruned {
                    println!("pruned {removed} stale scripts");
                }
                if !report.unreadable.is_empty() {
                    println!("unreadable (sample):");
                    for p in &report.unreadable {
                        println!("  {}", p.display());
                    }
                }
                if !report.parse_anomalies.is_empty() {
                    println!("parse anomalies (sample):");
                    for p in &report.parse_anomalies {
                        println!("  {}", p.display());
                    }
                }
            }
        }

        Commands::Forward { script, json } => {
            let store = open_existing_store(cli.store)?;
            let rows = Query::new(&store).forward_dependencies(&script)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{:<10} {:<40} {:>6} {:<20} {:<10}", "Kind", "Target", "Line", "Style", "Status");
                for row in rows {
                    println!(
                        "{:<10} {:<40} {:>6} {:<20} {:<10}",
                        row.target_kind.as_str(),
                        truncate(&row.target_identity, 40),
                        row.line,
                        row.style.as_str(),
                        status_label(&row.status),
                    );
                }
            }
        }

        Commands::Backward { target, kind, json } => {
            let store = open_existing_store(cli.store)?;
            let rows = Query::new(&store).backward_dependencies(&target, kind.into())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{:<50} {:>6} {:<20}", "Source Script", "Line", "Style");
                for row in rows {
                    println!(
                        "{:<50} {:>6} {:<20}",
                        truncate(&row.source_script.display().to_string(), 50),
                        row.line,
                        row.style.as_str(),
                    );
                }
            }
        }

        Commands::Search { needle, json } => {
            let store = open_existing_store(cli.store)?;
            let rows = Query::new(&store).search_procedures(&needle)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{:<50} {:<50} {:>6}", "Procedure", "Source Script", "Line");
                for row in rows {
                    println!(
                        "{:<50} {:<50} {:>6}",
                        truncate(&row.procedure_qualified, 50),
                        truncate(&row.source_script.display().to_string(), 50),
                        row.line,
                    );
                }
            }
        }

        Commands::Export { out } => {
            let store = open_existing_store(cli.store)?;
            match out {
                Some(path) => {
                    let mut file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    shellweave::export::write_export(&store, &mut file)?;
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    shellweave::export::write_export(&store, &mut stdout)?;
                }
            }
        }

        Commands::Summary { json } => {
            let store = open_existing_store(cli.store)?;
            let summary = Query::new(&store).summary()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("scripts:        {}", summary.script_count);
                println!("control files:  {}", summary.control_file_count);
                println!("procedures:     {}", summary.procedure_count);
                for (kind, count) in &summary.edge_count_by_kind {
                    println!("edges[{kind}]:   {count}");
                }
            }
        }
    }

    Ok(())
}

fn open_existing_store(store: Option<PathBuf>) -> Result<Store> {
    let path = store.context("--store <path> is required when there is no script-root to default from")?;
    Store::open(&path).context("opening dependency store")
}

fn status_label(status: &shellweave::query::ResolutionStatusView) -> String {
    match status {
        shellweave::query::ResolutionStatusView::Resolved => "resolved".to_string(),
        shellweave::query::ResolutionStatusView::Unresolved => "unresolved".to_string(),
        shellweave::query::ResolutionStatusView::Ambiguous { candidates } => {
            format!("ambiguous({})", candidates.len())
        }
    }
}

/// Truncate to at most `max` bytes, landing on the nearest char boundary at
/// or before that budget so multi-byte UTF-8 text never panics mid-codepoint.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let budget = max.saturating_sub(3);
    let cut = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= budget)
        .last()
        .unwrap_or(0);
    format!("{}...", &s[..cut])
}

#[derive(serde::Serialize)]
struct ReportView {
    scripts_seen: u64,
    control_files_seen: u64,
    status: String,
    unreadable: Vec<PathBuf>,
    parse_anomalies: Vec<PathBuf>,
    pruned: Option<u64>,
}

impl ReportView {
    fn from(report: &shellweave::ScanReport, pruned: Option<u64>) -> Self {
        ReportView {
            scripts_seen: report.scripts_seen,
            control_files_seen: report.control_files_seen,
            status: report.status().to_string(),
            unreadable: report.unreadable.clone(),
            parse_anomalies: report.parse_anomalies.clone(),
            pruned,
        }
    }
}
