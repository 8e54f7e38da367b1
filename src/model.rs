//! Entity and edge types shared across the store, extractor, resolver and query API.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Language tag for a discovered script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    Ksh,
    Sh,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ksh" => Some(Language::Ksh),
            "sh" => Some(Language::Sh),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Ksh => "ksh",
            Language::Sh => "sh",
        }
    }
}

/// A discovered `.ksh`/`.sh` source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub path: PathBuf,
    pub basename: String,
    pub size: u64,
    pub mtime: i64,
    pub line_count: u64,
    pub language: Language,
    pub stale: bool,
}

/// A discovered `.ctl` bulk-loader control file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFile {
    pub id: i64,
    pub path: PathBuf,
    pub basename: String,
    pub size: u64,
}

/// A stored-procedure name, split into optional schema/package/name parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: i64,
    pub qualified: String,
    pub qualified_lower: String,
    pub schema: Option<String>,
    pub package: Option<String>,
    pub name: String,
}

impl Procedure {
    /// Split `schema.package.name` / `package.name` / `name` into parts.
    pub fn parse_parts(qualified: &str) -> (Option<String>, Option<String>, String) {
        let parts: Vec<&str> = qualified.split('.').collect();
        match parts.as_slice() {
            [name] => (None, None, (*name).to_string()),
            [package, name] => (None, Some((*package).to_string()), (*name).to_string()),
            [schema, package, name] => (
                Some((*schema).to_string()),
                Some((*package).to_string()),
                (*name).to_string(),
            ),
            // Extractor only ever captures 1-3 components; anything else is a bug upstream.
            _ => (None, None, qualified.to_string()),
        }
    }
}

/// The kind of node a `Reference` points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Script,
    ControlFile,
    Procedure,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Script => "script",
            TargetKind::ControlFile => "control_file",
            TargetKind::Procedure => "procedure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "script" => Some(TargetKind::Script),
            "control_file" => Some(TargetKind::ControlFile),
            "procedure" => Some(TargetKind::Procedure),
            _ => None,
        }
    }
}

/// The textual shape of a script invocation, per §4.4-C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationStyle {
    Sourced,
    DirectPath,
    BareName,
    ExplicitInterpreter,
    /// Same as the style it wraps, but invoked with a trailing `&`.
    Background,
    /// Stored-procedure call, `select ... from dual`.
    ProcedureCall,
    /// `control=<path>.ctl` bulk-loader reference.
    ControlFileRef,
}

impl InvocationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationStyle::Sourced => "sourced",
            InvocationStyle::DirectPath => "direct_path",
            InvocationStyle::BareName => "bare_name",
            InvocationStyle::ExplicitInterpreter => "explicit_interpreter",
            InvocationStyle::Background => "background",
            InvocationStyle::ProcedureCall => "procedure_call",
            InvocationStyle::ControlFileRef => "control_file_ref",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "sourced" => InvocationStyle::Sourced,
            "direct_path" => InvocationStyle::DirectPath,
            "bare_name" => InvocationStyle::BareName,
            "explicit_interpreter" => InvocationStyle::ExplicitInterpreter,
            "background" => InvocationStyle::Background,
            "procedure_call" => InvocationStyle::ProcedureCall,
            "control_file_ref" => InvocationStyle::ControlFileRef,
            _ => return None,
        })
    }
}

/// Resolution outcome of a raw reference against the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    Resolved,
    Unresolved,
    /// Multiple candidate targets share the same basename.
    Ambiguous(Vec<i64>),
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::Unresolved => "unresolved",
            ResolutionStatus::Ambiguous(_) => "ambiguous",
        }
    }
}

/// A directed edge from a Script to a Script, ControlFile, or Procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub source_id: i64,
    pub target_id: Option<i64>,
    pub target_kind: TargetKind,
    pub line: u64,
    pub raw_text: String,
    pub style: InvocationStyle,
    pub status: ResolutionStatus,
}
