//! Typed error surface for the analyzer library.
//!
//! Ambiguity and unresolved references are data (carried on `Reference` rows
//! and the scan report), never raised here. Only conditions that abort a scan
//! or a query get a variant.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum AnalyzerError {
    #[error("input path not found: {0}")]
    InputNotFound(PathBuf),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] rusqlite::Error),

    #[error("store schema version {found} is newer than supported version {supported}")]
    StoreIncompatible { found: i64, supported: i64 },

    #[error("scan cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for AnalyzerError {
    fn from(err: rusqlite::Error) -> Self {
        AnalyzerError::StoreUnavailable(err)
    }
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
