//! Static dependency analyzer for shell script codebases: discovers `.ksh`/
//! `.sh` scripts and `.ctl` bulk-loader control files, extracts script
//! invocations, control-file references, and stored-procedure calls, resolves
//! them against the indexed corpus, and persists a bidirectional dependency
//! graph queryable by forward/backward traversal, substring search, and
//! export.

pub mod error;
pub mod export;
pub mod extractor;
pub mod graph;
pub mod lexer;
pub mod model;
pub mod query;
pub mod resolver;
pub mod store;
pub mod walker;

pub use error::{AnalyzerError, Result};
pub use graph::{analyze, ScanReport};
pub use query::Query;
pub use store::Store;
