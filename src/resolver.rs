//! Maps a raw reference's basename (and, when written, its path) to a
//! concrete Script or ControlFile id in the indexed corpus. See §4.5.

use std::path::{Path, PathBuf};

use crate::model::ResolutionStatus;

/// Minimal view the resolver needs of the store, so it stays independent of
/// the concrete persistence layer and is easy to unit test.
pub trait CorpusLookup {
    fn script_by_absolute_path(&self, path: &Path) -> Option<i64>;
    fn scripts_by_basename(&self, basename: &str) -> Vec<i64>;
    fn control_file_by_absolute_path(&self, path: &Path) -> Option<i64>;
    fn control_files_by_basename(&self, basename: &str) -> Vec<i64>;
}

pub enum TargetClass {
    Script,
    ControlFile,
}

/// Resolve a basename (and optional written path) against the corpus.
///
/// `referring_dir` is the directory of the script containing the reference,
/// used to lexically normalize a relative written path without touching the
/// filesystem.
pub fn resolve(
    lookup: &dyn CorpusLookup,
    class: TargetClass,
    basename: &str,
    written_path: Option<&str>,
    referring_dir: &Path,
) -> (Option<i64>, ResolutionStatus) {
    if let Some(written) = written_path {
        let candidate = Path::new(written);

        let absolute = if candidate.is_absolute() {
            Some(candidate.to_path_buf())
        } else {
            Some(lexically_normalize(&referring_dir.join(candidate)))
        };

        if let Some(abs) = absolute {
            let found = match class {
                TargetClass::Script => lookup.script_by_absolute_path(&abs),
                TargetClass::ControlFile => lookup.control_file_by_absolute_path(&abs),
            };
            if let Some(id) = found {
                return (Some(id), ResolutionStatus::Resolved);
            }
            if candidate.is_absolute() {
                // §9 Open Question (b): absolute path outside the corpus root
                // is recorded unresolved, not guessed via basename fallback.
                return (None, ResolutionStatus::Unresolved);
            }
        }
    }

    let candidates = match class {
        TargetClass::Script => lookup.scripts_by_basename(basename),
        TargetClass::ControlFile => lookup.control_files_by_basename(basename),
    };

    match candidates.len() {
        0 => (None, ResolutionStatus::Unresolved),
        1 => (Some(candidates[0]), ResolutionStatus::Resolved),
        _ => (None, ResolutionStatus::Ambiguous(candidates)),
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeCorpus {
        scripts_by_path: HashMap<PathBuf, i64>,
        scripts_by_basename: HashMap<String, Vec<i64>>,
    }

    impl CorpusLookup for FakeCorpus {
        fn script_by_absolute_path(&self, path: &Path) -> Option<i64> {
            self.scripts_by_path.get(path).copied()
        }
        fn scripts_by_basename(&self, basename: &str) -> Vec<i64> {
            self.scripts_by_basename
                .get(basename)
                .cloned()
                .unwrap_or_default()
        }
        fn control_file_by_absolute_path(&self, _path: &Path) -> Option<i64> {
            None
        }
        fn control_files_by_basename(&self, _basename: &str) -> Vec<i64> {
            Vec::new()
        }
    }

    #[test]
    fn relative_path_resolves_via_lexical_normalization() {
        let mut scripts_by_path = HashMap::new();
        scripts_by_path.insert(PathBuf::from("/corpus/a/config.ksh"), 42);
        let corpus = FakeCorpus {
            scripts_by_path,
            scripts_by_basename: HashMap::new(),
        };

        let (id, status) = resolve(
            &corpus,
            TargetClass::Script,
            "config.ksh",
            Some("./config.ksh"),
            Path::new("/corpus/a"),
        );
        assert_eq!(id, Some(42));
        assert_eq!(status, ResolutionStatus::Resolved);
    }

    #[test]
    fn basename_fallback_is_ambiguous_with_two_candidates() {
        let mut scripts_by_basename = HashMap::new();
        scripts_by_basename.insert("cleanup.ksh".to_string(), vec![1, 2]);
        let corpus = FakeCorpus {
            scripts_by_path: HashMap::new(),
            scripts_by_basename,
        };

        let (id, status) = resolve(&corpus, TargetClass::Script, "cleanup.ksh", None, Path::new("/corpus"));
        assert_eq!(id, None);
        assert_eq!(status, ResolutionStatus::Ambiguous(vec![1, 2]));
    }

    #[test]
    fn unresolved_when_zero_candidates() {
        let corpus = FakeCorpus {
            scripts_by_path: HashMap::new(),
            scripts_by_basename: HashMap::new(),
        };
        let (id, status) = resolve(&corpus, TargetClass::Script, "missing.ksh", None, Path::new("/corpus"));
        assert_eq!(id, None);
        assert_eq!(status, ResolutionStatus::Unresolved);
    }

    #[test]
    fn absolute_path_outside_corpus_is_unresolved_not_guessed() {
        let mut scripts_by_basename = HashMap::new();
        scripts_by_basename.insert("config.ksh".to_string(), vec![7]);
        let corpus = FakeCorpus {
            scripts_by_path: HashMap::new(),
            scripts_by_basename,
        };

        let (id, status) = resolve(
            &corpus,
            TargetClass::Script,
            "config.ksh",
            Some("/outside/config.ksh"),
            Path::new("/corpus/a"),
        );
        assert_eq!(id, None);
        assert_eq!(status, ResolutionStatus::Unresolved);
    }
}
