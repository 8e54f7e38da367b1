//! Ordered pattern matchers that turn active (and heredoc-body) text into
//! raw, unresolved reference records. See §4.4: patterns are tried in a
//! fixed order and a matched span is never reconsidered by a later pattern.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::lexer::{LineClass, TaggedLine};
use crate::model::InvocationStyle;

/// An extracted reference before resolution against the corpus.
#[derive(Debug, Clone)]
pub struct RawReference {
    pub line: u64,
    pub raw_text: String,
    pub style: InvocationStyle,
    pub kind: RawKind,
}

#[derive(Debug, Clone)]
pub enum RawKind {
    Procedure {
        qualified: String,
    },
    ControlFile {
        basename: String,
    },
    Script {
        basename: String,
        /// The path exactly as written, when the invocation carried one.
        written_path: Option<String>,
    },
}

fn procedure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)\bselect\s+([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+){0,2})\s*\(((?:[^()]|\([^()]*\))*)\)\s*from\s+dual\b"#,
        )
        .unwrap()
    })
}

fn control_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bcontrol\s*=\s*([\w./\\-]+?\.ctl)\b"#).unwrap())
}

fn sourced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*(?:\.|source)\s+([^\s&;|]+\.(?:ksh|sh))\b(\s*&)?"#).unwrap()
    })
}

fn direct_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:^|[\s;&|(){])((?:\.{1,2}/|/|[\w.-]+/)[\w./-]*\.(?:ksh|sh))\b(\s*&)?"#)
            .unwrap()
    })
}

fn explicit_interpreter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:^|[\s;&|(){])(?:ksh|bash|sh)\s+([^\s&;|]+\.(?:ksh|sh))\b(\s*&)?"#).unwrap()
    })
}

/// Mask out `[start, end)` of `text` with spaces so later patterns skip it.
fn mask(text: &mut [u8], start: usize, end: usize) {
    for b in &mut text[start..end] {
        *b = b' ';
    }
}

/// Extract stored-procedure calls from arbitrary text (active or heredoc
/// body); this is the one pattern that runs over heredoc bodies too.
fn extract_procedure_calls(text: &str, line: u64, out: &mut Vec<RawReference>) {
    let mut buf = text.as_bytes().to_vec();
    loop {
        let working = String::from_utf8_lossy(&buf).into_owned();
        let Some(caps) = procedure_re().captures(&working) else {
            break;
        };
        let whole = caps.get(0).unwrap();
        let qualified = caps.get(1).unwrap().as_str().to_string();
        out.push(RawReference {
            line,
            raw_text: whole.as_str().trim().to_string(),
            style: InvocationStyle::ProcedureCall,
            kind: RawKind::Procedure { qualified },
        });
        mask(&mut buf, whole.start(), whole.end());
    }
}

fn extract_control_files(text: &str, line: u64, buf: &mut [u8], out: &mut Vec<RawReference>) {
    let _ = text;
    loop {
        let working = String::from_utf8_lossy(buf).into_owned();
        let Some(caps) = control_file_re().captures(&working) else {
            break;
        };
        let whole = caps.get(0).unwrap();
        let path = caps.get(1).unwrap().as_str();
        let basename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        out.push(RawReference {
            line,
            raw_text: whole.as_str().trim().to_string(),
            style: InvocationStyle::ControlFileRef,
            kind: RawKind::ControlFile { basename },
        });
        mask(buf, whole.start(), whole.end());
    }
}

/// Detect whether a simple-command token sits in "command position": start
/// of line, or just after `&&`, `||`, `;`, `|`, `(`, `{`.
fn bare_name_command_positions(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut idx = 0;
    let bytes = text.as_bytes();
    let len = bytes.len();

    let mut at_command_start = true;
    while idx < len {
        if at_command_start {
            while idx < len && (bytes[idx] as char).is_whitespace() {
                idx += 1;
            }
            if idx >= len {
                break;
            }
            // A separator right after whitespace is still a separator, not a
            // command-position token, so skip it and keep looking.
            if text[idx..].starts_with("&&") || text[idx..].starts_with("||") {
                idx += 2;
                continue;
            }
            if matches!(bytes[idx] as char, ';' | '|' | '(' | '{') {
                idx += 1;
                continue;
            }
            let start = idx;
            while idx < len && !(bytes[idx] as char).is_whitespace() {
                idx += 1;
            }
            tokens.push((start, &text[start..idx]));
            at_command_start = false;
            continue;
        }

        // Scan until we hit a command separator, then the next token starts fresh.
        if text[idx..].starts_with("&&") || text[idx..].starts_with("||") {
            idx += 2;
            at_command_start = true;
        } else if matches!(bytes[idx] as char, ';' | '|' | '(' | '{') {
            idx += 1;
            at_command_start = true;
        } else {
            idx += 1;
        }
    }

    tokens
}

fn extract_bare_names(buf: &mut [u8], line: u64, out: &mut Vec<RawReference>) {
    loop {
        let working = String::from_utf8_lossy(buf).into_owned();
        let positions = bare_name_command_positions(&working);
        let hit = positions.into_iter().find(|(_, tok)| {
            let bare = tok.trim_end_matches('&').trim_end();
            !bare.contains('/')
                && (bare.ends_with(".ksh") || bare.ends_with(".sh"))
        });
        let Some((start, tok)) = hit else { break };
        let background = tok.ends_with('&');
        let basename = tok.trim_end_matches('&').trim_end().to_string();
        out.push(RawReference {
            line,
            raw_text: tok.to_string(),
            style: if background {
                InvocationStyle::Background
            } else {
                InvocationStyle::BareName
            },
            kind: RawKind::Script {
                basename: basename.clone(),
                written_path: None,
            },
        });
        mask(buf, start, start + tok.len());
    }
}

fn extract_via_regex(
    re: &Regex,
    buf: &mut [u8],
    line: u64,
    base_style: InvocationStyle,
    out: &mut Vec<RawReference>,
) {
    loop {
        let working = String::from_utf8_lossy(buf).into_owned();
        let Some(caps) = re.captures(&working) else {
            break;
        };
        let whole = caps.get(0).unwrap();
        let written_path = caps.get(1).unwrap().as_str().to_string();
        let background = caps.get(2).is_some();
        let basename = Path::new(&written_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| written_path.clone());

        out.push(RawReference {
            line,
            raw_text: whole.as_str().trim().to_string(),
            style: if background {
                InvocationStyle::Background
            } else {
                base_style
            },
            kind: RawKind::Script {
                basename,
                written_path: Some(written_path),
            },
        });
        mask(buf, whole.start(), whole.end());
    }
}

/// Run the full ordered pattern family over one already-classified line.
///
/// `text` for `Active` lines has already had its inline comment truncated by
/// the lexical filter; `HeredocBody` lines are passed through unmodified and
/// only yield procedure-call references.
pub fn extract_line(tagged: &TaggedLine) -> Vec<RawReference> {
    let mut out = Vec::new();

    if tagged.class == LineClass::HeredocBody {
        extract_procedure_calls(&tagged.text, tagged.line_number, &mut out);
        return out;
    }

    if tagged.class != LineClass::Active {
        return out;
    }

    let stripped = crate::lexer::strip_single_quoted(&tagged.text);
    extract_procedure_calls(&stripped, tagged.line_number, &mut out);

    let mut buf = stripped.into_bytes();
    // Re-mask the spans already consumed by the procedure-call pass so B/C
    // never see them, by finding them again on the fresh buffer: simplest
    // correct approach is to mask using the raw_text recorded above.
    for r in &out {
        if let Some(pos) = find_subsequence(&buf, r.raw_text.as_bytes()) {
            mask(&mut buf, pos, pos + r.raw_text.len());
        }
    }

    extract_control_files(&tagged.text, tagged.line_number, &mut buf, &mut out);
    extract_via_regex(
        sourced_re(),
        &mut buf,
        tagged.line_number,
        InvocationStyle::Sourced,
        &mut out,
    );
    extract_via_regex(
        direct_path_re(),
        &mut buf,
        tagged.line_number,
        InvocationStyle::DirectPath,
        &mut out,
    );
    extract_bare_names(&mut buf, tagged.line_number, &mut out);
    extract_via_regex(
        explicit_interpreter_re(),
        &mut buf,
        tagged.line_number,
        InvocationStyle::ExplicitInterpreter,
        &mut out,
    );

    out
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Commented-out invocations, recorded separately for the optional debug
/// surface (§9 Open Question (a)). Never produces a graph edge.
pub fn extract_inactive(tagged: &TaggedLine) -> Vec<RawReference> {
    if tagged.class != LineClass::Comment {
        return Vec::new();
    }
    let uncommented = tagged.text.trim_start().trim_start_matches('#');
    let synthetic = TaggedLine {
        line_number: tagged.line_number,
        text: uncommented.to_string(),
        class: LineClass::Active,
    };
    extract_line(&synthetic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::LexicalFilter;

    fn classify(content: &str) -> Vec<TaggedLine> {
        LexicalFilter::new().classify(content)
    }

    #[test]
    fn s1_sourced_and_direct_path() {
        let lines = classify(". ./config.ksh\nsomething\n\n\n\n./b.ksh\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].line, 1);
        assert!(matches!(refs[0].style, InvocationStyle::Sourced));
        assert_eq!(refs[1].line, 6);
        assert!(matches!(refs[1].style, InvocationStyle::DirectPath));
    }

    #[test]
    fn s2_commented_invocation_yields_no_edge() {
        let lines = classify("# ./cleanup.ksh\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert!(refs.is_empty());

        let inactive: Vec<_> = lines.iter().flat_map(extract_inactive).collect();
        assert_eq!(inactive.len(), 1);
    }

    #[test]
    fn s3_heredoc_procedure_call_no_script_edge() {
        let lines = classify("sqlplus foo <<EOF\n  select pkg.do_it() from dual;\nEOF\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert_eq!(refs.len(), 1);
        match &refs[0].kind {
            RawKind::Procedure { qualified } => assert_eq!(qualified, "pkg.do_it"),
            _ => panic!("expected procedure reference"),
        }
    }

    #[test]
    fn s4_control_file_reference() {
        let lines = classify("sqlldr userid=u/p@s control=customer_data.ctl\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert_eq!(refs.len(), 1);
        match &refs[0].kind {
            RawKind::ControlFile { basename } => assert_eq!(basename, "customer_data.ctl"),
            _ => panic!("expected control file reference"),
        }
    }

    #[test]
    fn bare_name_at_command_position() {
        let lines = classify("level4_script.ksh\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert_eq!(refs.len(), 1);
        match &refs[0].kind {
            RawKind::Script { basename, .. } => assert_eq!(basename, "level4_script.ksh"),
            _ => panic!("expected script reference"),
        }
        assert!(matches!(refs[0].style, InvocationStyle::BareName));
    }

    #[test]
    fn explicit_interpreter_style() {
        let lines = classify("ksh process.ksh\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert_eq!(refs.len(), 1);
        assert!(matches!(refs[0].style, InvocationStyle::ExplicitInterpreter));
    }

    #[test]
    fn background_suffix_recorded() {
        let lines = classify("./process.ksh &\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert_eq!(refs.len(), 1);
        assert!(matches!(refs[0].style, InvocationStyle::Background));
    }

    #[test]
    fn single_quoted_text_is_not_matched() {
        let lines = classify("echo 'call ./not_real.ksh here'\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert!(refs.is_empty());
    }

    #[test]
    fn chained_commands_yield_two_bare_names() {
        let lines = classify("first.ksh && second.ksh\n");
        let refs: Vec<_> = lines.iter().flat_map(extract_line).collect();
        assert_eq!(refs.len(), 2);
    }
}
