//! Line-oriented lexical classification of shell script text.
//!
//! Deliberately not a full shell grammar: tracks just enough state (open
//! heredoc, open quote) to tell active code apart from comments and heredoc
//! bodies, per the invariants in §4.3.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Active,
    Comment,
    HeredocBody,
}

#[derive(Debug, Clone)]
pub struct TaggedLine {
    pub line_number: u64,
    /// For `Active` lines, the inline comment (if any) has already been
    /// truncated off. For `Comment`/`HeredocBody` lines, this is the raw text.
    pub text: String,
    pub class: LineClass,
}

fn heredoc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<<-?\s*["']?(\w+)["']?"#).unwrap())
}

/// Stateful filter; one instance per file.
pub struct LexicalFilter {
    heredoc_terminator: Option<String>,
    anomaly: bool,
}

impl LexicalFilter {
    pub fn new() -> Self {
        LexicalFilter {
            heredoc_terminator: None,
            anomaly: false,
        }
    }

    /// Whether the file ended with an unterminated heredoc (a `ParseAnomaly`).
    pub fn had_anomaly(&self) -> bool {
        self.anomaly && self.heredoc_terminator.is_some()
    }

    /// Classify every line of `content`, tracking heredoc state across lines.
    pub fn classify(&mut self, content: &str) -> Vec<TaggedLine> {
        let mut out = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line_number = (idx as u64) + 1;

            if let Some(terminator) = self.heredoc_terminator.clone() {
                out.push(TaggedLine {
                    line_number,
                    text: raw.to_string(),
                    class: LineClass::HeredocBody,
                });
                if raw.trim() == terminator {
                    self.heredoc_terminator = None;
                }
                continue;
            }

            let trimmed = raw.trim_start();
            let is_shebang = line_number == 1 && trimmed.starts_with("#!");
            if trimmed.starts_with('#') && !is_shebang {
                out.push(TaggedLine {
                    line_number,
                    text: raw.to_string(),
                    class: LineClass::Comment,
                });
                continue;
            }
            // Shebang on line 1 is active code (conventionally a no-op comment
            // to the shell, but §4.3 excludes it from Comment classification).

            let active_text = truncate_inline_comment(raw);

            if let Some(caps) = heredoc_re().captures(&active_text) {
                self.heredoc_terminator = Some(caps[1].to_string());
                self.anomaly = true;
            }

            out.push(TaggedLine {
                line_number,
                text: active_text,
                class: LineClass::Active,
            });
        }

        if self.heredoc_terminator.is_none() {
            self.anomaly = false;
        }

        out
    }
}

impl Default for LexicalFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip a trailing `# comment`, respecting quoted `#` characters.
fn truncate_inline_comment(line: &str) -> String {
    let mut in_single = false;
    let mut in_double = false;

    for (idx, ch) in line.char_indices() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => return line[..idx].to_string(),
            _ => {}
        }
    }
    line.to_string()
}

/// Strip single-quoted spans from a line so pattern matching never fires
/// inside them (§4.3: "single-quoted strings suppress all pattern matching").
pub fn strip_single_quoted(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_single = false;
    let mut in_double = false;

    for ch in line.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(' ');
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(ch);
            }
            _ if in_single => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shebang_is_active() {
        let mut filter = LexicalFilter::new();
        let lines = filter.classify("#!/bin/ksh\necho hi\n");
        assert_eq!(lines[0].class, LineClass::Active);
    }

    #[test]
    fn hash_comment_after_line_one() {
        let mut filter = LexicalFilter::new();
        let lines = filter.classify("#!/bin/ksh\n# a real comment\necho hi\n");
        assert_eq!(lines[1].class, LineClass::Comment);
        assert_eq!(lines[2].class, LineClass::Active);
    }

    #[test]
    fn heredoc_body_until_terminator() {
        let mut filter = LexicalFilter::new();
        let lines = filter.classify("sqlplus <<EOF\nselect pkg.do_it() from dual;\nEOF\necho done\n");
        assert_eq!(lines[0].class, LineClass::Active);
        assert_eq!(lines[1].class, LineClass::HeredocBody);
        assert_eq!(lines[2].class, LineClass::HeredocBody);
        assert_eq!(lines[3].class, LineClass::Active);
        assert!(!filter.had_anomaly());
    }

    #[test]
    fn unterminated_heredoc_is_an_anomaly() {
        let mut filter = LexicalFilter::new();
        let lines = filter.classify("sqlplus <<EOF\nselect 1 from dual;\n");
        assert!(lines.iter().all(|l| l.class != LineClass::Comment));
        assert!(filter.had_anomaly());
    }

    #[test]
    fn inline_comment_truncated_unless_quoted() {
        let mut filter = LexicalFilter::new();
        let lines = filter.classify("cmd arg # trailing comment\necho \"a # b\"\n");
        assert_eq!(lines[0].text, "cmd arg ");
        assert_eq!(lines[1].text, "echo \"a # b\"");
    }

    #[test]
    fn single_quotes_suppress_matching() {
        let stripped = strip_single_quoted("echo './cleanup.ksh is not a call'");
        assert!(!stripped.contains("cleanup.ksh"));
    }
}
