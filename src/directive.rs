//! Line classification for the command processor (spec.md §4.2).
//!
//! Grounded on `original_source/ppremake/ppCommandFile.cxx`'s
//! `COMMAND_PREFIX`/`get_command`-style classification: a line is either a
//! directive, a stripped-comment line, a dropped full-comment line, or
//! plain text to expand and emit.

use parse_display::Display;

/// `#format` line-folding mode (SPEC_FULL.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, educe::Educe, Display)]
#[educe(Default)]
pub enum LineFormat {
    #[educe(Default)]
    #[display("straight")]
    Straight,
    #[display("collapse")]
    Collapse,
    #[display("makefile")]
    Makefile,
}

impl LineFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "straight" => Some(LineFormat::Straight),
            "collapse" => Some(LineFormat::Collapse),
            "makefile" => Some(LineFormat::Makefile),
            _ => None,
        }
    }
}

/// The result of classifying one physical (continuation-joined) source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified<'a> {
    /// A `#directive ARGS` line; `directive` excludes the leading `#`.
    Directive { directive: &'a str, args: &'a str },
    /// A line whose leading `##` escapes to a literal `#`; the remainder is
    /// plain text to expand (spec.md §4.2).
    EscapedHash(&'a str),
    /// A fully blank-after-strip line, dropped entirely.
    Dropped,
    /// Ordinary text to expand and emit, with any trailing `//` comment
    /// already stripped.
    Text(&'a str),
}

/// Strips a trailing `//` comment (and the whitespace before it) from
/// `line`, UNLESS the `//` lies inside an unterminated `$[...]` — this
/// function operates on one already-continuation-joined logical line, where
/// `$[...]` pairs are assumed balanced, so a simple nesting scan suffices.
fn strip_trailing_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'[' {
            depth += 1;
            i += 2;
            continue;
        }
        if bytes[i] == b']' && depth > 0 {
            depth -= 1;
            i += 1;
            continue;
        }
        if depth == 0 && bytes[i] == b'/' && bytes[i + 1] == b'/' {
            return line[..i].trim_end();
        }
        i += 1;
    }
    line
}

/// Classifies one logical source line (spec.md §4.2).
pub fn classify(line: &str) -> Classified<'_> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("##") {
        return Classified::EscapedHash(&trimmed[2..]);
    }
    if let Some(rest) = trimmed.strip_prefix('#') {
        if rest.chars().next().map(|c| c.is_alphabetic()).unwrap_or(false) {
            let rest = rest.trim_start();
            return match rest.find(char::is_whitespace) {
                Some(idx) => Classified::Directive {
                    directive: &rest[..idx],
                    args: rest[idx..].trim_start(),
                },
                None => Classified::Directive { directive: rest, args: "" },
            };
        }
    }
    if trimmed.starts_with("//") {
        return Classified::Dropped;
    }
    Classified::Text(strip_trailing_comment(line))
}

/// True if `line`, after stripping trailing whitespace, ends in a single
/// backslash — meaning the directive continues onto the next physical line
/// (spec.md §4.2).
pub fn continues(line: &str) -> bool {
    line.trim_end().ends_with('\\')
}

/// Strips the trailing continuation backslash and trims the line.
pub fn strip_continuation(line: &str) -> &str {
    line.trim_end().trim_end_matches('\\').trim_end()
}

/// Joins continuation lines (spec.md §4.2 "Directives continue onto the
/// next physical line if the preceding line ends in a backslash after
/// whitespace stripping") into single logical lines.
pub fn join_continuations<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = String::new();
    let mut in_continuation = false;
    for line in lines {
        if in_continuation {
            pending.push(' ');
        }
        if continues(line) {
            pending.push_str(strip_continuation(line));
            in_continuation = true;
        } else {
            pending.push_str(line);
            out.push(std::mem::take(&mut pending));
            in_continuation = false;
        }
    }
    if !pending.is_empty() {
        out.push(pending);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_is_recognized() {
        assert_eq!(
            classify("  #define X foo bar"),
            Classified::Directive { directive: "define", args: "X foo bar" }
        );
    }

    #[test]
    fn escaped_hash_is_not_a_directive() {
        assert_eq!(classify("##define not a directive"), Classified::EscapedHash("define not a directive"));
    }

    #[test]
    fn full_comment_line_is_dropped() {
        assert_eq!(classify("   // a comment"), Classified::Dropped);
    }

    #[test]
    fn trailing_comment_is_stripped() {
        assert_eq!(classify("foo $[X] // trailing"), Classified::Text("foo $[X]"));
    }

    #[test]
    fn double_slash_inside_expression_is_not_a_comment() {
        assert_eq!(
            classify("$[findstring //,a//b]"),
            Classified::Text("$[findstring //,a//b]")
        );
    }

    #[test]
    fn continuation_lines_are_joined() {
        let lines = vec!["#define X a \\", "b \\", "c"];
        let joined = join_continuations(lines.into_iter());
        assert_eq!(joined, vec!["#define X a b c".to_string()]);
    }

    #[test]
    fn line_format_parses_known_modes() {
        assert_eq!(LineFormat::parse("makefile"), Some(LineFormat::Makefile));
        assert_eq!(LineFormat::parse("bogus"), None);
        assert_eq!(LineFormat::default(), LineFormat::Straight);
    }
}
