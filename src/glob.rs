//! Shell-style glob matching, backing the `wildcard`/`isdir`/`isfile`
//! builtins.
//!
//! Grounded on `original_source/ppremake/globPattern.h`'s stated capability
//! (`*`, `?`, `[...]` matching one path component at a time) and on the
//! teacher's directory-walking idiom (`cdecompilador-amargo`'s
//! `build.rs::FromDir::from_dir`, which uses `walkdir::WalkDir` to collect
//! files matching a predicate). ppremake's `Filename`/`GlobPattern` classes
//! are out of scope per spec.md §1 beyond the capabilities they expose, so
//! this module only implements "glob expansion" and "directory scan", not a
//! full reimplementation of those classes.

use std::path::{Path, PathBuf};

/// Matches one path *component* (no `/`) against a glob pattern using `*`
/// (any run of characters), `?` (any one character) and `[set]` (character
/// class, `!` or `^` for negation).
pub fn match_component(pattern: &str, name: &str) -> bool {
    match_component_bytes(pattern.as_bytes(), name.as_bytes())
}

fn match_component_bytes(pat: &[u8], s: &[u8]) -> bool {
    match (pat.first(), s.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            // Try consuming 0..=s.len() characters for the star.
            for i in 0..=s.len() {
                if match_component_bytes(&pat[1..], &s[i..]) {
                    return true;
                }
            }
            false
        }
        (Some(b'?'), Some(_)) => match_component_bytes(&pat[1..], &s[1..]),
        (Some(b'['), Some(_)) => {
            if let Some((matched, rest_pat)) = match_class(pat, s[0]) {
                matched && match_component_bytes(rest_pat, &s[1..])
            } else {
                // Malformed class: treat '[' literally.
                pat.first() == s.first() && match_component_bytes(&pat[1..], &s[1..])
            }
        }
        (Some(p), Some(c)) => p == c && match_component_bytes(&pat[1..], &s[1..]),
        _ => false,
    }
}

/// Parses a leading `[...]` class off `pat`, returns (did `c` match, rest of
/// pattern after the closing `]`), or `None` if `pat` has no closing `]`.
fn match_class(pat: &[u8], c: u8) -> Option<(bool, &[u8])> {
    debug_assert_eq!(pat[0], b'[');
    let close = pat.iter().skip(1).position(|&b| b == b']')? + 1;
    let mut body = &pat[1..close];
    let negate = matches!(body.first(), Some(b'!') | Some(b'^'));
    if negate {
        body = &body[1..];
    }
    let mut matched = false;
    let mut i = 0;
    while i < body.len() {
        if i + 2 < body.len() && body[i + 1] == b'-' {
            if body[i] <= c && c <= body[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if body[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    Some((matched != negate, &pat[close + 1..]))
}

/// True if `pattern` contains any glob metacharacter.
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

/// Expands a single whitespace-separated glob expression (as the `wildcard`
/// builtin receives, spec.md §4.1) to the sorted list of matching paths
/// relative to `base`. Non-wildcard tokens pass through unchanged whether or
/// not they exist (matching GNU-make `wildcard`'s behavior of only filtering
/// tokens that *do* contain metacharacters... except ppremake's legacy
/// `wildcard` only returns files that actually exist, so a plain literal
/// token is included only if present on disk).
pub fn expand(pattern: &str, base: &Path) -> Vec<String> {
    let mut results = Vec::new();
    for token in pattern.split_whitespace() {
        results.extend(expand_one(token, base));
    }
    results.sort();
    results.dedup();
    results
}

fn expand_one(token: &str, base: &Path) -> Vec<String> {
    if !has_wildcard(token) {
        let candidate = if Path::new(token).is_absolute() {
            PathBuf::from(token)
        } else {
            base.join(token)
        };
        return if candidate.exists() {
            vec![token.to_string()]
        } else {
            Vec::new()
        };
    }

    let (dir_part, leaf_pattern) = match token.rfind('/') {
        Some(idx) => (&token[..idx], &token[idx + 1..]),
        None => ("", token),
    };
    let scan_dir = if dir_part.is_empty() {
        base.to_path_buf()
    } else if Path::new(dir_part).is_absolute() {
        PathBuf::from(dir_part)
    } else {
        base.join(dir_part)
    };

    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&scan_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if match_component(leaf_pattern, &name) {
                let prefix = if dir_part.is_empty() {
                    String::new()
                } else {
                    format!("{}/", dir_part)
                };
                out.push(format!("{}{}", prefix, name));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        assert!(match_component("*.c", "a.c"));
        assert!(match_component("*.c", "foo.bar.c"));
        assert!(!match_component("*.c", "a.h"));
    }

    #[test]
    fn question_matches_one_char() {
        assert!(match_component("a?c", "abc"));
        assert!(!match_component("a?c", "abbc"));
    }

    #[test]
    fn class_matching() {
        assert!(match_component("[abc].c", "a.c"));
        assert!(!match_component("[abc].c", "d.c"));
        assert!(match_component("[!abc].c", "d.c"));
        assert!(match_component("[a-c].c", "b.c"));
    }

    #[test]
    fn has_wildcard_detection() {
        assert!(has_wildcard("*.c"));
        assert!(has_wildcard("a?c"));
        assert!(has_wildcard("[abc]"));
        assert!(!has_wildcard("plain.c"));
    }
}
