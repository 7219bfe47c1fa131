//! Path utility functions backing the filesystem-flavored builtins
//! (`isfullpath`, `osfilename`, `unixfilename`, `standardize`, `canonical`,
//! `dir`, `notdir`, `suffix`, `basename`).
//!
//! Grounded on `original_source/ppremake/filename.{cxx,h}`. The legacy
//! `Filename` class bundled Cygwin-path mixing and Windows drive-letter
//! handling; both are out of scope here (spec.md §1 Non-goals), so these
//! functions assume a POSIX-flavored path convention uniformly and treat
//! `osfilename`/`unixfilename` as identity on non-Windows platforms, exactly
//! as the "modern filesystem API" assumption in spec.md §1 licenses.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// True if `path` is rooted (begins with `/`, or with a drive-letter +
/// `\`/`/` on Windows).
pub fn is_full_path(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    #[cfg(windows)]
    {
        let bytes = path.as_bytes();
        if bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'/' || bytes[2] == b'\\')
        {
            return true;
        }
    }
    false
}

/// Converts a unix-style path to the platform-native separator convention.
pub fn to_os_specific(path: &str) -> String {
    if MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace('/', &MAIN_SEPARATOR.to_string())
    }
}

/// Converts a platform-native path back to unix-style (`/`-separated).
pub fn from_os_specific(path: &str) -> String {
    if MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace(MAIN_SEPARATOR, "/")
    }
}

/// Alias of `to_os_specific`, kept for the legacy `cygpath_w` name
/// (spec.md §9 Open Questions: implement as an alias, no drive-letter
/// translation).
pub fn cygpath_w(path: &str) -> String {
    to_os_specific(path)
}

/// Alias of `from_os_specific`, kept for the legacy `cygpath_p` name.
pub fn cygpath_p(path: &str) -> String {
    from_os_specific(path)
}

/// Collapses `.`/`..` components and duplicate slashes without touching the
/// filesystem (a "standardize", as opposed to `canonical` which resolves
/// symlinks and requires the path to exist).
pub fn standardize(path: &str) -> String {
    let is_abs = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if matches!(out.last(), Some(c) if *c != "..") {
                    out.pop();
                } else if !is_abs {
                    out.push("..");
                }
            }
            c => out.push(c),
        }
    }
    let joined = out.join("/");
    if is_abs {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Resolves the path against the filesystem (symlinks, `..`) the way
/// `std::fs::canonicalize` does; returns the standardized form if the path
/// does not exist, matching "fall back to pure-string standardization"
/// (canonicalization of a nonexistent file is not an error in ppremake,
/// since `Filename::get` queries may target files not yet created).
pub fn canonical(path: &str) -> String {
    match std::fs::canonicalize(path) {
        Ok(p) => from_os_specific(&p.to_string_lossy()),
        Err(_) => standardize(path),
    }
}

/// The directory portion of `path`, with a trailing slash, or `"./"` if
/// `path` has no directory component (GNU-make `dir` semantics).
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => "./".to_string(),
    }
}

/// Everything after the last `/` (GNU-make `notdir` semantics).
pub fn notdir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None => path.to_string(),
    }
}

/// The file extension including the leading dot, or empty string if none.
pub fn suffix(path: &str) -> String {
    let name = notdir(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_string(),
        _ => String::new(),
    }
}

/// `path` with its suffix (as defined by [`suffix`]) removed.
pub fn basename(path: &str) -> String {
    let suf = suffix(path);
    if suf.is_empty() {
        path.to_string()
    } else {
        path[..path.len() - suf.len()].to_string()
    }
}

/// Joins `dir` and `leaf`, normalizing the single separator between them.
pub fn join(dir: &str, leaf: &str) -> PathBuf {
    Path::new(dir).join(leaf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_path_detection() {
        assert!(is_full_path("/usr/lib"));
        assert!(!is_full_path("usr/lib"));
        assert!(!is_full_path("../usr/lib"));
    }

    #[test]
    fn dir_notdir_roundtrip() {
        assert_eq!(dir("a/b/c.cxx"), "a/b/");
        assert_eq!(notdir("a/b/c.cxx"), "c.cxx");
        assert_eq!(dir("c.cxx"), "./");
        assert_eq!(notdir("c.cxx"), "c.cxx");
    }

    #[test]
    fn suffix_and_basename() {
        assert_eq!(suffix("a/b/c.cxx"), ".cxx");
        assert_eq!(basename("a/b/c.cxx"), "a/b/c");
        assert_eq!(suffix("Makefile"), "");
        assert_eq!(basename("Makefile"), "Makefile");
        assert_eq!(suffix(".hidden"), "");
    }

    #[test]
    fn standardize_collapses_dots() {
        assert_eq!(standardize("a/./b/../c"), "a/c");
        assert_eq!(standardize("/a/./b/../c"), "/a/c");
        assert_eq!(standardize("../a/b"), "../a/b");
        assert_eq!(standardize("a//b"), "a/b");
    }
}
