//! Tracked C/C++ source/header files and their `#include` dependency graph
//! (spec.md §3 "DependableFile", §4.4 "File Dependency Cache" scanning half).
//!
//! Grounded on `original_source/ppremake/ppDependableFile.{cxx,h}`; the
//! include-extraction regex is grounded on the teacher's
//! `build.rs::direct_dependencies!` macro, which does the same job with
//! `regex::Regex` over `#include "NAME"` lines.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;

use crate::directory::DirId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub target: FileId,
    pub okcircular: bool,
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct FileFlags: u8 {
        const UPDATED     = 0b0000_0001;
        const UPDATING    = 0b0000_0010;
        const CIRCULARITY = 0b0000_0100;
        const STATTED     = 0b0000_1000;
        const EXISTS      = 0b0001_0000;
        const FROM_CACHE  = 0b0010_0000;
        const BAD_CACHE   = 0b0100_0000;
    }
}

#[derive(Debug, Clone)]
pub struct DependableFile {
    pub id: FileId,
    pub owner: DirId,
    /// Bare filename, e.g. `foo.h` (the cache/dependency key).
    pub filename: String,
    /// Full path on disk, used for mtime/existence checks.
    pub full_path: PathBuf,
    mtime: Option<SystemTime>,
    pub deps: Vec<Dependency>,
    /// `#include`d names that resolved outside the tree; kept only for
    /// cache-validation bookkeeping (spec.md §3).
    pub extra_includes: Vec<String>,
    pub flags: FileFlags,
    pub circularity: Option<String>,
}

impl DependableFile {
    pub fn new(id: FileId, owner: DirId, filename: String, full_path: PathBuf) -> Self {
        DependableFile {
            id,
            owner,
            filename,
            full_path,
            mtime: None,
            deps: Vec::new(),
            extra_includes: Vec::new(),
            flags: FileFlags::empty(),
            circularity: None,
        }
    }

    pub fn mtime(&mut self) -> Option<SystemTime> {
        if !self.flags.contains(FileFlags::STATTED) {
            self.flags.insert(FileFlags::STATTED);
            match fs::metadata(&self.full_path) {
                Ok(meta) => {
                    self.flags.insert(FileFlags::EXISTS);
                    self.mtime = meta.modified().ok();
                }
                Err(_) => {
                    self.mtime = None;
                }
            }
        }
        self.mtime
    }

    pub fn exists(&mut self) -> bool {
        self.mtime();
        self.flags.contains(FileFlags::EXISTS)
    }

    /// Sorts `deps` by the target's full path and removes duplicates
    /// (spec.md §8 invariant 2).
    pub fn normalize_deps(&mut self, paths: &dyn Fn(FileId) -> PathBuf) {
        self.deps.sort_by(|a, b| paths(a.target).cmp(&paths(b.target)));
        self.deps.dedup_by_key(|d| d.target);
    }
}

/// Extracts the bare filename from a C/C++ `#include "NAME"` or
/// `#include <NAME>` line, or `None` if the line is not an include
/// directive. Grounded on `original_source/ppremake/ppDependableFile.cxx`'s
/// `extract_include` helper and `build.rs::direct_dependencies!`'s regex.
pub fn extract_include(line: &str) -> Option<String> {
    static PATTERN: &str = r#"^\s*#\s*include\s*(?:"([^"]+)"|<([^>]+)>)"#;
    thread_local! {
        static RE: Regex = Regex::new(PATTERN).unwrap();
    }
    RE.with(|re| {
        re.captures(line).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
        })
    })
}

/// True if the non-whitespace prefix of `line` is the sentinel comment that
/// marks the *following* `#include` as deliberately circular (spec.md §3
/// invariant on `okcircular`).
pub fn is_okcircular_marker(line: &str) -> bool {
    line.trim_start().starts_with("/* okcircular */")
}

/// Scans `path`'s contents line by line, returning (include name,
/// okcircular) pairs in file order.
pub fn scan_includes(path: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let contents = fs::read_to_string(path)?;
    let mut out = Vec::new();
    let mut pending_okcircular = false;
    for line in contents.lines() {
        if is_okcircular_marker(line) {
            pending_okcircular = true;
            continue;
        }
        if let Some(name) = extract_include(line) {
            out.push((name, pending_okcircular));
        }
        pending_okcircular = false;
    }
    Ok(out)
}

/// Backs the `dependencies` builtin (spec.md §4.1) without requiring the
/// expression engine to depend directly on `tree.rs`/`project.rs`: the
/// `Engine` holds an `Option<Box<dyn IncludeGraph>>`, populated once the
/// directory tree and file arena exist.
pub trait IncludeGraph {
    /// Returns the space-joined transitive `#include` closure of `files`
    /// (bare filenames) as resolved from `current_dir`, in reachability
    /// order, deduplicated.
    fn transitive_includes(&self, files: &[String], current_dir: &str) -> Vec<String>;
}

/// Computes the transitive closure of dependencies for `roots`, visiting
/// each file at most once, skipping edges already marked `okcircular` at the
/// point they were recorded. Returns target `FileId`s in a valid
/// reachability order (BFS), not including the roots themselves unless they
/// are reachable via a cycle back to themselves through another root.
pub fn transitive_closure(
    roots: &[FileId],
    deps_of: &dyn Fn(FileId) -> Vec<FileId>,
) -> Vec<FileId> {
    let mut seen: HashSet<FileId> = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<FileId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        for dep in deps_of(id) {
            if seen.insert(dep) {
                order.push(dep);
                stack.push(dep);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_quoted_and_angled_includes() {
        assert_eq!(
            extract_include(r#"#include "foo.h""#),
            Some("foo.h".to_string())
        );
        assert_eq!(
            extract_include("#include <bar.h>"),
            Some("bar.h".to_string())
        );
        assert_eq!(extract_include("int x = 1;"), None);
    }

    #[test]
    fn okcircular_marker_detection() {
        assert!(is_okcircular_marker("/* okcircular */"));
        assert!(is_okcircular_marker("   /* okcircular */ trailing text"));
        assert!(!is_okcircular_marker("// okcircular"));
    }

    #[test]
    fn scan_includes_applies_marker_to_next_line_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.h");
        fs::write(
            &path,
            "#include \"normal.h\"\n/* okcircular */\n#include \"circ.h\"\n#include \"after.h\"\n",
        )
        .unwrap();
        let scanned = scan_includes(&path).unwrap();
        assert_eq!(
            scanned,
            vec![
                ("normal.h".to_string(), false),
                ("circ.h".to_string(), true),
                ("after.h".to_string(), false),
            ]
        );
    }
}
