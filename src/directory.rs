//! A single node of the source tree (spec.md §3 "Directory").
//!
//! Grounded on `original_source/ppremake/ppDirectory.{cxx,h}`.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::dependable::FileId;
use crate::scope::arena::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(pub usize);

#[derive(Debug, Clone)]
pub struct Directory {
    pub id: DirId,
    /// Local directory name; unique across the tree (duplicates warn and
    /// the later one is dropped from the name index, see SPEC_FULL.md §4.3).
    pub name: String,
    pub parent: Option<DirId>,
    pub children: Vec<DirId>,
    /// Path relative to the tree root, no trailing separator (`PATH`).
    pub path: PathBuf,
    /// Scope created for this directory's `Sources.pp`, once parsed.
    pub scope: Option<ScopeId>,
    /// Directories this one depends on (via `DEPEND_DIRS`).
    pub depends_on: BTreeSet<DirId>,
    /// Directories that depend on this one (the reverse edge set).
    pub depended_on_by: BTreeSet<DirId>,
    /// Topological index; dependencies always have a strictly smaller index
    /// (spec.md §3 invariant 1, computed in `tree.rs`).
    pub depends_index: u32,
    /// Local filename -> DependableFile, for files belonging to this dir.
    pub files: std::collections::HashMap<String, FileId>,
}

impl Directory {
    pub fn new(id: DirId, name: impl Into<String>, path: PathBuf, parent: Option<DirId>) -> Self {
        Directory {
            id,
            name: name.into(),
            parent,
            children: Vec::new(),
            path,
            scope: None,
            depends_on: BTreeSet::new(),
            depended_on_by: BTreeSet::new(),
            depends_index: 0,
            files: std::collections::HashMap::new(),
        }
    }

    /// Relative path from the tree root, with a trailing `/` (`DIRPREFIX`),
    /// or the empty string for the root directory itself.
    pub fn dir_prefix(&self) -> String {
        let p = self.path.to_string_lossy().replace('\\', "/");
        if p.is_empty() || p == "." {
            String::new()
        } else {
            format!("{}/", p)
        }
    }

    pub fn path_var(&self) -> String {
        let p = self.path.to_string_lossy().replace('\\', "/");
        if p == "." {
            String::new()
        } else {
            p
        }
    }
}
