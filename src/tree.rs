//! Directory tree discovery, construction, and inter-directory dependency
//! resolution (spec.md §4.3).
//!
//! Grounded on `original_source/ppremake/ppDirectoryTree.{cxx,h}`; recursive
//! filesystem scanning follows the teacher's idiom of walking directories
//! with `walkdir` (`cdecompilador-amargo`'s `build.rs::FromDir::from_dir`),
//! though here the scan must stop descending at a directory with no
//! `Sources.pp`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::dependable::FileId;
use crate::directory::{DirId, Directory};
use crate::error::{Error, Result};

pub const PACKAGE_FILE: &str = "Package.pp";
pub const SOURCES_FILE: &str = "Sources.pp";

#[derive(Debug)]
pub struct DirectoryTree {
    dirs: Vec<Directory>,
    /// Local directory name -> id. Duplicate names keep the first
    /// registration and warn (SPEC_FULL.md §4.3).
    name_index: HashMap<String, DirId>,
    pub root: DirId,
    /// Cross-directory header lookup used when an `#include` does not
    /// resolve within the including file's own directory.
    pub main_header_index: HashMap<String, FileId>,
}

impl DirectoryTree {
    /// Walks upward from `start` looking for `Package.pp`, matching spec.md
    /// §4.3's discovery algorithm: keep climbing while either a
    /// `Sources.pp` has been seen or no `Package.pp` has been found yet.
    pub fn discover_root(start: &Path) -> Result<PathBuf> {
        let mut current = start
            .canonicalize()
            .map_err(|e| Error::io(start, e))?;
        let mut saw_sources = false;

        loop {
            if current.join(PACKAGE_FILE).is_file() {
                return Ok(current);
            }
            if current.join(SOURCES_FILE).is_file() {
                saw_sources = true;
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => {
                    return if saw_sources {
                        Err(Error::NoPackageFile(start.to_path_buf()))
                    } else {
                        Err(Error::NoSourcesSeen(start.to_path_buf()))
                    };
                }
            }
        }
    }

    /// Recursively scans `root`, registering every subdirectory that
    /// contains a `Sources.pp` (spec.md §4.3 "Tree construction"). The root
    /// itself is always registered regardless of whether it has a
    /// `Sources.pp` (it is identified by `Package.pp`).
    pub fn build(root: &Path) -> Self {
        let mut tree = DirectoryTree {
            dirs: Vec::new(),
            name_index: HashMap::new(),
            root: DirId(0),
            main_header_index: HashMap::new(),
        };

        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());
        let root_id = tree.insert(root_name, PathBuf::from("."), None);
        tree.root = root_id;

        tree.scan_children(root_id, root, root);
        tree
    }

    fn scan_children(&mut self, parent_id: DirId, parent_path: &Path, tree_root: &Path) {
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(parent_path) {
            Ok(rd) => rd.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect(),
            Err(_) => return,
        };
        entries.sort();

        for child_path in entries {
            if !child_path.join(SOURCES_FILE).is_file() {
                continue;
            }
            let name = child_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string();
            let rel = child_path
                .strip_prefix(tree_root)
                .unwrap_or(&child_path)
                .to_path_buf();
            let child_id = self.insert(name, rel, Some(parent_id));
            self.get_mut(parent_id).children.push(child_id);
            self.scan_children(child_id, &child_path, tree_root);
        }
    }

    fn insert(&mut self, name: String, path: PathBuf, parent: Option<DirId>) -> DirId {
        let id = DirId(self.dirs.len());
        if self.name_index.contains_key(&name) {
            log::warn!("duplicate directory name {:?}; keeping the first one seen", name);
        } else {
            self.name_index.insert(name.clone(), id);
        }
        self.dirs.push(Directory::new(id, name, path, parent));
        id
    }

    /// Scans `dirs` non-recursively as `DEPENDABLE_HEADER_DIRS` contributors
    /// (spec.md §4.3 "External header directories"); callers register each
    /// returned path as a cross-tree `DependableFile`.
    pub fn scan_external_header_dir(dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    pub fn get(&self, id: DirId) -> &Directory {
        &self.dirs[id.0]
    }

    pub fn get_mut(&mut self, id: DirId) -> &mut Directory {
        &mut self.dirs[id.0]
    }

    pub fn by_name(&self, name: &str) -> Option<DirId> {
        self.name_index.get(name).copied()
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = DirId> + '_ {
        (0..self.dirs.len()).map(DirId)
    }

    /// Records that `from` depends on `to` (`DEPEND_DIRS`, spec.md §4.3).
    pub fn add_dependency(&mut self, from: DirId, to: DirId) {
        self.get_mut(from).depends_on.insert(to);
        self.get_mut(to).depended_on_by.insert(from);
    }

    /// Computes `depends_index` for every directory via depth-first
    /// numbering (spec.md §4.3): a node with no outgoing edges gets index 1;
    /// otherwise `1 + max(children.depends_index)`. A node revisited while
    /// still being computed indicates a cycle, which is fatal.
    pub fn compute_depends_index(&mut self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Unvisited,
            Computing,
            Done,
        }
        let mut state = vec![State::Unvisited; self.dirs.len()];

        fn visit(
            tree: &mut DirectoryTree,
            id: DirId,
            state: &mut Vec<State>,
            chain: &mut Vec<String>,
        ) -> Result<u32> {
            match state[id.0] {
                State::Done => return Ok(tree.get(id).depends_index),
                State::Computing => {
                    chain.push(tree.get(id).name.clone());
                    return Err(Error::Cycle(chain.clone()));
                }
                State::Unvisited => {}
            }
            state[id.0] = State::Computing;
            chain.push(tree.get(id).name.clone());

            let children: Vec<DirId> = tree.get(id).depends_on.iter().copied().collect();
            let mut max_index = 0u32;
            for child in children {
                let child_index = visit(tree, child, state, chain)?;
                max_index = max_index.max(child_index);
            }

            chain.pop();
            state[id.0] = State::Done;
            let idx = max_index + 1;
            tree.get_mut(id).depends_index = idx;
            Ok(idx)
        }

        for id in self.iter_ids().collect::<Vec<_>>() {
            if state[id.0] == State::Unvisited {
                let mut chain = Vec::new();
                visit(self, id, &mut state, &mut chain)?;
            }
        }

        self.resort_children();
        Ok(())
    }

    /// Recomputes `SUBDIRS`/`SUBTREE` order: ascending `depends_index`, tied
    /// broken by directory name (spec.md §4.3, SPEC_FULL.md §4.3).
    fn resort_children(&mut self) {
        for id in self.iter_ids().collect::<Vec<_>>() {
            let dir_index = |t: &DirectoryTree, c: DirId| (t.get(c).depends_index, t.get(c).name.clone());
            let mut children = self.get(id).children.clone();
            children.sort_by(|&a, &b| dir_index(self, a).cmp(&dir_index(self, b)));
            self.get_mut(id).children = children;
        }
    }

    /// Space-separated immediate children, dependency-sorted (`SUBDIRS`).
    pub fn subdirs_var(&self, id: DirId) -> String {
        self.get(id)
            .children
            .iter()
            .map(|c| self.get(*c).name.clone())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Recursive version of `subdirs_var` (`SUBTREE`).
    pub fn subtree_var(&self, id: DirId) -> String {
        let mut names = Vec::new();
        self.collect_subtree(id, &mut names);
        names.join(" ")
    }

    fn collect_subtree(&self, id: DirId, out: &mut Vec<String>) {
        for &child in &self.get(id).children {
            out.push(self.get(child).name.clone());
            self.collect_subtree(child, out);
        }
    }

    /// Directory ids in dependency order (ascending `depends_index`, then
    /// name) — the canonical processing order for the driver and for
    /// `forscopes`/named-scope iteration.
    pub fn dependency_order(&self) -> Vec<DirId> {
        let mut ids: Vec<DirId> = self.iter_ids().collect();
        ids.sort_by_key(|&id| (self.get(id).depends_index, self.get(id).name.clone()));
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_tree(root: &Path, dirs: &[&str]) -> DirectoryTree {
        fs::write(root.join(PACKAGE_FILE), "").unwrap();
        for d in dirs {
            let p = root.join(d);
            fs::create_dir_all(&p).unwrap();
            fs::write(p.join(SOURCES_FILE), "").unwrap();
        }
        DirectoryTree::build(root)
    }

    #[test]
    fn discover_root_finds_package_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join(PACKAGE_FILE), "").unwrap();
        let sub = root.join("a/b");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(SOURCES_FILE), "").unwrap();

        let found = DirectoryTree::discover_root(&sub).unwrap();
        assert_eq!(found, root.canonicalize().unwrap());
    }

    #[test]
    fn discover_root_errors_when_no_package_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("a");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(SOURCES_FILE), "").unwrap();
        let err = DirectoryTree::discover_root(&sub).unwrap_err();
        assert!(matches!(err, Error::NoPackageFile(_)));
    }

    #[test]
    fn topo_sort_orders_dependencies_before_dependents() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = make_tree(tmp.path(), &["a", "b", "c"]);
        let a = tree.by_name("a").unwrap();
        let b = tree.by_name("b").unwrap();
        let c = tree.by_name("c").unwrap();
        // c depends on b depends on a.
        tree.add_dependency(c, b);
        tree.add_dependency(b, a);
        tree.compute_depends_index().unwrap();

        assert!(tree.get(b).depends_index > tree.get(a).depends_index);
        assert!(tree.get(c).depends_index > tree.get(b).depends_index);
    }

    #[test]
    fn cycle_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = make_tree(tmp.path(), &["a", "b"]);
        let a = tree.by_name("a").unwrap();
        let b = tree.by_name("b").unwrap();
        tree.add_dependency(a, b);
        tree.add_dependency(b, a);
        let err = tree.compute_depends_index().unwrap_err();
        assert!(matches!(err, Error::Cycle(_)));
    }
}
