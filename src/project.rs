//! Ties the directory tree, the file-dependency arena, and the on-disk
//! cache together (spec.md §3, §4.3, §4.4) and implements [`IncludeGraph`]
//! for the `dependencies` builtin.
//!
//! Grounded on `original_source/ppremake/ppDirectoryTree.cxx`'s ownership of
//! both the tree and the per-directory `DependableFile` tables; this struct
//! is the Rust composition root for that relationship, kept out of
//! `crate::scope` so the expression engine doesn't need to depend on the
//! tree/cache modules directly (spec.md §9 "arena + indices").

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cache::{self, CacheConfig, CacheEntry};
use crate::dependable::{self, DependableFile, FileFlags, FileId, IncludeGraph};
use crate::directory::DirId;
use crate::tree::DirectoryTree;

pub struct Project {
    pub tree: DirectoryTree,
    files: Vec<DependableFile>,
    cache_config: CacheConfig,
    /// Circularity diagnostics collected during dependency resolution
    /// (spec.md §3 invariant on `okcircular`; §4.5 `-P/--strict` escalates
    /// these from warnings to errors). Drained by the driver into the
    /// engine's [`crate::error::ErrorSink`] after every directory has been
    /// resolved.
    diagnostics: Vec<(String, bool)>,
}

impl Project {
    pub fn new(tree: DirectoryTree, cache_config: CacheConfig) -> Self {
        Project { tree, files: Vec::new(), cache_config, diagnostics: Vec::new() }
    }

    /// Drains the circularity diagnostics accumulated since the last call;
    /// each entry is `(message, is_error)` where `is_error` reflects whether
    /// `-P/--strict` was in effect when the circularity was found.
    pub fn take_diagnostics(&mut self) -> Vec<(String, bool)> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn alloc_file(&mut self, owner: DirId, filename: String, full_path: PathBuf) -> FileId {
        let id = FileId(self.files.len());
        let file = DependableFile::new(id, owner, filename.clone(), full_path);
        self.files.push(file);
        self.tree.get_mut(owner).files.insert(filename, id);
        id
    }

    pub fn get_file(&self, id: FileId) -> &DependableFile {
        &self.files[id.0]
    }

    pub fn get_file_mut(&mut self, id: FileId) -> &mut DependableFile {
        &mut self.files[id.0]
    }

    fn find_by_name(&self, name: &str) -> Option<FileId> {
        if let Some(&id) = self.tree.main_header_index.get(name) {
            return Some(id);
        }
        for dir in self.tree.iter_ids() {
            if let Some(&id) = self.tree.get(dir).files.get(name) {
                return Some(id);
            }
        }
        None
    }

    /// Loads one directory's on-disk cache and validates every entry
    /// against the files it names, scanning from scratch whenever the
    /// cache is missing, stale, or any entry in a file's closure is bad
    /// (spec.md §4.4 "Validation"). `strict` escalates unmarked circular
    /// `#include`s from a warning to an error (`-P`, SPEC_FULL.md §4.5).
    pub fn resolve_dependencies(&mut self, dir: DirId, cache_path: &Path, strict: bool) -> std::io::Result<()> {
        let cached = cache::load(cache_path, &self.cache_config)?;
        let file_ids: Vec<FileId> = self.tree.get(dir).files.values().copied().collect();
        for id in file_ids {
            self.compute_dependencies(id, &cached, strict);
        }
        Ok(())
    }

    /// Recursively computes `id`'s dependency set, mirroring spec.md §3's
    /// invariants: `UPDATING` marks a file whose own computation is still in
    /// flight, so an incoming edge that observes it is a circular include
    /// (suppressed if the edge was marked `okcircular`, otherwise a warning
    /// escalated to an error under `-P`); a cached entry is trusted only if
    /// its mtime matches and every dep it names still resolves in-tree
    /// (spec.md §4.4 "Validation" (b)/(c)), and a `bad_cache` verdict on any
    /// file in the transitive closure forces a fresh scan of this file too
    /// (spec.md §4.4 "a single `bad_cache` entry anywhere in the transitive
    /// closure invalidates the whole file's cache"). Returns whether `id`
    /// ended up `bad_cache`, so the caller can propagate it upward.
    fn compute_dependencies(&mut self, id: FileId, cached: &HashMap<String, CacheEntry>, strict: bool) -> bool {
        let flags = self.get_file(id).flags;
        if flags.contains(FileFlags::UPDATED) {
            return flags.contains(FileFlags::BAD_CACHE);
        }
        if flags.contains(FileFlags::UPDATING) {
            // Caller observed this file mid-computation; it is the one
            // responsible for reporting the circularity on its own edge.
            return flags.contains(FileFlags::BAD_CACHE);
        }
        self.get_file_mut(id).flags.insert(FileFlags::UPDATING);

        let filename = self.get_file(id).filename.clone();
        let full_path = self.get_file(id).full_path.clone();
        let exists = self.get_file_mut(id).exists();
        let current_mtime = self.get_file_mut(id).mtime();

        let entry = cached.get(&filename);
        let mtime_matches = exists
            && entry
                .and_then(|e| current_mtime.map(|m| cache::system_time_to_secs(m) == cache::system_time_to_secs(e.mtime)))
                .unwrap_or(false);

        let mut bad_cache = entry.is_some() && !mtime_matches;

        let (scanned, used_cache) = if mtime_matches {
            (entry.unwrap().deps.clone(), true)
        } else {
            (dependable::scan_includes(&full_path).unwrap_or_default(), false)
        };

        let mut pending: Vec<(FileId, bool)> = Vec::new();
        let mut extra = Vec::new();
        for (name, okcircular) in &scanned {
            match self.find_by_name(name) {
                Some(target) => pending.push((target, *okcircular)),
                None => {
                    if used_cache {
                        // Condition (c): a cached in-tree dep that no longer
                        // resolves invalidates the cache entry.
                        bad_cache = true;
                    }
                    extra.push(name.clone());
                }
            }
        }

        let mut deps = Vec::new();
        for (target, okcircular) in pending {
            if self.get_file(target).flags.contains(FileFlags::UPDATING) {
                if !okcircular {
                    let msg = format!(
                        "circular #include between {:?} and {:?}",
                        filename,
                        self.get_file(target).filename
                    );
                    self.diagnostics.push((msg, strict));
                    self.get_file_mut(target).flags.insert(FileFlags::CIRCULARITY);
                    self.get_file_mut(id).flags.insert(FileFlags::CIRCULARITY);
                }
                deps.push(crate::dependable::Dependency { target, okcircular });
                continue;
            }
            if self.compute_dependencies(target, cached, strict) {
                bad_cache = true;
            }
            deps.push(crate::dependable::Dependency { target, okcircular });
        }

        // A bad entry anywhere in the closure means this file's own cached
        // read (if it came from the cache) cannot be trusted either; rescan
        // it directly from disk rather than trusting the stale cache text.
        if bad_cache && used_cache {
            let rescanned = dependable::scan_includes(&full_path).unwrap_or_default();
            deps.clear();
            extra.clear();
            for (name, okcircular) in rescanned {
                match self.find_by_name(&name) {
                    Some(target) => {
                        if !self.get_file(target).flags.contains(FileFlags::UPDATED) {
                            self.compute_dependencies(target, cached, strict);
                        }
                        deps.push(crate::dependable::Dependency { target, okcircular });
                    }
                    None => extra.push(name),
                }
            }
        }

        let file = self.get_file_mut(id);
        file.deps = deps;
        file.extra_includes = extra;
        file.flags.remove(FileFlags::UPDATING);
        file.flags.insert(FileFlags::UPDATED);
        if bad_cache {
            file.flags.insert(FileFlags::BAD_CACHE);
        }
        let paths: Vec<PathBuf> = self.files.iter().map(|f| f.full_path.clone()).collect();
        self.get_file_mut(id).normalize_deps(&|fid| paths[fid.0].clone());
        bad_cache
    }

    /// Writes a Makefile-style `target: dep dep ...` listing of every
    /// tracked file's resolved dependencies to `path` (`-D`/`--depend-check`,
    /// SPEC_FULL.md §4.5), one line per file that has at least one
    /// dependency. Files are listed in allocation order for a stable diff.
    pub fn write_depend_listing(&self, path: &Path) -> std::io::Result<()> {
        let mut out = String::new();
        for file in &self.files {
            if file.deps.is_empty() {
                continue;
            }
            out.push_str(&file.filename);
            out.push(':');
            for dep in &file.deps {
                out.push(' ');
                out.push_str(&self.get_file(dep.target).filename);
            }
            out.push('\n');
        }
        std::fs::write(path, out)
    }

    /// Writes each touched directory's cache file (spec.md §4.4
    /// "Persistence"); skipped entirely when that directory's file set is
    /// empty.
    pub fn save_cache(&mut self, dir: DirId, cache_path: &Path) -> std::io::Result<()> {
        let file_ids: Vec<FileId> = self.tree.get(dir).files.values().copied().collect();
        let entries: Vec<CacheEntry> = file_ids
            .iter()
            .filter_map(|&id| {
                let file = self.get_file(id);
                let mtime = self.files[id.0].full_path.metadata().ok()?.modified().ok()?;
                Some(CacheEntry {
                    filename: file.filename.clone(),
                    mtime,
                    deps: file
                        .deps
                        .iter()
                        .map(|d| (self.get_file(d.target).filename.clone(), d.okcircular))
                        .collect(),
                    extra_includes: file.extra_includes.clone(),
                })
            })
            .collect();
        cache::save(cache_path, &entries)
    }
}

impl IncludeGraph for Project {
    fn transitive_includes(&self, files: &[String], current_dir: &str) -> Vec<String> {
        let dir_id = match self.tree.by_name(current_dir) {
            Some(id) => id,
            None => return Vec::new(),
        };
        let roots: Vec<FileId> = files
            .iter()
            .filter_map(|name| self.tree.get(dir_id).files.get(name).copied().or_else(|| self.find_by_name(name)))
            .collect();

        let closure = dependable::transitive_closure(&roots, &|id| {
            self.get_file(id).deps.iter().map(|d| d.target).collect()
        });

        let output_dir = self.tree.get(dir_id).path.clone();
        closure
            .into_iter()
            .map(|id| relative_path(&output_dir, &self.get_file(id).full_path))
            .collect()
    }
}

/// Best-effort relative-path formatting (no `pathdiff` dependency needed):
/// strips `base` as a prefix, falling back to the absolute path when
/// `target` is not rooted under `base`.
fn relative_path(base: &Path, target: &Path) -> String {
    match target.strip_prefix(base) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => target.to_string_lossy().replace('\\', "/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn single_dir_project(root: &Path, files: &[(&str, &str)]) -> (Project, DirId) {
        fs::write(root.join("Package.pp"), "").unwrap();
        for (name, contents) in files {
            fs::write(root.join(name), contents).unwrap();
        }
        let tree = DirectoryTree::build(root);
        let dir_id = tree.root;
        let mut project = Project::new(tree, CacheConfig::default());
        for (name, _) in files {
            project.alloc_file(dir_id, name.to_string(), root.join(name));
        }
        (project, dir_id)
    }

    #[test]
    fn okcircular_suppresses_diagnostic() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        // Both directions are marked, so the diagnostic is suppressed
        // regardless of which of the two files resolve_dependencies visits
        // first (file iteration order is not guaranteed).
        let (mut project, dir_id) = single_dir_project(
            root,
            &[
                ("a.h", "/* okcircular */\n#include \"b.h\"\n"),
                ("b.h", "/* okcircular */\n#include \"a.h\"\n"),
            ],
        );
        let cache_path = root.join(".ppremake.cache");
        project.resolve_dependencies(dir_id, &cache_path, false).unwrap();
        assert!(project.take_diagnostics().is_empty());
    }

    #[test]
    fn unmarked_circularity_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let (mut project, dir_id) = single_dir_project(
            root,
            &[("a.h", "#include \"b.h\"\n"), ("b.h", "#include \"a.h\"\n")],
        );
        let cache_path = root.join(".ppremake.cache");
        project.resolve_dependencies(dir_id, &cache_path, true).unwrap();
        let diagnostics = project.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].1, "strict run should mark the diagnostic as an error");
    }

    #[test]
    fn stale_cache_entry_triggers_rescan() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let (mut project, dir_id) = single_dir_project(root, &[("a.h", "#include \"b.h\"\n"), ("b.h", "")]);
        let cache_path = root.join(".ppremake.cache");

        // A cache entry naming a dep that no longer exists in the tree
        // (condition (c) of spec.md §4.4) must not be trusted blindly.
        let a_id = project.find_by_name("a.h").unwrap();
        let mtime = project.get_file_mut(a_id).mtime().unwrap();
        let stale = CacheEntry {
            filename: "a.h".to_string(),
            mtime,
            deps: vec![("gone.h".to_string(), false)],
            extra_includes: Vec::new(),
        };
        cache::save(&cache_path, &[stale]).unwrap();

        project.resolve_dependencies(dir_id, &cache_path, false).unwrap();
        let a = project.get_file(a_id);
        assert!(a.flags.contains(FileFlags::BAD_CACHE));
        let b_id = project.find_by_name("b.h").unwrap();
        assert_eq!(a.deps, vec![crate::dependable::Dependency { target: b_id, okcircular: false }]);
    }

    #[test]
    fn write_depend_listing_skips_files_with_no_deps() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let (mut project, dir_id) =
            single_dir_project(root, &[("a.h", "#include \"b.h\"\n"), ("b.h", "")]);
        let cache_path = root.join(".ppremake.cache");
        project.resolve_dependencies(dir_id, &cache_path, false).unwrap();

        let listing_path = root.join("depend.d");
        project.write_depend_listing(&listing_path).unwrap();
        let contents = fs::read_to_string(&listing_path).unwrap();
        assert_eq!(contents, "a.h: b.h\n");
    }
}
