//! Named-scopes registry (spec.md §3 "Named-scopes registry").
//!
//! Grounded on `original_source/ppremake/ppNamedScopes.{cxx,h}`. Scopes
//! pushed by `#begin NAME` within a directory's `Sources.pp` are indexed
//! here so other directories' code can iterate them by `dirname/scopename`,
//! `./scopename`, or `*/scopename`.

use std::collections::HashMap;

use crate::scope::arena::ScopeId;

#[derive(Debug, Default)]
pub struct NamedScopes {
    // dir name -> scope name -> scope ids (insertion order preserved).
    by_dir: HashMap<String, HashMap<String, Vec<ScopeId>>>,
    // dir name -> depends_index, filled in once topo order is known.
    depends_index: HashMap<String, u32>,
}

impl NamedScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dir: &str, scope_name: &str, id: ScopeId) {
        self.by_dir
            .entry(dir.to_string())
            .or_default()
            .entry(scope_name.to_string())
            .or_default()
            .push(id);
    }

    pub fn set_depends_index(&mut self, dir: &str, index: u32) {
        self.depends_index.insert(dir.to_string(), index);
    }

    fn dir_order_key(&self, dir: &str) -> (u32, String) {
        (
            self.depends_index.get(dir).copied().unwrap_or(0),
            dir.to_string(),
        )
    }

    /// Resolves one `dir/scope` selector token against the registry.
    /// `dir` may be `.` (meaning `current_dir`), `*` (all directories that
    /// have named scopes), or a literal directory name. `scope` may be `*`
    /// (all scopes registered in the matched directories, excluding the
    /// empty-name top-level scope) or a literal scope name.
    ///
    /// Results are sorted by the owning directory's dependency index, then
    /// directory name (spec.md §3's stated iteration-order rule).
    pub fn resolve(&self, token: &str, current_dir: &str) -> Vec<ScopeId> {
        let (dir_sel, scope_sel) = match token.split_once('/') {
            Some((d, s)) => (d, s),
            None => (".", token),
        };

        let dir_names: Vec<String> = if dir_sel == "*" {
            let mut names: Vec<String> = self.by_dir.keys().cloned().collect();
            names.sort_by_key(|d| self.dir_order_key(d));
            names
        } else if dir_sel == "." {
            vec![current_dir.to_string()]
        } else {
            vec![dir_sel.to_string()]
        };

        let mut out = Vec::new();
        for dir in dir_names {
            let scopes = match self.by_dir.get(&dir) {
                Some(s) => s,
                None => continue,
            };
            if scope_sel == "*" {
                let mut names: Vec<&String> = scopes.keys().filter(|n| !n.is_empty()).collect();
                names.sort();
                for name in names {
                    out.extend(scopes[name].iter().copied());
                }
            } else if let Some(ids) = scopes.get(scope_sel) {
                out.extend(ids.iter().copied());
            }
        }
        out
    }

    /// Resolves several whitespace-separated selector tokens, concatenating
    /// results in token order (spec.md §4.1 "Nested scope selector").
    pub fn resolve_all(&self, tokens: &[&str], current_dir: &str) -> Vec<ScopeId> {
        let mut out = Vec::new();
        for token in tokens {
            out.extend(self.resolve(token, current_dir));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_dir_and_scope() {
        let mut reg = NamedScopes::new();
        reg.register("a", "foo", ScopeId(1));
        reg.register("b", "foo", ScopeId(2));
        assert_eq!(reg.resolve("a/foo", "x"), vec![ScopeId(1)]);
    }

    #[test]
    fn dot_means_current_dir() {
        let mut reg = NamedScopes::new();
        reg.register("here", "foo", ScopeId(5));
        assert_eq!(reg.resolve("./foo", "here"), vec![ScopeId(5)]);
    }

    #[test]
    fn star_scope_excludes_top_level_empty_name() {
        let mut reg = NamedScopes::new();
        reg.register("a", "", ScopeId(0));
        reg.register("a", "foo", ScopeId(1));
        reg.register("a", "bar", ScopeId(2));
        let mut got = reg.resolve("a/*", "x");
        got.sort();
        assert_eq!(got, vec![ScopeId(1), ScopeId(2)]);
    }

    #[test]
    fn star_dir_sorted_by_depends_index_then_name() {
        let mut reg = NamedScopes::new();
        reg.register("b", "foo", ScopeId(2));
        reg.register("a", "foo", ScopeId(1));
        reg.set_depends_index("a", 1);
        reg.set_depends_index("b", 0);
        // b has a lower depends_index than a, so it should sort first.
        assert_eq!(reg.resolve("*/foo", "x"), vec![ScopeId(2), ScopeId(1)]);
    }
}
