//! Scope storage.
//!
//! Scopes can be referenced from several places at once: the named-scopes
//! registry, a child scope's static-parent pointer, and a map variable's
//! values. spec.md §9 calls for resolving this with "arena + indices" rather
//! than reference counting, so every [`Scope`] lives in a [`ScopeArena`] and
//! is referred to everywhere else by a small `Copy` [`ScopeId`].
//!
//! Grounded on `original_source/ppremake/ppScope.{cxx,h}` for the fields a
//! scope carries (variable map, map-variable map, static parent, owning
//! directory).

use std::collections::HashMap;

use crate::directory::DirId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

/// A variable whose value is a mapping from string key to child-scope
/// reference (spec.md glossary: "Map variable").
#[derive(Debug, Clone, Default)]
pub struct MapVariable {
    /// Name of the variable, within each matched scope, used as the key.
    pub key_variable: String,
    /// Insertion-ordered key -> child scope.
    pub entries: Vec<(String, ScopeId)>,
}

impl MapVariable {
    pub fn get(&self, key: &str) -> Option<ScopeId> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, id)| *id)
    }

    pub fn insert(&mut self, key: String, id: ScopeId) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = id;
        } else {
            self.entries.push((key, id));
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Name this scope was pushed under (`#begin NAME`), or empty for a
    /// directory's anonymous top-level scope.
    pub name: String,
    vars: HashMap<String, String>,
    map_vars: HashMap<String, MapVariable>,
    pub static_parent: Option<ScopeId>,
    pub directory: Option<DirId>,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Scope {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(name: impl Into<String>, parent: ScopeId) -> Self {
        Scope {
            name: name.into(),
            static_parent: Some(parent),
            ..Default::default()
        }
    }

    /// Own-scope lookup only (step 1 of spec.md §3's variable lookup rules).
    pub fn get_local(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn undefine(&mut self, name: &str) {
        self.vars.remove(name);
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn declare_map(&mut self, name: impl Into<String>, key_variable: impl Into<String>) {
        self.map_vars.insert(
            name.into(),
            MapVariable {
                key_variable: key_variable.into(),
                entries: Vec::new(),
            },
        );
    }

    pub fn map_var(&self, name: &str) -> Option<&MapVariable> {
        self.map_vars.get(name)
    }

    pub fn map_var_mut(&mut self, name: &str) -> Option<&mut MapVariable> {
        self.map_vars.get_mut(name)
    }

    pub fn is_map_var(&self, name: &str) -> bool {
        self.map_vars.contains_key(name)
    }
}

/// Owns every [`Scope`] for the duration of the run.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, scope: Scope) -> ScopeId {
        self.scopes.push(scope);
        ScopeId(self.scopes.len() - 1)
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    /// Resolves `name` by walking the static-parent chain starting at
    /// `start` (spec.md §3 steps 1-2). Does not consult the dynamic stack or
    /// the environment; callers layer those on (see `Expander::lookup`).
    pub fn lookup_static(&self, start: ScopeId, name: &str) -> Option<&str> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(v) = scope.get_local(name) {
                return Some(v);
            }
            cur = scope.static_parent;
        }
        None
    }

    /// Looks a map variable up the static-parent chain, since `#map` may be
    /// declared in a parent scope and used from a nested `#begin` block.
    pub fn lookup_map_static(&self, start: ScopeId, name: &str) -> Option<&MapVariable> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(m) = scope.map_var(name) {
                return Some(m);
            }
            cur = scope.static_parent;
        }
        None
    }

    pub fn is_function_static(&self, _start: ScopeId, _name: &str) -> bool {
        false
    }

    /// Finds the scope in `start`'s static-parent chain that already holds
    /// `name` and overwrites it there (spec.md §4.2 `#set`'s "mutates it in
    /// place", as opposed to `#define`'s shadow-in-current-scope). Returns
    /// `false` if `name` is not defined anywhere on the chain.
    pub fn set_in_chain(&mut self, start: ScopeId, name: &str, value: String) -> bool {
        let mut cur = Some(start);
        while let Some(id) = cur {
            if self.get(id).has_local(name) {
                self.get_mut(id).define(name, value);
                return true;
            }
            cur = self.get(id).static_parent;
        }
        false
    }

    /// Finds the scope in `start`'s static-parent chain that declares the
    /// map variable `name` (spec.md §4.2 `#addmap`: the map may be declared
    /// in an ancestor of the scope doing the `#addmap`).
    pub fn find_map_owner(&self, start: ScopeId, name: &str) -> Option<ScopeId> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            if self.get(id).is_map_var(name) {
                return Some(id);
            }
            cur = self.get(id).static_parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_parent_lookup_chain() {
        let mut arena = ScopeArena::new();
        let outer = arena.alloc(Scope::new(""));
        arena.get_mut(outer).define("X", "outer");
        let inner = arena.alloc(Scope::with_parent("inner", outer));
        arena.get_mut(inner).define("X", "inner");

        assert_eq!(arena.lookup_static(inner, "X"), Some("inner"));
        assert_eq!(arena.lookup_static(outer, "X"), Some("outer"));

        // A scope with no local X falls through to its parent.
        let leaf = arena.alloc(Scope::with_parent("leaf", outer));
        assert_eq!(arena.lookup_static(leaf, "X"), Some("outer"));
    }

    #[test]
    fn map_variable_round_trip() {
        let mut arena = ScopeArena::new();
        let root = arena.alloc(Scope::new(""));
        let child = arena.alloc(Scope::new("child"));
        arena.get_mut(root).declare_map("M", "KEY");
        arena
            .get_mut(root)
            .map_var_mut("M")
            .unwrap()
            .insert("a".to_string(), child);

        assert_eq!(arena.get(root).map_var("M").unwrap().get("a"), Some(child));
        assert_eq!(arena.get(root).map_var("M").unwrap().get("b"), None);
    }
}
