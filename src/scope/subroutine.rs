//! `#defsub`/`#defun` registries (spec.md §3 "Subroutine / function
//! definitions"). Grounded on
//! `original_source/ppremake/ppSubroutine.{cxx,h}`.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Subroutine {
    pub name: String,
    pub formals: Vec<String>,
    /// Source lines between `#defsub`/`#defun` and the matching `#end`.
    pub body: Vec<String>,
    /// `true` for `#defsub` (invoked via `#call`), `false` for `#defun`
    /// (invoked via variable-reference/function-call syntax).
    pub is_subroutine: bool,
}

/// Process-global registries; last definition wins (spec.md §3).
#[derive(Debug, Default)]
pub struct SubroutineRegistry {
    subs: HashMap<String, Subroutine>,
    funcs: HashMap<String, Subroutine>,
}

impl SubroutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, sub: Subroutine) {
        if sub.is_subroutine {
            self.subs.insert(sub.name.clone(), sub);
        } else {
            self.funcs.insert(sub.name.clone(), sub);
        }
    }

    pub fn get_sub(&self, name: &str) -> Option<&Subroutine> {
        self.subs.get(name)
    }

    pub fn get_func(&self, name: &str) -> Option<&Subroutine> {
        self.funcs.get(name)
    }

    pub fn is_func_defined(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_definition_wins() {
        let mut reg = SubroutineRegistry::new();
        reg.define(Subroutine {
            name: "f".into(),
            formals: vec![],
            body: vec!["first".into()],
            is_subroutine: false,
        });
        reg.define(Subroutine {
            name: "f".into(),
            formals: vec![],
            body: vec!["second".into()],
            is_subroutine: false,
        });
        assert_eq!(reg.get_func("f").unwrap().body, vec!["second".to_string()]);
    }

    #[test]
    fn subs_and_funcs_are_distinct_namespaces() {
        let mut reg = SubroutineRegistry::new();
        reg.define(Subroutine {
            name: "f".into(),
            formals: vec![],
            body: vec!["sub body".into()],
            is_subroutine: true,
        });
        assert!(reg.get_sub("f").is_some());
        assert!(reg.get_func("f").is_none());
    }
}
