//! Scope storage, the named-scopes registry, the subroutine/function
//! registry, and the builtin function table. The `$[...]` expander itself
//! lives in `crate::engine`, one level up, since it also needs the
//! directory tree's include graph (spec.md §4.1, the single largest
//! component per the §2 component-share table).

pub mod arena;
pub mod builtins;
pub mod named;
pub mod subroutine;

pub use arena::{MapVariable, Scope, ScopeArena, ScopeId};
pub use named::NamedScopes;
pub use subroutine::{Subroutine, SubroutineRegistry};
