//! Builtin function table for `$[FNAME ARGS]` (spec.md §4.1).
//!
//! Grounded on `original_source/ppremake/ppScope.cxx`'s `expand_function`
//! dispatch block: each builtin there is a `case` arm calling one
//! `expand_*` helper; here each is a `match` arm calling one free function
//! below, grouped the same way the original groups them (path/filesystem,
//! string, logic/numeric, scope/graph, misc).

use std::path::{Path, PathBuf};
use std::process::Command;

use md5::{Digest, Md5};

use crate::engine::{split_top_level_commas, Engine};
use crate::error::ErrorSink;
use crate::filename;
use crate::glob;
use crate::scope::ScopeId;

/// Dispatches one builtin call. `tail` is the raw (unexpanded) text between
/// the function name and the closing `]`. Returns `None` if `name` does not
/// name a builtin, so the caller can fall through to map-variable lookup.
pub fn dispatch(engine: &mut Engine, scope: ScopeId, name: &str, tail: &str) -> Option<String> {
    Some(match name {
        // --- path / filesystem -------------------------------------------------
        "isfullpath" => bool_str(filename::is_full_path(&arg1(engine, scope, tail))),
        "osfilename" | "cygpath_w" => filename::cygpath_w(&arg1(engine, scope, tail)),
        "unixfilename" | "cygpath_p" => filename::cygpath_p(&arg1(engine, scope, tail)),
        "unixshortname" => filename::from_os_specific(&arg1(engine, scope, tail)),
        "standardize" => filename::standardize(&arg1(engine, scope, tail)),
        "canonical" => filename::canonical(&arg1(engine, scope, tail)),
        "dir" => filename::dir(&arg1(engine, scope, tail)),
        "notdir" => filename::notdir(&arg1(engine, scope, tail)),
        "suffix" => filename::suffix(&arg1(engine, scope, tail)),
        "basename" => filename::basename(&arg1(engine, scope, tail)),
        "wildcard" => {
            let pattern = arg1(engine, scope, tail);
            glob::expand(&pattern, &engine.current_output_dir).join(" ")
        }
        "isdir" => bool_str(Path::new(&arg1(engine, scope, tail)).is_dir()),
        "isfile" => bool_str(Path::new(&arg1(engine, scope, tail)).is_file()),
        "libtest" => libtest(engine, scope, tail),
        "bintest" => bintest(&arg1(engine, scope, tail)),
        "shell" => shell(engine, scope, tail),

        // --- string ops ----------------------------------------------------
        "length" => arg1(engine, scope, tail).chars().count().to_string(),
        "substr" => substr(engine, scope, tail),
        "findstring" => findstring(engine, scope, tail),
        "subst" => subst(engine, scope, tail),
        "wordsubst" => wordsubst(engine, scope, tail),
        "patsubst" => patsubst(engine, scope, tail, false),
        "patsubstw" => patsubst(engine, scope, tail, true),
        "upcase" => arg1(engine, scope, tail).to_uppercase(),
        "downcase" => arg1(engine, scope, tail).to_lowercase(),
        "join" => join_words(engine, scope, tail),
        "sort" => sort_words(engine, scope, tail),
        "unique" => unique_words(engine, scope, tail),
        "word" => word(engine, scope, tail),
        "wordlist" => wordlist(engine, scope, tail),
        "words" => arg1(engine, scope, tail).split_whitespace().count().to_string(),
        "firstword" => arg1(engine, scope, tail)
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string(),
        "filter" => filter(engine, scope, tail, true),
        "filter_out" | "filter-out" => filter(engine, scope, tail, false),

        // --- logic / numerics ------------------------------------------------
        "if" => if_builtin(engine, scope, tail),
        "eq" => {
            let (a, b) = args2(engine, scope, tail);
            bool_str(a == b)
        }
        "ne" => {
            let (a, b) = args2(engine, scope, tail);
            bool_str(a != b)
        }
        "not" => bool_str(arg1(engine, scope, tail).is_empty()),
        "or" => args_expanded(engine, scope, tail)
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or_default(),
        "and" => and_builtin(engine, scope, tail),
        "defined" => {
            let name = arg1(engine, scope, tail);
            bool_str(
                engine.arena.lookup_static(scope, &name).is_some()
                    || engine.subs.get_func(&name).is_some(),
            )
        }
        "=" | "==" => numeric_cmp(engine, scope, tail, |a, b| a == b),
        "!=" => numeric_cmp(engine, scope, tail, |a, b| a != b),
        "<" => numeric_cmp(engine, scope, tail, |a, b| a < b),
        "<=" => numeric_cmp(engine, scope, tail, |a, b| a <= b),
        ">" => numeric_cmp(engine, scope, tail, |a, b| a > b),
        ">=" => numeric_cmp(engine, scope, tail, |a, b| a >= b),
        "+" => numeric_fold(engine, scope, tail, 0, |a, b| a + b),
        "*" => numeric_fold(engine, scope, tail, 1, |a, b| a * b),
        "-" => numeric_sub(engine, scope, tail),
        "/" => numeric_div(engine, scope, tail, |a, b| a / b),
        "%" => numeric_div(engine, scope, tail, |a, b| a % b),

        // --- scope / graph ---------------------------------------------------
        "closure" => closure(engine, scope, tail),
        "unmapped" => unmapped(engine, scope, tail),
        "forscopes" => forscopes(engine, scope, tail),
        "foreach" => foreach(engine, scope, tail),
        "dependencies" => dependencies(engine, scope, tail),

        // --- misc -------------------------------------------------------------
        "makeguid" => makeguid(&arg1(engine, scope, tail)),
        "cdefine" => cdefine(engine, scope, tail),
        "matrix" => matrix(engine, scope, tail),

        _ => return None,
    })
}

fn bool_str(b: bool) -> String {
    if b { "1".to_string() } else { String::new() }
}

/// Expands every top-level comma-separated argument.
fn args_expanded(engine: &mut Engine, scope: ScopeId, tail: &str) -> Vec<String> {
    split_top_level_commas(tail)
        .into_iter()
        .map(|a| engine.expand_string(scope, a.trim()))
        .collect()
}

/// Raw (unexpanded) top-level comma-separated arguments, for builtins whose
/// arguments must stay literal until used as a per-iteration template.
fn args_raw(tail: &str) -> Vec<String> {
    split_top_level_commas(tail)
        .into_iter()
        .map(|a| a.trim().to_string())
        .collect()
}

fn arg1(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    engine.expand_string(scope, tail.trim())
}

fn args2(engine: &mut Engine, scope: ScopeId, tail: &str) -> (String, String) {
    let mut a = args_expanded(engine, scope, tail);
    let second = if a.len() > 1 { a.remove(1) } else { String::new() };
    let first = if !a.is_empty() { a.remove(0) } else { String::new() };
    (first, second)
}

// --- path / filesystem ------------------------------------------------------

fn libtest(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let name = args.get(0).cloned().unwrap_or_default();
    let explicit_dirs: Vec<PathBuf> = args
        .get(1)
        .map(|s| s.split_whitespace().map(PathBuf::from).collect())
        .unwrap_or_default();

    let mut search_dirs = explicit_dirs;
    if let Ok(ld_path) = std::env::var("LD_LIBRARY_PATH") {
        search_dirs.extend(std::env::split_paths(&ld_path));
    }
    search_dirs.push(PathBuf::from("/lib"));
    search_dirs.push(PathBuf::from("/usr/lib"));

    let so_suffix = if cfg!(target_os = "macos") { "dylib" } else { "so" };
    for dir in &search_dirs {
        for candidate in [
            dir.join(format!("lib{}.a", name)),
            dir.join(format!("lib{}.{}", name, so_suffix)),
        ] {
            if candidate.is_file() {
                return candidate.to_string_lossy().to_string();
            }
        }
    }
    String::new()
}

fn bintest(name: &str) -> String {
    which::which(name)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn shell(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let cmd = arg1(engine, scope, tail);
    let output = if cfg!(windows) {
        Command::new("cmd")
            .arg("/C")
            .arg(&cmd)
            .current_dir(&engine.current_output_dir)
            .output()
    } else {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(&cmd)
            .current_dir(&engine.current_output_dir)
            .output()
    };
    match output {
        Ok(out) => {
            let text = String::from_utf8_lossy(&out.stdout);
            collapse_whitespace(&text)
        }
        Err(e) => {
            engine.sink.report(format!("shell command {:?} failed to start: {}", cmd, e));
            String::new()
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// --- string ops --------------------------------------------------------------

fn substr(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let start: i64 = args.get(0).and_then(|s| s.trim().parse().ok()).unwrap_or(1);
    let end: i64 = args.get(1).and_then(|s| s.trim().parse().ok()).unwrap_or(start);
    let s = args.get(2).cloned().unwrap_or_default();
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    if len == 0 {
        return String::new();
    }
    let (mut lo, mut hi) = (start, end);
    if lo > hi {
        std::mem::swap(&mut lo, &mut hi);
    }
    let lo = lo.max(1);
    let hi = hi.min(len);
    if lo > hi {
        return String::new();
    }
    chars[(lo - 1) as usize..hi as usize].iter().collect()
}

fn findstring(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let (needle, hay) = args2(engine, scope, tail);
    if hay.contains(&needle) { needle } else { String::new() }
}

fn subst(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let from = args.get(0).cloned().unwrap_or_default();
    let to = args.get(1).cloned().unwrap_or_default();
    let s = args.get(2).cloned().unwrap_or_default();
    if from.is_empty() { s } else { s.replace(&from, &to) }
}

fn wordsubst(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let from = args.get(0).cloned().unwrap_or_default();
    let to = args.get(1).cloned().unwrap_or_default();
    let s = args.get(2).cloned().unwrap_or_default();
    s.split_whitespace()
        .map(|w| if w == from { to.as_str() } else { w })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `%`-wildcard pattern substitution: `pattern_match` finds the portion of
/// `word` bound by the single `%`, then substitutes it into `repl`'s `%`.
/// Returns `None` if `pat` does not match `word`.
fn pattern_match<'a>(pat: &str, word: &'a str) -> Option<&'a str> {
    let pct = pat.find('%')?;
    let (prefix, suffix) = (&pat[..pct], &pat[pct + 1..]);
    if word.len() < prefix.len() + suffix.len() {
        return None;
    }
    if !word.starts_with(prefix) || !word.ends_with(suffix) {
        return None;
    }
    Some(&word[prefix.len()..word.len() - suffix.len()])
}

fn pattern_subst_one(pat: &str, repl: &str, word: &str) -> Option<String> {
    let stem = pattern_match(pat, word)?;
    Some(if let Some(pct) = repl.find('%') {
        format!("{}{}{}", &repl[..pct], stem, &repl[pct + 1..])
    } else {
        repl.to_string()
    })
}

fn patsubst(engine: &mut Engine, scope: ScopeId, tail: &str, whole: bool) -> String {
    let args = args_expanded(engine, scope, tail);
    let pat = args.get(0).cloned().unwrap_or_default();
    let repl = args.get(1).cloned().unwrap_or_default();
    let s = args.get(2).cloned().unwrap_or_default();
    if whole {
        pattern_subst_one(&pat, &repl, s.trim()).unwrap_or(s)
    } else {
        s.split_whitespace()
            .map(|w| pattern_subst_one(&pat, &repl, w).unwrap_or_else(|| w.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Applies the inline `$[NAME:PAT=REPL]` form (spec.md §4.1). Both `PAT`
/// and `REPL` must contain `%`; otherwise this is a Value error (empty
/// result, per SPEC_FULL.md §4.1).
pub fn apply_inline_patsubst(sink: &ErrorSink, resolved: &str, patspec: &str) -> String {
    let eq = match patspec.find('=') {
        Some(i) => i,
        None => {
            sink.report(format!("malformed inline patsubst spec {:?}", patspec));
            return String::new();
        }
    };
    let pat = &patspec[..eq];
    let repl = &patspec[eq + 1..];
    if !pat.contains('%') || !repl.contains('%') {
        sink.report(format!(
            "inline patsubst {:?} requires % in both pattern and replacement",
            patspec
        ));
        return String::new();
    }
    resolved
        .split_whitespace()
        .map(|w| pattern_subst_one(pat, repl, w).unwrap_or_else(|| w.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_words(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let sep = args.get(0).cloned().unwrap_or_default();
    let words = args.get(1).cloned().unwrap_or_default();
    words
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(&sep)
}

fn sort_words(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let owned = arg1(engine, scope, tail);
    let mut sorted: Vec<&str> = owned.split_whitespace().collect();
    sorted.sort();
    sorted.dedup();
    sorted.join(" ")
}

fn unique_words(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let s = arg1(engine, scope, tail);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for w in s.split_whitespace() {
        if seen.insert(w) {
            out.push(w);
        }
    }
    out.join(" ")
}

fn word(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let n: i64 = args.get(0).and_then(|s| s.trim().parse().ok()).unwrap_or(1);
    let words = args.get(1).cloned().unwrap_or_default();
    let list: Vec<&str> = words.split_whitespace().collect();
    if n < 1 || n as usize > list.len() {
        String::new()
    } else {
        list[(n - 1) as usize].to_string()
    }
}

fn wordlist(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let start: i64 = args.get(0).and_then(|s| s.trim().parse().ok()).unwrap_or(1);
    let end: i64 = args.get(1).and_then(|s| s.trim().parse().ok()).unwrap_or(start);
    let words = args.get(2).cloned().unwrap_or_default();
    let list: Vec<&str> = words.split_whitespace().collect();
    let lo = start.max(1) as usize;
    let hi = (end.max(0) as usize).min(list.len());
    if lo > hi || lo > list.len() {
        return String::new();
    }
    list[lo - 1..hi].join(" ")
}

fn filter(engine: &mut Engine, scope: ScopeId, tail: &str, keep_matches: bool) -> String {
    let args = args_expanded(engine, scope, tail);
    let pats: Vec<&str> = args.get(0).map(|s| s.split_whitespace().collect()).unwrap_or_default();
    let words = args.get(1).cloned().unwrap_or_default();
    words
        .split_whitespace()
        .filter(|w| {
            let matched = pats.iter().any(|p| {
                if p.contains('%') {
                    pattern_match(p, w).is_some()
                } else {
                    *p == *w
                }
            });
            matched == keep_matches
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// --- logic / numerics --------------------------------------------------------

fn if_builtin(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let raw = args_raw(tail);
    if raw.is_empty() {
        return String::new();
    }
    let cond = engine.expand_string(scope, raw[0].trim());
    if !cond.is_empty() {
        raw.get(1).map(|t| engine.expand_string(scope, t.trim())).unwrap_or_default()
    } else {
        raw.get(2).map(|t| engine.expand_string(scope, t.trim())).unwrap_or_default()
    }
}

fn and_builtin(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    if args.iter().all(|a| !a.is_empty()) {
        args.last().cloned().unwrap_or_default()
    } else {
        String::new()
    }
}

fn parse_num(s: &str) -> i64 {
    s.trim().parse().unwrap_or(0)
}

fn numeric_cmp(
    engine: &mut Engine,
    scope: ScopeId,
    tail: &str,
    op: impl Fn(i64, i64) -> bool,
) -> String {
    let (a, b) = args2(engine, scope, tail);
    bool_str(op(parse_num(&a), parse_num(&b)))
}

fn numeric_fold(
    engine: &mut Engine,
    scope: ScopeId,
    tail: &str,
    init: i64,
    op: impl Fn(i64, i64) -> i64,
) -> String {
    let args = args_expanded(engine, scope, tail);
    args.iter().map(|a| parse_num(a)).fold(init, op).to_string()
}

fn numeric_sub(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let nums: Vec<i64> = args.iter().map(|a| parse_num(a)).collect();
    match nums.len() {
        0 => "0".to_string(),
        1 => (-nums[0]).to_string(),
        _ => nums[1..].iter().fold(nums[0], |acc, n| acc - n).to_string(),
    }
}

fn numeric_div(
    engine: &mut Engine,
    scope: ScopeId,
    tail: &str,
    op: impl Fn(i64, i64) -> i64,
) -> String {
    let args = args_expanded(engine, scope, tail);
    let nums: Vec<i64> = args.iter().map(|a| parse_num(a)).collect();
    if nums.len() < 2 || nums[1..].iter().any(|&n| n == 0) {
        return String::new();
    }
    nums[1..].iter().fold(nums[0], |acc, &n| op(acc, n)).to_string()
}

// --- scope / graph -------------------------------------------------------------

/// `closure MAPVAR,EXPR[,NEXT]` (spec.md §4.1): starting at `scope`, expands
/// `EXPR`, then follows `NEXT` (defaulting to the same expression) through
/// `MAPVAR` to reach further scopes, visiting each at most once.
fn closure(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let raw = args_raw(tail);
    let mapvar = raw.get(0).cloned().unwrap_or_default();
    let expr = raw.get(1).cloned().unwrap_or_default();
    let next = raw.get(2).cloned().unwrap_or_else(|| expr.clone());

    let mut seen = std::collections::HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![scope];
    while let Some(cur) = stack.pop() {
        if !seen.insert(cur) {
            continue;
        }
        order.push(engine.expand_string(cur, &expr));
        let key = engine.expand_string(cur, &next);
        if let Some(map) = engine.arena.lookup_map_static(cur, &mapvar) {
            if let Some(target) = map.get(key.trim()) {
                stack.push(target);
            }
        }
    }
    order.join(" ")
}

fn unmapped(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let args = args_expanded(engine, scope, tail);
    let mapvar = args.get(0).cloned().unwrap_or_default();
    let keys = args.get(1).cloned().unwrap_or_default();
    let map = engine.arena.lookup_map_static(scope, &mapvar).cloned();
    keys.split_whitespace()
        .filter(|k| match &map {
            Some(m) => m.get(k).is_none(),
            None => true,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn forscopes(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let raw = args_raw(tail);
    let selector = engine.expand_string(scope, raw.get(0).map(String::as_str).unwrap_or(""));
    let expr = raw.get(1).cloned().unwrap_or_default();
    let tokens: Vec<&str> = selector.split_whitespace().collect();
    let ids = engine.named.resolve_all(&tokens, &engine.current_dir_name.clone());
    ids.into_iter()
        .map(|id| engine.expand_string(id, &expr))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn foreach(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let raw = args_raw(tail);
    let varname = raw.get(0).cloned().unwrap_or_default();
    let words = engine.expand_string(scope, raw.get(1).map(String::as_str).unwrap_or(""));
    let expr = raw.get(2).cloned().unwrap_or_default();

    let mut results = Vec::new();
    for word in words.split_whitespace() {
        let child = engine
            .arena
            .alloc(crate::scope::Scope::with_parent(String::new(), scope));
        engine.arena.get_mut(child).define(varname.clone(), word.to_string());
        let v = engine.expand_string(child, &expr);
        if !v.is_empty() {
            results.push(v);
        }
    }
    results.join(" ")
}

fn dependencies(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let files = engine.expand_string(scope, tail.trim());
    let names: Vec<String> = files.split_whitespace().map(|s| s.to_string()).collect();
    match &engine.include_graph {
        Some(graph) => graph
            .transitive_includes(&names, &engine.current_dir_name)
            .join(" "),
        None => String::new(),
    }
}

// --- misc ------------------------------------------------------------------

fn makeguid(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        digest[0], digest[1], digest[2], digest[3],
        digest[4], digest[5],
        digest[6], digest[7],
        digest[8], digest[9],
        digest[10], digest[11], digest[12], digest[13], digest[14], digest[15],
    )
}

fn cdefine(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let name = arg1(engine, scope, tail);
    let value = engine.lookup(scope, &name);
    if value.is_empty() {
        format!("#undef {}", name)
    } else {
        format!("#define {} {}", name, value)
    }
}

fn matrix(engine: &mut Engine, scope: ScopeId, tail: &str) -> String {
    let groups: Vec<Vec<String>> = args_expanded(engine, scope, tail)
        .into_iter()
        .map(|g| g.split_whitespace().map(|s| s.to_string()).collect())
        .collect();
    let mut acc = vec![String::new()];
    for group in &groups {
        if group.is_empty() {
            continue;
        }
        let mut next = Vec::new();
        for prefix in &acc {
            for item in group {
                next.push(format!("{}{}", prefix, item));
            }
        }
        acc = next;
    }
    acc.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    fn run(expr: &str) -> String {
        let mut engine = Engine::new();
        let scope = engine.arena.alloc(Scope::new(""));
        engine.expand_string(scope, expr)
    }

    #[test]
    fn e3_patsubst_is_word_wise() {
        assert_eq!(run("$[patsubst %.c,%.o,a.c b.h c.c]"), "a.o b.h c.o");
    }

    #[test]
    fn filter_and_filter_out_are_complementary() {
        assert_eq!(run("$[filter %.c,a.c b.h c.c]"), "a.c c.c");
        assert_eq!(run("$[filter_out %.c,a.c b.h c.c]"), "b.h");
        assert_eq!(run("$[filter-out %.c,a.c b.h c.c]"), "b.h");
    }

    #[test]
    fn numeric_ops() {
        assert_eq!(run("$[+ 1,2,3]"), "6");
        assert_eq!(run("$[- 10,3,2]"), "5");
        assert_eq!(run("$[< 1,2]"), "1");
        assert_eq!(run("$[< 2,1]"), "");
    }

    #[test]
    fn if_uses_non_empty_truth() {
        assert_eq!(run("$[if 1,yes,no]"), "yes");
        assert_eq!(run("$[if ,yes,no]"), "no");
    }

    #[test]
    fn makeguid_is_deterministic_and_formatted() {
        let a = run("$[makeguid hello]");
        let b = run("$[makeguid hello]");
        assert_eq!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
    }

    #[test]
    fn word_and_wordlist_are_one_based() {
        assert_eq!(run("$[word 2,a b c]"), "b");
        assert_eq!(run("$[wordlist 2,3,a b c d]"), "b c");
    }

    #[test]
    fn substr_swaps_reversed_bounds() {
        assert_eq!(run("$[substr 3,1,hello]"), "hel");
    }
}
