//! Per-directory dependency cache file: format, load, validate, save
//! (spec.md §4.4).
//!
//! Format: one line per tracked file,
//! `FILENAME MTIME [FLAG]DEP [FLAG]DEP …` where `FLAG` is `/` for
//! okcircular or `*/` for an extra (external) include. Binary compatibility
//! with the legacy cache format is explicitly out of scope (spec.md §1), so
//! this is a fresh, simple, greppable line format carrying the same
//! semantics, grounded on `original_source/ppremake/ppDependableFile.cxx`'s
//! cache read/write sections.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub filename: String,
    pub mtime: SystemTime,
    /// (dep key `dir/filename`, okcircular)
    pub deps: Vec<(String, bool)>,
    /// extra/external include names, kept for validation only.
    pub extra_includes: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Cache files older than this (relative to process start) are
    /// discarded outright, a workaround for networked-filesystem clock skew
    /// (spec.md §9 Open Questions). Default: 60 minutes.
    pub max_age: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_age: Some(Duration::from_secs(3600)),
        }
    }
}

pub(crate) fn system_time_to_secs(t: SystemTime) -> i64 {
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

fn secs_to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs((-secs) as u64)
    }
}

/// Parses a cache file's contents into filename -> entry.
pub fn parse(contents: &str) -> HashMap<String, CacheEntry> {
    let mut out = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let filename = match tokens.next() {
            Some(f) => f.to_string(),
            None => continue,
        };
        let mtime = match tokens.next().and_then(|s| s.parse::<i64>().ok()) {
            Some(m) => secs_to_system_time(m),
            None => continue,
        };
        let mut deps = Vec::new();
        let mut extra_includes = Vec::new();
        for tok in tokens {
            if let Some(rest) = tok.strip_prefix("*/") {
                extra_includes.push(rest.to_string());
            } else if let Some(rest) = tok.strip_prefix('/') {
                deps.push((rest.to_string(), true));
            } else {
                deps.push((tok.to_string(), false));
            }
        }
        out.insert(
            filename.clone(),
            CacheEntry {
                filename,
                mtime,
                deps,
                extra_includes,
            },
        );
    }
    out
}

/// Serializes entries back to the on-disk line format, in a stable order
/// (by filename) so reruns with no changes produce byte-identical cache
/// files (spec.md §8 invariant 5/6).
pub fn serialize(entries: &[CacheEntry]) -> String {
    let mut sorted: Vec<&CacheEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.filename.cmp(&b.filename));

    let mut out = String::new();
    for entry in sorted {
        out.push_str(&entry.filename);
        out.push(' ');
        out.push_str(&system_time_to_secs(entry.mtime).to_string());
        for (dep, okcircular) in &entry.deps {
            out.push(' ');
            if *okcircular {
                out.push('/');
            }
            out.push_str(dep);
        }
        for extra in &entry.extra_includes {
            out.push_str(" */");
            out.push_str(extra);
        }
        out.push('\n');
    }
    out
}

/// Loads a directory's cache file. Returns an empty map (not an error) if
/// the file does not exist — an absent cache is simply a full rescan.
pub fn load(path: &Path, config: &CacheConfig) -> io::Result<HashMap<String, CacheEntry>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            if let Some(max_age) = config.max_age {
                if let Ok(meta) = fs::metadata(path) {
                    if let Ok(modified) = meta.modified() {
                        if let Ok(age) = SystemTime::now().duration_since(modified) {
                            if age > max_age {
                                log::info!(
                                    "discarding stale cache {} (age {:?} > {:?})",
                                    path.display(),
                                    age,
                                    max_age
                                );
                                return Ok(HashMap::new());
                            }
                        }
                    }
                }
            }
            Ok(parse(&contents))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e),
    }
}

/// Writes `entries` to `path`, unless `entries` is empty (spec.md §4.4
/// "suppress rewrite entirely if the file set is empty").
pub fn save(path: &Path, entries: &[CacheEntry]) -> io::Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let serialized = serialize(entries);
    let mut file = fs::File::create(path)?;
    file.write_all(serialized.as_bytes())
}

/// A cached entry is valid only if its recorded mtime exactly matches the
/// file's current mtime (spec.md §4.4 validation rule (b)); existence and
/// dependency-resolution checks are layered on by the caller, which has
/// access to the live `DependableFile` table.
pub fn entry_mtime_matches(entry: &CacheEntry, current: SystemTime) -> bool {
    entry.mtime == current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_byte_stable() {
        let entries = vec![
            CacheEntry {
                filename: "b.h".to_string(),
                mtime: secs_to_system_time(200),
                deps: vec![("a.h".to_string(), false)],
                extra_includes: vec![],
            },
            CacheEntry {
                filename: "a.h".to_string(),
                mtime: secs_to_system_time(100),
                deps: vec![("circ.h".to_string(), true)],
                extra_includes: vec!["stdio.h".to_string()],
            },
        ];
        let text = serialize(&entries);
        let parsed = parse(&text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["a.h"].deps, vec![("circ.h".to_string(), true)]);
        assert_eq!(parsed["a.h"].extra_includes, vec!["stdio.h".to_string()]);

        // Re-serializing the parsed map in filename order reproduces the
        // same bytes (scenario: idempotent cache rewrite, spec.md §8 #5/#6).
        let mut reparsed: Vec<CacheEntry> = parsed.into_values().collect();
        reparsed.sort_by(|a, b| a.filename.cmp(&b.filename));
        assert_eq!(serialize(&reparsed), text);
    }

    #[test]
    fn load_missing_file_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.cache");
        let map = load(&path, &CacheConfig::default()).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn save_skips_write_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        save(&path, &[]).unwrap();
        assert!(!path.exists());
    }
}
