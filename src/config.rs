//! CLI surface, environment precedence, and the optional `ppremake.toml`
//! overlay (SPEC_FULL.md §0, §4.5, §6).
//!
//! Grounded on the teacher's `config.rs` (`clap` derive `Cli` struct and a
//! serde-deserialized project config), generalized from amargo's
//! subcommand shape to ppremake's flat flag-and-positional-directories
//! shape (spec.md §4.5/§6).

use std::path::PathBuf;

use clap::Parser;

/// `ppremake [FLAGS] [DIR...]` — flags exactly as spec.md §4.5/§6.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Multi-directory build-script preprocessor", long_about = None)]
pub struct Cli {
    /// Directories to process on this run (relative to the package root);
    /// defaults to every directory in the tree if none are given.
    pub dirs: Vec<String>,

    /// Add DIR to the include search path (repeatable).
    #[clap(short = 'I', long = "include")]
    pub include: Vec<PathBuf>,

    /// Increase verbosity (repeatable): warn -> info -> debug -> trace.
    #[clap(short = 'v', parse(from_occurrences))]
    pub verbose: u8,

    /// Print the N most-repeated `$[...]` expressions to stderr at exit.
    #[clap(short = 'x', value_name = "N")]
    pub histogram: Option<usize>,

    /// Escalate include-circularity warnings to errors.
    #[clap(short = 'P', long = "strict")]
    pub strict: bool,

    /// Write a Makefile-style dependency listing to FILE in addition to the
    /// normal template output.
    #[clap(short = 'D', long = "depend-check", value_name = "FILE")]
    pub depend_check: Option<PathBuf>,

    /// Dump verbose diagnostic information as processing proceeds.
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,

    /// Skip reading the on-disk dependency cache (a fresh one is still
    /// written at exit unless `-n`/`-N` is also given).
    #[clap(short = 'r', long = "no-cache")]
    pub no_cache: bool,

    /// Dry run: report what would be written without touching any file.
    #[clap(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Like `-n`, but also print a unified diff of changed output files.
    #[clap(short = 'N', long = "diff")]
    pub diff: bool,

    /// Target platform (overrides `PPREMAKE_PLATFORM`/`ppremake.toml`).
    #[clap(short = 'p', long = "platform")]
    pub platform: Option<String>,

    /// Target user configuration (overrides `PPREMAKE_CONFIG`/`ppremake.toml`).
    #[clap(short = 'c', long = "config")]
    pub user_config: Option<String>,

    /// Out-of-scope passthrough: read stdin, write stdout unmodified, exit 0
    /// (spec.md §1/§4.5 explicitly excludes a full sed subset).
    #[clap(short = 's', long = "sed", value_name = "SCRIPT")]
    pub sed: Option<String>,
}

/// The optional `ppremake.toml` overlay (SPEC_FULL.md §0): lowest-priority
/// source for `platform`/`config`, read once at startup if present.
#[derive(Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct TomlConfig {
    pub platform: Option<String>,
    pub config: Option<String>,
}

impl TomlConfig {
    pub fn load(path: &std::path::Path) -> crate::error::Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(|e| crate::error::Error::io(path, e))?;
        let parsed: TomlConfig = toml::from_str(&text).unwrap_or_default();
        Ok(Some(parsed))
    }
}

/// Resolved `PLATFORM`/`CONFIG` after applying the precedence order of
/// SPEC_FULL.md §6: built-in default -> `ppremake.toml` -> env var -> CLI
/// flag.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub platform: String,
    pub user_config: String,
}

const DEFAULT_PLATFORM: &str = "unix";
const DEFAULT_USER_CONFIG: &str = "";

pub fn resolve_settings(cli: &Cli, toml_cfg: Option<&TomlConfig>) -> ResolvedSettings {
    let mut platform = DEFAULT_PLATFORM.to_string();
    let mut user_config = DEFAULT_USER_CONFIG.to_string();

    if let Some(cfg) = toml_cfg {
        if let Some(p) = &cfg.platform {
            platform = p.clone();
        }
        if let Some(c) = &cfg.config {
            user_config = c.clone();
        }
    }

    if let Ok(p) = std::env::var("PPREMAKE_PLATFORM") {
        platform = p;
    }
    if let Ok(c) = std::env::var("PPREMAKE_CONFIG") {
        user_config = c;
    }

    if let Some(p) = &cli.platform {
        platform = p.clone();
    }
    if let Some(c) = &cli.user_config {
        user_config = c.clone();
    }

    ResolvedSettings { platform, user_config }
}

/// Maps `-v` occurrences to a `log::LevelFilter`, honoring `RUST_LOG` when
/// `-v` was not given at all (SPEC_FULL.md §0).
pub fn log_level(verbose: u8) -> Option<log::LevelFilter> {
    match verbose {
        0 => None,
        1 => Some(log::LevelFilter::Info),
        2 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_overrides_env_and_toml() {
        std::env::remove_var("PPREMAKE_PLATFORM");
        std::env::remove_var("PPREMAKE_CONFIG");
        let cli = Cli {
            dirs: vec![],
            include: vec![],
            verbose: 0,
            histogram: None,
            strict: false,
            depend_check: None,
            debug: false,
            no_cache: false,
            dry_run: false,
            diff: false,
            platform: Some("linux_amd64".to_string()),
            user_config: None,
            sed: None,
        };
        let toml_cfg = TomlConfig {
            platform: Some("from_toml".to_string()),
            config: None,
        };
        let resolved = resolve_settings(&cli, Some(&toml_cfg));
        assert_eq!(resolved.platform, "linux_amd64");
    }

    #[test]
    fn falls_back_to_default_when_nothing_set() {
        std::env::remove_var("PPREMAKE_PLATFORM");
        std::env::remove_var("PPREMAKE_CONFIG");
        let cli = Cli {
            dirs: vec![],
            include: vec![],
            verbose: 0,
            histogram: None,
            strict: false,
            depend_check: None,
            debug: false,
            no_cache: false,
            dry_run: false,
            diff: false,
            platform: None,
            user_config: None,
            sed: None,
        };
        let resolved = resolve_settings(&cli, None);
        assert_eq!(resolved.platform, DEFAULT_PLATFORM);
        assert_eq!(resolved.user_config, DEFAULT_USER_CONFIG);
    }

    #[test]
    fn verbosity_maps_to_level_filter() {
        assert_eq!(log_level(0), None);
        assert_eq!(log_level(1), Some(log::LevelFilter::Info));
        assert_eq!(log_level(3), Some(log::LevelFilter::Trace));
    }
}
