//! Interpreter limits and `jimsh` configuration.
//!
//! | Source | Setting |
//! |--------|---------|
//! | `JIMSH_LOG` | tracing filter for the shell (default `warn`) |
//! | `JIMSH_RC` | rc file evaluated before the interactive prompt |
//! | `~/.jimrc` | default rc file when `JIMSH_RC` is unset |
//! | `JIM_MAX_DEPTH` | procedure nesting limit |
//!
//! Bad values are reported as [`ConfigError`]s and replaced by defaults, so
//! a broken environment never stops the shell from starting.

use std::path::PathBuf;

// ── Limits ───────────────────────────────────────────────────────────────────

/// Resource bounds that turn runaway recursion into ordinary errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Nested procedure calls.
    pub max_call_depth: usize,
    /// Nested command dispatches, native or procedure.
    pub max_eval_depth: usize,
    /// Nested invocations of the `unknown` handler.
    pub max_unknown_depth: usize,
    /// Salt mixed into every hash table; `None` picks one per interpreter.
    pub hash_salt: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_call_depth: 1000,
            max_eval_depth: 2000,
            max_unknown_depth: 50,
            hash_salt: None,
        }
    }
}

// ── Shell configuration ──────────────────────────────────────────────────────

/// A rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{var}: {message}")]
pub struct ConfigError {
    pub var: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub log_filter: String,
    pub rc_file: Option<PathBuf>,
    pub limits: Limits,
}

impl Default for ShellConfig {
    fn default() -> Self {
        ShellConfig {
            log_filter: "warn".into(),
            rc_file: default_rc_file(),
            limits: Limits::default(),
        }
    }
}

fn default_rc_file() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".jimrc"))
}

impl ShellConfig {
    /// Reads the process environment.
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<ConfigError>) {
        let mut config = ShellConfig::default();
        let mut errors = Vec::new();

        if let Some(filter) = lookup("JIMSH_LOG").filter(|f| !f.trim().is_empty()) {
            config.log_filter = filter;
        }
        if let Some(rc) = lookup("JIMSH_RC") {
            config.rc_file = (!rc.is_empty()).then(|| PathBuf::from(rc));
        }
        if let Some(depth) = lookup("JIM_MAX_DEPTH") {
            match depth.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.limits.max_call_depth = n,
                _ => errors.push(ConfigError {
                    var: "JIM_MAX_DEPTH",
                    message: format!("expected a positive integer, got \"{depth}\""),
                }),
            }
        }
        (config, errors)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
