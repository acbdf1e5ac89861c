//! Layered configuration: defaults < TOML file < `ATOMIZE_*` env < CLI flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::semantic::ScopePolicy;
use crate::core::types::DiffMode;
use crate::error::ConfigError;

/// Names the config file explicitly; the file must then exist.
pub const CONFIG_ENV: &str = "ATOMIZE_CONFIG";

/// `atomize` configuration (TOML).
///
/// Missing fields fall back to defaults so a partial file is always valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AtomizeConfig {
    pub generator: GeneratorConfig,

    /// Model name exported to the generator as `ATOMIZE_MODEL`.
    pub model: Option<String>,

    pub generator_timeout_secs: u64,

    /// Drop generator stdout/stderr beyond this many bytes.
    pub generator_output_limit_bytes: usize,

    /// Diffs larger than this are rejected before hashing.
    pub max_diff_bytes: usize,

    pub diff_mode: DiffMode,
    pub include_untracked: bool,

    /// Allow raw diff text in logs.
    pub log_diff: bool,

    pub scope_policy: ScopePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Program and arguments; the prompt is written to its stdin
    /// (e.g. `["ollama", "run", "qwen2.5-coder"]`).
    pub command: Vec<String>,
}

impl Default for AtomizeConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            model: None,
            generator_timeout_secs: 60,
            generator_output_limit_bytes: 1_000_000,
            max_diff_bytes: 2_000_000,
            diff_mode: DiffMode::All,
            include_untracked: true,
            log_diff: false,
            scope_policy: ScopePolicy::Warn,
        }
    }
}

/// Values supplied on the command line (or in a service request).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub generator_timeout_secs: Option<u64>,
    pub diff_mode: Option<DiffMode>,
    pub include_untracked: Option<bool>,
    pub log_diff: Option<bool>,
}

impl AtomizeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generator_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "generator_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.generator_output_limit_bytes == 0 {
            return Err(ConfigError::Invalid(
                "generator_output_limit_bytes must be > 0".to_string(),
            ));
        }
        if self.max_diff_bytes == 0 {
            return Err(ConfigError::Invalid("max_diff_bytes must be > 0".to_string()));
        }
        if let Some(program) = self.generator.command.first()
            && program.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "generator.command must start with a program name".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `ATOMIZE_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("ATOMIZE_GENERATOR_COMMAND") {
            self.generator.command = value.split_whitespace().map(str::to_string).collect();
        }
        if let Some(value) = lookup("ATOMIZE_MODEL") {
            self.model = Some(value).filter(|m| !m.trim().is_empty());
        }
        if let Some(value) = lookup("ATOMIZE_GENERATOR_TIMEOUT_SECS") {
            self.generator_timeout_secs = parse_env("ATOMIZE_GENERATOR_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("ATOMIZE_GENERATOR_OUTPUT_LIMIT_BYTES") {
            self.generator_output_limit_bytes =
                parse_env("ATOMIZE_GENERATOR_OUTPUT_LIMIT_BYTES", &value)?;
        }
        if let Some(value) = lookup("ATOMIZE_MAX_DIFF_BYTES") {
            self.max_diff_bytes = parse_env("ATOMIZE_MAX_DIFF_BYTES", &value)?;
        }
        if let Some(value) = lookup("ATOMIZE_DIFF_MODE") {
            self.diff_mode = parse_env("ATOMIZE_DIFF_MODE", &value)?;
        }
        if let Some(value) = lookup("ATOMIZE_INCLUDE_UNTRACKED") {
            self.include_untracked = parse_bool("ATOMIZE_INCLUDE_UNTRACKED", &value)?;
        }
        if let Some(value) = lookup("ATOMIZE_LOG_DIFF") {
            self.log_diff = parse_bool("ATOMIZE_LOG_DIFF", &value)?;
        }
        if let Some(value) = lookup("ATOMIZE_SCOPE_POLICY") {
            self.scope_policy = parse_env("ATOMIZE_SCOPE_POLICY", &value)?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(model) = &overrides.model {
            self.model = Some(model.clone());
        }
        if let Some(secs) = overrides.generator_timeout_secs {
            self.generator_timeout_secs = secs;
        }
        if let Some(mode) = overrides.diff_mode {
            self.diff_mode = mode;
        }
        if let Some(include) = overrides.include_untracked {
            self.include_untracked = include;
        }
        if let Some(log_diff) = overrides.log_diff {
            self.log_diff = log_diff;
        }
    }
}

/// Load config from a TOML file.
///
/// A missing file yields `AtomizeConfig::default()` unless `required`.
pub fn load_config(path: &Path, required: bool) -> Result<AtomizeConfig, ConfigError> {
    if !path.exists() {
        if required {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(AtomizeConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the effective config from the process environment.
pub fn resolve_config(
    explicit: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<AtomizeConfig, ConfigError> {
    resolve_config_with(explicit, overrides, |var| std::env::var(var).ok(), default_config_path())
}

/// Same as [`resolve_config`] with injectable environment and default path.
pub fn resolve_config_with(
    explicit: Option<&Path>,
    overrides: &ConfigOverrides,
    lookup: impl Fn(&str) -> Option<String>,
    default_path: Option<PathBuf>,
) -> Result<AtomizeConfig, ConfigError> {
    let mut cfg = match explicit
        .map(Path::to_path_buf)
        .or_else(|| lookup(CONFIG_ENV).filter(|p| !p.trim().is_empty()).map(PathBuf::from))
    {
        Some(path) => load_config(&path, true)?,
        None => match default_path {
            Some(path) => load_config(&path, false)?,
            None => AtomizeConfig::default(),
        },
    };
    cfg.apply_env(&lookup)?;
    cfg.apply_overrides(overrides);
    cfg.validate()?;
    Ok(cfg)
}

/// `<config_dir>/atomize/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("atomize").join("config.toml"))
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|err| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
        reason: err.to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var: var.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
