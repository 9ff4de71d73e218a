//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{BackendKind, CacheConfig};

mod cli;

pub use cli::{CliArgs, Command, GlobalOverrides, GroupArgs, KeyArgs, PutArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "nestcache";
const ENV_PREFIX: &str = "NESTCACHE";
// The binary maintains stores shared between processes.
const DEFAULT_BACKEND: BackendKind = BackendKind::Filesystem;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: BackendKind,
    pub namespace: String,
    pub default_lifetime_secs: Option<u64>,
    pub memory_capacity: NonZeroUsize,
    pub directory: PathBuf,
    pub callback_capacity: NonZeroUsize,
    pub strict_nested_hits: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Parse the process arguments and resolve settings from them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.cache.directory = Some(dir.clone());
        }
        if let Some(namespace) = overrides.namespace.as_ref() {
            self.cache.namespace = Some(namespace.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();
    let backend = match cache.backend {
        Some(value) => BackendKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => DEFAULT_BACKEND,
    };

    let namespace = cache
        .namespace
        .map(|value| value.trim().to_string())
        .unwrap_or_default();

    let directory = cache.directory.unwrap_or(defaults.directory);
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.directory", "must not be empty"));
    }

    let memory_capacity = non_zero_usize(
        cache.memory_capacity.unwrap_or(defaults.memory_capacity),
        "cache.memory_capacity",
    )?;
    let callback_capacity = non_zero_usize(
        cache.callback_capacity.unwrap_or(defaults.callback_capacity),
        "cache.callback_capacity",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        backend,
        namespace,
        default_lifetime_secs: cache.default_lifetime_secs.or(defaults.default_lifetime_secs),
        memory_capacity,
        directory,
        callback_capacity,
        strict_nested_hits: cache
            .strict_nested_hits
            .unwrap_or(defaults.strict_nested_hits),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    namespace: Option<String>,
    default_lifetime_secs: Option<u64>,
    memory_capacity: Option<usize>,
    directory: Option<PathBuf>,
    callback_capacity: Option<usize>,
    strict_nested_hits: Option<bool>,
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
