use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::CacheKey;

/// Command-line arguments for the nestcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "nestcache",
    version,
    about = "Inspect and maintain a nestcache store"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "NESTCACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true,
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        global = true,
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the cache backend (memory|filesystem|null).
    #[arg(long = "backend", value_name = "BACKEND", global = true)]
    pub backend: Option<String>,

    /// Override the filesystem backend directory.
    #[arg(
        long = "cache-dir",
        value_name = "PATH",
        global = true,
        value_hint = ValueHint::DirPath
    )]
    pub cache_dir: Option<PathBuf>,

    /// Override the storage namespace.
    #[arg(long = "namespace", value_name = "NAME", global = true)]
    pub namespace: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the expanded text of a cached entry.
    Get(KeyArgs),
    /// Print the stored entry as JSON.
    Inspect(KeyArgs),
    /// Cache a literal text under a key.
    Put(PutArgs),
    /// Delete one entry.
    Delete(KeyArgs),
    /// Delete every sub stored under BASE/ID.
    Clean(GroupArgs),
    /// Delete everything in the store.
    Clear,
    /// Bump the version of a dependency key.
    Invalidate(KeyArgs),
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    /// Kind of cached thing, e.g. `page`.
    #[arg(value_name = "BASE")]
    pub base: String,

    /// Item id.
    #[arg(value_name = "ID")]
    pub id: String,

    /// Sub-discriminator for items cached in parts.
    #[arg(long, value_name = "SUB")]
    pub sub: Option<String>,
}

impl KeyArgs {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.base.clone(), &self.id).with_sub(self.sub.clone())
    }
}

#[derive(Debug, Args, Clone)]
pub struct PutArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Text to cache.
    #[arg(value_name = "TEXT")]
    pub text: String,

    /// Lifetime in seconds; the store default when omitted.
    #[arg(long = "ttl", value_name = "SECONDS")]
    pub ttl: Option<u64>,

    /// Dependency keys as BASE/ID, repeatable.
    #[arg(long = "depends-on", value_name = "BASE/ID")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct GroupArgs {
    #[arg(value_name = "BASE")]
    pub base: String,

    #[arg(value_name = "ID")]
    pub id: String,
}
