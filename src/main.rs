use std::{
    io::{self, Write},
    process,
};

use nestcache::{
    cache::{Cache, CacheConfig, CacheEntry, CacheError, CacheKey},
    config::{self, Command, PutArgs},
    error::AppError,
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings.cache);
    let cache = Cache::from_config(&cache_config)?;
    info!(
        backend = %cache_config.backend,
        namespace = %cache_config.namespace,
        "nestcache ready"
    );

    match cli_args.command {
        Command::Get(args) => run_get(&cache, &args.key()),
        Command::Inspect(args) => run_inspect(&cache, &args.key()),
        Command::Put(args) => run_put(&cache, &args),
        Command::Delete(args) => {
            let deleted = cache.delete(&args.key())?;
            print_line(if deleted { "deleted" } else { "absent" })
        }
        Command::Clean(args) => {
            let cleaned = cache.clean(&args.base, &args.id)?;
            print_line(if cleaned { "cleaned" } else { "absent" })
        }
        Command::Clear => {
            cache.clear()?;
            print_line("cleared")
        }
        Command::Invalidate(args) => {
            let version = cache.invalidate(&args.key())?;
            print_line(&version.to_string())
        }
    }
}

fn run_get(cache: &Cache, key: &CacheKey) -> Result<(), AppError> {
    let text = cache.get(key).map_err(|err| not_found_or(err, key))?;
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(InfraError::from)?;
    Ok(())
}

fn run_inspect(cache: &Cache, key: &CacheKey) -> Result<(), AppError> {
    let entry = cache.get_entry(key).map_err(|err| not_found_or(err, key))?;
    let json = serde_json::to_string_pretty(&entry).map_err(InfraError::from)?;
    print_line(&json)
}

fn run_put(cache: &Cache, args: &PutArgs) -> Result<(), AppError> {
    let key = args.key.key();
    let mut entry = CacheEntry::new(key.clone()).with_lifetime(args.ttl.unwrap_or(0));
    entry.add_dependency(key.clone());
    for raw in &args.depends_on {
        entry.add_dependency(parse_dependency(raw)?);
    }
    entry.append_literal(args.text.clone());

    if !cache.store_entry(&mut entry)? {
        return Err(CacheError::store_failure(&key, "backend declined the write").into());
    }
    print_line("stored")
}

fn parse_dependency(raw: &str) -> Result<CacheKey, AppError> {
    match raw.split_once('/') {
        Some((base, id)) if !base.is_empty() && !id.is_empty() => Ok(CacheKey::new(base, id)),
        _ => Err(AppError::validation(format!(
            "dependency `{raw}` must look like BASE/ID"
        ))),
    }
}

fn not_found_or(err: CacheError, key: &CacheKey) -> AppError {
    if err.is_not_cached() {
        AppError::NotFound(key.to_string())
    } else {
        AppError::from(err)
    }
}

fn print_line(text: &str) -> Result<(), AppError> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{text}").map_err(InfraError::from)?;
    Ok(())
}
