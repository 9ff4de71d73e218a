use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so that command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every counter the cache emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "nestcache_hit_total",
            Unit::Count,
            "Total number of fresh cache entries served."
        );
        describe_counter!(
            "nestcache_miss_total",
            Unit::Count,
            "Total number of lookups that found no usable entry."
        );
        describe_counter!(
            "nestcache_saved_total",
            Unit::Count,
            "Total number of entries written to the store."
        );
        describe_counter!(
            "nestcache_deleted_total",
            Unit::Count,
            "Total number of entries deleted, including stale ones."
        );
        describe_counter!(
            "nestcache_cleaned_total",
            Unit::Count,
            "Total number of base/id groups cleaned."
        );
        describe_counter!(
            "nestcache_invalidated_total",
            Unit::Count,
            "Total number of dependency version bumps."
        );
        describe_counter!(
            "nestcache_memory_evict_total",
            Unit::Count,
            "Total number of memory store evictions due to capacity."
        );
    });
}
