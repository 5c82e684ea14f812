use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_RENDER_CACHE_HIT, METRIC_RENDER_CACHE_INVALIDATE, METRIC_RENDER_CACHE_MISS,
    METRIC_RENDER_FAILURE, METRIC_RENDER_MS,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_RENDER_CACHE_HIT,
            Unit::Count,
            "Total number of page requests served from the render cache."
        );
        describe_counter!(
            METRIC_RENDER_CACHE_MISS,
            Unit::Count,
            "Total number of page requests that had to render."
        );
        describe_counter!(
            METRIC_RENDER_FAILURE,
            Unit::Count,
            "Total number of failed page renders."
        );
        describe_counter!(
            METRIC_RENDER_CACHE_INVALIDATE,
            Unit::Count,
            "Total number of render cache invalidations, labelled by scope."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Page render latency in milliseconds."
        );
    });
}
