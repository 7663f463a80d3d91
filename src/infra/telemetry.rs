use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::pipeline::METRIC_CONVERT_MS;
use crate::application::sweeper::{METRIC_SWEEP_CONTENDED, METRIC_SWEEP_DELETED};
use crate::application::tasks::METRIC_TASK_FINISHED;
use crate::application::workers::METRIC_WORKER_REJECTED;
use crate::cache::{
    METRIC_CACHE_COALESCED, METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
    METRIC_CACHE_STALE,
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Submissions served from the content cache."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Submissions with no cached artifact set."
        );
        describe_counter!(
            METRIC_CACHE_STALE,
            Unit::Count,
            "Cache entries dropped because their files were swept."
        );
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Cache entries evicted due to capacity."
        );
        describe_counter!(
            METRIC_CACHE_COALESCED,
            Unit::Count,
            "Submissions that waited on an identical in-flight conversion."
        );
        describe_histogram!(
            METRIC_CONVERT_MS,
            Unit::Milliseconds,
            "Markmap conversion latency in milliseconds."
        );
        describe_counter!(
            METRIC_TASK_FINISHED,
            Unit::Count,
            "Snapshot tasks reaching a terminal state, labelled by state."
        );
        describe_counter!(
            METRIC_WORKER_REJECTED,
            Unit::Count,
            "Snapshot jobs rejected by the worker pool."
        );
        describe_counter!(
            METRIC_SWEEP_DELETED,
            Unit::Count,
            "Expired artifact files removed by the sweeper."
        );
        describe_counter!(
            METRIC_SWEEP_CONTENDED,
            Unit::Count,
            "Sweep cycles skipped because another process held the lock."
        );
    });
}
