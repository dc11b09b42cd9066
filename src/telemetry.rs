use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;
use crate::model::RequestId;

/// Install the global subscriber. RUST_LOG overrides the configured level.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    if config.json_logs {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init()?;
    }

    tracing::debug!("Material tracker telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking a mutation's optimistic and settle phases
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one optimistic mutation from snapshot to invalidation
pub fn create_mutation_span(
    operation: &str,
    request_id: Option<RequestId>,
    correlation_id: &str,
) -> tracing::Span {
    let span = tracing::info_span!(
        "mutation",
        operation = operation,
        request.id = tracing::field::Empty,
        correlation.id = correlation_id,
    );
    if let Some(id) = request_id {
        span.record("request.id", tracing::field::display(id));
    }
    span
}

/// Span wrapping a list or detail read
pub fn create_query_span(key: &str) -> tracing::Span {
    tracing::debug_span!("query", cache.key = key)
}
