/*!
 * Structured Tracing
 * Subscriber setup and scenario spans using the tracing crate
 *
 * The primitives only emit events; installing a subscriber is left to the
 * application. `init_tracing` is the setup used by the demo binary and by
 * tests that want to see slow-path events.
 */

use std::time::Instant;
use tracing::{debug, info, span, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
    EnvFilter,
};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SYNC_TRACE_JSON: Enable JSON output (default: false)
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing() -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SYNC_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
        info!("Structured tracing initialized with JSON output");
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
        info!("Structured tracing initialized");
    }
    Ok(())
}

/// Span covering one coordination scenario, with its outcome recorded on finish
pub struct ScenarioSpan {
    span: Span,
    start: Instant,
    name: String,
}

impl ScenarioSpan {
    pub fn new(name: &str) -> Self {
        let span = span!(
            Level::INFO,
            "scenario",
            scenario = name,
            threads = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            result = tracing::field::Empty,
        );
        span.in_scope(|| debug!(scenario = name, "scenario started"));

        Self {
            span,
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_threads(&self, threads: usize) {
        self.span.record("threads", threads);
    }

    /// Record duration and outcome, then close the span
    pub fn finish(self, success: bool) {
        let elapsed = self.start.elapsed();
        self.span.record("duration_ms", elapsed.as_millis() as u64);
        self.span
            .record("result", if success { "success" } else { "error" });
        self.span.in_scope(|| {
            info!(
                scenario = %self.name,
                duration_ms = elapsed.as_millis() as u64,
                success,
                "scenario finished"
            )
        });
    }
}

/// Helper to create a scenario span
#[inline]
pub fn span_scenario(name: &str) -> ScenarioSpan {
    ScenarioSpan::new(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_span_without_subscriber() {
        let scenario = span_scenario("latch");
        scenario.record_threads(4);
        scenario.finish(true);
    }
}
