//! OpenTelemetry-Compatible Span Helpers
//!
//! Structured `tracing` span builders for the coordination pipeline.
//! All spans use dot-notation field names compatible with OpenTelemetry
//! semantic conventions.
//!
//! # Span Hierarchy
//!
//! ```text
//! coord.handoff              (root — one per handle_limit_reached call)
//!   └─ coord.attempt         (one per candidate platform tried)
//! coord.monitor_tick         (one per detector poll cycle)
//! coord.breaker_transition   (circuit state change)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::otel;
//!
//! let span = otel::handoff_span("task-42", "claude_code");
//! let guard = span.enter();
//! // ... walk the fallback chain ...
//! otel::record_handoff_result(&span, true, 2, 1450);
//! drop(guard);
//! ```

use tracing::Span;

// Span names and field names are inline string literals: the tracing
// macros build their metadata statically and only accept literals, so
// named constants could never feed the `info_span!` invocations.

// ── Span Builders ────────────────────────────────────────────────────

/// Create a root span for one handoff.
///
/// Fields filled at creation: `task.id`, `coord.from_platform`.
/// Fields filled later via [`record_handoff_result`]: success, attempt
/// count, duration.
pub fn handoff_span(task_id: &str, from_platform: &str) -> Span {
    tracing::info_span!(
        "coord.handoff",
        "task.id" = %task_id,
        "coord.from_platform" = %from_platform,
        "coord.success" = tracing::field::Empty,
        "coord.attempted" = tracing::field::Empty,
        "coord.duration_ms" = tracing::field::Empty,
    )
}

/// Record the final result on a handoff span.
pub fn record_handoff_result(span: &Span, success: bool, attempted: usize, duration_ms: u64) {
    span.record("coord.success", success);
    span.record("coord.attempted", attempted as u64);
    span.record("coord.duration_ms", duration_ms);
}

/// Create a span for one candidate platform attempt.
///
/// Fields filled at creation: `task.id`, `coord.platform`,
/// `coord.timeout_ms`. Fields filled later via
/// [`record_attempt_result`]: success, compression ratio, duration.
pub fn attempt_span(task_id: &str, platform: &str, timeout_ms: u64) -> Span {
    tracing::info_span!(
        "coord.attempt",
        "task.id" = %task_id,
        "coord.platform" = %platform,
        "coord.timeout_ms" = timeout_ms,
        "coord.success" = tracing::field::Empty,
        "coord.compression_ratio" = tracing::field::Empty,
        "coord.duration_ms" = tracing::field::Empty,
    )
}

/// Record the result of a candidate attempt.
pub fn record_attempt_result(
    span: &Span,
    success: bool,
    compression_ratio: f64,
    duration_ms: u64,
) {
    span.record("coord.success", success);
    span.record("coord.compression_ratio", compression_ratio);
    span.record("coord.duration_ms", duration_ms);
}

/// Create a span for one detector poll cycle.
///
/// Fields filled later via [`record_monitor_tick`]: sessions sampled,
/// duration.
pub fn monitor_tick_span() -> Span {
    tracing::info_span!(
        "coord.monitor_tick",
        "coord.sessions_sampled" = tracing::field::Empty,
        "coord.duration_ms" = tracing::field::Empty,
    )
}

/// Record the result of a poll cycle.
pub fn record_monitor_tick(span: &Span, sessions_sampled: usize, duration_ms: u64) {
    span.record("coord.sessions_sampled", sessions_sampled as u64);
    span.record("coord.duration_ms", duration_ms);
}

/// Create a span for a circuit breaker state change.
///
/// All fields filled at creation since a transition is a point-in-time
/// decision.
pub fn breaker_transition_span(platform: &str, old_state: &str, new_state: &str) -> Span {
    tracing::info_span!(
        "coord.breaker_transition",
        "coord.platform" = %platform,
        "coord.breaker.old_state" = %old_state,
        "coord.breaker.new_state" = %new_state,
    )
}

/// Install a plain-text subscriber honoring `RUST_LOG` for tests and
/// examples. Safe to call repeatedly.
pub fn init_test_subscriber() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_builders_do_not_panic() {
        init_test_subscriber();
        let handoff = handoff_span("task-1", "claude_code");
        record_handoff_result(&handoff, true, 2, 1450);

        let attempt = attempt_span("task-1", "gemini_cli", 90_000);
        record_attempt_result(&attempt, true, 0.42, 1200);

        let tick = monitor_tick_span();
        record_monitor_tick(&tick, 3, 12);

        let _ = breaker_transition_span("gemini_cli", "closed", "open");
    }
}
