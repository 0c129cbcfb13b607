pub mod counters;
pub mod trace_id;

pub use counters::Counters;

use std::time::Duration;
use tracing::{Span, field};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub use trace_id::TraceId;

/// Installs the process-wide tracing subscriber.
///
/// `json` selects the structured JSON formatter for production log
/// shipping; otherwise a pretty human-readable formatter is used. Filter
/// level is read from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_span_events(fmt::format::FmtSpan::CLOSE);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.pretty())
            .init();
    }
}

/// Root span for one externally-observable unit of work (a request, a
/// scheduler tick, a background job iteration). Carries a `TraceId` so every
/// event nested under it can be correlated without a thread-local logger.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        actor_id = field::Empty,
        resource_id = field::Empty,
    )
}

pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!("child", name = %name)
}

/// Runs `fut`, logging a warning if it takes longer than `max`. Used around
/// lock acquisition and DB transactions so slow paths surface in logs
/// without needing a separate metrics pipeline.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
