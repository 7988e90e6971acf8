//! Logging setup and retry observation.

use storefront::{MetricsHook, RetryContext};
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG` and falls back to `info`.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .init();
}

/// Logs every placement retry at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMetricsHook;

impl MetricsHook for LoggingMetricsHook {
    fn on_retry_attempt(&self, ctx: &RetryContext) {
        warn!(
            attempt = ctx.attempt,
            max_attempts = ctx.max_attempts,
            delay_ms = u64::try_from(ctx.delay.as_millis()).unwrap_or(u64::MAX),
            phase = ?ctx.phase,
            "[server.order_retry] order placement conflicted, retrying"
        );
    }
}
