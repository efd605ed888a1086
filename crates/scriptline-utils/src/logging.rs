//! Tracing setup and structured stage logging helpers.

use tracing::{Level, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise verbose mode logs scriptline at debug
/// level. Output goes to stderr so stdout stays reserved for job state.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("scriptline=debug,info")
            } else {
                EnvFilter::try_new("scriptline=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .compact();

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                layer
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_target(false))
            .try_init()?;
    }

    Ok(())
}

/// Span wrapping one stage execution.
pub fn stage_span(job: &str, stage: &str) -> tracing::Span {
    span!(Level::INFO, "stage", job = %job, stage = %stage)
}

pub fn log_stage_start(job: &str, stage: &str, attempt: u32) {
    info!(job = %job, stage = %stage, attempt, "Starting stage");
}

pub fn log_stage_complete(job: &str, stage: &str, duration_ms: u128) {
    info!(job = %job, stage = %stage, duration_ms = %duration_ms, "Stage completed");
}

/// A stage that stopped short of completion. Not an error: the job stays resumable.
pub fn log_stage_pending(job: &str, stage: &str, reason: &str, duration_ms: u128) {
    warn!(
        job = %job,
        stage = %stage,
        reason = %reason,
        duration_ms = %duration_ms,
        "Stage left pending"
    );
}
