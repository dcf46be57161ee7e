//! Action telemetry
//!
//! Span and event emission around action runs, built on `tracing`. Every
//! run opens an `action_run` span; start/stop/error/retry events carry
//! `system_time` and `duration_ms` measurements. Emission is gated twice:
//! by the run's [`TelemetryMode`] and by a [`LogLevel`] threshold (an
//! event is emitted iff threshold ≤ event level).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, Span};

use crate::error::ExecError;
use crate::params::Params;

// ============================================================================
// MODES & LEVELS
// ============================================================================

/// How much an individual run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TelemetryMode {
    /// Spans plus start/stop events with params and results
    #[default]
    Full,
    /// Spans plus start/stop events with identities and timings only
    Minimal,
    /// Nothing
    Silent,
}

/// Threshold levels, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// A message at `level` passes a `threshold` iff threshold ≤ level.
    pub fn passes(threshold: LogLevel, level: LogLevel) -> bool {
        threshold <= level
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Span wrapping one action run.
pub fn action_span(action: &str) -> Span {
    tracing::info_span!("action_run", action = %action)
}

fn system_time_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

pub fn action_start(mode: TelemetryMode, threshold: LogLevel, action: &str, params: &Params) {
    if mode == TelemetryMode::Silent || !LogLevel::passes(threshold, LogLevel::Debug) {
        return;
    }
    match mode {
        TelemetryMode::Full => debug!(
            action = %action,
            system_time = %system_time_ms(),
            params = %serde_json::Value::Object(params.clone()),
            "action start"
        ),
        _ => debug!(action = %action, system_time = %system_time_ms(), "action start"),
    }
}

pub fn action_stop(
    mode: TelemetryMode,
    threshold: LogLevel,
    action: &str,
    duration: Duration,
    result: &Params,
) {
    if mode == TelemetryMode::Silent || !LogLevel::passes(threshold, LogLevel::Debug) {
        return;
    }
    match mode {
        TelemetryMode::Full => debug!(
            action = %action,
            duration_ms = %duration.as_millis(),
            result = %serde_json::Value::Object(result.clone()),
            "action stop"
        ),
        _ => debug!(action = %action, duration_ms = %duration.as_millis(), "action stop"),
    }
}

pub fn action_error(
    mode: TelemetryMode,
    threshold: LogLevel,
    action: &str,
    duration: Duration,
    err: &ExecError,
) {
    if mode == TelemetryMode::Silent || !LogLevel::passes(threshold, LogLevel::Error) {
        return;
    }
    error!(
        action = %action,
        duration_ms = %duration.as_millis(),
        kind = %err.kind(),
        "action failed: {}",
        err.message()
    );
}

/// Retries are info-level per the engine contract.
pub fn action_retry(
    mode: TelemetryMode,
    threshold: LogLevel,
    action: &str,
    attempt: u32,
    max_retries: u32,
    backoff: Duration,
) {
    if mode == TelemetryMode::Silent || !LogLevel::passes(threshold, LogLevel::Info) {
        return;
    }
    info!(
        action = %action,
        attempt,
        max_retries,
        backoff_ms = %backoff.as_millis(),
        "retrying action"
    );
}
