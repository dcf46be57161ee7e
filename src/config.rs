//! Engine-wide tunables
//!
//! One `EngineConfig` is handed to the [`Executor`](crate::exec::Executor)
//! at construction and read per call; there is no global mutable state.
//! All durations are milliseconds.

use std::time::Duration;

/// Process-wide defaults for timeouts, backoff, grace periods, and mailbox
/// flushing.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default budget for a single action run
    pub default_timeout: u64,

    /// Default budget when awaiting an async handle
    pub default_await_timeout: u64,

    /// Default retry budget (attempts after the first)
    pub default_max_retries: u32,

    /// Initial backoff between retries
    pub default_backoff: u64,

    /// Ceiling for exponential backoff
    pub default_max_backoff: u64,

    /// Default budget for a compensation handler
    pub default_compensation_timeout: u64,

    /// Grace to wait for a late result after an async child exits cleanly
    pub async_down_grace: u64,

    /// Grace between cooperative shutdown and kill for async children
    pub async_shutdown_grace: u64,

    /// Grace to wait for a late result after a chain child exits cleanly
    pub chain_down_grace: u64,

    /// Grace between cooperative shutdown and kill for chain children
    pub chain_shutdown_grace: u64,

    /// Grace to wait for a late result from a compensation handler
    pub compensation_down_grace: u64,

    /// Grace to wait for a late result after a sync child exits cleanly
    pub exec_down_grace: u64,

    /// Per-receive budget while draining stale completions
    pub flush_timeout: u64,

    /// Bound on drain receives; `None` = unbounded
    pub max_flush_messages: Option<usize>,

    /// When true, `timeout: 0` means "already expired" instead of falling
    /// through to `default_timeout`
    pub zero_timeout_is_immediate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: 30_000,
            default_await_timeout: 5_000,
            default_max_retries: 1,
            default_backoff: 250,
            default_max_backoff: 30_000,
            default_compensation_timeout: 5_000,
            async_down_grace: 100,
            async_shutdown_grace: 1_000,
            chain_down_grace: 100,
            chain_shutdown_grace: 1_000,
            compensation_down_grace: 100,
            exec_down_grace: 100,
            flush_timeout: 0,
            max_flush_messages: None,
            zero_timeout_is_immediate: false,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight budgets for tests (fast failure instead of long hangs).
    pub fn testing() -> Self {
        Self {
            default_timeout: 2_000,
            default_await_timeout: 1_000,
            default_max_retries: 1,
            default_backoff: 10,
            default_max_backoff: 100,
            default_compensation_timeout: 500,
            async_shutdown_grace: 100,
            chain_shutdown_grace: 100,
            ..Self::default()
        }
    }

    pub fn with_default_timeout(mut self, ms: u64) -> Self {
        self.default_timeout = ms;
        self
    }

    pub fn with_default_await_timeout(mut self, ms: u64) -> Self {
        self.default_await_timeout = ms;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, ms: u64) -> Self {
        self.default_backoff = ms;
        self
    }

    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.default_max_backoff = ms;
        self
    }

    pub fn with_compensation_timeout(mut self, ms: u64) -> Self {
        self.default_compensation_timeout = ms;
        self
    }

    pub fn with_flush_limits(mut self, timeout_ms: u64, max_messages: Option<usize>) -> Self {
        self.flush_timeout = timeout_ms;
        self.max_flush_messages = max_messages;
        self
    }

    pub fn with_zero_timeout_immediate(mut self, enabled: bool) -> Self {
        self.zero_timeout_is_immediate = enabled;
        self
    }

    pub fn default_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.default_timeout)
    }

    pub fn default_await_duration(&self) -> Duration {
        Duration::from_millis(self.default_await_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.default_timeout, 30_000);
        assert_eq!(config.default_await_timeout, 5_000);
        assert_eq!(config.default_max_retries, 1);
        assert_eq!(config.default_backoff, 250);
        assert_eq!(config.default_max_backoff, 30_000);
        assert_eq!(config.default_compensation_timeout, 5_000);
        assert_eq!(config.async_down_grace, 100);
        assert_eq!(config.async_shutdown_grace, 1_000);
        assert_eq!(config.flush_timeout, 0);
        assert_eq!(config.max_flush_messages, None);
        assert!(!config.zero_timeout_is_immediate);
    }

    #[test]
    fn testing_preset_is_tighter() {
        let config = EngineConfig::testing();
        assert!(config.default_timeout < EngineConfig::default().default_timeout);
        assert!(config.default_backoff < EngineConfig::default().default_backoff);
    }

    #[test]
    fn builder_setters_apply() {
        let config = EngineConfig::new()
            .with_default_timeout(100)
            .with_max_retries(5)
            .with_backoff(20)
            .with_zero_timeout_immediate(true);
        assert_eq!(config.default_timeout, 100);
        assert_eq!(config.default_max_retries, 5);
        assert_eq!(config.default_backoff, 20);
        assert!(config.zero_timeout_is_immediate);
    }
}
