//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_or_default, env_var_or_default_str};
use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_CONFLICT_RETRY_ATTEMPTS,
    DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_PENDING_REQUEUE_SECS, DEFAULT_PROXY_IMAGE,
    DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
    DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Reconciliation error requeue interval (seconds)
    pub reconciliation_error_requeue_secs: u64,
    /// Requeue interval while workloads are still waiting for a rollout (seconds)
    pub pending_requeue_secs: u64,
    /// Attempts for a workload write that keeps conflicting
    pub conflict_retry_attempts: u32,
    /// Exponential backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Proxy image used when a resource does not override it
    pub default_proxy_image: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Maximum concurrent reconciliations
    pub max_concurrent_reconciliations: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            pending_requeue_secs: DEFAULT_PENDING_REQUEUE_SECS,
            conflict_retry_attempts: DEFAULT_CONFLICT_RETRY_ATTEMPTS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            default_proxy_image: DEFAULT_PROXY_IMAGE.to_string(),
            log_format: "json".to_string(),
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reconciliation_error_requeue_secs: env_var_or_default(
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                defaults.reconciliation_error_requeue_secs,
            ),
            pending_requeue_secs: env_var_or_default(
                "PENDING_REQUEUE_SECS",
                defaults.pending_requeue_secs,
            ),
            conflict_retry_attempts: env_var_or_default(
                "CONFLICT_RETRY_ATTEMPTS",
                defaults.conflict_retry_attempts,
            )
            .max(1),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", defaults.backoff_start_ms),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", defaults.backoff_max_ms),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                defaults.watch_restart_delay_after_end_secs,
            ),
            default_proxy_image: env_var_or_default_str(
                "DEFAULT_PROXY_IMAGE",
                DEFAULT_PROXY_IMAGE,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", &defaults.log_format),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
        }
    }

    /// Get reconciliation error requeue duration
    #[must_use]
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Get the requeue duration used while rollouts are pending
    #[must_use]
    pub fn pending_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.pending_requeue_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.default_proxy_image, DEFAULT_PROXY_IMAGE);
        assert_eq!(config.pending_requeue_duration(), Duration::from_secs(30));
        assert_eq!(config.conflict_retry_attempts, 5);
        assert_eq!(config.max_concurrent_reconciliations, 10);
        assert_eq!(
            config.reconciliation_error_requeue_duration(),
            Duration::from_secs(DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS)
        );
        assert_eq!(
            config.watch_restart_delay_duration(),
            Duration::from_secs(DEFAULT_WATCH_RESTART_DELAY_SECS)
        );
    }
}
