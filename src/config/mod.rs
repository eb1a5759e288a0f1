//! # Configuration
//!
//! Operator configuration loaded from environment variables.
//!
//! Values are populated from a ConfigMap via `envFrom` in the deployment and
//! shared between the controller, the webhook and the HTTP server.

mod controller;
mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

use std::sync::Arc;
use tokio::sync::RwLock;

/// Controller configuration shared across reconcile tasks
pub type SharedControllerConfig = Arc<RwLock<ControllerConfig>>;

/// Server configuration shared between the probe and webhook servers
pub type SharedServerConfig = Arc<RwLock<ServerConfig>>;

/// Load both configuration sections from the environment
#[must_use]
pub fn create_shared_config() -> (SharedControllerConfig, SharedServerConfig) {
    (
        Arc::new(RwLock::new(ControllerConfig::from_env())),
        Arc::new(RwLock::new(ServerConfig::from_env())),
    )
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
pub(crate) fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_or_default_falls_back_on_missing_and_invalid() {
        assert_eq!(env_var_or_default("CSQL_TEST_UNSET_VARIABLE", 42u64), 42);
        std::env::set_var("CSQL_TEST_INVALID_NUMBER", "not-a-number");
        assert_eq!(env_var_or_default("CSQL_TEST_INVALID_NUMBER", 7u16), 7);
        std::env::remove_var("CSQL_TEST_INVALID_NUMBER");
    }

    #[test]
    fn test_env_var_or_default_bool_accepts_common_spellings() {
        let cases = [
            ("true", true),
            ("YES", true),
            ("1", true),
            ("on", true),
            ("off", false),
            ("nope", false),
        ];
        for (value, expected) in cases {
            std::env::set_var("CSQL_TEST_BOOL", value);
            assert_eq!(
                env_var_or_default_bool("CSQL_TEST_BOOL", !expected),
                expected,
                "value {value}"
            );
        }
        std::env::remove_var("CSQL_TEST_BOOL");
        assert!(env_var_or_default_bool("CSQL_TEST_BOOL", true));
    }
}
