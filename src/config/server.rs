//! # Server Configuration
//!
//! Ports, certificate location and startup timing for the probe/metrics
//! server and the admission webhook server.

use super::{env_var_or_default, env_var_or_default_bool, env_var_or_default_str};
use crate::constants::{
    DEFAULT_METRICS_PORT, DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
    DEFAULT_WEBHOOK_CERT_DIR, DEFAULT_WEBHOOK_PORT,
};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// HTTPS port for the admission webhooks
    pub webhook_port: u16,
    /// Directory containing `tls.crt` and `tls.key`
    pub webhook_cert_dir: PathBuf,
    /// Whether to serve admission webhooks at all
    pub webhook_enabled: bool,
    /// How long to wait for the probe server to bind
    pub startup_timeout_secs: u64,
    /// Poll interval while waiting for the probe server
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            webhook_port: DEFAULT_WEBHOOK_PORT,
            webhook_cert_dir: PathBuf::from(DEFAULT_WEBHOOK_CERT_DIR),
            webhook_enabled: true,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            webhook_port: env_var_or_default("WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT),
            webhook_cert_dir: PathBuf::from(env_var_or_default_str(
                "WEBHOOK_CERT_DIR",
                DEFAULT_WEBHOOK_CERT_DIR,
            )),
            webhook_enabled: env_var_or_default_bool("WEBHOOK_ENABLED", true),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }

    #[must_use]
    pub fn webhook_cert_path(&self) -> PathBuf {
        self.webhook_cert_dir.join("tls.crt")
    }

    #[must_use]
    pub fn webhook_key_path(&self) -> PathBuf {
        self.webhook_cert_dir.join("tls.key")
    }
}
