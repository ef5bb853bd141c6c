//! `Config::from_env()` — environment-driven process configuration.
//!
//! Loads `.env` if present, then resolves each field from its named
//! variable with a parsed default, failing hard only on the handful of
//! variables that have no sane default (`DATABASE_URL`, `SECRET_KEY`).

use std::env;
use std::time::Duration;

use anyhow::Context;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Classifier decision thresholds. Must satisfy
/// `alert <= throttle <= block <= redirect` — `ThresholdConfig::validate`
/// checks this at startup rather than silently misordering decisions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
    pub alert: f64,
    pub throttle: f64,
    pub block: f64,
    pub redirect: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            alert: 0.3,
            throttle: 0.6,
            block: 0.8,
            redirect: 0.9,
        }
    }
}

impl ThresholdConfig {
    fn from_env() -> Self {
        let default = Self::default();
        Self {
            alert: env_parsed("THRESHOLD_ALERT", default.alert),
            throttle: env_parsed("THRESHOLD_THROTTLE", default.throttle),
            block: env_parsed("THRESHOLD_BLOCK", default.block),
            redirect: env_parsed("THRESHOLD_REDIRECT", default.redirect),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.alert <= self.throttle && self.throttle <= self.block && self.block <= self.redirect)
        {
            anyhow::bail!(
                "thresholds must satisfy alert <= throttle <= block <= redirect, got {:?}",
                self
            );
        }
        Ok(())
    }
}

/// Detection pipeline sizing, overridable but defaulting to the numbers the
/// specification fixes.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub queue_depth: usize,
    pub worker_count: usize,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 10_000,
            worker_count: 4,
            batch_size: 64,
        }
    }
}

impl PipelineConfig {
    fn from_env() -> Self {
        let default = Self::default();
        Self {
            queue_depth: env_parsed("DETECTION_QUEUE_DEPTH", default.queue_depth),
            worker_count: env_parsed("DETECTION_WORKER_COUNT", default.worker_count),
            batch_size: env_parsed("DETECTION_BATCH_SIZE", default.batch_size),
        }
    }
}

/// Top-level process configuration, resolved once at startup and shared
/// read-only through `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub controller_base_url: String,
    pub controller_client_id: String,
    pub controller_client_secret: String,
    pub controller_ws_base_url: String,
    pub enable_controller_ws: bool,

    pub ui_ws_host: String,
    pub ui_ws_port: u16,

    pub model_dir: String,
    pub model_file: String,
    pub features_file: String,
    pub thresholds_file: String,
    pub thresholds: ThresholdConfig,

    pub database_url: String,
    pub secret_key: String,

    pub server_host: String,
    pub server_port: u16,
    pub event_ring_buffer_size: usize,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Loads configuration from the process environment, reading `.env` in
    /// the current directory first if present (no-op if absent).
    pub fn from_env() -> anyhow::Result<Self> {
        if dotenvy::dotenv().is_err() {
            tracing::debug!("no .env file found, continuing with process environment");
        }

        let thresholds = ThresholdConfig::from_env();
        thresholds.validate()?;

        let config = Self {
            controller_base_url: env_or("CONTROLLER_BASE_URL", "http://127.0.0.1:8181"),
            controller_client_id: env_or("CONTROLLER_CLIENT_ID", ""),
            controller_client_secret: env_or("CONTROLLER_CLIENT_SECRET", ""),
            controller_ws_base_url: env_or("CONTROLLER_WS_BASE_URL", "ws://127.0.0.1:8181"),
            enable_controller_ws: env_bool("ENABLE_CONTROLLER_WS", true),

            ui_ws_host: env_or("UI_WS_HOST", "0.0.0.0"),
            ui_ws_port: env_parsed("UI_WS_PORT", 8787),

            model_dir: env_or("MODEL_DIR", "./models"),
            model_file: env_or("MODEL_FILE", "classifier.json"),
            features_file: env_or("FEATURES_FILE", "features.json"),
            thresholds_file: env_or("THRESHOLDS_FILE", "thresholds.json"),
            thresholds,

            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            secret_key: env::var("SECRET_KEY").context("SECRET_KEY must be set")?,

            server_host: env_or("SERVER_HOST", "0.0.0.0"),
            server_port: env_parsed("SERVER_PORT", 8080),
            event_ring_buffer_size: env_parsed("EVENT_RING_BUFFER_SIZE", 200),
            pipeline: PipelineConfig::from_env(),
        };

        Ok(config)
    }

    pub fn model_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.model_dir).join(&self.model_file)
    }

    pub fn features_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.model_dir).join(&self.features_file)
    }

    pub fn thresholds_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.model_dir).join(&self.thresholds_file)
    }

    /// 10 s default used by the controller REST client.
    pub fn controller_request_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_defaults_are_monotonic() {
        ThresholdConfig::default().validate().unwrap();
    }

    #[test]
    fn threshold_validate_rejects_out_of_order() {
        let bad = ThresholdConfig {
            alert: 0.5,
            throttle: 0.4,
            block: 0.8,
            redirect: 0.9,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn pipeline_defaults_match_spec_constants() {
        let p = PipelineConfig::default();
        assert_eq!(p.queue_depth, 10_000);
        assert_eq!(p.worker_count, 4);
        assert_eq!(p.batch_size, 64);
    }
}
