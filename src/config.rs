//! Configuration management for the backend monitor

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the grading backend
    pub base_url: String,

    /// Path of the health endpoint, appended to `base_url`
    pub health_path: String,

    /// Upper bound for a single health probe
    pub probe_timeout: Duration,

    /// Interval between periodic probes
    pub poll_interval: Duration,

    /// Delay before the automatic re-check after a timeout
    pub wakeup_retry_delay: Duration,

    /// Period of the wake-up progress animation
    pub progress_tick: Duration,

    /// Percentage added on every progress tick
    pub progress_step: u8,

    /// Highest percentage shown while still waking up
    pub progress_display_cap: u8,

    /// File backing the JSON-lines activity store
    pub activity_log_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            health_path: "/health".to_string(),
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60),
            wakeup_retry_delay: Duration::from_secs(10),
            progress_tick: Duration::from_secs(1),
            progress_step: 2,
            progress_display_cap: 95,
            activity_log_path: "activity.jsonl".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(base_url) = env::var("BACKEND_URL") {
            config.base_url = base_url.trim().trim_end_matches('/').to_string();
        }

        if let Ok(health_path) = env::var("HEALTH_PATH") {
            config.health_path = health_path.trim().to_string();
        }

        if let Ok(timeout) = env::var("PROBE_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.probe_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(interval) = env::var("POLL_INTERVAL_SECONDS") {
            if let Ok(seconds) = interval.parse::<u64>() {
                config.poll_interval = Duration::from_secs(seconds);
            }
        }

        if let Ok(delay) = env::var("WAKEUP_RETRY_SECONDS") {
            if let Ok(seconds) = delay.parse::<u64>() {
                config.wakeup_retry_delay = Duration::from_secs(seconds);
            }
        }

        if let Ok(tick) = env::var("PROGRESS_TICK_MS") {
            if let Ok(ms) = tick.parse::<u64>() {
                config.progress_tick = Duration::from_millis(ms);
            }
        }

        if let Ok(step) = env::var("PROGRESS_STEP") {
            if let Ok(step) = step.parse() {
                config.progress_step = step;
            }
        }

        if let Ok(cap) = env::var("PROGRESS_DISPLAY_CAP") {
            if let Ok(cap) = cap.parse() {
                config.progress_display_cap = cap;
            }
        }

        if let Ok(path) = env::var("ACTIVITY_LOG_PATH") {
            config.activity_log_path = path;
        }

        config
    }

    /// Full URL of the health endpoint
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.health_path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("base_url cannot be empty".to_string());
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!("base_url must use http or https: {}", self.base_url));
        }

        if !self.health_path.starts_with('/') {
            return Err("health_path must start with '/'".to_string());
        }

        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be greater than 0".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than 0".to_string());
        }

        if self.wakeup_retry_delay.is_zero() {
            return Err("wakeup_retry_delay must be greater than 0".to_string());
        }

        if self.progress_tick.is_zero() {
            return Err("progress_tick must be greater than 0".to_string());
        }

        if self.progress_step == 0 || self.progress_step > 100 {
            return Err("progress_step must be between 1 and 100".to_string());
        }

        if self.progress_display_cap > 100 {
            return Err("progress_display_cap cannot exceed 100".to_string());
        }

        if self.activity_log_path.is_empty() {
            return Err("activity_log_path cannot be empty".to_string());
        }

        Ok(())
    }
}
