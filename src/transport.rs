//! HTTP health probe against the grading backend

use crate::classify::{parse_retry_after, ProbeError, ProbeReport};
use crate::config::Config;
use crate::errors::{MonitorError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// A single health check against some backend.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> std::result::Result<ProbeReport, ProbeError>;

    /// Human readable description of what is probed.
    fn target(&self) -> &str;
}

/// Health probe over HTTP GET
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpHealthProbe {
    /// Create a probe for `url` with a bounded request time
    pub fn new(url: String, probe_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(probe_timeout)
            .user_agent(format!("backend_monitor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MonitorError::Http)?;

        Ok(Self {
            client,
            url,
            timeout: probe_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.health_url(), config.probe_timeout)
    }

    async fn handle_response(
        &self,
        response: Response,
        started: Instant,
    ) -> std::result::Result<ProbeReport, ProbeError> {
        let status = response.status();

        if status.is_success() {
            let latency = started.elapsed();
            let service_status = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body["status"].as_str().map(str::to_string));

            debug!("Health check against {} succeeded in {}ms", self.url, latency.as_millis());

            return Ok(ProbeReport {
                http_status: status.as_u16(),
                latency,
                service_status,
            });
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_retry_after);
                Err(ProbeError::RateLimited { retry_after })
            }
            StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => {
                Err(ProbeError::Unreachable(format!(
                    "Backend unavailable ({}) at {}",
                    status.as_u16(),
                    self.url
                )))
            }
            _ => Err(ProbeError::Http {
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> std::result::Result<ProbeReport, ProbeError> {
        debug!("Performing health check against {}", self.url);
        let started = Instant::now();

        let response = timeout(self.timeout, self.client.get(&self.url).send())
            .await
            .map_err(|_| ProbeError::Timeout)?
            .map_err(|err| {
                let mapped = map_request_error(&err, &self.url);
                warn!("Health check against {} failed: {}", self.url, err);
                mapped
            })?;

        self.handle_response(response, started).await
    }

    fn target(&self) -> &str {
        &self.url
    }
}

fn map_request_error(err: &reqwest::Error, url: &str) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout
    } else if err.is_connect() {
        ProbeError::Unreachable(format!("Cannot reach backend at {}: {}", url, err))
    } else {
        ProbeError::Other(err.to_string())
    }
}
