//! Probe failure kinds and the single classification step that turns a probe
//! outcome into a status verdict.

use crate::status::BackendStatus;
use std::fmt;
use std::time::Duration;

/// Successful health probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub http_status: u16,
    pub latency: Duration,
    /// `status` field of a JSON health body, when the backend sends one
    pub service_status: Option<String>,
}

/// Why a health probe failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Connection refused, DNS failure, or a gateway with nothing behind it
    Unreachable(String),

    /// The probe exceeded its time budget
    Timeout,

    /// The probe was cancelled before completing
    Aborted,

    /// Backend answered 429
    RateLimited { retry_after: Option<Duration> },

    /// Unexpected non-success status
    Http { status: u16 },

    /// Anything else, message kept verbatim
    Other(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Unreachable(msg) => write!(f, "{}", msg),
            ProbeError::Timeout => write!(f, "Health check timed out"),
            ProbeError::Aborted => write!(f, "Health check aborted"),
            ProbeError::RateLimited { retry_after: Some(after) } => {
                write!(f, "Rate limited, retry after {}s", after.as_secs())
            }
            ProbeError::RateLimited { retry_after: None } => {
                write!(f, "Rate limited, please wait before retrying")
            }
            ProbeError::Http { status } => write!(f, "Unexpected response status {}", status),
            ProbeError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Classified result of one probe, consumed by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeVerdict {
    Online,
    Timeout,
    Offline(String),
    Error(String),
    RateLimited(String),
}

impl ProbeVerdict {
    /// Status the prober settles in after applying this verdict.
    pub fn resulting_status(&self) -> BackendStatus {
        match self {
            ProbeVerdict::Online => BackendStatus::Online,
            ProbeVerdict::Timeout => BackendStatus::WakingUp,
            ProbeVerdict::Offline(_) => BackendStatus::Offline,
            ProbeVerdict::Error(_) => BackendStatus::Error,
            ProbeVerdict::RateLimited(_) => BackendStatus::RateLimited,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ProbeVerdict::Online | ProbeVerdict::Timeout => None,
            ProbeVerdict::Offline(detail)
            | ProbeVerdict::Error(detail)
            | ProbeVerdict::RateLimited(detail) => Some(detail),
        }
    }
}

pub fn classify(outcome: &std::result::Result<ProbeReport, ProbeError>) -> ProbeVerdict {
    match outcome {
        Ok(_) => ProbeVerdict::Online,
        Err(ProbeError::Timeout | ProbeError::Aborted) => ProbeVerdict::Timeout,
        Err(err @ ProbeError::Unreachable(_)) => ProbeVerdict::Offline(err.to_string()),
        Err(err @ ProbeError::RateLimited { .. }) => ProbeVerdict::RateLimited(err.to_string()),
        Err(err @ (ProbeError::Http { .. } | ProbeError::Other(_))) => {
            ProbeVerdict::Error(err.to_string())
        }
    }
}

/// Parse a `Retry-After` header given in delta-seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_online() {
        let report = ProbeReport {
            http_status: 200,
            latency: Duration::from_millis(12),
            service_status: Some("ok".to_string()),
        };
        assert_eq!(classify(&Ok(report)), ProbeVerdict::Online);
    }

    #[test]
    fn test_timeout_and_abort_mean_waking_up() {
        assert_eq!(classify(&Err(ProbeError::Timeout)), ProbeVerdict::Timeout);
        assert_eq!(classify(&Err(ProbeError::Aborted)), ProbeVerdict::Timeout);
        assert_eq!(
            ProbeVerdict::Timeout.resulting_status(),
            BackendStatus::WakingUp
        );
    }

    #[test]
    fn test_generic_failure_keeps_message() {
        let verdict = classify(&Err(ProbeError::Other("ECONNREFUSED".to_string())));
        assert_eq!(verdict, ProbeVerdict::Error("ECONNREFUSED".to_string()));
        assert_eq!(verdict.detail(), Some("ECONNREFUSED"));
    }

    #[test]
    fn test_rate_limit_carries_guidance() {
        let verdict = classify(&Err(ProbeError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        }));
        assert_eq!(verdict.resulting_status(), BackendStatus::RateLimited);
        assert!(verdict.detail().unwrap().contains("30s"));
    }

    #[test]
    fn test_unreachable_is_offline() {
        let verdict = classify(&Err(ProbeError::Unreachable(
            "connection refused".to_string(),
        )));
        assert_eq!(verdict.resulting_status(), BackendStatus::Offline);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
