//! Backend availability state and the snapshot shared through the status mirror

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound of the wake-up progress percentage.
pub const MAX_PROGRESS: u8 = 100;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    #[default]
    Checking,
    Online,
    Offline,
    Error,
    Timeout,
    WakingUp,
    RateLimited,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Checking => "checking",
            BackendStatus::Online => "online",
            BackendStatus::Offline => "offline",
            BackendStatus::Error => "error",
            BackendStatus::Timeout => "timeout",
            BackendStatus::WakingUp => "waking_up",
            BackendStatus::RateLimited => "rate_limited",
        }
    }

    /// States that wait for the next periodic probe or a manual retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackendStatus::Offline | BackendStatus::Error | BackendStatus::RateLimited
        )
    }

    /// Whether the UI should show the persistent status banner.
    pub fn shows_banner(&self) -> bool {
        !matches!(self, BackendStatus::Online)
    }

    /// Banner headline for non-online states.
    pub fn headline(&self) -> &'static str {
        match self {
            BackendStatus::Checking => "Checking backend status...",
            BackendStatus::Online => "Backend online",
            BackendStatus::Offline => "Backend offline",
            BackendStatus::Error => "Backend error",
            BackendStatus::Timeout => "Backend timed out",
            BackendStatus::WakingUp => "Backend is waking up",
            BackendStatus::RateLimited => "Too many requests",
        }
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Banner text for a status, `None` when no banner is shown.
pub fn banner_line(status: BackendStatus, detail: Option<&str>) -> Option<String> {
    if !status.shows_banner() {
        return None;
    }
    Some(match detail {
        Some(detail) => format!("{}: {}", status.headline(), detail),
        None => status.headline().to_string(),
    })
}

/// Local state of one mounted prober.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BackendAvailability {
    pub status: BackendStatus,
    pub detail: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub wakeup_progress: u8,
    pub attempt_count: u32,
}

impl BackendAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress as rendered: held below `display_cap` until the backend is online.
    pub fn display_progress(&self, display_cap: u8) -> u8 {
        match self.status {
            BackendStatus::Online => MAX_PROGRESS,
            BackendStatus::WakingUp => self.wakeup_progress.min(display_cap),
            _ => 0,
        }
    }

    /// Advance the wake-up progress by `step`. Returns false outside `waking_up`.
    pub fn advance_progress(&mut self, step: u8) -> bool {
        if self.status != BackendStatus::WakingUp {
            return false;
        }
        self.wakeup_progress = self.wakeup_progress.saturating_add(step).min(MAX_PROGRESS);
        true
    }

    /// Mirror view of this state. Until the first probe result is applied
    /// there is no check time, so `last_checked` is the moment of the
    /// snapshot; `status` is `checking` in that window.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            last_checked: self.last_checked_at.unwrap_or_else(Utc::now),
            error: self.detail.clone(),
        }
    }
}

/// Shape published to the process-wide status mirror.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: BackendStatus,
    pub last_checked: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&BackendStatus::WakingUp).unwrap(),
            "\"waking_up\""
        );
        assert_eq!(
            serde_json::to_string(&BackendStatus::RateLimited).unwrap(),
            "\"rate_limited\""
        );
        assert_eq!(BackendStatus::Online.to_string(), "online");
    }

    #[test]
    fn test_progress_only_advances_while_waking_up() {
        let mut state = BackendAvailability::new();
        assert!(!state.advance_progress(2));
        assert_eq!(state.wakeup_progress, 0);

        state.status = BackendStatus::WakingUp;
        for _ in 0..60 {
            assert!(state.advance_progress(2));
        }
        assert_eq!(state.wakeup_progress, MAX_PROGRESS);
        assert_eq!(state.display_progress(95), 95);

        state.status = BackendStatus::Online;
        assert_eq!(state.display_progress(95), 100);
    }

    #[test]
    fn test_banner_for_every_status() {
        let all = [
            BackendStatus::Checking,
            BackendStatus::Online,
            BackendStatus::Offline,
            BackendStatus::Error,
            BackendStatus::Timeout,
            BackendStatus::WakingUp,
            BackendStatus::RateLimited,
        ];

        for status in all {
            assert_eq!(status.shows_banner(), status != BackendStatus::Online);
            assert!(!status.headline().is_empty());
            assert_eq!(
                status.is_terminal(),
                matches!(
                    status,
                    BackendStatus::Offline | BackendStatus::Error | BackendStatus::RateLimited
                )
            );
        }

        assert_eq!(BackendStatus::WakingUp.headline(), "Backend is waking up");
        assert_eq!(BackendStatus::RateLimited.headline(), "Too many requests");
        assert_eq!(banner_line(BackendStatus::Online, None), None);
        assert_eq!(
            banner_line(BackendStatus::Offline, Some("Connection refused")).as_deref(),
            Some("Backend offline: Connection refused")
        );
        assert_eq!(
            banner_line(BackendStatus::Checking, None).as_deref(),
            Some("Checking backend status...")
        );
    }

    #[test]
    fn test_snapshot_before_first_check_uses_snapshot_time() {
        let before = Utc::now();
        let snapshot = BackendAvailability::new().snapshot();
        let after = Utc::now();

        assert_eq!(snapshot.status, BackendStatus::Checking);
        assert!(snapshot.last_checked >= before && snapshot.last_checked <= after);
        assert!(snapshot.error.is_none());

        let checked_at = before - chrono::Duration::minutes(3);
        let state = BackendAvailability {
            status: BackendStatus::Online,
            last_checked_at: Some(checked_at),
            ..BackendAvailability::new()
        };
        assert_eq!(state.snapshot().last_checked, checked_at);
    }

    #[test]
    fn test_snapshot_serializes_mirror_shape() {
        let state = BackendAvailability {
            status: BackendStatus::Error,
            detail: Some("ECONNREFUSED".to_string()),
            last_checked_at: Some(Utc::now()),
            wakeup_progress: 0,
            attempt_count: 1,
        };

        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "ECONNREFUSED");
        assert!(json["lastChecked"].is_string());

        let online = BackendAvailability {
            status: BackendStatus::Online,
            ..state
        };
        let json = serde_json::to_value(StatusSnapshot {
            error: None,
            ..online.snapshot()
        })
        .unwrap();
        assert!(json.get("error").is_none());
    }
}
