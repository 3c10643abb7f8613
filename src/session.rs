//! User sessions

use crate::activity::{parse_ip_address, ActivityMetadata};
use crate::errors::Result;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub activity_count: u64,
}

impl UserSession {
    /// Open a session. `metadata.timestamp` overrides the start time.
    pub fn start(user_id: impl Into<String>, metadata: ActivityMetadata) -> Result<Self> {
        let ip_address = metadata
            .ip_address
            .as_deref()
            .map(parse_ip_address)
            .transpose()?;
        let started_at = metadata.timestamp.unwrap_or_else(Utc::now);

        Ok(Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            started_at,
            last_active_at: started_at,
            ended_at: None,
            ip_address,
            user_agent: metadata.user_agent,
            activity_count: 0,
        })
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Count an activity. Ignored once the session has ended.
    pub fn record_activity(&mut self, at: DateTime<Utc>) {
        if !self.is_active() {
            return;
        }
        self.activity_count += 1;
        if at > self.last_active_at {
            self.last_active_at = at;
        }
    }

    /// Close the session; the first end time wins.
    pub fn end(&mut self, at: DateTime<Utc>) {
        if self.ended_at.is_none() {
            self.ended_at = Some(at.max(self.started_at));
        }
    }

    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        self.is_active() && now - self.last_active_at >= idle_timeout
    }
}
