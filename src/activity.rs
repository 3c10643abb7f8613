//! User activity records and the append-only activity logger

use crate::errors::{MonitorError, Result};
use crate::session::UserSession;
use crate::store::ActivityStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Kinds of user action that are recorded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Login,
    Logout,
    Register,
    SubmitQuestion,
    ViewFeedback,
    ExportData,
    ImportCsv,
    SaveTeam,
    UpdateProfile,
    ChangePassword,
    DeleteAccount,
    ViewHistory,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 12] = [
        ActivityKind::Login,
        ActivityKind::Logout,
        ActivityKind::Register,
        ActivityKind::SubmitQuestion,
        ActivityKind::ViewFeedback,
        ActivityKind::ExportData,
        ActivityKind::ImportCsv,
        ActivityKind::SaveTeam,
        ActivityKind::UpdateProfile,
        ActivityKind::ChangePassword,
        ActivityKind::DeleteAccount,
        ActivityKind::ViewHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Login => "login",
            ActivityKind::Logout => "logout",
            ActivityKind::Register => "register",
            ActivityKind::SubmitQuestion => "submit_question",
            ActivityKind::ViewFeedback => "view_feedback",
            ActivityKind::ExportData => "export_data",
            ActivityKind::ImportCsv => "import_csv",
            ActivityKind::SaveTeam => "save_team",
            ActivityKind::UpdateProfile => "update_profile",
            ActivityKind::ChangePassword => "change_password",
            ActivityKind::DeleteAccount => "delete_account",
            ActivityKind::ViewHistory => "view_history",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ActivityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| MonitorError::Validation(format!("unknown activity kind '{}'", s)))
    }
}

/// Client metadata attached to an activity.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ActivityMetadata {
    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = Some(false);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// One recorded user action. Never mutated after it is written.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub user_id: String,
    pub action: ActivityKind,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub success: bool,
}

impl ActivityEntry {
    pub fn new(
        user_id: impl Into<String>,
        action: ActivityKind,
        details: Map<String, Value>,
        metadata: ActivityMetadata,
    ) -> Result<Self> {
        let ip_address = metadata
            .ip_address
            .as_deref()
            .map(parse_ip_address)
            .transpose()?;

        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            action,
            details,
            timestamp: metadata.timestamp.unwrap_or_else(Utc::now),
            ip_address,
            user_agent: metadata.user_agent,
            success: metadata.success.unwrap_or(true),
        })
    }
}

pub(crate) fn parse_ip_address(raw: &str) -> Result<IpAddr> {
    raw.trim()
        .parse::<IpAddr>()
        .map_err(|_| MonitorError::Validation(format!("invalid IP address '{}'", raw)))
}

/// Writes activity entries to a store.
#[derive(Clone)]
pub struct ActivityLogger {
    store: Arc<dyn ActivityStore>,
}

impl ActivityLogger {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ActivityStore> {
        &self.store
    }

    /// Validate and append one activity. Nothing is stored when validation fails.
    #[instrument(skip(self, details, metadata))]
    pub async fn log_activity(
        &self,
        user_id: &str,
        action: &str,
        details: Map<String, Value>,
        metadata: ActivityMetadata,
    ) -> Result<ActivityEntry> {
        let kind = action.parse::<ActivityKind>()?;
        self.log(user_id, kind, details, metadata).await
    }

    pub async fn log(
        &self,
        user_id: &str,
        kind: ActivityKind,
        details: Map<String, Value>,
        metadata: ActivityMetadata,
    ) -> Result<ActivityEntry> {
        let entry = ActivityEntry::new(user_id, kind, details, metadata)?;

        if let Err(e) = self.store.append(&entry).await {
            error!(
                "Failed to persist {} activity for user {}: {}",
                entry.action, entry.user_id, e
            );
            return Err(match e {
                MonitorError::Persistence(msg) => MonitorError::Persistence(msg),
                other => MonitorError::Persistence(other.to_string()),
            });
        }

        debug!("Recorded {} activity {} for user {}", entry.action, entry.id, entry.user_id);
        Ok(entry)
    }

    /// Log an activity on behalf of a live session, filling client metadata
    /// from the session when the caller did not supply it.
    pub async fn log_activity_in_session(
        &self,
        session: &mut UserSession,
        action: &str,
        details: Map<String, Value>,
        mut metadata: ActivityMetadata,
    ) -> Result<ActivityEntry> {
        if metadata.ip_address.is_none() {
            metadata.ip_address = session.ip_address.map(|ip| ip.to_string());
        }
        if metadata.user_agent.is_none() {
            metadata.user_agent = session.user_agent.clone();
        }

        let user_id = session.user_id.clone();
        let entry = self.log_activity(&user_id, action, details, metadata).await?;
        session.record_activity(entry.timestamp);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryActivityStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn details(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl ActivityStore for BrokenStore {
        async fn append(&self, _entry: &ActivityEntry) -> Result<()> {
            Err(MonitorError::Io(std::io::Error::other("disk full")))
        }

        async fn entries_for_user(&self, _user_id: &str) -> Result<Vec<ActivityEntry>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_kind_parsing_accepts_common_spellings() {
        assert_eq!("login".parse::<ActivityKind>().unwrap(), ActivityKind::Login);
        assert_eq!(
            "SUBMIT_QUESTION".parse::<ActivityKind>().unwrap(),
            ActivityKind::SubmitQuestion
        );
        assert_eq!(
            "import-csv".parse::<ActivityKind>().unwrap(),
            ActivityKind::ImportCsv
        );
        assert!("INVALID_KIND".parse::<ActivityKind>().unwrap_err().is_validation());
    }

    #[test]
    fn test_entry_defaults() {
        let entry = ActivityEntry::new(
            "123",
            ActivityKind::ViewFeedback,
            Map::new(),
            ActivityMetadata::default(),
        )
        .unwrap();

        assert!(entry.success);
        assert!(entry.ip_address.is_none());
        assert!(entry.timestamp <= Utc::now());
    }

    #[test]
    fn test_entry_serializes_with_collection_field_names() {
        let entry = ActivityEntry::new(
            "123",
            ActivityKind::SaveTeam,
            details(json!({"team": "Year 11"})),
            ActivityMetadata::default().with_ip("10.0.0.1"),
        )
        .unwrap();

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["userId"], "123");
        assert_eq!(json["action"], "save_team");
        assert_eq!(json["ipAddress"], "10.0.0.1");
        assert_eq!(json["details"]["team"], "Year 11");
    }

    #[tokio::test]
    async fn test_log_activity_persists_entry() {
        let store = Arc::new(MemoryActivityStore::new());
        let logger = ActivityLogger::new(store.clone());

        let entry = logger
            .log_activity(
                "123",
                "submit_question",
                details(json!({"subject": "biology", "marks": 6})),
                ActivityMetadata::default()
                    .with_ip("2001:db8::1")
                    .with_user_agent("Mozilla/5.0"),
            )
            .await
            .unwrap();

        assert_eq!(entry.action, ActivityKind::SubmitQuestion);
        assert_eq!(entry.ip_address.unwrap().to_string(), "2001:db8::1");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_explicit_failure_and_timestamp_are_kept() {
        let store = Arc::new(MemoryActivityStore::new());
        let logger = ActivityLogger::new(store);
        let at = Utc::now() - chrono::Duration::hours(1);

        let entry = logger
            .log_activity("42", "login", Map::new(), ActivityMetadata::default().failed().at(at))
            .await
            .unwrap();

        assert!(!entry.success);
        assert_eq!(entry.timestamp, at);
    }

    #[tokio::test]
    async fn test_invalid_kind_is_rejected_and_not_stored() {
        let store = Arc::new(MemoryActivityStore::new());
        let logger = ActivityLogger::new(store.clone());

        let result = logger
            .log_activity("123", "INVALID_KIND", Map::new(), ActivityMetadata::default())
            .await;

        let err = assert_err!(result);
        assert!(err.is_validation());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_ip_is_rejected_and_not_stored() {
        let store = Arc::new(MemoryActivityStore::new());
        let logger = ActivityLogger::new(store.clone());

        let result = logger
            .log_activity(
                "123",
                "login",
                Map::new(),
                ActivityMetadata::default().with_ip("999.1.1.1"),
            )
            .await;

        assert!(assert_err!(result).is_validation());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced() {
        let logger = ActivityLogger::new(Arc::new(BrokenStore));

        let result = logger
            .log_activity("123", "export_data", Map::new(), ActivityMetadata::default())
            .await;

        let err = assert_err!(result);
        assert!(err.is_persistence());
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_session_activity_inherits_client_metadata() {
        let store = Arc::new(MemoryActivityStore::new());
        let logger = ActivityLogger::new(store.clone());
        let mut session = assert_ok!(UserSession::start(
            "teacher-7",
            ActivityMetadata::default()
                .with_ip("192.168.1.20")
                .with_user_agent("Firefox")
        ));

        let entry = assert_ok!(
            logger
                .log_activity_in_session(
                    &mut session,
                    "view_history",
                    Map::new(),
                    ActivityMetadata::default()
                )
                .await
        );

        assert_eq!(entry.user_id, "teacher-7");
        assert_eq!(entry.ip_address.unwrap().to_string(), "192.168.1.20");
        assert_eq!(entry.user_agent.as_deref(), Some("Firefox"));
        assert_eq!(session.activity_count, 1);
    }
}
