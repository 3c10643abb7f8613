//! Backend Availability Monitor Library
//!
//! Components for watching whether the grading backend is reachable (with
//! wake-up polling for sleeping backends) and for recording user activity.

pub mod config;
pub mod errors;
pub mod status;
pub mod classify;
pub mod transport;
pub mod mirror;
pub mod machine;
pub mod checker;
pub mod activity;
pub mod session;
pub mod store;

pub use config::Config;
pub use checker::BackendStatusChecker;
pub use classify::{classify, ProbeError, ProbeReport, ProbeVerdict};
pub use mirror::StatusMirror;
pub use status::{banner_line, BackendAvailability, BackendStatus, StatusSnapshot};
pub use transport::{HealthProbe, HttpHealthProbe};
pub use activity::{ActivityEntry, ActivityKind, ActivityLogger, ActivityMetadata};
pub use session::UserSession;
pub use store::{ActivityStore, JsonLinesActivityStore, MemoryActivityStore};
pub use errors::{MonitorError, Result};
