//! Process-wide status mirror
//!
//! A single last-writer-wins slot holding the most recent [`StatusSnapshot`].
//! Any number of readers may look at it; only the attached [`MirrorWriter`]
//! (owned by a mounted checker) publishes into it.

use crate::errors::{MonitorError, Result};
use crate::status::StatusSnapshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::debug;

static GLOBAL_MIRROR: OnceLock<StatusMirror> = OnceLock::new();

#[derive(Debug)]
struct MirrorSlot {
    tx: watch::Sender<Option<StatusSnapshot>>,
    writer_attached: AtomicBool,
}

/// Read handle to a status slot. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusMirror {
    slot: Arc<MirrorSlot>,
}

impl Default for StatusMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMirror {
    /// Create an isolated mirror
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            slot: Arc::new(MirrorSlot {
                tx,
                writer_attached: AtomicBool::new(false),
            }),
        }
    }

    /// The mirror shared by the whole process
    pub fn global() -> StatusMirror {
        GLOBAL_MIRROR.get_or_init(StatusMirror::new).clone()
    }

    /// Latest published snapshot, if any prober has published yet
    pub fn latest(&self) -> Option<StatusSnapshot> {
        self.slot.tx.borrow().clone()
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<Option<StatusSnapshot>> {
        self.slot.tx.subscribe()
    }

    pub fn has_writer(&self) -> bool {
        self.slot.writer_attached.load(Ordering::Acquire)
    }

    /// Claim the single writer slot.
    pub fn attach(&self) -> Result<MirrorWriter> {
        if self
            .slot
            .writer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MonitorError::Mirror(
                "status mirror already has an active writer".to_string(),
            ));
        }

        debug!("Status mirror writer attached");
        Ok(MirrorWriter {
            slot: Arc::clone(&self.slot),
        })
    }
}

/// Exclusive writer; detaches on drop, leaving the last snapshot readable.
#[derive(Debug)]
pub struct MirrorWriter {
    slot: Arc<MirrorSlot>,
}

impl MirrorWriter {
    pub(crate) fn publish(&self, snapshot: StatusSnapshot) {
        self.slot.tx.send_replace(Some(snapshot));
    }
}

impl Drop for MirrorWriter {
    fn drop(&mut self) {
        self.slot.writer_attached.store(false, Ordering::Release);
        debug!("Status mirror writer detached");
    }
}
