//! Update session state, progress events and caller handles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, watch};
use uuid::Uuid;

use crate::device::DeviceIdentity;
use crate::error::{FailureReason, OtaError};
use crate::manifest::ManifestEntry;

/// Update session state machine states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UpdateState {
    /// Session accepted, not started yet
    #[default]
    Idle,

    /// Looking up the manifest and picking an image
    Resolving,

    /// Fetching the image
    Downloading,

    /// Checking the image digest
    Verifying,

    /// Writing the image to the device
    Transferring,

    /// Waiting for the device to apply the image
    Committing,

    /// Device confirmed the new image
    Completed,

    /// Session ended without installing the image
    Failed {
        /// Machine-readable cause
        reason: FailureReason,
        /// Human-readable description
        message: String,
    },
}

impl UpdateState {
    /// Whether the session can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Completed | UpdateState::Failed { .. })
    }

    /// Stable lowercase name of the state
    pub fn name(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Resolving => "resolving",
            UpdateState::Downloading => "downloading",
            UpdateState::Verifying => "verifying",
            UpdateState::Transferring => "transferring",
            UpdateState::Committing => "committing",
            UpdateState::Completed => "completed",
            UpdateState::Failed { .. } => "failed",
        }
    }

    /// Failure cause, if the session failed
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            UpdateState::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub(crate) fn failed(error: &OtaError) -> Self {
        UpdateState::Failed {
            reason: error.reason(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateState::Failed { reason, message } => write!(f, "failed ({reason}): {message}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Phases that report byte progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    /// Image download
    Downloading,
    /// Chunked write to the device
    Transferring,
}

/// Progress event emitted at chunk boundaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProgress {
    /// Session the event belongs to
    pub session_id: Uuid,

    /// Device being updated
    pub device_id: String,

    /// Phase being reported
    pub phase: UpdatePhase,

    /// Cumulative bytes done in this phase
    pub bytes: u64,

    /// Total bytes expected in this phase
    pub total_bytes: u64,
}

impl UpdateProgress {
    /// Completion of the phase as a percentage (0-100)
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = self.bytes.saturating_mul(100) / self.total_bytes;
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

/// Caller-supplied progress observer
pub type ProgressCallback = Box<dyn FnMut(UpdateProgress) + Send + 'static>;

/// Snapshot of one update attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateSession {
    /// Unique session identifier
    pub session_id: Uuid,

    /// Device being updated
    pub device_id: String,

    /// Device identity, known once resolving has described the device
    pub device: Option<DeviceIdentity>,

    /// Image being installed, known once resolving picked one
    pub candidate: Option<ManifestEntry>,

    /// Current state
    pub state: UpdateState,

    /// Image bytes received so far
    pub bytes_downloaded: u64,

    /// Image bytes acknowledged by the device
    pub bytes_transferred: u64,

    /// Error that failed the session
    #[serde(skip)]
    pub error: Option<OtaError>,

    /// When the session was accepted
    pub started_at: DateTime<Utc>,

    /// When the session last changed
    pub updated_at: DateTime<Utc>,
}

impl UpdateSession {
    pub(crate) fn new(session_id: Uuid, device_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            device_id: device_id.into(),
            device: None,
            candidate: None,
            state: UpdateState::Idle,
            bytes_downloaded: 0,
            bytes_transferred: 0,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Whether the session ended
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Cooperative cancellation flag shared by a handle and its session task
#[derive(Debug, Default)]
pub(crate) struct CancelSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub(crate) fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called
    pub(crate) async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Caller's view of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    device_id: String,
    state_rx: watch::Receiver<UpdateSession>,
    cancel: Arc<CancelSignal>,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: Uuid,
        device_id: String,
        state_rx: watch::Receiver<UpdateSession>,
        cancel: Arc<CancelSignal>,
    ) -> Self {
        Self {
            session_id,
            device_id,
            state_rx,
            cancel,
        }
    }

    /// Session identifier
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Device the session updates
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Latest session snapshot
    pub fn snapshot(&self) -> UpdateSession {
        self.state_rx.borrow().clone()
    }

    /// Wait until the session reaches `Completed` or `Failed`
    pub async fn wait(&self) -> UpdateSession {
        let mut rx = self.state_rx.clone();
        if let Ok(session) = rx.wait_for(UpdateSession::is_terminal).await {
            return session.clone();
        }
        // The session task is gone; its last published snapshot is final.
        rx.borrow().clone()
    }

    pub(crate) fn signal_cancel(&self) {
        self.cancel.cancel();
    }
}
