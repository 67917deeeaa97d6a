//! Transfer coordinator
//!
//! The coordinator owns the per-device session table and drives each accepted
//! session through resolve, download, verify, transfer and commit on its own
//! tokio task. At most one non-terminal session exists per device id.

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::availability::{Availability, evaluate};
use crate::config::{OtaConfig, TransferConfig};
use crate::device::{DeviceIdentity, OtaDevice};
use crate::download::{HttpImageDownloader, ImageDownloader};
use crate::error::{OtaError, TransportError};
use crate::manifest::{Checksum, ManifestEntry};
use crate::registry::{AdapterRegistry, OtaAdapter};
use crate::session::{
    CancelSignal, ProgressCallback, SessionHandle, UpdatePhase, UpdateProgress, UpdateSession,
    UpdateState,
};
use crate::source::HttpManifestSource;
use crate::store::ManifestStore;

/// Upper bound on the buffer reserved up front for a download
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Capacity of the process-wide progress broadcast
const PROGRESS_BROADCAST_CAPACITY: usize = 1024;

/// How long a finished session waits for its progress callback to catch up
const PROGRESS_DRAIN_GRACE: Duration = Duration::from_millis(100);

struct ActiveSession {
    session_id: Uuid,
    cancel: Arc<CancelSignal>,
    state_rx: watch::Receiver<UpdateSession>,
}

struct Inner {
    registry: AdapterRegistry,
    store: Arc<ManifestStore>,
    downloader: Arc<dyn ImageDownloader>,
    config: TransferConfig,
    sessions: Mutex<HashMap<String, ActiveSession>>,
    progress_tx: broadcast::Sender<UpdateProgress>,
}

/// Entry point for availability checks and update sessions
#[derive(Clone)]
pub struct OtaCoordinator {
    inner: Arc<Inner>,
}

impl OtaCoordinator {
    /// Create a coordinator from its collaborators
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<ManifestStore>,
        downloader: Arc<dyn ImageDownloader>,
        config: TransferConfig,
    ) -> Result<Self, OtaError> {
        config.validate()?;
        let (progress_tx, _) = broadcast::channel(PROGRESS_BROADCAST_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                store,
                downloader,
                config,
                sessions: Mutex::new(HashMap::new()),
                progress_tx,
            }),
        })
    }

    /// Create a coordinator using HTTP manifest and image transports
    pub async fn from_config(registry: AdapterRegistry, config: &OtaConfig) -> Result<Self, OtaError> {
        config.validate()?;
        let source = HttpManifestSource::new(&config.manifest)?;
        let store = ManifestStore::open(Arc::new(source), config.manifest.clone()).await?;
        let downloader = HttpImageDownloader::new(
            config.transfer.download_timeout,
            &config.manifest.user_agent,
        )?;
        Self::new(
            registry,
            Arc::new(store),
            Arc::new(downloader),
            config.transfer.clone(),
        )
    }

    /// Adapter registry in use
    pub fn registry(&self) -> &AdapterRegistry {
        &self.inner.registry
    }

    /// Manifest store in use
    pub fn store(&self) -> &Arc<ManifestStore> {
        &self.inner.store
    }

    /// Decide whether `device` has an update available
    ///
    /// # Errors
    ///
    /// Fails when the device type has no adapter, the device cannot be
    /// described, or no manifest (fresh or stale) can be obtained.
    pub async fn check_availability(&self, device: &dyn OtaDevice) -> Result<Availability, OtaError> {
        let adapter = self.inner.registry.get(device.device_type())?;
        let identity = adapter.describe(device).await?;
        let (verdict, _) = self.inner.resolve(adapter.as_ref(), &identity).await?;
        info!(
            device = device.device_id(),
            current = identity.current_file_version,
            "Availability: {:?}",
            verdict.candidate().map(|e| e.file_version)
        );
        Ok(verdict)
    }

    /// Start an update session for `device`
    ///
    /// The session runs in the background; use the returned handle to
    /// follow, wait for or cancel it. `on_progress` is invoked from a
    /// separate task and never delays the transfer. A callback that keeps up
    /// sees every event before the final state is published; a slow one is
    /// given a short grace period and then left to finish on its own.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::UnknownDeviceType`] when no adapter is registered
    /// and [`OtaError::SessionInUse`] when the device already has an active
    /// session.
    pub fn request_update(
        &self,
        device: Arc<dyn OtaDevice>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<SessionHandle, OtaError> {
        let adapter = self.inner.registry.get(device.device_type())?;
        let device_id = device.device_id().to_string();
        let session_id = Uuid::new_v4();
        let cancel = Arc::new(CancelSignal::default());
        let (state_tx, state_rx) = watch::channel(UpdateSession::new(session_id, &device_id));

        {
            let mut sessions = self.inner.sessions.lock();
            if sessions.contains_key(&device_id) {
                warn!("Rejected update for {}: session already active", device_id);
                return Err(OtaError::SessionInUse(device_id));
            }
            sessions.insert(
                device_id.clone(),
                ActiveSession {
                    session_id,
                    cancel: cancel.clone(),
                    state_rx: state_rx.clone(),
                },
            );
        }

        info!("Accepted update session {} for device {}", session_id, device_id);

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = on_progress.map(|callback| tokio::spawn(forward_progress(progress_rx, callback)));

        let run = SessionRun {
            inner: self.inner.clone(),
            adapter,
            device,
            session_id,
            device_id: device_id.clone(),
            state_tx,
            cancel: cancel.clone(),
            progress_tx: Some(progress_tx),
            reported_download: 0,
        };
        let span = info_span!("ota_session", device = %device_id, session = %session_id);
        tokio::spawn(run.execute(forwarder).instrument(span));

        Ok(SessionHandle::new(session_id, device_id, state_rx, cancel))
    }

    /// Request cancellation of the session behind `handle`
    ///
    /// Returns `false` when the session already ended.
    pub fn cancel(&self, handle: &SessionHandle) -> bool {
        let sessions = self.inner.sessions.lock();
        match sessions.get(handle.device_id()) {
            Some(active) if active.session_id == handle.session_id() => {
                info!("Cancelling update session {}", handle.session_id());
                handle.signal_cancel();
                true
            }
            _ => false,
        }
    }

    /// Request cancellation of whatever session is active for `device_id`
    pub fn cancel_device(&self, device_id: &str) -> bool {
        let sessions = self.inner.sessions.lock();
        match sessions.get(device_id) {
            Some(active) => {
                info!("Cancelling update session {}", active.session_id);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Current snapshot of the session behind `handle`
    pub fn session_status(&self, handle: &SessionHandle) -> UpdateSession {
        handle.snapshot()
    }

    /// Current snapshot of the active session for `device_id`, if any
    pub fn device_status(&self, device_id: &str) -> Option<UpdateSession> {
        let sessions = self.inner.sessions.lock();
        sessions
            .get(device_id)
            .map(|active| active.state_rx.borrow().clone())
    }

    /// Devices with a non-terminal session, sorted
    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Subscribe to progress events of every session
    pub fn subscribe_progress(&self) -> broadcast::Receiver<UpdateProgress> {
        self.inner.progress_tx.subscribe()
    }
}

impl Inner {
    async fn resolve(
        &self,
        adapter: &dyn OtaAdapter,
        identity: &DeviceIdentity,
    ) -> Result<(Availability, Option<ManifestEntry>), OtaError> {
        let lookup = self.store.get_manifest(adapter.manifest_url()).await?;
        if let Some(stale) = &lookup.stale {
            warn!("Resolving against stale manifest {}: {}", lookup.manifest.source_url, stale);
        }
        let candidate = adapter.select(&lookup.manifest, identity).cloned();
        Ok((evaluate(identity, candidate.as_ref()), candidate))
    }
}

async fn forward_progress(mut rx: mpsc::UnboundedReceiver<UpdateProgress>, mut callback: ProgressCallback) {
    while let Some(progress) = rx.recv().await {
        callback(progress);
    }
}

/// State owned by one session task
struct SessionRun {
    inner: Arc<Inner>,
    adapter: Arc<dyn OtaAdapter>,
    device: Arc<dyn OtaDevice>,
    session_id: Uuid,
    device_id: String,
    state_tx: watch::Sender<UpdateSession>,
    cancel: Arc<CancelSignal>,
    progress_tx: Option<mpsc::UnboundedSender<UpdateProgress>>,
    /// Highest download byte count reported so far, across attempts
    reported_download: u64,
}

impl SessionRun {
    async fn execute(mut self, forwarder: Option<tokio::task::JoinHandle<()>>) {
        let outcome = self.run().await;

        {
            let mut sessions = self.inner.sessions.lock();
            if sessions
                .get(&self.device_id)
                .is_some_and(|active| active.session_id == self.session_id)
            {
                sessions.remove(&self.device_id);
            }
        }

        // Closing the channel lets the forwarder drain the remaining events in
        // order; a callback slower than the grace period keeps running detached.
        self.progress_tx = None;
        if let Some(forwarder) = forwarder {
            match tokio::time::timeout(PROGRESS_DRAIN_GRACE, forwarder).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Progress callback task ended abnormally: {}", e),
                Err(_elapsed) => debug!(
                    "Progress callback still busy after {:?}; publishing final state",
                    PROGRESS_DRAIN_GRACE
                ),
            }
        }

        match outcome {
            Ok(()) => {
                info!("Update session completed for device {}", self.device_id);
                self.transition(UpdateState::Completed);
            }
            Err(e) => {
                error!(reason = %e.reason(), "Update session failed for device {}: {}", self.device_id, e);
                let state = UpdateState::failed(&e);
                self.state_tx.send_modify(|s| {
                    s.state = state;
                    s.error = Some(e);
                    s.updated_at = chrono::Utc::now();
                });
            }
        }
    }

    async fn run(&mut self) -> Result<(), OtaError> {
        self.transition(UpdateState::Resolving);
        let identity = self.adapter.describe(self.device.as_ref()).await?;
        self.state_tx.send_modify(|s| s.device = Some(identity.clone()));

        let (verdict, candidate) = self
            .inner
            .resolve(self.adapter.as_ref(), &identity)
            .await?;
        let entry = match verdict {
            Availability::UpdateAvailable(entry) => entry,
            Availability::UpToDate => {
                return Err(OtaError::NoUpdateNeeded {
                    current: identity.current_file_version,
                    available: candidate.map_or(identity.current_file_version, |c| c.file_version),
                });
            }
            Availability::NoImage => {
                return Err(OtaError::NoImageAvailable {
                    image_type: identity.image_type,
                    manufacturer_code: identity.manufacturer_code,
                    model_id: identity.model_id.clone(),
                });
            }
        };
        info!(
            "Updating {} from {} to {} ({} bytes)",
            self.device_id, identity.current_file_version, entry.file_version, entry.file_size
        );
        self.state_tx.send_modify(|s| s.candidate = Some(entry.clone()));
        self.check_cancelled()?;

        self.transition(UpdateState::Downloading);
        let image = self.download(&entry).await?;

        self.transition(UpdateState::Verifying);
        verify_image(&entry, image.as_slice())?;
        debug!("Image digest verified");

        self.transition(UpdateState::Transferring);
        self.transfer(&image).await?;
        drop(image);

        self.check_cancelled()?;
        self.transition(UpdateState::Committing);
        self.commit(&entry).await
    }

    async fn download(&mut self, entry: &ManifestEntry) -> Result<Vec<u8>, OtaError> {
        let retries = self.inner.config.download_retries;
        let limit = self.inner.config.download_timeout;
        let mut attempt = 0u32;
        loop {
            self.check_cancelled()?;
            let result = tokio::time::timeout(limit, self.download_once(entry))
                .await
                .unwrap_or_else(|_elapsed| {
                    Err(OtaError::DownloadFailed(format!("timed out after {limit:?}")))
                });

            match result {
                Ok(image) => return Ok(image),
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt = attempt.saturating_add(1);
                    warn!("Download attempt {} of {} failed: {}", attempt, retries.saturating_add(1), e);
                    self.backoff(attempt).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn download_once(&mut self, entry: &ManifestEntry) -> Result<Vec<u8>, OtaError> {
        let mut stream = self.inner.downloader.open(&entry.url).await?;
        let capacity = usize::try_from(entry.file_size.min(MAX_PREALLOCATION)).unwrap_or(0);
        let mut image = Vec::with_capacity(capacity);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            image.extend_from_slice(&chunk);
            let received = image.len() as u64;
            if received > entry.file_size {
                return Err(OtaError::DownloadFailed(format!(
                    "received more than the declared {} bytes",
                    entry.file_size
                )));
            }
            self.state_tx.send_modify(|s| s.bytes_downloaded = received);
            if received > self.reported_download {
                self.reported_download = received;
                self.report(UpdatePhase::Downloading, received, entry.file_size);
            }
            self.check_cancelled()?;
        }

        let received = image.len() as u64;
        if received != entry.file_size {
            return Err(OtaError::DownloadFailed(format!(
                "size mismatch: expected {} bytes, received {}",
                entry.file_size, received
            )));
        }
        Ok(image)
    }

    async fn transfer(&mut self, image: &[u8]) -> Result<(), OtaError> {
        let chunk_size = self
            .adapter
            .max_chunk_size()
            .map_or(self.inner.config.chunk_size, |max| max.min(self.inner.config.chunk_size))
            .max(1);
        let total = image.len() as u64;
        debug!("Transferring {} bytes in blocks of {}", total, chunk_size);

        let mut offset = 0u64;
        for chunk in image.chunks(chunk_size) {
            self.check_cancelled()?;
            self.write_chunk(offset, chunk).await?;
            offset = offset.saturating_add(chunk.len() as u64);
            self.state_tx.send_modify(|s| s.bytes_transferred = offset);
            self.report(UpdatePhase::Transferring, offset, total);
        }
        Ok(())
    }

    async fn write_chunk(&self, offset: u64, chunk: &[u8]) -> Result<(), OtaError> {
        let retries = self.inner.config.chunk_retries;
        let mut attempt = 0u32;
        loop {
            match self.device.write_chunk(offset, chunk).await {
                Ok(()) => return Ok(()),
                Err(TransportError::Disconnected) => {
                    return Err(OtaError::TransferFailed(format!(
                        "device disconnected at offset {offset}"
                    )));
                }
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt = attempt.saturating_add(1);
                    warn!("Block at offset {} failed (attempt {}): {}", offset, attempt, e);
                    self.backoff(attempt).await?;
                }
                Err(e) => {
                    return Err(OtaError::TransferFailed(format!(
                        "block at offset {offset} failed after {} attempts: {e}",
                        attempt.saturating_add(1)
                    )));
                }
            }
        }
    }

    async fn commit(&self, entry: &ManifestEntry) -> Result<(), OtaError> {
        let timeout = self.inner.config.activation_timeout;
        match tokio::time::timeout(timeout, self.device.activate(entry)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(OtaError::TransferFailed(format!("activation rejected: {e}"))),
            Err(_) => Err(OtaError::ActivationTimeout(timeout)),
        }
    }

    async fn backoff(&self, attempt: u32) -> Result<(), OtaError> {
        let delay: Duration = self.inner.config.backoff_for(attempt);
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = self.cancel.cancelled() => Err(OtaError::Cancelled),
        }
    }

    fn check_cancelled(&self) -> Result<(), OtaError> {
        if self.cancel.is_cancelled() {
            return Err(OtaError::Cancelled);
        }
        Ok(())
    }

    fn transition(&self, state: UpdateState) {
        info!("Session state -> {}", state.name());
        self.state_tx.send_modify(|s| {
            s.state = state;
            s.updated_at = chrono::Utc::now();
        });
    }

    fn report(&self, phase: UpdatePhase, bytes: u64, total_bytes: u64) {
        let progress = UpdateProgress {
            session_id: self.session_id,
            device_id: self.device_id.clone(),
            phase,
            bytes,
            total_bytes,
        };
        if let Some(tx) = &self.progress_tx
            && tx.send(progress.clone()).is_err()
        {
            debug!("Progress observer went away");
        }
        // No subscribers is not an error.
        if self.inner.progress_tx.send(progress).is_err() {
            debug!("No progress subscribers");
        }
    }
}

/// Check the downloaded image against the manifest digest
fn verify_image(entry: &ManifestEntry, image: &[u8]) -> Result<(), OtaError> {
    let checksum = Checksum::parse(&entry.checksum).map_err(|message| OtaError::IntegrityFailure {
        expected: entry.checksum.clone(),
        actual: format!("unusable manifest checksum: {message}"),
    })?;
    checksum.verify(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ChecksumAlgorithm, compute_digest};

    fn entry(checksum: String) -> ManifestEntry {
        ManifestEntry {
            image_type: 0,
            manufacturer_code: 4107,
            model_id: None,
            manufacturer_name: None,
            file_version: 2,
            file_size: 5,
            url: "file:///dev/null".to_string(),
            checksum,
        }
    }

    #[test]
    fn test_verify_image_accepts_matching_digest() {
        let digest = compute_digest(ChecksumAlgorithm::Sha512, b"image");
        assert!(verify_image(&entry(digest), b"image").is_ok());
    }

    #[test]
    fn test_verify_image_rejects_unusable_checksum() {
        let result = verify_image(&entry("abc".to_string()), b"image");
        assert!(matches!(result, Err(OtaError::IntegrityFailure { .. })));
    }
}
