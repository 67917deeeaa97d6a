//! Error types for OTA orchestration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Machine-readable reason attached to every failed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Manifest endpoint could not be reached
    FetchError,
    /// Manifest content was malformed
    ParseError,
    /// No manifest entry is eligible for the device
    NoImageAvailable,
    /// The device already runs the candidate version or newer
    NoUpdateNeeded,
    /// Image download failed or had the wrong size
    DownloadFailed,
    /// Downloaded image did not match the manifest checksum
    IntegrityFailure,
    /// Chunked write to the device failed
    TransferFailed,
    /// Device did not confirm activation in time
    ActivationTimeout,
    /// Another session is active for the device
    SessionInUse,
    /// Session was cancelled by the caller
    Cancelled,
    /// No adapter is registered for the device type
    UnknownDeviceType,
    /// An adapter is already registered for the device type
    DuplicateAdapter,
    /// Device identity could not be queried
    DeviceError,
    /// Invalid configuration
    ConfigError,
}

impl FailureReason {
    /// Stable snake_case identifier, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::FetchError => "fetch_error",
            FailureReason::ParseError => "parse_error",
            FailureReason::NoImageAvailable => "no_image_available",
            FailureReason::NoUpdateNeeded => "no_update_needed",
            FailureReason::DownloadFailed => "download_failed",
            FailureReason::IntegrityFailure => "integrity_failure",
            FailureReason::TransferFailed => "transfer_failed",
            FailureReason::ActivationTimeout => "activation_timeout",
            FailureReason::SessionInUse => "session_in_use",
            FailureReason::Cancelled => "cancelled",
            FailureReason::UnknownDeviceType => "unknown_device_type",
            FailureReason::DuplicateAdapter => "duplicate_adapter",
            FailureReason::DeviceError => "device_error",
            FailureReason::ConfigError => "config_error",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while resolving or delivering a firmware update
///
/// The type is `Clone` so a single manifest fetch result can be handed to
/// every requester coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// Network or transport failure talking to a manifest endpoint
    #[error("Failed to fetch manifest from {url}: {message}")]
    Fetch {
        /// Manifest URL
        url: String,
        /// Underlying failure
        message: String,
    },

    /// Manifest body could not be decoded
    #[error("Malformed manifest from {url}: {message}")]
    Parse {
        /// Manifest URL
        url: String,
        /// Decoder message
        message: String,
    },

    /// No manifest entry matches the device
    #[error(
        "No image available for imageType {image_type} (manufacturer {manufacturer_code:#06x}, model '{model_id}')"
    )]
    NoImageAvailable {
        /// Device image type
        image_type: u16,
        /// Device manufacturer code
        manufacturer_code: u16,
        /// Device model identifier
        model_id: String,
    },

    /// Candidate is not newer than the running firmware
    #[error("No update needed: device runs {current}, newest available is {available}")]
    NoUpdateNeeded {
        /// Version currently running on the device
        current: u32,
        /// Version offered by the manifest
        available: u32,
    },

    /// Image download failed after all retries
    #[error("Image download failed: {0}")]
    DownloadFailed(String),

    /// Image digest mismatch
    #[error("Image integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure {
        /// Digest declared by the manifest
        expected: String,
        /// Digest computed over the downloaded bytes
        actual: String,
    },

    /// Device transfer failed after all retries
    #[error("Transfer to device failed: {0}")]
    TransferFailed(String),

    /// Device did not confirm activation
    #[error("Device did not confirm activation within {0:?}")]
    ActivationTimeout(Duration),

    /// A non-terminal session already exists for the device
    #[error("Update session already in progress for device: {0}")]
    SessionInUse(String),

    /// Session cancelled by the caller
    #[error("Update cancelled")]
    Cancelled,

    /// No adapter registered for this device type
    #[error("No OTA adapter registered for device type: {0}")]
    UnknownDeviceType(String),

    /// Adapter already registered for this device type
    #[error("OTA adapter already registered for device type: {0}")]
    DuplicateAdapter(String),

    /// Device handle failed to report its identity
    #[error("Device error: {0}")]
    Device(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl OtaError {
    /// Machine-readable classification of this error
    pub fn reason(&self) -> FailureReason {
        match self {
            OtaError::Fetch { .. } => FailureReason::FetchError,
            OtaError::Parse { .. } => FailureReason::ParseError,
            OtaError::NoImageAvailable { .. } => FailureReason::NoImageAvailable,
            OtaError::NoUpdateNeeded { .. } => FailureReason::NoUpdateNeeded,
            OtaError::DownloadFailed(_) => FailureReason::DownloadFailed,
            OtaError::IntegrityFailure { .. } => FailureReason::IntegrityFailure,
            OtaError::TransferFailed(_) => FailureReason::TransferFailed,
            OtaError::ActivationTimeout(_) => FailureReason::ActivationTimeout,
            OtaError::SessionInUse(_) => FailureReason::SessionInUse,
            OtaError::Cancelled => FailureReason::Cancelled,
            OtaError::UnknownDeviceType(_) => FailureReason::UnknownDeviceType,
            OtaError::DuplicateAdapter(_) => FailureReason::DuplicateAdapter,
            OtaError::Device(_) => FailureReason::DeviceError,
            OtaError::Config(_) => FailureReason::ConfigError,
        }
    }

    /// Whether the core may retry the failed step on its own
    ///
    /// Only download and transfer steps are retried, and only inside the
    /// coordinator's bounded retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OtaError::Fetch { .. } | OtaError::DownloadFailed(_) | OtaError::TransferFailed(_)
        )
    }
}

/// Errors reported by a device transport while writing or activating an image
#[derive(Error, Debug)]
pub enum TransportError {
    /// Device left the network; never retried
    #[error("Device disconnected")]
    Disconnected,

    /// Device rejected a block
    #[error("Device rejected block: {0}")]
    Nack(String),

    /// Any other transport failure
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl TransportError {
    /// Whether a chunk write that failed with this error may be re-sent
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Disconnected)
    }
}
