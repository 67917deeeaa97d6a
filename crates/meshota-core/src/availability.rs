//! Update availability verdicts

use serde::{Deserialize, Serialize};

use crate::device::DeviceIdentity;
use crate::manifest::ManifestEntry;

/// Outcome of comparing a device against the selected candidate image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
    /// The device runs the candidate version or a newer one
    UpToDate,
    /// The candidate is newer than the running firmware
    UpdateAvailable(ManifestEntry),
    /// No manifest entry matched the device
    NoImage,
}

impl Availability {
    /// Whether an update should be offered
    pub fn is_update_available(&self) -> bool {
        matches!(self, Availability::UpdateAvailable(_))
    }

    /// The candidate image, when an update is available
    pub fn candidate(&self) -> Option<&ManifestEntry> {
        match self {
            Availability::UpdateAvailable(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Decide whether `candidate` is an update for `device`
///
/// Versions are compared as unsigned integers. An older or equal candidate is
/// never offered; downgrades are not part of this path.
pub fn evaluate(device: &DeviceIdentity, candidate: Option<&ManifestEntry>) -> Availability {
    match candidate {
        None => Availability::NoImage,
        Some(entry) if entry.file_version > device.current_file_version => {
            Availability::UpdateAvailable(entry.clone())
        }
        Some(_) => Availability::UpToDate,
    }
}
