//! Convenience re-exports for common OTA types

pub use std::sync::Arc;

pub use crate::availability::{Availability, evaluate};
pub use crate::config::{ManifestStoreConfig, OtaConfig, TransferConfig};
pub use crate::coordinator::OtaCoordinator;
pub use crate::device::{DeviceIdentity, ImageInfo, OtaDevice};
pub use crate::download::{HttpImageDownloader, ImageDownloader, ImageStream};
pub use crate::error::{FailureReason, OtaError, TransportError};
pub use crate::manifest::{Checksum, Manifest, ManifestEntry};
pub use crate::registry::{AdapterRegistry, OtaAdapter};
pub use crate::selector::{is_eligible, select};
pub use crate::session::{
    ProgressCallback, SessionHandle, UpdatePhase, UpdateProgress, UpdateSession, UpdateState,
};
pub use crate::source::{HttpManifestSource, ManifestSource};
pub use crate::store::{ManifestLookup, ManifestStore};
