//! Over-the-air firmware update orchestration for mesh devices
//!
//! This crate discovers, selects and delivers firmware images to
//! resource-constrained wireless devices:
//! - Vendor manifest fetching with a TTL cache, coalesced requests and
//!   stale fallback
//! - Deterministic image selection with per-vendor overrides
//! - Integrity-checked, chunked transfers with bounded retries
//! - Cooperative cancellation and non-blocking progress reporting
//!
//! # Architecture
//!
//! - [`store`]: Manifest cache keyed by endpoint URL
//! - [`source`]: Manifest transports (HTTP and `file://`)
//! - [`selector`]: Default image selection heuristic
//! - [`availability`]: Update/up-to-date verdicts
//! - [`registry`]: Vendor adapter contract and lookup
//! - [`coordinator`]: Update session state machine
//! - [`download`]: Streamed image download
//! - [`session`]: Session snapshots, progress and handles
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```ignore
//! use meshota_core::prelude::*;
//!
//! # async fn example(registry: AdapterRegistry, device: Arc<dyn OtaDevice>) -> Result<(), OtaError> {
//! let coordinator = OtaCoordinator::from_config(registry, &OtaConfig::default()).await?;
//!
//! if coordinator.check_availability(device.as_ref()).await?.is_update_available() {
//!     let handle = coordinator.request_update(device, None)?;
//!     let session = handle.wait().await;
//!     println!("Update finished: {}", session.state);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod availability;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod download;
pub mod error;
pub mod manifest;
pub mod prelude;
pub mod registry;
pub mod selector;
pub mod session;
pub mod source;
pub mod store;

pub use availability::{Availability, evaluate};
pub use config::{ManifestStoreConfig, OtaConfig, TransferConfig};
pub use coordinator::OtaCoordinator;
pub use device::{DeviceIdentity, ImageInfo, OtaDevice};
pub use error::{FailureReason, OtaError, TransportError};
pub use manifest::{Checksum, ChecksumAlgorithm, Manifest, ManifestEntry};
pub use registry::{AdapterRegistry, OtaAdapter};
pub use session::{SessionHandle, UpdatePhase, UpdateProgress, UpdateSession, UpdateState};
pub use store::{ManifestLookup, ManifestStore};
