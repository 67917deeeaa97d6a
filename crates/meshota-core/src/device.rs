//! Device identity and the transport-facing device handle

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::manifest::ManifestEntry;

/// Identity attributes used to pick a firmware image for one physical device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Model identifier reported by the device (Zigbee `modelID`)
    pub model_id: String,

    /// Manufacturer code from the device's current image
    pub manufacturer_code: u16,

    /// Manufacturer name reported by the device
    pub manufacturer_name: String,

    /// Image type from the device's current image
    pub image_type: u16,

    /// File version the device is currently running
    pub current_file_version: u32,
}

/// Image header fields a device reports when queried for its current image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    /// Manufacturer code
    pub manufacturer_code: u16,
    /// Image type
    pub image_type: u16,
    /// Running file version
    pub file_version: u32,
}

/// Live handle to a device reachable through the mesh transport
///
/// Implemented by the radio layer. The coordinator only writes chunks in
/// ascending offset order and only calls [`OtaDevice::activate`] after every
/// chunk has been acknowledged.
#[async_trait]
pub trait OtaDevice: Send + Sync {
    /// Unique device identifier (e.g. IEEE address)
    fn device_id(&self) -> &str;

    /// Key used to look up the device's adapter (e.g. the Zigbee model)
    fn device_type(&self) -> &str;

    /// Model identifier reported by the device, if known
    fn model_id(&self) -> Option<&str>;

    /// Manufacturer name reported by the device, if known
    fn manufacturer_name(&self) -> Option<&str>;

    /// Query the image the device is currently running
    async fn query_image(&self) -> Result<ImageInfo, TransportError>;

    /// Write one block of the image at `offset`
    async fn write_chunk(&self, offset: u64, data: &[u8]) -> Result<(), TransportError>;

    /// Ask the device to apply the transferred image and wait for confirmation
    async fn activate(&self, image: &ManifestEntry) -> Result<(), TransportError>;
}
