//! Static descriptions of supported device types

use serde::Serialize;
use std::sync::Arc;

use meshota_core::OtaAdapter;

use crate::netdragon;

/// A device endpoint exposed under a name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Name used by the catalog (e.g. `l1`)
    pub name: &'static str,
    /// Zigbee endpoint id
    pub id: u8,
}

/// One supported device type
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDefinition {
    /// Model ids the device reports over Zigbee
    pub zigbee_models: &'static [&'static str],
    /// Catalog model name
    pub model: &'static str,
    /// Vendor name
    pub vendor: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Named endpoints
    pub endpoints: &'static [Endpoint],
    /// Builds the adapter serving this device type
    #[serde(skip)]
    pub make_adapter: fn() -> Arc<dyn OtaAdapter>,
}

impl DeviceDefinition {
    /// Adapter serving this device type
    pub fn adapter(&self) -> Arc<dyn OtaAdapter> {
        (self.make_adapter)()
    }

    /// Zigbee endpoint id behind `name`
    pub fn endpoint(&self, name: &str) -> Option<u8> {
        self.endpoints.iter().find(|e| e.name == name).map(|e| e.id)
    }
}

/// Every built-in device definition
pub fn definitions() -> Vec<DeviceDefinition> {
    vec![netdragon::definition()]
}

/// Definition serving `zigbee_model`
pub fn find(zigbee_model: &str) -> Option<DeviceDefinition> {
    definitions()
        .into_iter()
        .find(|d| d.zigbee_models.contains(&zigbee_model))
}
