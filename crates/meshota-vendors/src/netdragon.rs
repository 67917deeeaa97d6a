//! NetDragon devices
//!
//! NetDragon publishes a Zigbee 3.0 OTA index per product line. The index uses
//! the common manifest layout with the digest under `sha512`, and entries are
//! disambiguated by the default rules.

use async_trait::async_trait;
use std::sync::Arc;

use meshota_core::OtaAdapter;

use crate::catalog::{DeviceDefinition, Endpoint};

/// OTA index for the NetDragon Zigbee 3.0 switch line
pub const MANIFEST_URL: &str =
    "http://betacs.101.com/v0.1/static/preproduction_content_ndcast_ota/ota/z3/5678-1234/5678-1234.json";

/// Zigbee model reported by the CL QYH D5 light switch
pub const SWITCH_ZIGBEE_MODEL: &str = "ND.IoT.SW.4in1";

const SWITCH_ENDPOINTS: &[Endpoint] = &[
    Endpoint { name: "l1", id: 1 },
    Endpoint { name: "l2", id: 2 },
    Endpoint { name: "l3", id: 3 },
    Endpoint { name: "l4", id: 4 },
];

/// Adapter for NetDragon devices
#[derive(Debug, Clone)]
pub struct NetDragonAdapter {
    manifest_url: String,
}

impl NetDragonAdapter {
    /// Adapter using the production index
    pub fn new() -> Self {
        Self::with_url(MANIFEST_URL)
    }

    /// Adapter using another index, e.g. a local mirror
    pub fn with_url(manifest_url: impl Into<String>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
        }
    }
}

impl Default for NetDragonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OtaAdapter for NetDragonAdapter {
    fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    fn name(&self) -> &str {
        "netdragon"
    }
}

fn default_adapter() -> Arc<dyn OtaAdapter> {
    Arc::new(NetDragonAdapter::new())
}

/// Catalog entry for the four-gang light switch
pub fn definition() -> DeviceDefinition {
    DeviceDefinition {
        zigbee_models: &[SWITCH_ZIGBEE_MODEL],
        model: "CLQYHD5SW01",
        vendor: "NetDragon",
        description: "NetDragon light switch for CL QYH D5",
        endpoints: SWITCH_ENDPOINTS,
        make_adapter: default_adapter,
    }
}
