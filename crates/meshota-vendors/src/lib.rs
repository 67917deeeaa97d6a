//! Built-in vendor adapters for meshota
//!
//! Each module describes one device family: the manifest endpoint its vendor
//! publishes and, where the default heuristic is not enough, the rule used to
//! pick an image. [`register_all`] installs every built-in adapter.

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod catalog;
pub mod model_locked;
pub mod netdragon;

use meshota_core::{AdapterRegistry, OtaError};
use tracing::debug;

pub use catalog::{DeviceDefinition, Endpoint, definitions};
pub use model_locked::ModelLockedAdapter;
pub use netdragon::NetDragonAdapter;

/// Register every built-in adapter under the zigbee models it serves
pub fn register_all(registry: &mut AdapterRegistry) -> Result<(), OtaError> {
    for definition in definitions() {
        registry.register_models(definition.zigbee_models, definition.adapter())?;
        debug!(
            "Registered OTA adapter for {} {} ({:?})",
            definition.vendor, definition.model, definition.zigbee_models
        );
    }
    Ok(())
}

/// Registry with every built-in adapter installed
pub fn default_registry() -> Result<AdapterRegistry, OtaError> {
    let mut registry = AdapterRegistry::new();
    register_all(&mut registry)?;
    Ok(registry)
}
