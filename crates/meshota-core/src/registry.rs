//! Vendor adapter contract and the registry keyed by device type

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::{DeviceIdentity, OtaDevice};
use crate::error::OtaError;
use crate::manifest::{Manifest, ManifestEntry};
use crate::selector;

/// Per device family OTA policy
///
/// An adapter names the vendor manifest endpoint and turns a live device
/// handle into the identity fields used for image selection. Families whose
/// manifests cannot be disambiguated by the default rules override
/// [`OtaAdapter::select`].
#[async_trait]
pub trait OtaAdapter: Send + Sync {
    /// Vendor manifest endpoint
    fn manifest_url(&self) -> &str;

    /// Short name used in logs and CLI output
    fn name(&self) -> &str {
        self.manifest_url()
    }

    /// Build the selection identity of `device`
    ///
    /// The default queries the device for its running image and fills the
    /// model and manufacturer name from the handle.
    async fn describe(&self, device: &dyn OtaDevice) -> Result<DeviceIdentity, OtaError> {
        let image = device
            .query_image()
            .await
            .map_err(|e| OtaError::Device(format!("{}: {e}", device.device_id())))?;

        Ok(DeviceIdentity {
            model_id: device.model_id().unwrap_or(device.device_type()).to_string(),
            manufacturer_code: image.manufacturer_code,
            manufacturer_name: device.manufacturer_name().unwrap_or_default().to_string(),
            image_type: image.image_type,
            current_file_version: image.file_version,
        })
    }

    /// Pick the image for `device` from `manifest`
    fn select<'m>(
        &self,
        manifest: &'m Manifest,
        device: &DeviceIdentity,
    ) -> Option<&'m ManifestEntry> {
        selector::select(manifest, device)
    }

    /// Largest block the device transport accepts, if smaller than the
    /// configured chunk size
    fn max_chunk_size(&self) -> Option<usize> {
        None
    }
}

/// Lookup of adapters keyed by device type
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn OtaAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` for `device_type`
    pub fn register(
        &mut self,
        device_type: impl Into<String>,
        adapter: Arc<dyn OtaAdapter>,
    ) -> Result<(), OtaError> {
        let device_type = device_type.into();
        if self.adapters.contains_key(&device_type) {
            return Err(OtaError::DuplicateAdapter(device_type));
        }
        self.adapters.insert(device_type, adapter);
        Ok(())
    }

    /// Register one adapter for several device types
    ///
    /// Nothing is registered if any of the types is already taken.
    pub fn register_models(
        &mut self,
        device_types: &[&str],
        adapter: Arc<dyn OtaAdapter>,
    ) -> Result<(), OtaError> {
        if let Some(taken) = device_types
            .iter()
            .find(|t| self.adapters.contains_key(**t))
        {
            return Err(OtaError::DuplicateAdapter((*taken).to_string()));
        }
        for device_type in device_types {
            self.adapters
                .insert((*device_type).to_string(), adapter.clone());
        }
        Ok(())
    }

    /// Adapter for `device_type`
    pub fn get(&self, device_type: &str) -> Result<Arc<dyn OtaAdapter>, OtaError> {
        self.adapters
            .get(device_type)
            .cloned()
            .ok_or_else(|| OtaError::UnknownDeviceType(device_type.to_string()))
    }

    /// Registered device types, sorted
    pub fn device_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Number of registered device types
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapter is registered
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("device_types", &self.device_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ImageInfo;
    use crate::error::TransportError;

    struct Fixed(&'static str);

    #[async_trait]
    impl OtaAdapter for Fixed {
        fn manifest_url(&self) -> &str {
            self.0
        }
    }

    struct Plug {
        model: Option<&'static str>,
    }

    #[async_trait]
    impl OtaDevice for Plug {
        fn device_id(&self) -> &str {
            "0x00158d0001"
        }
        fn device_type(&self) -> &str {
            "PLUG-1"
        }
        fn model_id(&self) -> Option<&str> {
            self.model
        }
        fn manufacturer_name(&self) -> Option<&str> {
            Some("Acme")
        }
        async fn query_image(&self) -> Result<ImageInfo, TransportError> {
            Ok(ImageInfo {
                manufacturer_code: 4107,
                image_type: 3,
                file_version: 7,
            })
        }
        async fn write_chunk(&self, _offset: u64, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        async fn activate(&self, _image: &ManifestEntry) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_lookup() -> Result<(), OtaError> {
        let mut registry = AdapterRegistry::new();
        registry.register("PLUG-1", Arc::new(Fixed("https://a.invalid/index.json")))?;
        assert_eq!(registry.get("PLUG-1")?.manifest_url(), "https://a.invalid/index.json");
        assert!(matches!(
            registry.get("BULB-9"),
            Err(OtaError::UnknownDeviceType(t)) if t == "BULB-9"
        ));
        Ok(())
    }

    #[test]
    fn test_duplicate_registration_is_rejected() -> Result<(), OtaError> {
        let mut registry = AdapterRegistry::new();
        registry.register("PLUG-1", Arc::new(Fixed("a")))?;
        assert!(matches!(
            registry.register("PLUG-1", Arc::new(Fixed("b"))),
            Err(OtaError::DuplicateAdapter(_))
        ));
        assert_eq!(registry.get("PLUG-1")?.manifest_url(), "a");
        Ok(())
    }

    #[test]
    fn test_register_models_is_all_or_nothing() -> Result<(), OtaError> {
        let mut registry = AdapterRegistry::new();
        registry.register("B", Arc::new(Fixed("b")))?;
        let result = registry.register_models(&["A", "B", "C"], Arc::new(Fixed("shared")));
        assert!(matches!(result, Err(OtaError::DuplicateAdapter(t)) if t == "B"));
        assert_eq!(registry.device_types(), vec!["B"]);

        registry.register_models(&["C", "A"], Arc::new(Fixed("shared")))?;
        assert_eq!(registry.device_types(), vec!["A", "B", "C"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_default_describe_uses_device_handle() -> Result<(), OtaError> {
        let identity = Fixed("u").describe(&Plug { model: Some("X") }).await?;
        assert_eq!(identity.model_id, "X");
        assert_eq!(identity.manufacturer_name, "Acme");
        assert_eq!(identity.manufacturer_code, 4107);
        assert_eq!(identity.image_type, 3);
        assert_eq!(identity.current_file_version, 7);

        let fallback = Fixed("u").describe(&Plug { model: None }).await?;
        assert_eq!(fallback.model_id, "PLUG-1");
        Ok(())
    }
}
