//! Strict model matching for vendors that reuse one image type
//!
//! Some product families (Gledopto pro devices among them) publish different
//! images for different hardware under the same `imageType`. For those, an
//! entry without a `modelId` cannot be trusted, so only entries naming the
//! device's model are eligible.

use async_trait::async_trait;
use tracing::{debug, warn};

use meshota_core::selector::is_eligible;
use meshota_core::{DeviceIdentity, Manifest, ManifestEntry, OtaAdapter};

/// Adapter requiring every entry to name the device's model
#[derive(Debug, Clone)]
pub struct ModelLockedAdapter {
    manifest_url: String,
    max_chunk_size: Option<usize>,
}

impl ModelLockedAdapter {
    /// Adapter reading `manifest_url`
    pub fn new(manifest_url: impl Into<String>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            max_chunk_size: None,
        }
    }

    /// Limit transfer blocks to `size` bytes
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = Some(size);
        self
    }
}

#[async_trait]
impl OtaAdapter for ModelLockedAdapter {
    fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    fn name(&self) -> &str {
        "model-locked"
    }

    fn select<'m>(&self, manifest: &'m Manifest, device: &DeviceIdentity) -> Option<&'m ManifestEntry> {
        let mut named = manifest.entries.iter().filter(|entry| {
            entry.model_id.as_deref() == Some(device.model_id.as_str()) && is_eligible(entry, device)
        });

        let Some(first) = named.next() else {
            debug!(
                "No entry in {} names model '{}'",
                manifest.source_url, device.model_id
            );
            return None;
        };
        let extra = named.count();
        if extra > 0 {
            warn!(
                source = %manifest.source_url,
                model_id = %device.model_id,
                image_type = device.image_type,
                manufacturer_code = device.manufacturer_code,
                "{} manifest entries name model '{}'; using fileVersion {} from the first",
                extra + 1,
                device.model_id,
                first.file_version
            );
        }
        Some(first)
    }

    fn max_chunk_size(&self) -> Option<usize> {
        self.max_chunk_size
    }
}
