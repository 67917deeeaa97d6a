//! Default image selection heuristic
//!
//! Officially an image is identified by manufacturer code and image type.
//! Some vendor families reuse one image type across distinct hardware, so a
//! manifest entry may narrow itself further with `modelId` (exact match) or
//! `manufacturerName` (the entry's value must occur inside the device's
//! reported name).

use tracing::warn;

use crate::device::DeviceIdentity;
use crate::manifest::{Manifest, ManifestEntry};

/// Whether `entry` may be installed on `device`
pub fn is_eligible(entry: &ManifestEntry, device: &DeviceIdentity) -> bool {
    entry.image_type == device.image_type
        && entry.manufacturer_code == device.manufacturer_code
        && entry
            .model_id
            .as_deref()
            .is_none_or(|model| model == device.model_id)
        && entry
            .manufacturer_name
            .as_deref()
            .is_none_or(|name| device.manufacturer_name.contains(name))
}

/// Pick the image for `device`: the first eligible entry in manifest order
///
/// More than one eligible entry means the manifest is inconsistent for this
/// device. The first one still wins so the outcome never depends on anything
/// but manifest order, and the ambiguity is logged.
pub fn select<'m>(manifest: &'m Manifest, device: &DeviceIdentity) -> Option<&'m ManifestEntry> {
    let mut eligible = manifest
        .entries
        .iter()
        .filter(|entry| is_eligible(entry, device));

    let first = eligible.next()?;
    let extra = eligible.count();
    if extra > 0 {
        warn!(
            source = %manifest.source_url,
            model_id = %device.model_id,
            image_type = device.image_type,
            manufacturer_code = device.manufacturer_code,
            "{} manifest entries match one device; using fileVersion {} from the first",
            extra + 1,
            first.file_version
        );
    }
    Some(first)
}
