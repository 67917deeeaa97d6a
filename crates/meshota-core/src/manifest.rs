//! Vendor firmware manifests and image checksums
//!
//! A manifest is the JSON array published by a vendor endpoint. Each element
//! describes one firmware image:
//!
//! ```json
//! [
//!   {
//!     "imageType": 0,
//!     "manufacturerCode": 4107,
//!     "manufacturerName": "Acme",
//!     "fileVersion": 20,
//!     "fileSize": 1024,
//!     "url": "https://example.invalid/acme-20.ota",
//!     "checksum": "9f86d0818..."
//!   }
//! ]
//! ```
//!
//! Unknown fields are ignored. The digest may also be supplied under the
//! `sha512` key used by Zigbee OTA index files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::time::Duration;

use crate::error::OtaError;

/// One candidate image from a vendor manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Image type the entry applies to
    pub image_type: u16,

    /// Manufacturer code the entry applies to
    pub manufacturer_code: u16,

    /// Restricts the entry to one model when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// Restricts the entry to devices whose manufacturer name contains this value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_name: Option<String>,

    /// Version of the image
    pub file_version: u32,

    /// Image size in bytes
    pub file_size: u64,

    /// Download location
    pub url: String,

    /// Hex digest of the whole image
    #[serde(alias = "sha512")]
    pub checksum: String,
}

/// A fetched manifest together with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Endpoint the manifest was fetched from
    pub source_url: String,

    /// When the manifest was fetched
    pub fetched_at: DateTime<Utc>,

    /// Entries in publication order
    pub entries: Vec<ManifestEntry>,

    /// How long the manifest is considered fresh
    #[serde(skip, default)]
    pub ttl: Duration,
}

impl Manifest {
    /// Build a manifest fetched just now
    pub fn new(source_url: impl Into<String>, entries: Vec<ManifestEntry>, ttl: Duration) -> Self {
        Self {
            source_url: source_url.into(),
            fetched_at: Utc::now(),
            entries,
            ttl,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode a manifest body fetched from `url`
pub fn parse_manifest(url: &str, body: &[u8]) -> Result<Vec<ManifestEntry>, OtaError> {
    serde_json::from_slice(body).map_err(|e| OtaError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Digest algorithms accepted in manifest checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256, 64 hex characters
    Sha256,
    /// SHA-512, 128 hex characters
    Sha512,
}

/// A parsed manifest checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest_hex: String,
}

impl Checksum {
    /// Parse `sha256:<hex>`, `sha512:<hex>` or a bare hex digest
    ///
    /// Bare digests are classified by length.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (declared, hex_part) = match raw.split_once(':') {
            Some((prefix, rest)) => {
                let algorithm = match prefix.to_ascii_lowercase().as_str() {
                    "sha256" => ChecksumAlgorithm::Sha256,
                    "sha512" => ChecksumAlgorithm::Sha512,
                    other => return Err(format!("unsupported checksum algorithm '{other}'")),
                };
                (Some(algorithm), rest)
            }
            None => (None, raw),
        };

        let digest_hex = hex_part.to_ascii_lowercase();
        if !digest_hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("checksum is not hex encoded".to_string());
        }

        let by_length = match digest_hex.len() {
            64 => ChecksumAlgorithm::Sha256,
            128 => ChecksumAlgorithm::Sha512,
            n => return Err(format!("checksum has unexpected length {n}")),
        };
        if let Some(declared) = declared
            && declared != by_length
        {
            return Err(format!(
                "checksum length does not match declared algorithm {declared:?}"
            ));
        }

        Ok(Self {
            algorithm: by_length,
            digest_hex,
        })
    }

    /// Algorithm the digest was produced with
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest
    pub fn digest_hex(&self) -> &str {
        &self.digest_hex
    }

    /// Start an incremental hasher for this checksum's algorithm
    pub fn hasher(&self) -> ImageHasher {
        ImageHasher::new(self.algorithm)
    }

    /// Hash `data` and compare against the expected digest
    pub fn verify(&self, data: &[u8]) -> Result<(), OtaError> {
        let mut hasher = self.hasher();
        hasher.update(data);
        let actual = hasher.finalize_hex();
        if actual == self.digest_hex {
            Ok(())
        } else {
            Err(OtaError::IntegrityFailure {
                expected: self.digest_hex.clone(),
                actual,
            })
        }
    }
}

/// Incremental image digest
pub enum ImageHasher {
    /// SHA-256 state
    Sha256(Sha256),
    /// SHA-512 state
    Sha512(Sha512),
}

impl ImageHasher {
    /// Create a hasher for `algorithm`
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => ImageHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => ImageHasher::Sha512(Sha512::new()),
        }
    }

    /// Feed more image bytes
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ImageHasher::Sha256(h) => h.update(data),
            ImageHasher::Sha512(h) => h.update(data),
        }
    }

    /// Finish and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            ImageHasher::Sha256(h) => hex::encode(h.finalize()),
            ImageHasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hex digest of `data` with `algorithm`
pub fn compute_digest(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut hasher = ImageHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const SAMPLE: &str = r#"[
        {
            "imageType": 0,
            "manufacturerCode": 4107,
            "manufacturerName": "Acme",
            "fileVersion": 20,
            "fileSize": 1024,
            "url": "https://example.invalid/a.ota",
            "checksum": "abc",
            "releaseNotes": "ignored"
        },
        {
            "imageType": 1,
            "manufacturerCode": 4107,
            "modelId": "X",
            "fileVersion": 3,
            "fileSize": 10,
            "url": "https://example.invalid/b.ota",
            "sha512": "def"
        }
    ]"#;

    #[test]
    fn test_parse_manifest_ignores_unknown_fields() -> TestResult {
        let entries = parse_manifest("u", SAMPLE.as_bytes())?;
        assert_eq!(entries.len(), 2);
        let first = entries.first().ok_or("manifest is empty")?;
        assert_eq!(first.manufacturer_name.as_deref(), Some("Acme"));
        assert_eq!(first.model_id, None);
        assert_eq!(first.file_size, 1024);
        Ok(())
    }

    #[test]
    fn test_parse_manifest_accepts_sha512_alias() -> TestResult {
        let entries = parse_manifest("u", SAMPLE.as_bytes())?;
        let second = entries.get(1).ok_or("second entry missing")?;
        assert_eq!(second.checksum, "def");
        assert_eq!(second.model_id.as_deref(), Some("X"));
        Ok(())
    }

    #[test]
    fn test_parse_manifest_rejects_missing_required_field() -> Result<(), String> {
        let body = br#"[{"imageType": 0, "manufacturerCode": 1, "fileVersion": 1, "url": "x", "checksum": "y"}]"#;
        match parse_manifest("https://vendor.invalid/index.json", body) {
            Err(OtaError::Parse { url, message }) => {
                assert_eq!(url, "https://vendor.invalid/index.json");
                assert!(message.contains("fileSize"), "{message}");
                Ok(())
            }
            other => Err(format!("expected parse error, got {other:?}")),
        }
    }

    #[test]
    fn test_parse_manifest_rejects_non_array() {
        let result = parse_manifest("u", br#"{"images": []}"#);
        assert!(matches!(result, Err(OtaError::Parse { .. })));
    }

    #[test]
    fn test_checksum_classified_by_length() -> Result<(), String> {
        let sha256 = compute_digest(ChecksumAlgorithm::Sha256, b"image");
        let sha512 = compute_digest(ChecksumAlgorithm::Sha512, b"image");
        assert_eq!(Checksum::parse(&sha256)?.algorithm(), ChecksumAlgorithm::Sha256);
        assert_eq!(Checksum::parse(&sha512)?.algorithm(), ChecksumAlgorithm::Sha512);
        Ok(())
    }

    #[test]
    fn test_checksum_prefix_and_case() -> Result<(), String> {
        let digest = compute_digest(ChecksumAlgorithm::Sha256, b"image");
        let parsed = Checksum::parse(&format!("SHA256:{}", digest.to_uppercase()))?;
        assert_eq!(parsed.digest_hex(), digest);
        assert!(parsed.verify(b"image").is_ok());
        Ok(())
    }

    #[test]
    fn test_checksum_rejects_garbage() {
        assert!(Checksum::parse("abc").is_err());
        assert!(Checksum::parse(&"zz".repeat(32)).is_err());
        assert!(Checksum::parse(&format!("md5:{}", "00".repeat(16))).is_err());
        let sha256 = compute_digest(ChecksumAlgorithm::Sha256, b"x");
        assert!(Checksum::parse(&format!("sha512:{sha256}")).is_err());
    }

    #[test]
    fn test_checksum_verify_mismatch() -> Result<(), String> {
        let checksum = Checksum::parse(&compute_digest(ChecksumAlgorithm::Sha512, b"good"))?;
        match checksum.verify(b"evil") {
            Err(OtaError::IntegrityFailure { expected, actual }) => {
                assert_eq!(expected, checksum.digest_hex());
                assert_ne!(expected, actual);
                Ok(())
            }
            other => Err(format!("expected integrity failure, got {other:?}")),
        }
    }

    #[test]
    fn test_incremental_hash_matches_one_shot() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut hasher = ImageHasher::new(ChecksumAlgorithm::Sha256);
        for chunk in data.chunks(64) {
            hasher.update(chunk);
        }
        assert_eq!(
            hasher.finalize_hex(),
            compute_digest(ChecksumAlgorithm::Sha256, &data)
        );
    }
}
