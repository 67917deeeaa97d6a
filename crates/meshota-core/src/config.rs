//! Runtime configuration for the manifest store and transfer coordinator

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::OtaError;

/// Top-level OTA configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Manifest fetching and caching
    pub manifest: ManifestStoreConfig,
    /// Download, transfer and activation behaviour
    pub transfer: TransferConfig,
}

impl OtaConfig {
    /// Check every section for values the coordinator cannot work with
    pub fn validate(&self) -> Result<(), OtaError> {
        self.manifest.validate()?;
        self.transfer.validate()
    }
}

/// Configuration for [`crate::store::ManifestStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestStoreConfig {
    /// How long a fetched manifest is served without refetching
    #[serde(with = "duration_ms")]
    pub ttl: Duration,

    /// Timeout for a single manifest request
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// User agent sent to vendor endpoints
    pub user_agent: String,

    /// Directory for persisted manifest records, if any
    pub persist_dir: Option<PathBuf>,
}

impl Default for ManifestStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("meshota/", env!("CARGO_PKG_VERSION")).to_string(),
            persist_dir: None,
        }
    }
}

impl ManifestStoreConfig {
    /// Set the cache TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Persist fetched manifests under `dir`
    pub fn with_persist_dir(mut self, dir: PathBuf) -> Self {
        self.persist_dir = Some(dir);
        self
    }

    /// Reject values the store or coordinator cannot work with
    pub fn validate(&self) -> Result<(), OtaError> {
        if self.request_timeout.is_zero() {
            return Err(OtaError::Config(
                "manifest request_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the transfer state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per device write; adapters may lower it
    pub chunk_size: usize,

    /// Extra download attempts after the first failure
    pub download_retries: u32,

    /// Extra attempts per chunk after a failed write
    pub chunk_retries: u32,

    /// Delay before the first retry; doubles on every further attempt
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,

    /// Upper bound for the retry delay
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,

    /// How long the device has to confirm activation
    #[serde(with = "duration_ms")]
    pub activation_timeout: Duration,

    /// Timeout for a single image download request
    #[serde(with = "duration_ms")]
    pub download_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            download_retries: 3,
            chunk_retries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            activation_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(300),
        }
    }
}

impl TransferConfig {
    /// Set the device chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set download and chunk retry budgets
    pub fn with_retries(mut self, download_retries: u32, chunk_retries: u32) -> Self {
        self.download_retries = download_retries;
        self.chunk_retries = chunk_retries;
        self
    }

    /// Set the backoff window
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Set the activation confirmation timeout
    pub fn with_activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = timeout;
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Reject values the store or coordinator cannot work with
    pub fn validate(&self) -> Result<(), OtaError> {
        if self.chunk_size == 0 {
            return Err(OtaError::Config("chunk_size must be non-zero".to_string()));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(OtaError::Config(format!(
                "initial_backoff {:?} exceeds max_backoff {:?}",
                self.initial_backoff, self.max_backoff
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(OtaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = TransferConfig::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(700));
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(400));
        assert_eq!(config.backoff_for(4), Duration::from_millis(700));
        assert_eq!(config.backoff_for(40), Duration::from_millis(700));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = OtaConfig {
            transfer: TransferConfig::default().with_chunk_size(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OtaError::Config(_))));
    }

    #[test]
    fn test_config_roundtrips_durations_as_millis() -> Result<(), serde_json::Error> {
        let config = OtaConfig {
            manifest: ManifestStoreConfig::default().with_ttl(Duration::from_millis(1500)),
            ..Default::default()
        };
        let json = serde_json::to_value(&config)?;
        assert_eq!(json["manifest"]["ttl"], 1500);

        let partial: OtaConfig = serde_json::from_str(r#"{"transfer": {"chunk_size": 48}}"#)?;
        assert_eq!(partial.transfer.chunk_size, 48);
        assert_eq!(partial.transfer.chunk_retries, 5);
        Ok(())
    }
}
