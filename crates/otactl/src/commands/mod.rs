//! Command implementations for otactl

pub mod check;
pub mod devices;
pub mod manifest;
pub mod update;

use async_trait::async_trait;
use clap::Args;
use meshota_core::{AdapterRegistry, ImageInfo, OtaAdapter, OtaConfig};
use meshota_vendors::{ModelLockedAdapter, default_registry};
use std::path::PathBuf;
use std::sync::Arc;

use crate::device::DescribedDevice;
use crate::error::CliError;

/// Settings shared by every command
pub struct Context {
    pub json: bool,
    pub config: OtaConfig,
}

/// Identity of the device to check or update
#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Registry key of the device (its zigbee model)
    #[arg(short = 't', long)]
    pub device_type: String,

    /// Device identifier used in logs and session tracking
    #[arg(long)]
    pub device_id: Option<String>,

    /// Model reported by the device, when different from the device type
    #[arg(long)]
    pub model_id: Option<String>,

    /// Manufacturer code of the running image (decimal or 0x hex)
    #[arg(short = 'm', long, value_parser = parse_u16)]
    pub manufacturer_code: u16,

    /// Manufacturer name reported by the device
    #[arg(long)]
    pub manufacturer_name: Option<String>,

    /// Image type of the running image (decimal or 0x hex)
    #[arg(short = 'i', long, value_parser = parse_u16)]
    pub image_type: u16,

    /// File version currently running (decimal or 0x hex)
    #[arg(short = 'V', long = "current-version", value_parser = parse_u32)]
    pub current_version: u32,

    /// Use this manifest instead of the vendor default
    #[arg(long)]
    pub manifest_url: Option<String>,

    /// Only accept entries that name the device's model
    #[arg(long, requires = "manifest_url")]
    pub strict_model: bool,
}

impl IdentityArgs {
    pub fn device(&self) -> DescribedDevice {
        DescribedDevice {
            device_id: self
                .device_id
                .clone()
                .unwrap_or_else(|| self.device_type.clone()),
            device_type: self.device_type.clone(),
            model_id: self.model_id.clone(),
            manufacturer_name: self.manufacturer_name.clone(),
            image: ImageInfo {
                manufacturer_code: self.manufacturer_code,
                image_type: self.image_type,
                file_version: self.current_version,
            },
        }
    }

    /// Registry holding the adapter these arguments select
    pub fn registry(&self) -> Result<AdapterRegistry, CliError> {
        let Some(url) = &self.manifest_url else {
            return Ok(default_registry()?);
        };

        let adapter: Arc<dyn OtaAdapter> = if self.strict_model {
            Arc::new(ModelLockedAdapter::new(url.clone()))
        } else {
            Arc::new(UrlAdapter { url: url.clone() })
        };
        let mut registry = AdapterRegistry::new();
        registry.register(self.device_type.clone(), adapter)?;
        Ok(registry)
    }
}

/// Arguments of `otactl update`
#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub identity: IdentityArgs,

    /// Where to write the transferred image
    #[arg(short, long)]
    pub output: PathBuf,

    /// Bytes per staged block
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

/// Adapter for an operator-supplied manifest using the default selection
struct UrlAdapter {
    url: String,
}

#[async_trait]
impl OtaAdapter for UrlAdapter {
    fn manifest_url(&self) -> &str {
        &self.url
    }

    fn name(&self) -> &str {
        "custom"
    }
}

fn parse_u16(raw: &str) -> Result<u16, String> {
    parse_u32(raw).and_then(|v| u16::try_from(v).map_err(|e| format!("{raw}: {e}")))
}

fn parse_u32(raw: &str) -> Result<u32, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse::<u32>(),
    };
    parsed.map_err(|e| format!("{raw}: {e}"))
}
