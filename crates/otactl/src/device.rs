//! Device handles backed by command-line arguments and local files

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use meshota_core::{ImageInfo, ManifestEntry, OtaDevice, TransportError};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A device known only by the identity given on the command line
#[derive(Debug, Clone)]
pub struct DescribedDevice {
    pub device_id: String,
    pub device_type: String,
    pub model_id: Option<String>,
    pub manufacturer_name: Option<String>,
    pub image: ImageInfo,
}

#[async_trait]
impl OtaDevice for DescribedDevice {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    fn manufacturer_name(&self) -> Option<&str> {
        self.manufacturer_name.as_deref()
    }

    async fn query_image(&self) -> Result<ImageInfo, TransportError> {
        Ok(self.image)
    }

    async fn write_chunk(&self, _offset: u64, _data: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Io(anyhow!("{} has no transport", self.device_id)))
    }

    async fn activate(&self, _image: &ManifestEntry) -> Result<(), TransportError> {
        Err(TransportError::Io(anyhow!("{} has no transport", self.device_id)))
    }
}

/// Writes the transferred image to disk instead of a radio link
///
/// Blocks land at their offsets in `<output>.part`; activation moves the
/// finished file to `output`.
pub struct StagingDevice {
    identity: DescribedDevice,
    output: PathBuf,
    partial: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl StagingDevice {
    pub fn new(identity: DescribedDevice, output: &Path) -> Self {
        let mut partial = output.as_os_str().to_owned();
        partial.push(".part");
        Self {
            identity,
            output: output.to_path_buf(),
            partial: PathBuf::from(partial),
            file: Mutex::new(None),
        }
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.partial)
                .await
                .with_context(|| format!("Failed to create {}", self.partial.display()))?;
            *guard = Some(file);
        }
        let file = guard
            .as_mut()
            .ok_or_else(|| anyhow!("staging file is not open"))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .context("Failed to seek staging file")?;
        file.write_all(data)
            .await
            .context("Failed to write staging file")?;
        Ok(())
    }

    async fn finish(&self, image: &ManifestEntry) -> anyhow::Result<()> {
        let mut guard = self.file.lock().await;
        let mut file = guard
            .take()
            .ok_or_else(|| anyhow!("no image data was written"))?;
        file.flush().await.context("Failed to flush staging file")?;
        file.sync_all().await.context("Failed to sync staging file")?;
        drop(file);

        tokio::fs::rename(&self.partial, &self.output)
            .await
            .with_context(|| format!("Failed to move image to {}", self.output.display()))?;
        info!(
            "Staged firmware version {} at {}",
            image.file_version,
            self.output.display()
        );
        Ok(())
    }
}

#[async_trait]
impl OtaDevice for StagingDevice {
    fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    fn device_type(&self) -> &str {
        self.identity.device_type()
    }

    fn model_id(&self) -> Option<&str> {
        self.identity.model_id()
    }

    fn manufacturer_name(&self) -> Option<&str> {
        self.identity.manufacturer_name()
    }

    async fn query_image(&self) -> Result<ImageInfo, TransportError> {
        Ok(self.identity.image)
    }

    async fn write_chunk(&self, offset: u64, data: &[u8]) -> Result<(), TransportError> {
        debug!("Staging {} bytes at offset {}", data.len(), offset);
        self.write_at(offset, data).await.map_err(TransportError::Io)
    }

    async fn activate(&self, image: &ManifestEntry) -> Result<(), TransportError> {
        self.finish(image).await.map_err(TransportError::Io)
    }
}
