//! Streamed firmware image download

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::OtaError;

/// Stream of image bytes in arrival order
pub type ImageStream = BoxStream<'static, Result<Bytes, OtaError>>;

/// Block size used when replaying a local image as a stream
const FILE_BLOCK_SIZE: usize = 64 * 1024;

/// Opens a byte stream for an image URL
#[async_trait]
pub trait ImageDownloader: Send + Sync {
    /// Start downloading `url`
    async fn open(&self, url: &str) -> Result<ImageStream, OtaError>;
}

/// Downloads images over HTTP(S), or from disk for `file://` URLs
pub struct HttpImageDownloader {
    client: Client,
}

impl HttpImageDownloader {
    /// Create a downloader with an overall per-request timeout
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, OtaError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| OtaError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageDownloader for HttpImageDownloader {
    async fn open(&self, url: &str) -> Result<ImageStream, OtaError> {
        if let Some(path) = url.strip_prefix("file://") {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| OtaError::DownloadFailed(format!("{url}: {e}")))?;
            debug!("Read local image {} ({} bytes)", path, data.len());
            let blocks: Vec<Result<Bytes, OtaError>> = data
                .chunks(FILE_BLOCK_SIZE)
                .map(|block| Ok(Bytes::copy_from_slice(block)))
                .collect();
            return Ok(stream::iter(blocks).boxed());
        }

        info!("Downloading firmware image from: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OtaError::DownloadFailed(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OtaError::DownloadFailed(format!(
                "{url}: server returned {}",
                status.as_u16()
            )));
        }

        let url = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| OtaError::DownloadFailed(format!("{url}: {e}")))
            })
            .boxed())
    }
}
