//! Manifest transports

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::config::ManifestStoreConfig;
use crate::error::OtaError;
use crate::manifest::{ManifestEntry, parse_manifest};

/// Something that can retrieve the entries of a manifest URL
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch and decode the manifest at `url`
    async fn fetch(&self, url: &str) -> Result<Vec<ManifestEntry>, OtaError>;
}

/// Fetches manifests over HTTP(S), or from disk for `file://` URLs
pub struct HttpManifestSource {
    client: Client,
}

impl HttpManifestSource {
    /// Create a source using the store's timeout and user agent
    pub fn new(config: &ManifestStoreConfig) -> Result<Self, OtaError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| OtaError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, OtaError> {
        let fetch_error = |message: String| OtaError::Fetch {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!(
                "endpoint returned {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| fetch_error(format!("failed to read body: {e}")))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self, url: &str) -> Result<Vec<ManifestEntry>, OtaError> {
        info!("Fetching firmware manifest from: {}", url);

        let body = match url.strip_prefix("file://") {
            Some(path) => tokio::fs::read(path).await.map_err(|e| OtaError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })?,
            None => self.fetch_http(url).await?,
        };

        let entries = parse_manifest(url, &body)?;
        debug!("Manifest {} lists {} images", url, entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn source() -> Result<HttpManifestSource, OtaError> {
        HttpManifestSource::new(&ManifestStoreConfig::default())
    }

    fn manifest_json() -> serde_json::Value {
        serde_json::json!([{
            "imageType": 0,
            "manufacturerCode": 4107,
            "fileVersion": 20,
            "fileSize": 1024,
            "url": "https://vendor.invalid/fw.ota",
            "checksum": "00",
            "otaHeaderString": "forward compatible"
        }])
    }

    #[tokio::test]
    async fn test_fetch_http_manifest() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ota/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(manifest_json()))
            .mount(&server)
            .await;

        let url = format!("{}/ota/index.json", server.uri());
        let entries = source()?.fetch(&url).await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.first().map(|e| e.file_version), Some(20));
        Ok(())
    }

    #[tokio::test]
    async fn test_http_error_status_is_fetch_error() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = source()?.fetch(&format!("{}/index.json", server.uri())).await;
        match result {
            Err(OtaError::Fetch { message, .. }) => {
                assert!(message.contains("503"), "{message}");
                Ok(())
            }
            other => Err(format!("expected fetch error, got {other:?}").into()),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let result = source()?.fetch(&format!("{}/index.json", server.uri())).await;
        assert!(matches!(result, Err(OtaError::Parse { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_fetch_error() -> TestResult {
        let result = source()?.fetch("http://127.0.0.1:9/index.json").await;
        assert!(matches!(result, Err(OtaError::Fetch { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_url_reads_local_index() -> TestResult {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(serde_json::to_string(&manifest_json())?.as_bytes())?;

        let url = format!("file://{}", file.path().display());
        let entries = source()?.fetch(&url).await?;
        assert_eq!(entries.len(), 1);

        let missing = source()?.fetch("file:///nonexistent/meshota/index.json").await;
        assert!(matches!(missing, Err(OtaError::Fetch { .. })));
        Ok(())
    }
}
