use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::RwLock;
use tokio::time::sleep;
use url::Url;
use crate::core::{ResumableConfig, Result, TransportKind, UploadError, UploadFile, UploadResponse};
use crate::utils::{retry_with_config, RetryConfig};
use super::metadata::Metadata;
use super::{build_headers, Transport, TransferReporter};

pub const TUS_RESUMABLE: &str = "1.0.0";

const UPLOAD_OFFSET: &str = "Upload-Offset";
const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// tus 1.0.0 uploader
pub struct ResumableUploader {
    client: Client,
    config: RwLock<ResumableConfig>,
}

impl ResumableUploader {
    pub fn new(client: Client, config: ResumableConfig) -> Self {
        Self {
            client,
            config: RwLock::new(config),
        }
    }

    /// Replace the options; transfers already running keep the ones they
    /// started with.
    pub async fn set_config(&self, config: ResumableConfig) {
        *self.config.write().await = config;
    }

    pub async fn config(&self) -> ResumableConfig {
        self.config.read().await.clone()
    }

    fn base_headers(config: &ResumableConfig, file: &UploadFile) -> Result<HeaderMap> {
        let mut headers = build_headers(&config.headers, &file.meta.headers)?;
        headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_RESUMABLE));
        Ok(headers)
    }

    fn parse_offset(response: &Response) -> Result<u64> {
        response
            .headers()
            .get(UPLOAD_OFFSET)
            .ok_or(UploadError::MissingHeader(UPLOAD_OFFSET))?
            .to_str()
            .map_err(|err| UploadError::invalid_header(UPLOAD_OFFSET, err))?
            .parse::<u64>()
            .map_err(|err| UploadError::invalid_header(UPLOAD_OFFSET, err))
    }

    fn ensure_success(response: &Response, message: &str) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::server_error(
                status.as_u16(),
                format!("{}: {}", message, status),
            ));
        }
        Ok(())
    }

    async fn create_upload(&self, config: &ResumableConfig, file: &UploadFile) -> Result<String> {
        let mut headers = Self::base_headers(config, file)?;
        headers.insert("Upload-Length", HeaderValue::from(file.size));

        let metadata = Metadata::for_file(file);
        if !metadata.is_empty() {
            headers.insert("Upload-Metadata", HeaderValue::from_str(&metadata.to_header())?);
        }

        let response = self
            .client
            .post(&file.meta.endpoint)
            .headers(headers)
            .send()
            .await?;

        Self::ensure_success(&response, "Failed to create upload")?;

        let location = response
            .headers()
            .get(LOCATION)
            .ok_or(UploadError::MissingHeader("Location"))?
            .to_str()
            .map_err(|err| UploadError::invalid_header("Location", err))?;

        let upload_url = if location.starts_with("http") {
            location.to_string()
        } else {
            let base_url = Url::parse(&file.meta.endpoint)?;
            base_url.join(location)?.to_string()
        };

        Ok(upload_url)
    }

    /// `Ok(None)` when the server no longer knows the upload.
    async fn fetch_offset(
        &self,
        config: &ResumableConfig,
        file: &UploadFile,
        upload_url: &str,
    ) -> Result<Option<u64>> {
        let headers = Self::base_headers(config, file)?;
        let response = self.client.head(upload_url).headers(headers).send().await?;

        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Ok(None);
        }

        Self::ensure_success(&response, "Failed to get upload offset")?;
        Self::parse_offset(&response).map(Some)
    }

    async fn send_chunk(
        &self,
        config: &ResumableConfig,
        file: &UploadFile,
        upload_url: &str,
        offset: u64,
    ) -> Result<(StatusCode, u64)> {
        let len = config.chunk_size.next_len(offset, file.size);
        let data = file.source.read_chunk(offset, len).await?;

        let mut headers = Self::base_headers(config, file)?;
        headers.insert(UPLOAD_OFFSET, HeaderValue::from(offset));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(OFFSET_CONTENT_TYPE));

        let request = if config.override_patch_method {
            headers.insert("X-HTTP-Method-Override", HeaderValue::from_static("PATCH"));
            self.client.post(upload_url)
        } else {
            self.client.patch(upload_url)
        };

        let response = request.headers(headers).body(data).send().await?;
        Self::ensure_success(&response, "Failed to patch file")?;

        let next_offset = Self::parse_offset(&response)?;
        if next_offset <= offset {
            return Err(UploadError::InvalidOffset {
                expected: offset + 1,
                actual: next_offset,
            });
        }

        Ok((response.status(), next_offset))
    }

    async fn start_upload(
        &self,
        config: &ResumableConfig,
        file: &UploadFile,
        reporter: &TransferReporter,
    ) -> Result<(String, u64)> {
        let retry = RetryConfig::new(&config.retry_delays);

        if let Some(upload_url) = &file.upload_url {
            let offset = retry_with_config(&retry, || self.fetch_offset(config, file, upload_url)).await?;
            if let Some(offset) = offset {
                tracing::debug!(file_id = %file.id, offset, "Resuming upload");
                return Ok((upload_url.clone(), offset));
            }
            tracing::info!(file_id = %file.id, %upload_url, "Upload expired on server, creating a new one");
        }

        let upload_url = retry_with_config(&retry, || self.create_upload(config, file)).await?;
        reporter.upload_url(&upload_url);
        tracing::debug!(file_id = %file.id, %upload_url, "Created upload");

        Ok((upload_url, 0))
    }
}

#[async_trait]
impl Transport for ResumableUploader {
    fn kind(&self) -> TransportKind {
        TransportKind::Resumable
    }

    fn supports_pause(&self) -> bool {
        true
    }

    async fn upload(&self, file: &UploadFile, reporter: &TransferReporter) -> Result<UploadResponse> {
        let config = self.config().await;
        let retry = RetryConfig::new(&config.retry_delays);

        let (upload_url, mut offset) = self.start_upload(&config, file, reporter).await?;
        reporter.progress(offset);

        let mut status = StatusCode::CREATED;
        let mut attempt = 0;
        while offset < file.size {
            match self.send_chunk(&config, file, &upload_url, offset).await {
                Ok((chunk_status, next_offset)) => {
                    status = chunk_status;
                    offset = next_offset.min(file.size);
                    attempt = 0;
                    reporter.progress(offset);
                }
                Err(err) => {
                    let delay = match retry.delay_for(attempt, &err) {
                        Some(delay) => delay,
                        None => return Err(err),
                    };
                    tracing::warn!(file_id = %file.id, offset, error = %err, "Chunk failed, retrying");
                    attempt += 1;
                    sleep(delay).await;

                    // Resync with what the server actually stored
                    offset = self
                        .fetch_offset(&config, file, &upload_url)
                        .await?
                        .ok_or_else(|| UploadError::server_error(404, "Upload disappeared while uploading"))?;
                }
            }
        }

        Ok(UploadResponse {
            status: status.as_u16(),
            upload_url: Some(upload_url),
            body: Default::default(),
        })
    }
}
