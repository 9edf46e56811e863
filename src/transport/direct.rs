use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_LENGTH};
use reqwest::Client;
use tokio::sync::RwLock;
use crate::core::{
    direct_endpoint, DirectConfig, Result, TransportKind, UploadError, UploadFile, UploadResponse,
};
use super::{build_headers, Transport, TransferReporter};

/// Plain HTTP uploader: one PUT of the raw file body
pub struct DirectUploader {
    client: Client,
    config: RwLock<DirectConfig>,
}

impl DirectUploader {
    pub fn new(client: Client, config: DirectConfig) -> Self {
        Self {
            client,
            config: RwLock::new(config),
        }
    }

    pub async fn set_config(&self, config: DirectConfig) {
        *self.config.write().await = config;
    }

    pub async fn config(&self) -> DirectConfig {
        self.config.read().await.clone()
    }
}

#[async_trait]
impl Transport for DirectUploader {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn upload(&self, file: &UploadFile, reporter: &TransferReporter) -> Result<UploadResponse> {
        let config = self.config().await;
        let target = file
            .direct_endpoint
            .clone()
            .unwrap_or_else(|| direct_endpoint(&file.meta.endpoint, &file.name));

        let mut headers = build_headers(&config.headers, &file.meta.headers)?;
        headers.insert(CONTENT_LENGTH, HeaderValue::from(file.size));

        let body = file.source.body(reporter).await?;
        let response = self
            .client
            .request(config.method.clone(), &target)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::server_error(
                status.as_u16(),
                format!("Upload failed with status {}", status),
            ));
        }

        // The response body is not interpreted
        reporter.progress(file.size);
        tracing::debug!(file_id = %file.id, %target, status = status.as_u16(), "Direct upload finished");

        Ok(UploadResponse {
            status: status.as_u16(),
            upload_url: Some(target),
            body: Default::default(),
        })
    }
}
