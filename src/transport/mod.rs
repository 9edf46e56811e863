mod direct;
mod metadata;
mod resumable;

pub use direct::DirectUploader;
pub use metadata::Metadata;
pub use resumable::{ResumableUploader, TUS_RESUMABLE};

use std::collections::HashMap;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use crate::core::{FileId, Result, TransportKind, UploadFile, UploadResponse};

/// Implemented by both transport strategies.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Whether transfers can be paused and resumed
    fn supports_pause(&self) -> bool {
        false
    }

    /// Upload one file, reporting progress through `reporter`.
    async fn upload(&self, file: &UploadFile, reporter: &TransferReporter) -> Result<UploadResponse>;
}

#[derive(Debug)]
pub enum TransferUpdate {
    Progress(u64),
    UploadUrl(String),
    Finished(Result<UploadResponse>),
}

/// Message from a running transfer back to the manager worker.
#[derive(Debug)]
pub struct TransferMessage {
    pub file_id: FileId,
    pub attempt: u64,
    pub update: TransferUpdate,
}

/// Channel end handed to a transport for one transfer attempt.
#[derive(Debug, Clone)]
pub struct TransferReporter {
    file_id: FileId,
    attempt: u64,
    tx: mpsc::UnboundedSender<TransferMessage>,
}

impl TransferReporter {
    pub(crate) fn new(file_id: FileId, attempt: u64, tx: mpsc::UnboundedSender<TransferMessage>) -> Self {
        Self { file_id, attempt, tx }
    }

    /// Standalone reporter, for driving a transport outside a manager.
    pub fn channel(file_id: FileId) -> (Self, mpsc::UnboundedReceiver<TransferMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(file_id, 0, tx), rx)
    }

    /// Total bytes the server has acknowledged so far.
    pub fn progress(&self, bytes_uploaded: u64) {
        self.send(TransferUpdate::Progress(bytes_uploaded));
    }

    pub fn upload_url(&self, url: &str) {
        self.send(TransferUpdate::UploadUrl(url.to_string()));
    }

    pub(crate) fn finish(&self, result: Result<UploadResponse>) {
        self.send(TransferUpdate::Finished(result));
    }

    fn send(&self, update: TransferUpdate) {
        // The worker may already be gone during shutdown
        let _ = self.tx.send(TransferMessage {
            file_id: self.file_id,
            attempt: self.attempt,
            update,
        });
    }
}

/// Transport headers first, then per-file headers on top.
pub(crate) fn build_headers(
    base: &HashMap<String, String>,
    file: &HashMap<String, String>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    for (key, value) in base.iter().chain(file.iter()) {
        headers.insert(
            HeaderName::from_bytes(key.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
    }

    Ok(headers)
}
