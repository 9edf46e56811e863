use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use super::errors::{Result, RestrictionError};
use super::input::UploadInput;
use super::restrictions::Restrictions;
use super::source::FileSource;
use super::strategy::{DirectOptions, ResumableOptions, TransportInfo};

/// Unique file id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique batch id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadStatus {
    /// Accepted, not started
    Queued,
    /// Transfer running
    Uploading,
    /// Resumable strategy only
    Paused,
    /// Uploaded
    Succeeded,
    /// Transfer failed, kept in the set
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Statuses only move forward; the one cycle allowed is
    /// uploading -> paused -> uploading.
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;

        matches!(
            (self, next),
            (Queued, Uploading)
                | (Uploading, Succeeded)
                | (Uploading, Failed)
                | (Uploading, Paused)
                | (Paused, Uploading)
        )
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-file metadata supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileMeta {
    /// Upload endpoint the file belongs to
    pub endpoint: String,
    /// Extra request headers for this file only
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Forwarded to the server as tus `Upload-Metadata`
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl FileMeta {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A file offered to `enqueue`.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub source: FileSource,
    pub meta: FileMeta,
}

impl NewFile {
    pub fn new(name: impl Into<String>, source: FileSource, meta: FileMeta) -> Self {
        Self {
            name: name.into(),
            source,
            meta,
        }
    }
}

/// A file picked in a registered input, before it is enqueued.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub source: FileSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
}

impl Progress {
    pub fn percentage(&self) -> f64 {
        if self.bytes_total == 0 {
            return 100.0;
        }
        self.bytes_uploaded as f64 / self.bytes_total as f64 * 100.0
    }
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub source: FileSource,
    pub meta: FileMeta,
    pub status: UploadStatus,
    pub progress: Progress,
    /// tus upload URL, kept so a paused upload can resume
    pub upload_url: Option<String>,
    /// Target URL when the direct transport is active
    pub direct_endpoint: Option<String>,
    pub error: Option<String>,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadFile {
    pub(crate) fn new(new_file: NewFile, size: u64) -> Self {
        Self {
            id: FileId::new(),
            name: new_file.name,
            size,
            source: new_file.source,
            meta: new_file.meta,
            status: UploadStatus::Queued,
            progress: Progress {
                bytes_uploaded: 0,
                bytes_total: size,
            },
            upload_url: None,
            direct_endpoint: None,
            error: None,
            added_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Parsed response data. The direct transport never fills it.
pub type ResponseData = HashMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub upload_url: Option<String>,
    pub body: ResponseData,
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A registered input changed its selection
    FilesSelected {
        files: Vec<SelectedFile>,
    },

    /// File accepted into the pending set
    FileAdded {
        file_id: FileId,
        name: String,
    },

    /// File rejected by policy
    RestrictionFailed {
        name: String,
        reason: RestrictionError,
    },

    /// A batch began uploading
    Started {
        batch_id: BatchId,
        file_ids: Vec<FileId>,
    },

    Progress {
        file_id: FileId,
        progress: Progress,
    },

    Paused {
        file_id: FileId,
    },

    Resumed {
        file_id: FileId,
    },

    /// Every file of the batch reached a terminal state
    Completed {
        batch_id: BatchId,
        successful: Vec<FileId>,
        failed: Vec<FileId>,
    },

    Success {
        file: UploadFile,
        response: UploadResponse,
    },

    Error {
        file: UploadFile,
        error: String,
    },

    Removed {
        file_id: FileId,
    },

    /// Bulk cancel requested
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Start a batch as soon as files are accepted
    pub auto_proceed: bool,
    pub restrictions: Restrictions,
    /// Simultaneous transfers, 0 means unlimited
    pub max_concurrent: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            auto_proceed: true,
            restrictions: Restrictions::default(),
            max_concurrent: 0,
        }
    }
}

/// Requests handled by the worker
pub(crate) enum ManagerCommand {
    ConfigureResumable {
        options: ResumableOptions,
        reply: oneshot::Sender<TransportInfo>,
    },

    ConfigureDirect {
        options: DirectOptions,
        reply: oneshot::Sender<TransportInfo>,
    },

    Enqueue {
        files: Vec<NewFile>,
        reply: oneshot::Sender<Vec<Result<FileId>>>,
    },

    Upload {
        reply: oneshot::Sender<Option<BatchId>>,
    },

    Pause {
        file_id: FileId,
        reply: oneshot::Sender<Result<()>>,
    },

    Resume {
        file_id: FileId,
        reply: oneshot::Sender<Result<()>>,
    },

    PauseAll {
        reply: oneshot::Sender<Result<usize>>,
    },

    ResumeAll {
        reply: oneshot::Sender<Result<usize>>,
    },

    RemoveFile {
        file_id: FileId,
        reply: oneshot::Sender<Result<()>>,
    },

    CancelAll {
        reply: oneshot::Sender<()>,
    },

    RegisterInput {
        input: Arc<dyn UploadInput>,
        reply: oneshot::Sender<bool>,
    },

    UnregisterInput {
        input: Arc<dyn UploadInput>,
        reply: oneshot::Sender<bool>,
    },

    GetFile {
        file_id: FileId,
        reply: oneshot::Sender<Option<UploadFile>>,
    },

    GetFiles {
        reply: oneshot::Sender<Vec<UploadFile>>,
    },

    GetTransport {
        reply: oneshot::Sender<Option<TransportInfo>>,
    },
}

// Everything crossing the worker boundary must be Send
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadFile>();
        assert_send::<UploadEvent>();
        assert_send::<ManagerCommand>();
    }
};
