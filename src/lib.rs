pub mod config;
pub mod core;
pub mod readme;
pub mod transport;
pub mod utils;

// Re-export the core types
pub use core::{
    FileId,
    FileMeta,
    FileSource,
    ManagerConfig,
    NewFile,
    Result,
    UploadError,
    UploadEvent,
    UploadFile,
    UploadSessionHandle,
    UploadSessionManager,
    UploadStatus,
};

pub use transport::{DirectUploader, ResumableUploader, Transport};
