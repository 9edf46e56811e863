mod errors;
mod events;
mod input;
mod manager;
mod restrictions;
mod source;
mod strategy;
mod types;
mod worker;

pub use errors::{RestrictionError, Result, UploadError};
pub use input::{ChangeListener, UploadInput};
pub use manager::{FilteredEventReceiver, UploadSessionHandle, UploadSessionManager};
pub use restrictions::Restrictions;
pub use source::FileSource;
pub use strategy::{
    direct_endpoint, effective_chunk_size, ChunkSize, DirectConfig, DirectOptions, ResumableConfig,
    ResumableOptions, TransportInfo, TransportKind, TransportStrategy,
};
pub use types::{
    BatchId, FileId, FileMeta, ManagerConfig, NewFile, Progress, ResponseData, SelectedFile,
    UploadEvent, UploadFile, UploadResponse, UploadStatus,
};
