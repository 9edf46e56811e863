use thiserror::Error;
use super::types::FileId;

/// Policy rejection of a file before its upload starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestrictionError {
    #[error("{name} exceeds maximum allowed size of {max} bytes")]
    TooLarge {
        name: String,
        size: u64,
        max: u64,
    },

    #[error("{name} is smaller than the minimum size of {min} bytes")]
    TooSmall {
        name: String,
        size: u64,
        min: u64,
    },

    #[error("Adding {name} would exceed the total size limit of {max} bytes")]
    TotalSizeExceeded {
        name: String,
        max: u64,
    },

    #[error("You can only upload {max} files")]
    TooManyFiles {
        max: usize,
    },

    #[error("{name} has a file type that is not allowed")]
    TypeNotAllowed {
        name: String,
    },

    #[error("Cannot add the duplicate file {name}, it already exists")]
    Duplicate {
        name: String,
    },
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Restriction error: {0}")]
    Restriction(#[from] RestrictionError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("No '{0}' header in response")]
    MissingHeader(&'static str),

    #[error("Invalid '{header}' header: {message}")]
    InvalidHeader {
        header: &'static str,
        message: String,
    },

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("Server reported offset {actual}, expected at least {expected}")]
    InvalidOffset {
        expected: u64,
        actual: u64,
    },

    #[error("No transport installed")]
    NoTransport,

    #[error("The active transport does not support pausing uploads")]
    PauseUnsupported,

    #[error("File not found: {0}")]
    FileNotFound(FileId),

    #[error("Cannot {action} a file in state {state}")]
    InvalidState {
        action: &'static str,
        state: String,
    },

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Manager shut down")]
    ManagerShutdown,
}

impl UploadError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn invalid_header(header: &'static str, message: impl ToString) -> Self {
        Self::InvalidHeader {
            header,
            message: message.to_string(),
        }
    }

    pub fn is_restriction(&self) -> bool {
        matches!(self, Self::Restriction(_))
    }

    /// Network failures, 5xx, 409 and 423 are worth another attempt; other
    /// client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => !err.is_builder() && !err.is_decode(),
            Self::Server { status_code, .. } => {
                !(400..500).contains(status_code) || *status_code == 409 || *status_code == 423
            }
            _ => false,
        }
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(UploadError::server_error(500, "boom").is_retryable());
        assert!(UploadError::server_error(409, "conflict").is_retryable());
        assert!(UploadError::server_error(423, "locked").is_retryable());
        assert!(!UploadError::server_error(403, "forbidden").is_retryable());
        assert!(!UploadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_restriction_classification() {
        let err: UploadError = RestrictionError::TooManyFiles { max: 1 }.into();
        assert!(err.is_restriction());
        assert!(!err.is_retryable());
        assert!(!UploadError::NoTransport.is_restriction());
    }
}
