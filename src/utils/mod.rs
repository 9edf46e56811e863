pub mod progress;
pub mod retry;

pub use progress::ProgressStream;
pub use retry::{retry_with_config, RetryConfig};
