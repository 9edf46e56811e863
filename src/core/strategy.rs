use std::collections::HashMap;
use std::time::Duration;
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Retry delays are written as milliseconds
fn serialize_delays<S>(delays: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let millis: Vec<u64> = delays.iter().map(|delay| delay.as_millis() as u64).collect();
    millis.serialize(serializer)
}

fn deserialize_delays<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = Vec::<u64>::deserialize(deserializer)?;
    Ok(millis.into_iter().map(Duration::from_millis).collect())
}

fn default_retry_delays() -> Vec<Duration> {
    vec![Duration::ZERO]
}

/// Chunk size of a resumable upload. `Unbounded` sends the rest of the file
/// in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum ChunkSize {
    Bounded(u64),
    Unbounded,
}

impl From<Option<u64>> for ChunkSize {
    fn from(value: Option<u64>) -> Self {
        match value {
            Some(size) => Self::Bounded(size),
            None => Self::Unbounded,
        }
    }
}

impl From<ChunkSize> for Option<u64> {
    fn from(value: ChunkSize) -> Self {
        match value {
            ChunkSize::Bounded(size) => Some(size),
            ChunkSize::Unbounded => None,
        }
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self::Unbounded
    }
}

impl ChunkSize {
    /// Bytes to send for a chunk starting at `offset`.
    pub fn next_len(self, offset: u64, total: u64) -> u64 {
        let remaining = total.saturating_sub(offset);
        match self {
            Self::Bounded(size) => size.max(1).min(remaining),
            Self::Unbounded => remaining,
        }
    }
}

/// max(minimum, requested), unless the minimum is unset (0) or the request is
/// unbounded. The unbounded sentinel is passed through untouched.
pub fn effective_chunk_size(min_chunk_size: u64, requested: ChunkSize) -> ChunkSize {
    match requested {
        ChunkSize::Bounded(size) if min_chunk_size > 0 => ChunkSize::Bounded(min_chunk_size.max(size)),
        other => other,
    }
}

/// Target URL of a direct upload: endpoint without trailing slashes, then the
/// percent-encoded file name.
pub fn direct_endpoint(endpoint: &str, file_name: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        urlencoding::encode(file_name)
    )
}

/// Options accepted by `configure_resumable`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResumableOptions {
    /// Lower bound for the chunk size, 0 disables it
    pub min_chunk_size: u64,
    pub chunk_size: ChunkSize,
    /// Send PATCH as POST with `X-HTTP-Method-Override`
    pub method_override: bool,
    pub headers: HashMap<String, String>,
    #[serde(serialize_with = "serialize_delays", deserialize_with = "deserialize_delays")]
    pub retry_delays: Vec<Duration>,
}

impl Default for ResumableOptions {
    fn default() -> Self {
        Self {
            min_chunk_size: 0,
            chunk_size: ChunkSize::Unbounded,
            method_override: false,
            headers: HashMap::new(),
            retry_delays: default_retry_delays(),
        }
    }
}

/// Options accepted by `configure_direct`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectOptions {
    pub headers: HashMap<String, String>,
}

/// Resumable transport settings after the chunk size rule is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumableConfig {
    pub chunk_size: ChunkSize,
    pub override_patch_method: bool,
    pub headers: HashMap<String, String>,
    pub retry_delays: Vec<Duration>,
}

impl From<ResumableOptions> for ResumableConfig {
    fn from(options: ResumableOptions) -> Self {
        Self {
            chunk_size: effective_chunk_size(options.min_chunk_size, options.chunk_size),
            override_patch_method: options.method_override,
            headers: options.headers,
            retry_delays: options.retry_delays,
        }
    }
}

/// Direct transport settings. Method and body encoding are fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectConfig {
    pub method: Method,
    pub form_data: bool,
    pub headers: HashMap<String, String>,
}

impl From<DirectOptions> for DirectConfig {
    fn from(options: DirectOptions) -> Self {
        Self {
            method: Method::PUT,
            form_data: false,
            headers: options.headers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Resumable,
    Direct,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resumable => f.write_str("resumable"),
            Self::Direct => f.write_str("direct"),
        }
    }
}

/// Installed transport and its effective options
#[derive(Debug, Clone, PartialEq)]
pub enum TransportStrategy {
    Resumable(ResumableConfig),
    Direct(DirectConfig),
}

impl TransportStrategy {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Resumable(_) => TransportKind::Resumable,
            Self::Direct(_) => TransportKind::Direct,
        }
    }
}

/// Snapshot of the installed transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportInfo {
    pub strategy: TransportStrategy,
    /// Changes only when a transport is freshly installed, not on reconfigure
    pub installation: u64,
}

impl TransportInfo {
    pub fn kind(&self) -> TransportKind {
        self.strategy.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_chunk_size() {
        assert_eq!(effective_chunk_size(5, ChunkSize::Bounded(10)), ChunkSize::Bounded(10));
        assert_eq!(effective_chunk_size(10, ChunkSize::Bounded(5)), ChunkSize::Bounded(10));
        assert_eq!(effective_chunk_size(10, ChunkSize::Unbounded), ChunkSize::Unbounded);
        assert_eq!(effective_chunk_size(0, ChunkSize::Bounded(5)), ChunkSize::Bounded(5));
    }

    #[test]
    fn test_next_chunk_len() {
        assert_eq!(ChunkSize::Bounded(4).next_len(0, 10), 4);
        assert_eq!(ChunkSize::Bounded(4).next_len(8, 10), 2);
        assert_eq!(ChunkSize::Unbounded.next_len(3, 10), 7);
        assert_eq!(ChunkSize::Bounded(0).next_len(0, 10), 1);
    }

    #[test]
    fn test_direct_endpoint() {
        assert_eq!(direct_endpoint("https://host/up/", "a b.txt"), "https://host/up/a%20b.txt");
        assert_eq!(direct_endpoint("https://host/up///", "x"), "https://host/up/x");
        assert_eq!(direct_endpoint("https://host/up", "dir/ü.md"), "https://host/up/dir%2F%C3%BC.md");
    }

    #[test]
    fn test_direct_config_is_fixed_put() {
        let config = DirectConfig::from(DirectOptions::default());
        assert_eq!(config.method, Method::PUT);
        assert!(!config.form_data);
    }

    #[test]
    fn test_resumable_options_from_toml() {
        let options: ResumableOptions = toml::from_str(
            r#"
            min_chunk_size = 10
            chunk_size = 5
            method_override = true
            retry_delays = [0, 250]
            "#,
        )
        .unwrap();

        assert_eq!(options.chunk_size, ChunkSize::Bounded(5));
        assert_eq!(options.retry_delays, vec![Duration::ZERO, Duration::from_millis(250)]);

        let config = ResumableConfig::from(options);
        assert_eq!(config.chunk_size, ChunkSize::Bounded(10));
        assert!(config.override_patch_method);
    }

    #[test]
    fn test_resumable_options_defaults() {
        let options: ResumableOptions = toml::from_str("").unwrap();
        assert_eq!(options.chunk_size, ChunkSize::Unbounded);
        assert_eq!(options.retry_delays, vec![Duration::ZERO]);
    }
}
