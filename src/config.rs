//! Settings for the command line uploader

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use serde::Deserialize;
use crate::core::{
    DirectOptions, FileMeta, FileSource, ManagerConfig, NewFile, Restrictions, ResumableOptions, Result,
};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Which transport the uploader installs, tagged by `kind`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSection {
    Resumable(ResumableOptions),
    Direct(DirectOptions),
}

impl Default for TransportSection {
    fn default() -> Self {
        Self::Resumable(ResumableOptions::default())
    }
}

fn default_auto_proceed() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Sent as a bearer token with every request
    pub token: Option<String>,
    #[serde(default = "default_auto_proceed")]
    pub auto_proceed: bool,
    #[serde(default)]
    pub max_concurrent: usize,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub restrictions: Restrictions,
    /// Extra upload metadata attached to every file
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Config {
    pub fn from_str(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Config> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            auto_proceed: self.auto_proceed,
            restrictions: self.restrictions.clone(),
            max_concurrent: self.max_concurrent,
            ..ManagerConfig::default()
        }
    }

    /// One `NewFile` per configured path, named after the last path component.
    pub fn new_files(&self) -> Vec<NewFile> {
        self.files
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());

                let mut meta = FileMeta::new(&self.endpoint);
                meta.extra = self.metadata.clone();
                if let Some(token) = &self.token {
                    meta = meta.with_header("Authorization", format!("Bearer {}", token));
                }

                NewFile::new(name, FileSource::Path(path.clone()), meta)
            })
            .collect()
    }
}

/// Load the config once; later calls return the cached value.
pub fn init_config(path: impl AsRef<Path>) -> Result<&'static Config> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = Config::load_from(path)?;
    Ok(CONFIG.get_or_init(|| config))
}

pub fn get_config() -> Option<&'static Config> {
    CONFIG.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::core::ChunkSize;

    #[test]
    fn test_parse_resumable_config() {
        let config = Config::from_str(
            r#"
            endpoint = "https://files.example.com/tus/"
            files = ["/tmp/a.bin", "notes/b.txt"]
            token = "secret"
            max_concurrent = 2

            [transport]
            kind = "resumable"
            chunk_size = 1024
            min_chunk_size = 4096
            retry_delays = [0, 1500]

            [restrictions]
            max_file_size = 10485760

            [metadata]
            space = "personal"
            "#,
        )
        .unwrap();

        assert!(config.auto_proceed);
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.restrictions.max_file_size, Some(10 * 1024 * 1024));

        match &config.transport {
            TransportSection::Resumable(options) => {
                assert_eq!(options.chunk_size, ChunkSize::Bounded(1024));
                assert_eq!(options.min_chunk_size, 4096);
                assert_eq!(
                    options.retry_delays,
                    vec![Duration::ZERO, Duration::from_millis(1500)]
                );
            }
            other => panic!("unexpected transport: {:?}", other),
        }

        let files = config.new_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.bin");
        assert_eq!(files[1].name, "b.txt");
        assert_eq!(files[1].meta.endpoint, "https://files.example.com/tus/");
        assert_eq!(files[1].meta.headers["Authorization"], "Bearer secret");
        assert_eq!(files[1].meta.extra["space"], "personal");
    }

    #[test]
    fn test_parse_direct_config_with_defaults() {
        let config = Config::from_str(
            r#"
            endpoint = "https://files.example.com/dav/"
            auto_proceed = false

            [transport]
            kind = "direct"
            headers = { "X-Space" = "shared" }
            "#,
        )
        .unwrap();

        assert!(!config.auto_proceed);
        assert!(config.files.is_empty());
        assert!(config.token.is_none());
        assert_eq!(
            config.transport,
            TransportSection::Direct(DirectOptions {
                headers: HashMap::from([("X-Space".to_string(), "shared".to_string())]),
            })
        );
        assert!(!config.manager_config().auto_proceed);
    }

    #[test]
    fn test_missing_transport_defaults_to_resumable() {
        let config = Config::from_str(r#"endpoint = "http://localhost:1080/files/""#).unwrap();
        assert_eq!(config.transport, TransportSection::default());
    }

    #[test]
    fn test_invalid_config() {
        assert!(Config::from_str("files = []").is_err());

        let missing = Config::load_from("/definitely/not/here/config.toml");
        assert!(matches!(missing, Err(crate::core::UploadError::Io(_))));
    }

    #[test]
    fn test_init_config_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, r#"endpoint = "http://localhost:1080/files/""#).unwrap();

        let first = init_config(&path).unwrap();
        let second = init_config("/definitely/not/here/config.toml").unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(get_config().is_some());
    }
}
