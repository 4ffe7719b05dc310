//! Configuration management for aerognosis.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "aerognosis";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "submissions.db";

/// Default blob directory name, below the data directory.
const BLOB_DIR_NAME: &str = "blobs";

/// Prefix of environment overrides; nested keys are joined with `__`.
pub const ENV_PREFIX: &str = "AEROGNOSIS_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `AEROGNOSIS_`, sections split on `__`)
/// 2. TOML config file at `~/.config/aerognosis/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Record store configuration.
    pub store: StoreConfig,
    /// Blob storage configuration.
    pub blob: BlobConfig,
    /// Inference service configuration.
    pub inference: InferenceConfig,
}

/// Record store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/aerognosis/submissions.db`
    pub database_path: Option<PathBuf>,
}

/// Which blob backend to upload to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    /// Local directory.
    #[default]
    Fs,
    /// Resumable HTTP upload endpoint.
    Http,
}

/// Blob storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Backend to use.
    pub backend: BlobBackend,
    /// Root directory for the `fs` backend.
    /// Defaults to `~/.local/share/aerognosis/blobs`
    pub root: Option<PathBuf>,
    /// Bucket endpoint for the `http` backend.
    pub endpoint: Option<String>,
    /// Base URL stored blobs are served from.
    pub public_base_url: Option<String>,
    /// Upload chunk size in bytes.
    pub chunk_size_bytes: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Fs,
            root: None,
            endpoint: None,
            public_base_url: None,
            chunk_size_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Inference service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL of the service.
    pub base_url: String,
    /// Path of the analysis endpoint.
    pub analyze_path: String,
    /// Caller-side deadline in seconds. Set to 0 to wait indefinitely.
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            analyze_path: crate::inference::DEFAULT_ANALYZE_PATH.to_string(),
            timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        let config = Self::figment(&config_file).extract::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// The layered provider stack for `config_file`.
    #[must_use]
    pub fn figment(config_file: &std::path::Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.blob.chunk_size_bytes == 0 {
            return Err(invalid("blob.chunk_size_bytes must be greater than 0"));
        }

        if self.blob.backend == BlobBackend::Http && self.blob.endpoint.is_none() {
            return Err(invalid("blob.endpoint is required for the http backend"));
        }

        check_url("blob.endpoint", self.blob.endpoint.as_deref())?;
        check_url("blob.public_base_url", self.blob.public_base_url.as_deref())?;
        check_url("inference.base_url", Some(&self.inference.base_url))?;

        if !self.inference.analyze_path.starts_with('/') {
            return Err(invalid(format!(
                "inference.analyze_path must start with '/': {}",
                self.inference.analyze_path
            )));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the blob root directory, resolving defaults if not set.
    #[must_use]
    pub fn blob_root(&self) -> PathBuf {
        self.blob
            .root
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(BLOB_DIR_NAME))
    }

    /// Get the inference deadline, if one is configured.
    #[must_use]
    pub fn inference_timeout(&self) -> Option<Duration> {
        (self.inference.timeout_secs > 0).then(|| Duration::from_secs(self.inference.timeout_secs))
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

fn check_url(key: &str, value: Option<&str>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(invalid(format!(
            "{key} must be an http(s) URL, got scheme {}",
            url.scheme()
        ))),
        Err(e) => Err(invalid(format!("{key} is not a valid URL ({value}): {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.store.database_path.is_none());
        assert_eq!(config.blob.backend, BlobBackend::Fs);
        assert_eq!(config.blob.chunk_size_bytes, 2 * 1024 * 1024);
        assert_eq!(config.inference.base_url, "http://localhost:8000");
        assert_eq!(config.inference.analyze_path, "/analyze");
        assert_eq!(config.inference.timeout_secs, 120);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_chunk_size() {
        let mut config = Config::default();
        config.blob.chunk_size_bytes = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("chunk_size_bytes"));
    }

    #[test]
    fn test_validate_http_backend_needs_endpoint() {
        let mut config = Config::default();
        config.blob.backend = BlobBackend::Http;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("blob.endpoint"));

        config.blob.endpoint = Some("https://storage.example.com/upload/b/bucket".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_urls() {
        let mut config = Config::default();
        config.inference.base_url = "not a url".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("inference.base_url"));

        let mut config = Config::default();
        config.blob.public_base_url = Some("ftp://files".to_string());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("scheme ftp"));
    }

    #[test]
    fn test_validate_analyze_path() {
        let mut config = Config::default();
        config.inference.analyze_path = "analyze".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("submissions.db"));
        assert!(path.to_string_lossy().contains("aerognosis"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.store.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_blob_root_default() {
        let config = Config::default();
        assert!(config.blob_root().ends_with("aerognosis/blobs"));
    }

    #[test]
    fn test_inference_timeout() {
        let mut config = Config::default();
        assert_eq!(config.inference_timeout(), Some(Duration::from_secs(120)));
        config.inference.timeout_secs = 0;
        assert!(config.inference_timeout().is_none());
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("aerognosis"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_from_toml_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [blob]
                backend = "http"
                endpoint = "https://storage.example.com/upload/b/scans"
                public_base_url = "https://scans.example.com"

                [inference]
                base_url = "http://toml:8000"
                timeout_secs = 30
                "#,
            )?;
            jail.set_env("AEROGNOSIS_INFERENCE__BASE_URL", "http://env:9000");
            jail.set_env("AEROGNOSIS_STORE__DATABASE_PATH", "/tmp/ledger.db");

            let config = Config::load_from(Some(PathBuf::from("config.toml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.blob.backend, BlobBackend::Http);
            assert_eq!(
                config.blob.public_base_url.as_deref(),
                Some("https://scans.example.com")
            );
            assert_eq!(config.inference.base_url, "http://env:9000");
            assert_eq!(config.inference.timeout_secs, 30);
            assert_eq!(config.database_path(), PathBuf::from("/tmp/ledger.db"));
            assert_eq!(config.blob.chunk_size_bytes, 2 * 1024 * 1024);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[blob]\nchunk_size_bytes = 0\n")?;
            let err = Config::load_from(Some(PathBuf::from("config.toml"))).unwrap_err();
            assert!(matches!(err, Error::ConfigValidation { .. }));
            Ok(())
        });
    }

    #[test]
    fn test_config_serializes_to_toml_keys() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["blob"]["backend"], "fs");
        assert!(json["inference"]["analyze_path"].is_string());
    }
}
