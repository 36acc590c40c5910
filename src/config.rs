//! Configuration management for the S3 sink

use serde::Deserialize;
use std::env;
use std::path::Path;

use crate::error::ConfigError;
use crate::upload::{DEFAULT_PART_SIZE, S3_MIN_PART_SIZE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Custom endpoint for S3-compatible services; AWS is used when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    pub bucket: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Prepended to every object key written through the sink
    #[serde(default)]
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Minio,
    R2,
    #[default]
    S3,
    B2,
}

impl std::str::FromStr for StorageProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minio" => Ok(StorageProvider::Minio),
            "r2" => Ok(StorageProvider::R2),
            "s3" => Ok(StorageProvider::S3),
            "b2" => Ok(StorageProvider::B2),
            other => Err(ConfigError::Invalid {
                name: "S3_PROVIDER",
                reason: format!("unknown provider '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UploadConfig {
    /// Size of every non-final part, in bytes
    #[serde(default = "default_part_size")]
    pub min_part_size: usize,
    /// Part uploads kept in flight at once
    #[serde(default = "default_concurrency")]
    pub max_concurrent_parts: usize,
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    1
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            min_part_size: DEFAULT_PART_SIZE,
            max_concurrent_parts: 1,
        }
    }
}

impl UploadConfig {
    /// Check the settings against the limits of S3 multipart uploads
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_part_size < S3_MIN_PART_SIZE {
            return Err(ConfigError::Invalid {
                name: "min_part_size",
                reason: format!(
                    "{} bytes is below the store minimum of {} bytes",
                    self.min_part_size, S3_MIN_PART_SIZE
                ),
            });
        }

        if self.max_concurrent_parts == 0 {
            return Err(ConfigError::Invalid {
                name: "max_concurrent_parts",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = match lookup("S3_PROVIDER") {
            Some(value) => value.parse()?,
            None => StorageProvider::default(),
        };

        let mut upload = UploadConfig::default();
        if let Some(value) = lookup("UPLOAD_MIN_PART_SIZE") {
            upload.min_part_size = parse_number("UPLOAD_MIN_PART_SIZE", &value)?;
        }
        if let Some(value) = lookup("UPLOAD_MAX_CONCURRENT_PARTS") {
            upload.max_concurrent_parts = parse_number("UPLOAD_MAX_CONCURRENT_PARTS", &value)?;
        }

        let config = Config {
            storage: StorageConfig {
                provider,
                endpoint: lookup("S3_ENDPOINT"),
                bucket: lookup("S3_BUCKET").ok_or(ConfigError::Missing("S3_BUCKET"))?,
                access_key: lookup("S3_ACCESS_KEY"),
                secret_key: lookup("S3_SECRET_KEY"),
                region: lookup("S3_REGION"),
                key_prefix: lookup("S3_KEY_PREFIX"),
            },
            upload,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("S3_BUCKET"));
        }
        self.upload.validate()
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("'{}': {}", value, e),
    })
}
