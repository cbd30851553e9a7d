// src/config.rs

//! Configuration management for the storage clients.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Minimum size the store accepts for any non-terminal upload part.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum size of a single upload part.
pub const MAX_PART_SIZE: usize = 5 * 1024 * 1024 * 1024;

// Top-level storage client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub object: ObjectStoreConfig,
    pub table: TableStoreConfig,
    pub retry: RetrySettings,
}

/// Object store (bucket) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Bucket that holds all runtime payloads.
    pub bucket: String,
    /// Region of the bucket (e.g. "us-east-1").
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Size (bytes) of each upload chunk; every part except the last is
    /// exactly this large.
    pub part_size: usize,
    /// Number of chunk buffers the pool keeps for reuse.
    pub pool_capacity: usize,
    /// Optional upload session timeout (milliseconds); a session that is
    /// still open when it expires is aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_timeout_ms: Option<u64>,
    /// Whether to use path-style addressing (required for MinIO).
    pub force_path_style: bool,
    /// Whether to allow HTTP (non-TLS) connections.
    pub allow_http: bool,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            part_size: MIN_PART_SIZE,
            pool_capacity: 8,
            upload_timeout_ms: None,
            force_path_style: false,
            allow_http: false,
        }
    }
}

impl ObjectStoreConfig {
    /// Upload timeout as a `Duration`, when configured.
    pub fn upload_timeout(&self) -> Option<Duration> {
        self.upload_timeout_ms.map(Duration::from_millis)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("RTS_OBJECT_BUCKET") {
            self.bucket = val;
        }
        if let Ok(val) = std::env::var("RTS_OBJECT_REGION") {
            self.region = val;
        }
        if let Ok(val) = std::env::var("RTS_OBJECT_ENDPOINT") {
            self.endpoint = Some(val);
        }
        if let Ok(val) = std::env::var("RTS_OBJECT_PART_SIZE") {
            if let Ok(v) = val.parse() {
                self.part_size = v;
            }
        }
        if let Ok(val) = std::env::var("RTS_OBJECT_POOL_CAPACITY") {
            if let Ok(v) = val.parse() {
                self.pool_capacity = v;
            }
        }
        if let Ok(val) = std::env::var("RTS_OBJECT_UPLOAD_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.upload_timeout_ms = Some(v);
            }
        }
        if let Ok(val) = std::env::var("RTS_OBJECT_FORCE_PATH_STYLE") {
            if let Ok(v) = val.parse() {
                self.force_path_style = v;
            }
        }
        if let Ok(val) = std::env::var("RTS_OBJECT_ALLOW_HTTP") {
            if let Ok(v) = val.parse() {
                self.allow_http = v;
            }
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(StoreError::config("object.bucket must not be empty"));
        }
        if self.region.is_empty() {
            return Err(StoreError::config("object.region must not be empty"));
        }
        if self.part_size < MIN_PART_SIZE {
            return Err(StoreError::config(
                "object.part_size must be at least 5 MB (store minimum)",
            ));
        }
        if self.part_size > MAX_PART_SIZE {
            return Err(StoreError::config(
                "object.part_size must be at most 5 GB (store maximum)",
            ));
        }
        if self.pool_capacity == 0 {
            return Err(StoreError::config(
                "object.pool_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

// Table store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStoreConfig {
    // Table that holds the runtime's shared records.
    pub table: String,
    // Optional cap on conditional-update attempts; absent means retry
    // until the write goes through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_transact_attempts: Option<u32>,
    // Delay (milliseconds) between conditional-update attempts; 0 retries
    // immediately.
    pub transact_backoff_ms: u64,
}

impl Default for TableStoreConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            max_transact_attempts: None,
            transact_backoff_ms: 0,
        }
    }
}

impl TableStoreConfig {
    fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("RTS_TABLE_NAME") {
            self.table = val;
        }
        if let Ok(val) = std::env::var("RTS_TABLE_MAX_TRANSACT_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                self.max_transact_attempts = Some(v);
            }
        }
        if let Ok(val) = std::env::var("RTS_TABLE_TRANSACT_BACKOFF_MS") {
            if let Ok(v) = val.parse() {
                self.transact_backoff_ms = v;
            }
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(StoreError::config("table.table must not be empty"));
        }
        if self.max_transact_attempts == Some(0) {
            return Err(StoreError::config(
                "table.max_transact_attempts must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}

/// Retry knobs for the bootstrap `RetryPolicy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of retries for transient bootstrap failures.
    pub max_retries: u32,
    /// Initial delay (milliseconds) between retries.
    pub retry_delay_ms: u64,
    /// Maximum delay (milliseconds) between retries.
    pub max_retry_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 100,
            max_retry_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("RTS_RETRY_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                self.max_retries = v;
            }
        }
        if let Ok(val) = std::env::var("RTS_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.retry_delay_ms = v;
            }
        }
        if let Ok(val) = std::env::var("RTS_RETRY_MAX_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.max_retry_delay_ms = v;
            }
        }
        self
    }
}

impl FromStr for StoreConfig {
    type Err = StoreError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| StoreError::config_with_source("failed to parse TOML config", e))
    }
}

impl StoreConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::config_with_source(
                format!("failed to read config file {}", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `RTS_`:
    // - `RTS_OBJECT_BUCKET` overrides `object.bucket`
    // - `RTS_OBJECT_PART_SIZE` overrides `object.part_size`
    // - `RTS_TABLE_NAME` overrides `table.table`
    // - `RTS_RETRY_MAX_RETRIES` overrides `retry.max_retries`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.object = self.object.with_env_overrides();
        self.table = self.table.with_env_overrides();
        self.retry = self.retry.with_env_overrides();
        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        self.object.validate()?;
        self.table.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();

        assert!(config.object.bucket.is_empty());
        assert_eq!(config.object.region, "us-east-1");
        assert_eq!(config.object.part_size, MIN_PART_SIZE);
        assert_eq!(config.object.pool_capacity, 8);
        assert!(config.object.upload_timeout_ms.is_none());

        assert!(config.table.table.is_empty());
        assert!(config.table.max_transact_attempts.is_none());
        assert_eq!(config.table.transact_backoff_ms, 0);

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.retry_delay_ms, 100);
    }

    #[test]
    fn test_from_str_partial() {
        let toml = r#"
            [object]
            bucket = "runtime-data"
            part_size = 8388608
        "#;
        let config: StoreConfig = toml.parse().unwrap();

        assert_eq!(config.object.bucket, "runtime-data");
        assert_eq!(config.object.part_size, 8 * 1024 * 1024);
        // Untouched sections keep defaults
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_from_str_full() {
        let toml = r#"
            [object]
            bucket = "runtime-data"
            region = "eu-west-1"
            endpoint = "http://localhost:9000"
            part_size = 5242880
            pool_capacity = 4
            upload_timeout_ms = 600000
            force_path_style = true
            allow_http = true

            [table]
            table = "runtime-records"
            max_transact_attempts = 50
            transact_backoff_ms = 10

            [retry]
            max_retries = 3
            retry_delay_ms = 200
            max_retry_delay_ms = 5000
        "#;

        let config: StoreConfig = toml.parse().unwrap();
        config.validate().unwrap();

        assert_eq!(config.object.region, "eu-west-1");
        assert_eq!(config.object.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(
            config.object.upload_timeout(),
            Some(Duration::from_millis(600_000))
        );
        assert!(config.object.force_path_style);
        assert_eq!(config.table.max_transact_attempts, Some(50));
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<StoreConfig, _> = "object = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [object]
            bucket = "b"

            [table]
            table = "t"
            "#
        )
        .unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.object.bucket, "b");
        assert_eq!(config.table.table, "t");
    }

    #[test]
    fn test_from_file_not_found() {
        assert!(StoreConfig::from_file("/nonexistent/store.toml").is_err());
    }

    #[test]
    fn test_validate_empty_bucket() {
        let mut config = StoreConfig::default();
        config.table.table = "t".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("bucket"));
    }

    #[test]
    fn test_validate_part_size_too_small() {
        let mut config = StoreConfig::default();
        config.object.bucket = "b".to_string();
        config.table.table = "t".to_string();
        config.object.part_size = 1024;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("5 MB"));
    }

    #[test]
    fn test_validate_zero_transact_attempts() {
        let mut config = StoreConfig::default();
        config.object.bucket = "b".to_string();
        config.table.table = "t".to_string();
        config.table.max_transact_attempts = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_success() {
        let mut config = StoreConfig::default();
        config.object.bucket = "b".to_string();
        config.table.table = "t".to_string();
        assert!(config.validate().is_ok());
    }

    // Env var tests run in one function; env vars are process-global state.
    #[test]
    fn test_env_overrides() {
        for (key, _) in std::env::vars() {
            if key.starts_with("RTS_") {
                std::env::remove_var(&key);
            }
        }

        std::env::set_var("RTS_OBJECT_BUCKET", "env-bucket");
        std::env::set_var("RTS_OBJECT_PART_SIZE", "16777216");
        std::env::set_var("RTS_TABLE_NAME", "env-table");
        std::env::set_var("RTS_RETRY_MAX_RETRIES", "9");

        let config = StoreConfig::default().with_env_overrides();
        assert_eq!(config.object.bucket, "env-bucket");
        assert_eq!(config.object.part_size, 16 * 1024 * 1024);
        assert_eq!(config.table.table, "env-table");
        assert_eq!(config.retry.max_retries, 9);

        std::env::set_var("RTS_OBJECT_PART_SIZE", "not_a_number");
        let config = StoreConfig::default().with_env_overrides();
        // Unparseable values are ignored
        assert_eq!(config.object.part_size, MIN_PART_SIZE);

        for (key, _) in std::env::vars() {
            if key.starts_with("RTS_") {
                std::env::remove_var(&key);
            }
        }
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = StoreConfig::default();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: StoreConfig = toml_str.parse().unwrap();

        assert_eq!(original.object.part_size, parsed.object.part_size);
        assert_eq!(original.retry.max_retries, parsed.retry.max_retries);
    }
}
