// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {

    #[error("Object store error for '{bucket}/{key}': {message}")]
    ObjectStore {
        bucket: String,
        key: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Table store error for '{table}': {message}")]
    TableStore {
        table: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Object '{bucket}/{key}' not found")]
    NotFound {
        bucket: String,
        key: String,
    },

    #[error("{resource} is closed")]
    Disposed {
        resource: &'static str,
    },

    #[error("Operation not supported: {operation}")]
    Unsupported {
        operation: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Update of '{table}' still contended after {attempts} attempts")]
    Contention {
        table: String,
        attempts: u32,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

// Convenience constructors
impl StoreError {

    pub fn object_store(
        bucket: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ObjectStore {
            bucket: bucket.into(),
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn object_store_with_source(
        bucket: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ObjectStore {
            bucket: bucket.into(),
            key: key.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn table_store(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TableStore {
            table: table.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn table_store_with_source(
        table: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TableStore {
            table: table.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn disposed(resource: &'static str) -> Self {
        Self::Disposed { resource }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn contention(table: impl Into<String>, attempts: u32) -> Self {
        Self::Contention {
            table: table.into(),
            attempts,
        }
    }

    /// True for the missing-object case, which best-effort cleanup treats
    /// as a no-op.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
