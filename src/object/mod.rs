// src/object/mod.rs

//! Object store sessions for large runtime payloads.
//!
//! This module provides the two streaming primitives the runtime uses
//! against a remote object store, both built on the [`ObjectStoreClient`]
//! capability trait:
//!
//! - [`ChunkedUploadSession`]: a write-only stream that buffers bytes into
//!   fixed-size chunks and uploads each chunk as an independent multipart
//!   part, finalizing the object on close.
//! - [`RangeReadSession`]: a seekable read stream pinned to one object
//!   version, re-issuing ranged requests on seek.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use runtime_store::object::{
//!     ChunkedUploadSession, InMemoryObjectStore, ObjectStoreClient, RangeReadSession,
//!     UploadOptions,
//! };
//! use runtime_store::pool::BufferPool;
//!
//! # async fn example() -> runtime_store::Result<()> {
//! let client: Arc<dyn ObjectStoreClient> =
//!     Arc::new(InMemoryObjectStore::with_bucket("payloads"));
//! let pool = Arc::new(BufferPool::new(5 * 1024 * 1024, 8));
//!
//! let mut upload = ChunkedUploadSession::open(
//!     client.clone(),
//!     pool,
//!     "payloads",
//!     "job-42/result.bin",
//!     UploadOptions::default(),
//! )
//! .await?;
//! upload.write(b"payload bytes")?;
//! let etag = upload.close().await?;
//!
//! let mut read = RangeReadSession::open(client, "payloads", "job-42/result.bin").await?;
//! assert_eq!(read.etag(), etag);
//! let _contents = read.read_to_end().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod memory;
mod read;
mod upload;

pub use client::{ByteStream, CompletedPart, ObjectBody, ObjectStoreClient};
pub use memory::InMemoryObjectStore;
pub use read::RangeReadSession;
pub use upload::{ChunkedUploadSession, UploadOptions};

// S3 backend (requires feature flag)
#[cfg(feature = "aws")]
mod s3;

#[cfg(feature = "aws")]
pub use s3::S3ObjectStore;
