// src/object/read.rs

//! Ranged read session.
//!
//! Opens a remote object once, pinning its content tag and total length,
//! then serves sequential reads from the open body stream. Seeking drops
//! the stream and issues a fresh ranged GET from the target offset to the
//! end of the object, still constrained to the pinned tag: if the object
//! was overwritten since the session opened, the store rejects the request
//! and the error reaches the caller unchanged.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use futures::StreamExt;

use super::client::{ByteStream, ObjectStoreClient};
use crate::error::{Result, StoreError};

/// Seekable, read-only view of one remote object version.
pub struct RangeReadSession {
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    key: String,
    total_length: u64,
    etag: String,
    position: u64,
    stream: ByteStream,
    pending: Bytes,
    closed: AtomicBool,
}

impl RangeReadSession {
    /// Opens the object, capturing its length and content tag.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist.
    pub async fn open(
        client: Arc<dyn ObjectStoreClient>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        let body = client.get_object(&bucket, &key, None, None).await?;

        Ok(Self {
            client,
            bucket,
            key,
            total_length: body.content_length,
            etag: body.etag,
            position: 0,
            stream: body.stream,
            pending: Bytes::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Total length of the object in bytes.
    pub fn len(&self) -> u64 {
        self.total_length
    }

    /// True for a zero-length object.
    pub fn is_empty(&self) -> bool {
        self.total_length == 0
    }

    /// Content tag pinned when the session opened.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Logical offset of the next byte `read` will return.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads up to `buf.len()` bytes, advancing the position.
    ///
    /// Returns `Ok(0)` only at end of stream.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` after `close`; stream errors (including a pinned
    /// tag that no longer matches) propagate unchanged.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::disposed("read session"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                self.position += n as u64;
                return Ok(n);
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(error)) => return Err(error),
                None => return Ok(0),
            }
        }
    }

    /// Reads from the current position through the end of the object.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Moves the read cursor, reopening the ranged stream from the target
    /// offset. Returns the new absolute position.
    ///
    /// `Start` and `Current` origins are supported; seeking relative to the
    /// end is not offered by the store interface and fails with
    /// `Unsupported`. Seeking at or past the end is not an error: the
    /// session installs an empty stream and subsequent reads return 0.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` after `close`, `Unsupported` for end-relative
    /// seeks, a store error for a negative target, and any store error for
    /// the reopened range (notably a pinned-tag mismatch).
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::disposed("read session"));
        }

        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(_) => {
                return Err(StoreError::unsupported("seek relative to end of object"));
            }
        };
        if target < 0 {
            return Err(StoreError::object_store(
                &self.bucket,
                &self.key,
                "seek to a negative offset",
            ));
        }
        let target = target as u64;

        self.pending = Bytes::new();
        if target >= self.total_length {
            // Nothing left to read; no remote call needed
            self.stream = Box::pin(futures::stream::empty::<Result<Bytes>>());
        } else {
            let body = self
                .client
                .get_object(
                    &self.bucket,
                    &self.key,
                    Some(target..self.total_length),
                    Some(&self.etag),
                )
                .await?;
            self.stream = body.stream;
        }

        self.position = target;
        Ok(target)
    }

    /// Releases the underlying stream. Idempotent; the second call is a
    /// no-op.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stream = Box::pin(futures::stream::empty::<Result<Bytes>>());
        self.pending = Bytes::new();
    }
}
