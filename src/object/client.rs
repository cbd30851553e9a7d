// src/object/client.rs

//! Object store client capability.
//!
//! This module defines the async interface the upload/read sessions consume.
//! Implementations can target S3-compatible services or the in-memory store
//! used in tests; the sessions never talk to a concrete SDK directly.

use std::ops::Range;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::Result;

/// A streaming object body, yielded chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A finished part of a multipart upload: its 1-based number and the tag
/// the store issued for it. Part number, not completion order, determines
/// assembly order at finalize time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// An open GET response: total length of the returned range's object, the
/// object's content identity tag, and the body stream.
pub struct ObjectBody {
    /// Full length of the object in bytes (not the range length).
    pub content_length: u64,
    /// Content identity tag of the object version being read.
    pub etag: String,
    /// Body of the requested range.
    pub stream: ByteStream,
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_length", &self.content_length)
            .field("etag", &self.etag)
            .field("stream", &"<stream>")
            .finish()
    }
}

/// The object store operations the sessions are built on.
///
/// Multipart uploads follow the usual three-phase shape: initiate, upload
/// parts (any order, 1-based dense numbering), then complete with the full
/// part list or abort. `create_bucket`, `list_objects`, and `delete_objects`
/// exist for bootstrap and cleanup only.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Starts a multipart upload and returns its upload id.
    async fn initiate_multipart(&self, bucket: &str, key: &str) -> Result<String>;

    /// Uploads one part and returns the store-issued part tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload id is unknown or the transfer fails.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String>;

    /// Combines the uploaded parts, in part-number order, into the final
    /// object and returns the object's tag.
    ///
    /// # Errors
    ///
    /// Returns an error if any listed part is missing or the part list is
    /// empty (the store requires at least one part).
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String>;

    /// Abandons a multipart upload, releasing its parts server-side.
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    /// Opens an object for streaming, optionally constrained to a byte
    /// range and to a specific object version via `if_match`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing object, and a store error when the
    /// `if_match` tag no longer matches the live object.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<Range<u64>>,
        if_match: Option<&str>,
    ) -> Result<ObjectBody>;

    /// Deletes a batch of objects. Missing keys are not an error.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;

    /// Creates a bucket (bootstrap only).
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Lists the keys currently in a bucket (bootstrap only).
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_part_ordering_by_number() {
        let mut parts = vec![
            CompletedPart {
                part_number: 3,
                etag: "c".to_string(),
            },
            CompletedPart {
                part_number: 1,
                etag: "a".to_string(),
            },
            CompletedPart {
                part_number: 2,
                etag: "b".to_string(),
            },
        ];
        parts.sort_by_key(|p| p.part_number);
        let tags: Vec<_> = parts.iter().map(|p| p.etag.as_str()).collect();
        assert_eq!(tags, ["a", "b", "c"]);
    }
}
