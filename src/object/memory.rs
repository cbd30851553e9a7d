// src/object/memory.rs

//! In-memory object store.
//!
//! A process-local implementation of [`ObjectStoreClient`] with the same
//! observable semantics as a real bucket: multipart uploads are invisible
//! until completed, completion requires at least one part, and ranged reads
//! honor `if_match` tags. Tests use it directly and can inject part-upload
//! latency and failures.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use twox_hash::XxHash64;

use super::client::{ByteStream, CompletedPart, ObjectBody, ObjectStoreClient};
use crate::error::{Result, StoreError};

/// Size of the chunks an in-memory body stream yields. Small enough that
/// multi-chunk streaming paths are exercised by ordinary tests.
const STREAM_CHUNK: usize = 1024;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    part_sizes: Vec<usize>,
}

struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, HashMap<String, StoredObject>>,
    uploads: HashMap<String, PendingUpload>,
    next_upload_id: u64,
}

/// In-memory [`ObjectStoreClient`] implementation.
#[derive(Default)]
pub struct InMemoryObjectStore {
    state: Mutex<State>,
    completes: AtomicUsize,
    aborts: AtomicUsize,
    // Fault injection knobs for tests
    fail_part_number: Mutex<Option<u32>>,
    part_delay: Mutex<Option<Duration>>,
    list_misses: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the store with a bucket already present.
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::default();
        store
            .state
            .lock()
            .expect("object store lock poisoned")
            .buckets
            .insert(bucket.to_string(), HashMap::new());
        store
    }

    /// Number of `complete_multipart` calls observed.
    pub fn completes(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }

    /// Number of `abort_multipart` calls observed.
    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Makes every upload of the given part number fail.
    pub fn set_fail_part(&self, part_number: u32) {
        *self.fail_part_number.lock().expect("object store lock poisoned") = Some(part_number);
    }

    /// Delays every part upload by the given duration.
    pub fn set_part_delay(&self, delay: Duration) {
        *self.part_delay.lock().expect("object store lock poisoned") = Some(delay);
    }

    /// Makes the next `n` list calls report the bucket as missing, mimicking
    /// a just-created bucket that is not yet visible.
    pub fn set_list_misses(&self, n: usize) {
        self.list_misses.store(n, Ordering::SeqCst);
    }

    /// Sizes of the parts that made up a completed object, in part order.
    pub fn object_part_sizes(&self, bucket: &str, key: &str) -> Option<Vec<usize>> {
        let state = self.state.lock().expect("object store lock poisoned");
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.part_sizes.clone())
    }

    /// Full contents of a stored object, bypassing the streaming path.
    pub fn object_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().expect("object store lock poisoned");
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.data.clone())
    }

    fn content_tag(data: &[u8]) -> String {
        use std::hash::Hasher;
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(data);
        format!("{:016x}", hasher.finish())
    }
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn initiate_multipart(&self, bucket: &str, key: &str) -> Result<String> {
        let mut state = self.state.lock().expect("object store lock poisoned");
        if !state.buckets.contains_key(bucket) {
            return Err(StoreError::not_found(bucket, ""));
        }
        state.next_upload_id += 1;
        let upload_id = format!("upload-{:08}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String> {
        let delay = *self.part_delay.lock().expect("object store lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fail = *self.fail_part_number.lock().expect("object store lock poisoned");
        if fail == Some(part_number) {
            return Err(StoreError::object_store(
                bucket,
                key,
                format!("injected failure uploading part {}", part_number),
            ));
        }

        let mut state = self.state.lock().expect("object store lock poisoned");
        let upload = state.uploads.get_mut(upload_id).ok_or_else(|| {
            StoreError::object_store(bucket, key, format!("unknown upload id {}", upload_id))
        })?;
        let etag = Self::content_tag(&body);
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        self.completes.fetch_add(1, Ordering::SeqCst);

        if parts.is_empty() {
            return Err(StoreError::object_store(
                bucket,
                key,
                "multipart completion requires at least one part",
            ));
        }

        let mut state = self.state.lock().expect("object store lock poisoned");
        let upload = state.uploads.remove(upload_id).ok_or_else(|| {
            StoreError::object_store(bucket, key, format!("unknown upload id {}", upload_id))
        })?;

        let mut data = Vec::new();
        let mut part_sizes = Vec::with_capacity(parts.len());
        for (expected_number, part) in (1u32..).zip(parts.iter()) {
            if part.part_number != expected_number {
                return Err(StoreError::object_store(
                    bucket,
                    key,
                    format!("part numbers are not dense at part {}", part.part_number),
                ));
            }
            let (stored_tag, bytes) = upload.parts.get(&part.part_number).ok_or_else(|| {
                StoreError::object_store(
                    bucket,
                    key,
                    format!("part {} was never uploaded", part.part_number),
                )
            })?;
            if stored_tag != &part.etag {
                return Err(StoreError::object_store(
                    bucket,
                    key,
                    format!("part {} tag mismatch", part.part_number),
                ));
            }
            part_sizes.push(bytes.len());
            data.extend_from_slice(bytes);
        }

        let etag = Self::content_tag(&data);
        let object = StoredObject {
            data: Bytes::from(data),
            etag: etag.clone(),
            part_sizes,
        };
        state
            .buckets
            .entry(upload.bucket)
            .or_default()
            .insert(upload.key, object);
        Ok(etag)
    }

    async fn abort_multipart(&self, _bucket: &str, _key: &str, upload_id: &str) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().expect("object store lock poisoned");
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<Range<u64>>,
        if_match: Option<&str>,
    ) -> Result<ObjectBody> {
        let state = self.state.lock().expect("object store lock poisoned");
        let object = state
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(bucket, key))?;
        drop(state);

        if let Some(expected) = if_match {
            if expected != object.etag {
                return Err(StoreError::object_store(
                    bucket,
                    key,
                    "precondition failed: object tag changed since it was pinned",
                ));
            }
        }

        let total = object.data.len() as u64;
        let window = match range {
            Some(range) => {
                let start = range.start.min(total) as usize;
                let end = range.end.min(total) as usize;
                object.data.slice(start..end.max(start))
            }
            None => object.data.clone(),
        };

        let chunks: Vec<Result<Bytes>> = window
            .chunks(STREAM_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));

        Ok(ObjectBody {
            content_length: total,
            etag: object.etag,
            stream,
        })
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        let mut state = self.state.lock().expect("object store lock poisoned");
        if let Some(objects) = state.buckets.get_mut(bucket) {
            for key in keys {
                objects.remove(key);
            }
        }
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.state.lock().expect("object store lock poisoned");
        if state.buckets.contains_key(bucket) {
            return Err(StoreError::object_store(
                bucket,
                "",
                "bucket already exists",
            ));
        }
        state.buckets.insert(bucket.to_string(), HashMap::new());
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
        let misses = self.list_misses.load(Ordering::SeqCst);
        if misses > 0 {
            self.list_misses.store(misses - 1, Ordering::SeqCst);
            return Err(StoreError::not_found(bucket, ""));
        }

        let state = self.state.lock().expect("object store lock poisoned");
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| StoreError::not_found(bucket, ""))?;
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn put_object(store: &InMemoryObjectStore, bucket: &str, key: &str, data: &[u8]) {
        let upload_id = store.initiate_multipart(bucket, key).await.unwrap();
        let etag = store
            .upload_part(bucket, key, &upload_id, 1, Bytes::copy_from_slice(data))
            .await
            .unwrap();
        store
            .complete_multipart(
                bucket,
                key,
                &upload_id,
                &[CompletedPart {
                    part_number: 1,
                    etag,
                }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_multipart_roundtrip() {
        let store = InMemoryObjectStore::with_bucket("b");
        put_object(&store, "b", "k", b"hello world").await;

        let body = store.get_object("b", "k", None, None).await.unwrap();
        assert_eq!(body.content_length, 11);
        assert_eq!(collect(body.stream).await, b"hello world");
    }

    #[tokio::test]
    async fn test_upload_invisible_until_complete() {
        let store = InMemoryObjectStore::with_bucket("b");
        let upload_id = store.initiate_multipart("b", "k").await.unwrap();
        store
            .upload_part("b", "k", &upload_id, 1, Bytes::from_static(b"data"))
            .await
            .unwrap();

        let err = store.get_object("b", "k", None, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_complete_rejects_empty_part_list() {
        let store = InMemoryObjectStore::with_bucket("b");
        let upload_id = store.initiate_multipart("b", "k").await.unwrap();
        let err = store
            .complete_multipart("b", "k", &upload_id, &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least one part"));
    }

    #[tokio::test]
    async fn test_complete_rejects_sparse_part_numbers() {
        let store = InMemoryObjectStore::with_bucket("b");
        let upload_id = store.initiate_multipart("b", "k").await.unwrap();
        let etag = store
            .upload_part("b", "k", &upload_id, 2, Bytes::from_static(b"data"))
            .await
            .unwrap();
        let err = store
            .complete_multipart(
                "b",
                "k",
                &upload_id,
                &[CompletedPart {
                    part_number: 2,
                    etag,
                }],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not dense"));
    }

    #[tokio::test]
    async fn test_get_range() {
        let store = InMemoryObjectStore::with_bucket("b");
        put_object(&store, "b", "k", b"0123456789").await;

        let body = store.get_object("b", "k", Some(4..8), None).await.unwrap();
        assert_eq!(body.content_length, 10);
        assert_eq!(collect(body.stream).await, b"4567");
    }

    #[tokio::test]
    async fn test_get_range_clamped_past_end() {
        let store = InMemoryObjectStore::with_bucket("b");
        put_object(&store, "b", "k", b"0123456789").await;

        let body = store
            .get_object("b", "k", Some(20..u64::MAX), None)
            .await
            .unwrap();
        assert!(collect(body.stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_if_match_mismatch() {
        let store = InMemoryObjectStore::with_bucket("b");
        put_object(&store, "b", "k", b"v1").await;

        let err = store
            .get_object("b", "k", None, Some("stale-tag"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("precondition failed"));
    }

    #[tokio::test]
    async fn test_injected_part_failure() {
        let store = InMemoryObjectStore::with_bucket("b");
        store.set_fail_part(2);
        let upload_id = store.initiate_multipart("b", "k").await.unwrap();
        store
            .upload_part("b", "k", &upload_id, 1, Bytes::from_static(b"ok"))
            .await
            .unwrap();
        let err = store
            .upload_part("b", "k", &upload_id, 2, Bytes::from_static(b"no"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"));
    }

    #[tokio::test]
    async fn test_delete_ignores_missing_keys() {
        let store = InMemoryObjectStore::with_bucket("b");
        put_object(&store, "b", "k", b"v").await;
        store
            .delete_objects("b", &["k".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert!(store.list_objects("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_bucket_conflict() {
        let store = InMemoryObjectStore::with_bucket("b");
        let err = store.create_bucket("b").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_list_misses_simulate_lag() {
        let store = InMemoryObjectStore::with_bucket("b");
        store.set_list_misses(1);
        assert!(store.list_objects("b").await.unwrap_err().is_not_found());
        assert!(store.list_objects("b").await.is_ok());
    }
}
