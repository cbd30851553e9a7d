// src/object/upload.rs

//! Chunked multipart upload session.
//!
//! Bytes written to the session accumulate in a pooled chunk buffer. Each
//! time the buffer fills to exactly the chunk size it is dispatched as the
//! next part on an independent task, so part uploads overlap with further
//! writes and with each other. Closing the session flushes the trailing
//! partial chunk, waits for every dispatched part, and issues a single
//! finalize call; aborting (explicitly or via the session timeout) abandons
//! the upload instead. Close and abort race through one atomic tri-state, so
//! exactly one of {finalize, abort} runs the terminal remote call.
//!
//! A session owns a single logical write cursor and is not meant to be
//! shared by concurrent callers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::task::{AbortHandle, JoinHandle};

use super::client::{CompletedPart, ObjectStoreClient};
use crate::error::{Result, StoreError};
use crate::pool::BufferPool;

// Terminal-transition states. Open -> Closing happens exactly once, through
// a single compare-exchange; the winner runs the terminal remote call.
const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_TERMINAL: u8 = 2;

/// Options for opening an upload session.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Aborts the session automatically if it is still open after this
    /// duration.
    pub timeout: Option<Duration>,
}

impl From<&crate::config::ObjectStoreConfig> for UploadOptions {
    fn from(config: &crate::config::ObjectStoreConfig) -> Self {
        Self {
            timeout: config.upload_timeout(),
        }
    }
}

/// State shared between the session, its part-upload tasks, and the
/// timeout watchdog.
struct SessionShared {
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    key: String,
    upload_id: String,
    state: AtomicU8,
    part_aborts: Mutex<Vec<AbortHandle>>,
}

impl SessionShared {
    /// Attempts the single-winner Open -> Closing transition.
    fn try_begin_terminal(&self) -> bool {
        self.state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish_terminal(&self) {
        self.state.store(STATE_TERMINAL, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    /// Cancels all outstanding part-upload tasks.
    fn cancel_parts(&self) {
        let mut aborts = self.part_aborts.lock().expect("upload session lock poisoned");
        for handle in aborts.drain(..) {
            handle.abort();
        }
    }

    /// Best-effort remote abort; failures are logged, not surfaced.
    async fn abort_remote(&self) {
        if let Err(error) = self
            .client
            .abort_multipart(&self.bucket, &self.key, &self.upload_id)
            .await
        {
            tracing::warn!(
                bucket = %self.bucket,
                key = %self.key,
                %error,
                "multipart abort failed; upload left for store-side expiry"
            );
        }
    }
}

/// Write-only chunked upload stream for one remote object.
pub struct ChunkedUploadSession {
    shared: Arc<SessionShared>,
    pool: Arc<BufferPool>,
    chunk_size: usize,
    buffer: BytesMut,
    parts: Vec<JoinHandle<Result<CompletedPart>>>,
    parts_dispatched: u32,
    bytes_written: u64,
    final_etag: Option<String>,
    watchdog: Option<JoinHandle<()>>,
}

impl ChunkedUploadSession {
    /// Initiates a multipart upload and returns the open session.
    ///
    /// The chunk size is the pool's buffer size. With `options.timeout`
    /// set, a watchdog aborts the upload if the session is still open when
    /// the timer fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the multipart upload cannot be initiated.
    pub async fn open(
        client: Arc<dyn ObjectStoreClient>,
        pool: Arc<BufferPool>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        options: UploadOptions,
    ) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        let upload_id = client.initiate_multipart(&bucket, &key).await?;

        let shared = Arc::new(SessionShared {
            client,
            bucket,
            key,
            upload_id,
            state: AtomicU8::new(STATE_OPEN),
            part_aborts: Mutex::new(Vec::new()),
        });

        let watchdog = options.timeout.map(|timeout| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if shared.try_begin_terminal() {
                    tracing::warn!(
                        bucket = %shared.bucket,
                        key = %shared.key,
                        timeout_ms = timeout.as_millis() as u64,
                        "upload session timed out; aborting"
                    );
                    shared.cancel_parts();
                    shared.abort_remote().await;
                    shared.finish_terminal();
                }
            })
        });

        let chunk_size = pool.chunk_size();
        let buffer = pool.lease();

        Ok(Self {
            shared,
            pool,
            chunk_size,
            buffer,
            parts: Vec::new(),
            parts_dispatched: 0,
            bytes_written: 0,
            final_etag: None,
            watchdog,
        })
    }

    /// Appends bytes to the stream.
    ///
    /// Whenever the chunk buffer fills exactly to the chunk size, it is
    /// dispatched as the next part and a fresh buffer is leased; a single
    /// call may flush several whole chunks.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` once the session has been closed or aborted.
    pub fn write(&mut self, mut input: &[u8]) -> Result<()> {
        if !self.shared.is_open() {
            return Err(StoreError::disposed("upload session"));
        }

        while !input.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(input.len());
            self.buffer.extend_from_slice(&input[..take]);
            self.bytes_written += take as u64;
            input = &input[take..];

            if self.buffer.len() == self.chunk_size {
                self.dispatch_part();
            }
        }
        Ok(())
    }

    /// Hands the current buffer to a part-upload task and leases a new one.
    fn dispatch_part(&mut self) {
        let chunk = std::mem::replace(&mut self.buffer, self.pool.lease());
        self.parts_dispatched += 1;
        let part_number = self.parts_dispatched;

        let payload = chunk.freeze();
        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(&self.pool);
        let handle = tokio::spawn(async move {
            let etag = shared
                .client
                .upload_part(
                    &shared.bucket,
                    &shared.key,
                    &shared.upload_id,
                    part_number,
                    payload.clone(),
                )
                .await?;
            // Continuation owns the chunk now; hand it back to the pool
            pool.recycle(payload);
            Ok(CompletedPart { part_number, etag })
        });

        self.shared
            .part_aborts
            .lock()
            .expect("upload session lock poisoned")
            .push(handle.abort_handle());
        self.parts.push(handle);
    }

    /// Flushes the trailing chunk, waits for every dispatched part, and
    /// finalizes the object, returning its etag.
    ///
    /// Idempotent: a second call returns the recorded outcome without
    /// another remote call. A session that never received a byte still
    /// uploads one empty part, since the store requires at least one.
    ///
    /// # Errors
    ///
    /// Any single failed part upload fails the whole close (the partial
    /// upload is released best-effort); a close that lost the race against
    /// `abort` or the timeout fails with `Disposed`.
    pub async fn close(&mut self) -> Result<String> {
        if let Some(etag) = &self.final_etag {
            return Ok(etag.clone());
        }
        if !self.shared.try_begin_terminal() {
            return Err(StoreError::disposed("upload session"));
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }

        if !self.buffer.is_empty() || self.parts_dispatched == 0 {
            self.dispatch_part();
        }
        // The replacement buffer leased by the final dispatch is unused
        self.pool.give(std::mem::take(&mut self.buffer));

        // Every dispatched part must settle before the terminal call; keep
        // the first failure rather than finalizing a partial object.
        let mut completed = Vec::with_capacity(self.parts.len());
        let mut first_error = None;
        for handle in self.parts.drain(..) {
            match handle.await {
                Ok(Ok(part)) => completed.push(part),
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(StoreError::object_store(
                            &self.shared.bucket,
                            &self.shared.key,
                            format!("part upload task failed: {}", join_error),
                        ));
                    }
                }
            }
        }

        if let Some(error) = first_error {
            self.shared.abort_remote().await;
            self.shared.finish_terminal();
            return Err(error);
        }

        completed.sort_by_key(|p| p.part_number);
        let result = self
            .shared
            .client
            .complete_multipart(
                &self.shared.bucket,
                &self.shared.key,
                &self.shared.upload_id,
                &completed,
            )
            .await;
        self.shared.finish_terminal();

        let etag = result?;
        self.final_etag = Some(etag.clone());
        Ok(etag)
    }

    /// Abandons the upload: cancels outstanding part tasks and issues one
    /// best-effort remote abort.
    ///
    /// Racing against `close` or the timeout is safe; the loser of the
    /// single-winner transition skips the remote call entirely.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` if the session already closed successfully (the
    /// abort capability is consumed by a completed close).
    pub async fn abort(&mut self) -> Result<()> {
        if self.final_etag.is_some() {
            return Err(StoreError::disposed("upload session"));
        }
        if !self.shared.try_begin_terminal() {
            // Timeout watchdog (or a failed close) got there first
            return Ok(());
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.shared.cancel_parts();
        self.shared.abort_remote().await;
        self.shared.finish_terminal();
        Ok(())
    }

    /// Tag of the committed object.
    ///
    /// # Errors
    ///
    /// Valid only after `close` succeeded; calling earlier is a caller bug
    /// and yields an error.
    pub fn etag(&self) -> Result<&str> {
        self.final_etag.as_deref().ok_or_else(|| {
            StoreError::object_store(
                &self.shared.bucket,
                &self.shared.key,
                "etag is unavailable until the session is closed",
            )
        })
    }

    /// Total bytes accepted by `write` so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Number of parts dispatched so far.
    pub fn parts_dispatched(&self) -> u32 {
        self.parts_dispatched
    }
}

impl Drop for ChunkedUploadSession {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        // A session dropped while open abandons its upload
        if self.shared.try_begin_terminal() {
            self.shared.cancel_parts();
            let shared = Arc::clone(&self.shared);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    shared.abort_remote().await;
                    shared.finish_terminal();
                });
            } else {
                shared.finish_terminal();
            }
        }
    }
}
