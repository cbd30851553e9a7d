// src/bootstrap.rs

//! Bucket and table bootstrap glue.
//!
//! Creating storage resources is not idempotent at the service boundary: a
//! create can race another runtime instance (conflict) and a just-created
//! resource can be reported missing for a short window. These helpers fold
//! both into "the resource exists and is visible", using the bounded
//! [`RetryPolicy`]. The core upload/read/update protocols never come
//! through here.

use crate::error::{Result, StoreError};
use crate::object::ObjectStoreClient;
use crate::retry::{retry_async, RetryOutcome, RetryPolicy};
use crate::table::{TableKey, TableSchema, TableStoreClient};

/// A create that lost the race to another creator counts as success.
fn is_conflict(error: &StoreError) -> bool {
    let text = error.to_string();
    text.contains("already exists") || text.contains("in use")
}

/// Creates the bucket if needed and waits until it is visible.
///
/// # Errors
///
/// Returns the store error if creation fails for any reason other than the
/// bucket already existing, or if the bucket stays invisible past the
/// policy's retry budget.
pub async fn ensure_bucket(
    client: &dyn ObjectStoreClient,
    bucket: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    match client.create_bucket(bucket).await {
        Ok(()) => tracing::debug!(bucket, "bucket created"),
        Err(error) if is_conflict(&error) => {
            tracing::debug!(bucket, "bucket already present");
        }
        Err(error) => return Err(error),
    }

    retry_async(policy, || async move {
        match client.list_objects(bucket).await {
            Ok(_) => RetryOutcome::Ok(()),
            // Just-created bucket not visible yet
            Err(error) if error.is_not_found() => RetryOutcome::Transient(error),
            Err(error) => RetryOutcome::Fatal(error),
        }
    })
    .await
}

/// Creates the table if needed and waits until it answers reads.
///
/// # Errors
///
/// Same contract as [`ensure_bucket`].
pub async fn ensure_table(
    client: &dyn TableStoreClient,
    table: &str,
    schema: &TableSchema,
    policy: &RetryPolicy,
) -> Result<()> {
    match client.create_table(table, schema).await {
        Ok(()) => tracing::debug!(table, "table created"),
        Err(error) if is_conflict(&error) => {
            tracing::debug!(table, "table already present");
        }
        Err(error) => return Err(error),
    }

    let probe = TableKey::new("bootstrap", "probe");
    retry_async(policy, || {
        let probe = probe.clone();
        async move {
            match client.get_item(table, &probe).await {
                Ok(_) => RetryOutcome::Ok(()),
                Err(error) if error.to_string().contains("not found") => {
                    RetryOutcome::Transient(error)
                }
                Err(error) => RetryOutcome::Fatal(error),
            }
        }
    })
    .await
}

/// Best-effort bucket cleanup: deletes everything currently listed. A
/// missing bucket is a no-op.
///
/// # Errors
///
/// Returns an error only for failures other than the bucket being absent.
pub async fn clear_bucket(client: &dyn ObjectStoreClient, bucket: &str) -> Result<()> {
    let keys = match client.list_objects(bucket).await {
        Ok(keys) => keys,
        Err(error) if error.is_not_found() => return Ok(()),
        Err(error) => return Err(error),
    };
    if keys.is_empty() {
        return Ok(());
    }
    client.delete_objects(bucket, &keys).await
}
