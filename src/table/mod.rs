// src/table/mod.rs

//! Shared mutable records in a distributed table store.
//!
//! The runtime keeps small coordination records (job state, counters,
//! leases) in a key/value table and updates them without server-side locks:
//! every write is conditional on one field still holding its last-observed
//! value, and [`UpdateLoop`] retries the read-modify-write until a write
//! goes through. See [`transact`](UpdateLoop::transact) for the protocol.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use runtime_store::table::{
//!     InMemoryTableStore, Precondition, Record, TableKey, TableStoreClient, UpdateLoop,
//! };
//!
//! # async fn example() -> runtime_store::Result<()> {
//! let client: Arc<dyn TableStoreClient> = Arc::new(InMemoryTableStore::with_table("jobs"));
//! client
//!     .update_item(
//!         "jobs",
//!         Record::new(TableKey::new("job-42", "state")).with_field("completed", 0i64),
//!         None,
//!     )
//!     .await?;
//!
//! let update_loop = UpdateLoop::new(client, "jobs");
//! let committed: Record = update_loop
//!     .transact(
//!         &TableKey::new("job-42", "state"),
//!         |r: &Record| Precondition::field_equals("completed", r.get_i64("completed").unwrap_or(0)),
//!         |mut r| {
//!             let done = r.get_i64("completed").unwrap_or(0);
//!             r.set("completed", done + 1);
//!             r
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod memory;
mod record;
mod transact;

pub use client::{Page, Precondition, TableSchema, TableStoreClient, WriteOutcome};
pub use memory::InMemoryTableStore;
pub use record::{FieldValue, Record, TableKey, TableRecord};
pub use transact::{TransactPolicy, UpdateLoop};

// DynamoDB backend (requires feature flag)
#[cfg(feature = "aws")]
mod dynamo;

#[cfg(feature = "aws")]
pub use dynamo::DynamoTableStore;
