// src/table/transact.rs

//! Optimistic-concurrency read-modify-write loop.
//!
//! Each attempt reads the committed record, applies the caller's update
//! function, and writes the candidate under an attribute-level precondition
//! extracted from the record that was read. A failed precondition means a
//! concurrent writer committed in between; the loop re-reads to observe
//! that writer's state and tries again. There are no server-side locks and
//! no version counter, only the compare-on-one-field write.
//!
//! The retry is unbounded by default, matching the protocol's source
//! behavior: it converges as soon as one attempt sees a quiescent window,
//! and under sustained contention it keeps going. Callers that prefer a
//! hard bound set `max_attempts` on [`TransactPolicy`].

use std::sync::Arc;
use std::time::Duration;

use super::client::{Precondition, TableStoreClient, WriteOutcome};
use super::record::{TableKey, TableRecord};
use crate::config::TableStoreConfig;
use crate::error::{Result, StoreError};

/// Retry knobs for the update loop.
#[derive(Debug, Clone, Default)]
pub struct TransactPolicy {
    /// Cap on write attempts; `None` retries until the write applies.
    pub max_attempts: Option<u32>,
    /// Pause between attempts; `None` retries immediately.
    pub backoff: Option<Duration>,
}

impl From<&TableStoreConfig> for TransactPolicy {
    fn from(config: &TableStoreConfig) -> Self {
        Self {
            max_attempts: config.max_transact_attempts,
            backoff: match config.transact_backoff_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

/// Conditional update loop bound to one table.
pub struct UpdateLoop {
    client: Arc<dyn TableStoreClient>,
    table: String,
    policy: TransactPolicy,
}

impl UpdateLoop {
    pub fn new(client: Arc<dyn TableStoreClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            policy: TransactPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: TransactPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs one read-modify-write transaction and returns the committed
    /// record.
    ///
    /// `condition` projects the precondition out of the record each attempt
    /// read (the conditional field's name and last-observed value, or its
    /// expected absence); `update` produces the candidate to commit.
    ///
    /// # Errors
    ///
    /// Fails if the record is absent or the store fails. With a bounded
    /// policy, fails with `Contention` once `max_attempts` writes have all
    /// lost their precondition.
    pub async fn transact<T, C, U>(&self, key: &TableKey, condition: C, update: U) -> Result<T>
    where
        T: TableRecord,
        C: Fn(&T) -> Precondition,
        U: FnMut(T) -> T,
    {
        let current = match self.read(key).await? {
            Some(record) => record,
            None => {
                return Err(StoreError::table_store(
                    &self.table,
                    format!("record {} not found", key),
                ));
            }
        };
        self.commit_loop(key, current, None, condition, update).await
    }

    /// Like [`transact`](Self::transact), but seeds the first attempt with
    /// `default` when the record does not exist yet (the projected
    /// condition is then typically an absence check).
    pub async fn transact_with_default<T, C, U>(
        &self,
        key: &TableKey,
        default: T,
        condition: C,
        update: U,
    ) -> Result<T>
    where
        T: TableRecord + Clone,
        C: Fn(&T) -> Precondition,
        U: FnMut(T) -> T,
    {
        let current = match self.read(key).await? {
            Some(record) => record,
            None => default.clone(),
        };
        self.commit_loop(key, current, Some(default), condition, update)
            .await
    }

    // One state machine pass per iteration: Read happened before entry (or
    // on the previous iteration), then Propose, then Commit.
    async fn commit_loop<T, C, U>(
        &self,
        key: &TableKey,
        mut current: T,
        mut default: Option<T>,
        condition: C,
        mut update: U,
    ) -> Result<T>
    where
        T: TableRecord,
        C: Fn(&T) -> Precondition,
        U: FnMut(T) -> T,
    {
        let mut attempts: u32 = 0;

        loop {
            let precondition = condition(&current);
            let candidate = update(current);

            attempts += 1;
            let outcome = self
                .client
                .update_item(&self.table, candidate.to_record(), Some(&precondition))
                .await?;

            match outcome {
                WriteOutcome::Applied => return Ok(candidate),
                WriteOutcome::ConditionFailed => {
                    if let Some(max) = self.policy.max_attempts {
                        if attempts >= max {
                            return Err(StoreError::contention(&self.table, attempts));
                        }
                    }
                    tracing::debug!(
                        table = %self.table,
                        key = %key,
                        attempts,
                        "conditional write lost; re-reading"
                    );
                    if let Some(delay) = self.policy.backoff {
                        tokio::time::sleep(delay).await;
                    }

                    // Observe the concurrent writer's committed state
                    current = match self.read(key).await? {
                        Some(record) => record,
                        None => match default.take() {
                            Some(seed) => seed,
                            None => {
                                return Err(StoreError::table_store(
                                    &self.table,
                                    format!("record {} disappeared during update", key),
                                ));
                            }
                        },
                    };
                }
            }
        }
    }

    async fn read<T: TableRecord>(&self, key: &TableKey) -> Result<Option<T>> {
        match self.client.get_item(&self.table, key).await? {
            Some(record) => Ok(Some(T::from_record(&record)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::memory::InMemoryTableStore;
    use crate::table::record::Record;

    /// Typed record used by the loop tests.
    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        key: TableKey,
        count: i64,
    }

    impl Counter {
        fn new(hash: &str, range: &str, count: i64) -> Self {
            Self {
                key: TableKey::new(hash, range),
                count,
            }
        }
    }

    impl TableRecord for Counter {
        fn key(&self) -> TableKey {
            self.key.clone()
        }

        fn to_record(&self) -> Record {
            Record::new(self.key.clone()).with_field("count", self.count)
        }

        fn from_record(record: &Record) -> Result<Self> {
            Ok(Self {
                key: record.key.clone(),
                count: record.require_i64("count")?,
            })
        }
    }

    fn observe(counter: &Counter) -> Precondition {
        Precondition::field_equals("count", counter.count)
    }

    async fn seed(store: &InMemoryTableStore, count: i64) -> TableKey {
        let key = TableKey::new("job-1", "counter");
        store
            .update_item(
                "t",
                Record::new(key.clone()).with_field("count", count),
                None,
            )
            .await
            .unwrap();
        key
    }

    #[tokio::test]
    async fn test_increment_commits() {
        let store = Arc::new(InMemoryTableStore::with_table("t"));
        let key = seed(&store, 0).await;

        let update_loop = UpdateLoop::new(store.clone() as Arc<dyn TableStoreClient>, "t");
        let committed: Counter = update_loop
            .transact(&key, observe, |mut c| {
                c.count += 1;
                c
            })
            .await
            .unwrap();

        assert_eq!(committed.count, 1);
        assert_eq!(store.condition_failures(), 0);

        let stored = store.get_item("t", &key).await.unwrap().unwrap();
        assert_eq!(stored.get_i64("count"), Some(1));
    }

    #[tokio::test]
    async fn test_absent_record_fails() {
        let store = Arc::new(InMemoryTableStore::with_table("t"));
        let update_loop = UpdateLoop::new(store as Arc<dyn TableStoreClient>, "t");

        let err = update_loop
            .transact::<Counter, _, _>(&TableKey::new("job-1", "ghost"), observe, |c| c)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_default_seeds_absent_record() {
        let store = Arc::new(InMemoryTableStore::with_table("t"));
        let key = TableKey::new("job-1", "counter");

        let update_loop = UpdateLoop::new(store.clone() as Arc<dyn TableStoreClient>, "t");
        let committed = update_loop
            .transact_with_default(
                &key,
                Counter::new("job-1", "counter", 0),
                |_: &Counter| Precondition::field_absent("count"),
                |mut c| {
                    c.count += 5;
                    c
                },
            )
            .await
            .unwrap();

        assert_eq!(committed.count, 5);
        let stored = store.get_item("t", &key).await.unwrap().unwrap();
        assert_eq!(stored.get_i64("count"), Some(5));
    }

    #[tokio::test]
    async fn test_lost_write_retries_from_fresh_read() {
        let store = Arc::new(InMemoryTableStore::with_table("t"));
        let key = seed(&store, 0).await;

        // A competing writer commits between this loop's read and write:
        // simulate by bumping the record from inside the update function's
        // first call.
        let bumped = std::sync::atomic::AtomicBool::new(false);
        let racing_store = store.clone();

        let update_loop = UpdateLoop::new(store.clone() as Arc<dyn TableStoreClient>, "t");
        let committed: Counter = update_loop
            .transact(&key, observe, |mut c| {
                if !bumped.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    let racing_store = racing_store.clone();
                    let record = Record::new(c.key.clone()).with_field("count", 40i64);
                    // The in-memory store completes without yielding, so
                    // block_on inside the sync closure cannot stall.
                    futures::executor::block_on(async {
                        racing_store.update_item("t", record, None).await.unwrap();
                    });
                }
                c.count += 2;
                c
            })
            .await
            .unwrap();

        // First attempt lost, second applied on top of the rival's 40
        assert_eq!(committed.count, 42);
        assert_eq!(store.condition_failures(), 1);
    }

    #[tokio::test]
    async fn test_two_writers_exactly_one_conflict() {
        // Deterministic two-increment interleaving, driven directly
        // against the client: both writers read count = 0,
        // writer B commits first, writer A's conditional write fails, and
        // A's retry commits on top of B's value.
        let store = InMemoryTableStore::with_table("t");
        let key = TableKey::new("job-1", "counter");
        store
            .update_item("t", Record::new(key.clone()).with_field("count", 0i64), None)
            .await
            .unwrap();

        let a_read = store.get_item("t", &key).await.unwrap().unwrap();
        let b_read = store.get_item("t", &key).await.unwrap().unwrap();

        let b_outcome = store
            .update_item(
                "t",
                Record::new(key.clone()).with_field("count", b_read.get_i64("count").unwrap() + 1),
                Some(&Precondition::field_equals(
                    "count",
                    b_read.get_i64("count").unwrap(),
                )),
            )
            .await
            .unwrap();
        assert_eq!(b_outcome, WriteOutcome::Applied);

        let a_outcome = store
            .update_item(
                "t",
                Record::new(key.clone()).with_field("count", a_read.get_i64("count").unwrap() + 1),
                Some(&Precondition::field_equals(
                    "count",
                    a_read.get_i64("count").unwrap(),
                )),
            )
            .await
            .unwrap();
        assert_eq!(a_outcome, WriteOutcome::ConditionFailed);

        let a_reread = store.get_item("t", &key).await.unwrap().unwrap();
        let a_retry = store
            .update_item(
                "t",
                Record::new(key.clone())
                    .with_field("count", a_reread.get_i64("count").unwrap() + 1),
                Some(&Precondition::field_equals(
                    "count",
                    a_reread.get_i64("count").unwrap(),
                )),
            )
            .await
            .unwrap();
        assert_eq!(a_retry, WriteOutcome::Applied);

        let committed = store.get_item("t", &key).await.unwrap().unwrap();
        assert_eq!(committed.get_i64("count"), Some(2));
        assert_eq!(store.condition_failures(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_lose_nothing() {
        const WRITERS: i64 = 8;

        let store = Arc::new(InMemoryTableStore::with_table("t"));
        let key = seed(&store, 0).await;

        let barrier = Arc::new(tokio::sync::Barrier::new(WRITERS as usize));
        let mut handles = Vec::new();
        for _ in 0..WRITERS {
            let store = store.clone();
            let key = key.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                let update_loop = UpdateLoop::new(store as Arc<dyn TableStoreClient>, "t");
                barrier.wait().await;
                update_loop
                    .transact::<Counter, _, _>(&key, observe, |mut c| {
                        c.count += 1;
                        c
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let committed = store.get_item("t", &key).await.unwrap().unwrap();
        assert_eq!(committed.get_i64("count"), Some(WRITERS));
    }

    #[tokio::test]
    async fn test_bounded_policy_reports_contention() {
        let store = Arc::new(InMemoryTableStore::with_table("t"));
        let key = seed(&store, 0).await;

        let update_loop = UpdateLoop::new(store as Arc<dyn TableStoreClient>, "t")
            .with_policy(TransactPolicy {
                max_attempts: Some(3),
                backoff: None,
            });

        // A projection that never matches the committed state keeps losing
        let err = update_loop
            .transact::<Counter, _, _>(
                &key,
                |_| Precondition::field_equals("count", -999i64),
                |c| c,
            )
            .await
            .unwrap_err();

        match err {
            StoreError::Contention { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected contention error, got {other}"),
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = TableStoreConfig {
            table: "t".to_string(),
            max_transact_attempts: Some(20),
            transact_backoff_ms: 15,
        };
        let policy = TransactPolicy::from(&config);
        assert_eq!(policy.max_attempts, Some(20));
        assert_eq!(policy.backoff, Some(Duration::from_millis(15)));

        let config = TableStoreConfig {
            table: "t".to_string(),
            max_transact_attempts: None,
            transact_backoff_ms: 0,
        };
        let policy = TransactPolicy::from(&config);
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.backoff, None);
    }
}
