// src/table/memory.rs

//! In-memory table store.
//!
//! Precondition evaluation and the write happen under one lock, so the
//! store exhibits the same atomic compare-then-write behavior tests rely on
//! from a real table service.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::{Page, Precondition, TableSchema, TableStoreClient, WriteOutcome};
use super::record::{Record, TableKey};
use crate::error::{Result, StoreError};

const DEFAULT_PAGE_SIZE: usize = 100;

/// In-memory [`TableStoreClient`] implementation.
pub struct InMemoryTableStore {
    tables: Mutex<HashMap<String, BTreeMap<(String, String), Record>>>,
    condition_failures: AtomicUsize,
    page_size: usize,
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            condition_failures: AtomicUsize::new(0),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the store with a table already present.
    pub fn with_table(table: &str) -> Self {
        let store = Self::default();
        store
            .tables
            .lock()
            .expect("table store lock poisoned")
            .insert(table.to_string(), BTreeMap::new());
        store
    }

    /// Overrides the query page size (tests exercise pagination with small
    /// pages).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Number of conditional writes that failed their precondition.
    pub fn condition_failures(&self) -> usize {
        self.condition_failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableStoreClient for InMemoryTableStore {
    async fn get_item(&self, table: &str, key: &TableKey) -> Result<Option<Record>> {
        let tables = self.tables.lock().expect("table store lock poisoned");
        let records = tables
            .get(table)
            .ok_or_else(|| StoreError::table_store(table, "table not found"))?;
        Ok(records
            .get(&(key.hash_key.clone(), key.range_key.clone()))
            .cloned())
    }

    async fn update_item(
        &self,
        table: &str,
        record: Record,
        precondition: Option<&Precondition>,
    ) -> Result<WriteOutcome> {
        let mut tables = self.tables.lock().expect("table store lock poisoned");
        let records = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::table_store(table, "table not found"))?;

        let slot = (record.key.hash_key.clone(), record.key.range_key.clone());
        if let Some(precondition) = precondition {
            if !precondition.holds_for(records.get(&slot)) {
                self.condition_failures.fetch_add(1, Ordering::SeqCst);
                return Ok(WriteOutcome::ConditionFailed);
            }
        }

        records.insert(slot, record);
        Ok(WriteOutcome::Applied)
    }

    async fn query(
        &self,
        table: &str,
        hash_key: &str,
        start_token: Option<&str>,
    ) -> Result<Page> {
        let tables = self.tables.lock().expect("table store lock poisoned");
        let records = tables
            .get(table)
            .ok_or_else(|| StoreError::table_store(table, "table not found"))?;

        // BTreeMap ordering makes this range-key sorted already
        let matching: Vec<&Record> = records
            .iter()
            .filter(|((h, _), _)| h == hash_key)
            .map(|(_, r)| r)
            .collect();

        let offset: usize = start_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + self.page_size).min(matching.len());
        let page: Vec<Record> = matching[offset.min(end)..end].iter().map(|r| (*r).clone()).collect();

        let next_token = if end < matching.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(Page {
            records: page,
            next_token,
        })
    }

    async fn create_table(&self, table: &str, _schema: &TableSchema) -> Result<()> {
        let mut tables = self.tables.lock().expect("table store lock poisoned");
        if tables.contains_key(table) {
            return Err(StoreError::table_store(table, "table already exists"));
        }
        tables.insert(table.to_string(), BTreeMap::new());
        Ok(())
    }
}
