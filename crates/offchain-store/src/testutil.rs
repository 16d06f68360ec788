//! Shared test utilities for off-chain store testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! assetlink-offchain-store = { path = "../offchain-store", features = ["testutil"] }
//! ```

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    backend::OffchainStore,
    error::{StorageError, StorageResult},
    memory::MemoryOffchainStore,
    types::EnrichmentRecord,
};

/// A wrapper around [`MemoryOffchainStore`] that injects failures.
///
/// Each armed failure is consumed by exactly one call; once the queue is
/// drained the wrapper behaves like the inner store. Successful upserts are
/// counted so tests can assert that a code path never wrote.
#[derive(Clone, Default)]
pub struct FailingStore {
    inner: MemoryOffchainStore,
    upsert_failures: Arc<Mutex<Vec<StorageError>>>,
    find_failures: Arc<Mutex<Vec<StorageError>>>,
    upserts: Arc<AtomicUsize>,
    upsert_attempts: Arc<AtomicUsize>,
}

impl FailingStore {
    /// Wraps an existing store.
    #[must_use]
    pub fn new(inner: MemoryOffchainStore) -> Self {
        Self { inner, ..Self::default() }
    }

    /// Fails the next upsert with `error`.
    pub fn fail_next_upsert(&self, error: StorageError) {
        self.upsert_failures.lock().push(error);
    }

    /// Fails the next find with `error`.
    pub fn fail_next_find(&self, error: StorageError) {
        self.find_failures.lock().push(error);
    }

    /// Number of upserts that reached the inner store.
    #[must_use]
    pub fn successful_upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Number of upserts attempted, failed or not.
    #[must_use]
    pub fn upsert_attempts(&self) -> usize {
        self.upsert_attempts.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &MemoryOffchainStore {
        &self.inner
    }
}

#[async_trait]
impl OffchainStore for FailingStore {
    async fn upsert(&self, record: &EnrichmentRecord) -> StorageResult<()> {
        self.upsert_attempts.fetch_add(1, Ordering::SeqCst);
        let armed = self.upsert_failures.lock().pop();
        if let Some(err) = armed {
            return Err(err);
        }
        self.inner.upsert(record).await?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find(&self, item_id: &str) -> StorageResult<Option<EnrichmentRecord>> {
        let armed = self.find_failures.lock().pop();
        if let Some(err) = armed {
            return Err(err);
        }
        self.inner.find(item_id).await
    }
}

/// A store whose operations never complete, for exercising time bounds.
#[derive(Clone, Copy, Debug, Default)]
pub struct HangingStore;

#[async_trait]
impl OffchainStore for HangingStore {
    async fn upsert(&self, _record: &EnrichmentRecord) -> StorageResult<()> {
        std::future::pending::<()>().await;
        Err(StorageError::internal("unreachable: pending future resolved"))
    }

    async fn find(&self, _item_id: &str) -> StorageResult<Option<EnrichmentRecord>> {
        std::future::pending::<()>().await;
        Err(StorageError::internal("unreachable: pending future resolved"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_consumed_once() {
        let store = FailingStore::default();
        store.fail_next_upsert(StorageError::connection("down"));

        let record = EnrichmentRecord::new("donation-1");
        assert!(store.upsert(&record).await.is_err());
        assert!(store.upsert(&record).await.is_ok());
        assert_eq!(store.upsert_attempts(), 2);
        assert_eq!(store.successful_upserts(), 1);
    }

    #[tokio::test]
    async fn test_find_failure() {
        let store = FailingStore::default();
        store.fail_next_find(StorageError::timeout(std::time::Duration::from_secs(1)));

        assert!(matches!(store.find("x").await, Err(StorageError::Timeout { .. })));
        assert_eq!(store.find("x").await.unwrap(), None);
    }
}
