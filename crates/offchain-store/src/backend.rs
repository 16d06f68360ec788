//! Off-chain store trait definition.
//!
//! The store is an external collaborator: its schema, indexing and
//! persistence engine are its own concern. This crate only fixes the two
//! operations the coordinator consumes, keyed by the ledger item id.

use async_trait::async_trait;

use crate::{error::StorageResult, types::EnrichmentRecord};

/// Key-value interface over enrichment records.
///
/// Implementations must be thread-safe (`Send + Sync`) and provide their own
/// internal concurrency guarantees; callers share one instance across tasks
/// without additional locking.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`upsert`](OffchainStore::upsert) | Insert or replace the record for its `item_id` |
/// | [`find`](OffchainStore::find) | Look up the record for an `item_id` |
///
/// # Example
///
/// ```
/// use assetlink_offchain_store::{EnrichmentRecord, MemoryOffchainStore, OffchainStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryOffchainStore::new();
/// store.upsert(&EnrichmentRecord::new("donation-1")).await.unwrap();
///
/// let found = store.find("donation-1").await.unwrap();
/// assert_eq!(found.map(|r| r.item_id), Some("donation-1".to_string()));
/// # });
/// ```
#[async_trait]
pub trait OffchainStore: Send + Sync {
    /// Stores `record`, replacing any previous record with the same `item_id`.
    ///
    /// Writing the same record twice leaves the store in the same state as
    /// writing it once.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn upsert(&self, record: &EnrichmentRecord) -> StorageResult<()>;

    /// Retrieves the record for `item_id`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))` if a record exists
    /// - `Ok(None)` if no record exists
    /// - `Err(...)` on store errors
    #[must_use = "store operations may fail and errors must be handled"]
    async fn find(&self, item_id: &str) -> StorageResult<Option<EnrichmentRecord>>;
}

#[async_trait]
impl<S> OffchainStore for std::sync::Arc<S>
where
    S: OffchainStore + ?Sized,
{
    async fn upsert(&self, record: &EnrichmentRecord) -> StorageResult<()> {
        (**self).upsert(record).await
    }

    async fn find(&self, item_id: &str) -> StorageResult<Option<EnrichmentRecord>> {
        (**self).find(item_id).await
    }
}
