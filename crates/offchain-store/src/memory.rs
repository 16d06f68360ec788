//! In-memory off-chain store implementation.
//!
//! [`MemoryOffchainStore`] keeps records as JSON documents in a
//! [`BTreeMap`] guarded by a [`parking_lot::RwLock`]. It is used in tests
//! and development setups where no document database is available.
//!
//! Records are stored encoded rather than as structs so that the same
//! encode/decode path a real document store would exercise is exercised
//! here too.
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - No secondary indexes; lookups are by `item_id` only

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{backend::OffchainStore, error::StorageResult, types::EnrichmentRecord};

/// In-memory enrichment store.
///
/// # Cloning
///
/// `MemoryOffchainStore` is cheaply cloneable via [`Arc`]. All clones share
/// the same underlying documents.
#[derive(Clone, Default)]
pub struct MemoryOffchainStore {
    documents: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl std::fmt::Debug for MemoryOffchainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryOffchainStore").field("records", &self.len()).finish()
    }
}

impl MemoryOffchainStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Returns the stored item ids in ascending order.
    #[must_use]
    pub fn item_ids(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }
}

#[async_trait]
impl OffchainStore for MemoryOffchainStore {
    #[tracing::instrument(skip(self, record), fields(item_id = %record.item_id))]
    async fn upsert(&self, record: &EnrichmentRecord) -> StorageResult<()> {
        let encoded = Bytes::from(serde_json::to_vec(record)?);
        let replaced = self.documents.write().insert(record.item_id.clone(), encoded).is_some();
        tracing::debug!(replaced, "enrichment record stored");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find(&self, item_id: &str) -> StorageResult<Option<EnrichmentRecord>> {
        let encoded = self.documents.read().get(item_id).cloned();
        match encoded {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
