//! Ledger-first coordination of a record's two halves.
//!
//! The ledger is written first and is the source of truth for existence
//! and status. The enrichment write happens only once the ledger write is
//! known to have committed, and a failure there is reported as
//! [`CoordinatorError::PartialWrite`] rather than rolled back.

use std::{future::Future, sync::Arc};

use assetlink_ledger_gateway::{Asset, LedgerClient, LedgerError, MISSING_ASSET_MARKER};
use assetlink_offchain_store::{EnrichmentRecord, OffchainStore, StorageError, StorageResult};
use chrono::{SecondsFormat, Utc};
use fail::fail_point;
use uuid::Uuid;

use crate::{
    config::CoordinatorConfig,
    error::{CoordinatorError, Result},
    merger::{MergedView, RecordMerger},
    types::{CreatedRecord, NewRecord, ReplayOutcome},
};

/// Outcome of confirming a write by reading the ledger.
enum ReadBack {
    /// An asset satisfying the expectation was read.
    Confirmed(Asset),
    /// Every attempt read nothing, or an asset not yet updated.
    NotVisible,
    /// The last attempt failed.
    Failed(LedgerError),
}

/// Coordinates writes and reads across the ledger and the off-chain store.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use assetlink_coordinator::{ConsistencyCoordinator, CoordinatorConfig, NewRecord};
/// use assetlink_ledger_gateway::{ConnectionManager, GatewayConfig, LedgerClient};
/// use assetlink_offchain_store::MemoryOffchainStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connections = Arc::new(ConnectionManager::new(GatewayConfig::from_env()?));
/// let coordinator = ConsistencyCoordinator::new(
///     LedgerClient::new(connections),
///     Arc::new(MemoryOffchainStore::new()),
///     CoordinatorConfig::default(),
/// );
///
/// let input = NewRecord::builder()
///     .item_type("chair")
///     .condition("good")
///     .donor_id("d1")
///     .current_owner("d1")
///     .status("available")
///     .build();
/// let created = coordinator.create_record(input).await?;
/// coordinator.update_status(created.item_id(), "delivered").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConsistencyCoordinator {
    ledger: LedgerClient,
    store: Arc<dyn OffchainStore>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for ConsistencyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyCoordinator")
            .field("ledger", &self.ledger)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConsistencyCoordinator {
    /// Creates a coordinator over a ledger client and an off-chain store.
    #[must_use]
    pub fn new(
        ledger: LedgerClient,
        store: Arc<dyn OffchainStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self { ledger, store, config }
    }

    /// The ledger client.
    #[must_use]
    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    /// The coordinator configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Creates a record: ledger asset first, then its enrichment.
    ///
    /// The identifier is generated here. The returned asset is the one read
    /// back from the ledger.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::InvalidInput`] before anything is written
    /// - [`CoordinatorError::Ledger`] if the ledger write definitely failed
    /// - [`CoordinatorError::OutcomeUnknown`] if the ledger write is
    ///   ambiguous and the asset did not become visible
    /// - [`CoordinatorError::PartialWrite`] if the ledger committed but the
    ///   enrichment write failed
    #[tracing::instrument(skip_all, fields(item_id = tracing::field::Empty))]
    pub async fn create_record(&self, input: NewRecord) -> Result<CreatedRecord> {
        input.validate()?;

        let item_id = format!("{}{}", self.config.id_prefix(), Uuid::new_v4());
        tracing::Span::current().record("item_id", item_id.as_str());
        let new_asset = input.to_new_asset(&item_id, &now_timestamp());
        let enrichment = input.to_enrichment(&item_id);

        let ambiguous = match self.ledger.create_asset(&new_asset).await {
            Ok(()) => None,
            Err(err) if err.is_ambiguous() => {
                tracing::warn!(error = %err, "ledger outcome unknown, verifying by read-back");
                Some(err)
            },
            Err(err) => return Err(err.into()),
        };

        let asset = match (self.read_back(&item_id, |_| true).await, ambiguous) {
            (ReadBack::Confirmed(asset), _) => asset,
            (ReadBack::NotVisible, Some(reason)) | (ReadBack::Failed(_), Some(reason)) => {
                tracing::warn!("ledger write not confirmed, enrichment withheld");
                return Err(CoordinatorError::OutcomeUnknown {
                    item_id,
                    reason,
                    pending_enrichment: Some(Box::new(enrichment)),
                });
            },
            (ReadBack::NotVisible, None) => {
                tracing::warn!("committed asset not yet visible, using submitted payload");
                new_asset.to_asset()
            },
            (ReadBack::Failed(err), None) => {
                tracing::warn!(error = %err, "read-back failed, using submitted payload");
                new_asset.to_asset()
            },
        };

        fail_point!("coordinator-before-offchain-write", |_| {
            Err(CoordinatorError::PartialWrite {
                asset: Box::new(asset.clone()),
                enrichment: Box::new(enrichment.clone()),
                source: StorageError::internal("injected failure before enrichment write"),
            })
        });

        if let Err(source) = self.upsert(&enrichment).await {
            tracing::warn!(error = %source, "ledger committed but enrichment write failed");
            return Err(CoordinatorError::PartialWrite {
                asset: Box::new(asset),
                enrichment: Box::new(enrichment),
                source,
            });
        }

        tracing::info!("record created");
        Ok(CreatedRecord { asset, enrichment })
    }

    /// Sets the status of an existing asset and returns it as read back
    /// from the ledger. The off-chain store is not touched.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::InvalidInput`] for a blank id or status
    /// - [`CoordinatorError::NotFound`] if the asset does not exist
    /// - [`CoordinatorError::Ledger`] if the ledger write definitely failed
    /// - [`CoordinatorError::OutcomeUnknown`] if the write is ambiguous and
    ///   the new status could not be observed
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, item_id: &str, status: &str) -> Result<Asset> {
        if item_id.trim().is_empty() {
            return Err(CoordinatorError::invalid_input("itemID must not be empty"));
        }
        if status.trim().is_empty() {
            return Err(CoordinatorError::invalid_input("status must not be empty"));
        }

        let Some(mut expected) = self.ledger.read_asset(item_id).await? else {
            return Err(CoordinatorError::not_found(item_id));
        };
        let timestamp = now_timestamp();
        expected.status = Some(status.to_owned());
        expected.timestamp = Some(timestamp.clone());

        let applied = |asset: &Asset| {
            asset.status.as_deref() == Some(status)
                && asset.timestamp.as_deref() == Some(timestamp.as_str())
        };

        match self.ledger.update_status(item_id, status, &timestamp).await {
            Ok(()) => {},
            Err(reason) if reason.is_ambiguous() => {
                tracing::warn!(error = %reason, "ledger outcome unknown, verifying by read-back");
                return match self.read_back(item_id, applied).await {
                    ReadBack::Confirmed(asset) => Ok(asset),
                    ReadBack::NotVisible | ReadBack::Failed(_) => {
                        Err(CoordinatorError::OutcomeUnknown {
                            item_id: item_id.to_owned(),
                            reason,
                            pending_enrichment: None,
                        })
                    },
                };
            },
            Err(LedgerError::Endorsement { message, .. })
                if message.contains(MISSING_ASSET_MARKER) =>
            {
                return Err(CoordinatorError::not_found(item_id));
            },
            Err(err) => return Err(err.into()),
        }

        match self.read_back(item_id, applied).await {
            ReadBack::Confirmed(asset) => Ok(asset),
            ReadBack::NotVisible | ReadBack::Failed(_) => {
                tracing::warn!("status change committed but not yet visible");
                Ok(expected)
            },
        }
    }

    /// Reads both halves of a record.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::NotFound`] if neither store has the record
    /// - [`CoordinatorError::Ledger`] / [`CoordinatorError::Offchain`] if a
    ///   read failed, as opposed to finding nothing
    #[tracing::instrument(skip(self))]
    pub async fn get_merged_record(&self, item_id: &str) -> Result<MergedView> {
        let (ledger, offchain) =
            tokio::join!(self.ledger.read_asset(item_id), self.find(item_id));
        RecordMerger::merge(ledger?, offchain?)
            .ok_or_else(|| CoordinatorError::not_found(item_id))
    }

    /// Lists every ledger asset, skipping rows without an identifier.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::Ledger`] if the ledger read failed.
    #[tracing::instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Asset>> {
        let mut assets = self.ledger.get_all_assets().await?;
        let total = assets.len();
        assets.retain(|asset| !asset.item_id.trim().is_empty());
        if assets.len() < total {
            tracing::debug!(skipped = total - assets.len(), "skipped rows without itemID");
        }
        Ok(assets)
    }

    /// Completes a stalled enrichment write.
    ///
    /// Safe to repeat: an enrichment that already exists is returned
    /// unchanged and never overwritten.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::InvalidInput`] for a blank id
    /// - [`CoordinatorError::NotFound`] if the ledger has no such asset
    /// - [`CoordinatorError::Ledger`] / [`CoordinatorError::Offchain`] if a
    ///   call failed
    #[tracing::instrument(skip_all, fields(item_id = %record.item_id))]
    pub async fn replay_enrichment(&self, record: EnrichmentRecord) -> Result<ReplayOutcome> {
        if record.item_id.trim().is_empty() {
            return Err(CoordinatorError::invalid_input("itemID must not be empty"));
        }
        if self.ledger.read_asset(&record.item_id).await?.is_none() {
            return Err(CoordinatorError::not_found(record.item_id));
        }
        if let Some(existing) = self.find(&record.item_id).await? {
            tracing::debug!("enrichment already present");
            return Ok(ReplayOutcome::AlreadyPresent(existing));
        }
        self.upsert(&record).await?;
        tracing::info!("enrichment replayed");
        Ok(ReplayOutcome::Written(record))
    }

    /// Reads the asset until `expected` holds, within the configured
    /// attempts.
    async fn read_back(&self, item_id: &str, expected: impl Fn(&Asset) -> bool) -> ReadBack {
        let attempts = self.config.readback_attempts();
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.ledger.read_asset(item_id).await {
                Ok(Some(asset)) if expected(&asset) => return ReadBack::Confirmed(asset),
                Ok(_) => last_error = None,
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "read-back failed");
                    last_error = Some(err);
                },
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.readback_delay()).await;
            }
        }
        match last_error {
            Some(err) => ReadBack::Failed(err),
            None => ReadBack::NotVisible,
        }
    }

    async fn upsert(&self, record: &EnrichmentRecord) -> StorageResult<()> {
        self.bounded(self.store.upsert(record)).await
    }

    async fn find(&self, item_id: &str) -> StorageResult<Option<EnrichmentRecord>> {
        self.bounded(self.store.find(item_id)).await
    }

    async fn bounded<T>(&self, call: impl Future<Output = StorageResult<T>>) -> StorageResult<T> {
        let deadline = self.config.offchain_timeout();
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::timeout(deadline)),
        }
    }
}

/// Current time as RFC 3339 with millisecond precision.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
