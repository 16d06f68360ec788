//! Combination of the ledger and off-chain halves of a record.

use assetlink_ledger_gateway::Asset;
use assetlink_offchain_store::EnrichmentRecord;
use serde::{ser::SerializeStruct, Serialize, Serializer};

/// A record as seen through both stores.
///
/// Either half may be missing on its own: the ledger is authoritative for
/// existence, while enrichment may lag behind or never have been written.
#[derive(Debug, Clone, PartialEq)]
pub enum MergedView {
    /// Both halves are present.
    Full {
        /// Ledger half.
        ledger: Asset,
        /// Off-chain half.
        offchain: EnrichmentRecord,
    },
    /// Only the ledger half exists.
    LedgerOnly(Asset),
    /// Only the off-chain half exists.
    OffchainOnly(EnrichmentRecord),
}

impl MergedView {
    /// The ledger half, if present.
    #[must_use]
    pub fn ledger(&self) -> Option<&Asset> {
        match self {
            Self::Full { ledger, .. } | Self::LedgerOnly(ledger) => Some(ledger),
            Self::OffchainOnly(_) => None,
        }
    }

    /// The off-chain half, if present.
    #[must_use]
    pub fn offchain(&self) -> Option<&EnrichmentRecord> {
        match self {
            Self::Full { offchain, .. } | Self::OffchainOnly(offchain) => Some(offchain),
            Self::LedgerOnly(_) => None,
        }
    }

    /// Splits the view into its halves.
    #[must_use]
    pub fn into_parts(self) -> (Option<Asset>, Option<EnrichmentRecord>) {
        match self {
            Self::Full { ledger, offchain } => (Some(ledger), Some(offchain)),
            Self::LedgerOnly(ledger) => (Some(ledger), None),
            Self::OffchainOnly(offchain) => (None, Some(offchain)),
        }
    }
}

impl Serialize for MergedView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MergedView", 2)?;
        state.serialize_field("ledger", &self.ledger())?;
        state.serialize_field("offchain", &self.offchain())?;
        state.end()
    }
}

/// Merges the two halves of a record.
pub struct RecordMerger;

impl RecordMerger {
    /// Returns the view for the halves that exist, or `None` when neither
    /// does.
    #[must_use]
    pub fn merge(
        ledger: Option<Asset>,
        offchain: Option<EnrichmentRecord>,
    ) -> Option<MergedView> {
        match (ledger, offchain) {
            (Some(ledger), Some(offchain)) => Some(MergedView::Full { ledger, offchain }),
            (Some(ledger), None) => Some(MergedView::LedgerOnly(ledger)),
            (None, Some(offchain)) => Some(MergedView::OffchainOnly(offchain)),
            (None, None) => None,
        }
    }
}
