//! Error types for coordinated operations.
//!
//! Every failure says what happened on the ledger, so callers can tell a
//! clean failure from a partial one:
//!
//! | Error | [`LedgerState`] | Caller action |
//! |-------|-----------------|---------------|
//! | [`InvalidInput`](CoordinatorError::InvalidInput) | untouched | fix the input |
//! | [`NotFound`](CoordinatorError::NotFound) | untouched | report |
//! | [`Ledger`](CoordinatorError::Ledger) | untouched, unknown if ambiguous | retry if transient |
//! | [`Offchain`](CoordinatorError::Offchain) | untouched | retry if transient |
//! | [`PartialWrite`](CoordinatorError::PartialWrite) | committed | replay the enrichment |
//! | [`OutcomeUnknown`](CoordinatorError::OutcomeUnknown) | unknown | read later, then replay |

use assetlink_ledger_gateway::{Asset, LedgerError};
use assetlink_offchain_store::{EnrichmentRecord, StorageError};
use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// What a failed operation left behind on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// Nothing was written.
    Untouched,
    /// The ledger write committed.
    Committed,
    /// The ledger write may or may not have committed.
    Unknown,
}

/// Errors returned by [`ConsistencyCoordinator`](crate::ConsistencyCoordinator).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordinatorError {
    /// The request was rejected before anything was written.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What is wrong with the input.
        message: String,
    },

    /// The record exists in neither store, or the ledger lacks an asset the
    /// operation requires.
    #[error("Record not found: {item_id}")]
    NotFound {
        /// The identifier looked up.
        item_id: String,
    },

    /// A ledger call failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// An off-chain store call failed while the ledger was untouched.
    #[error("Off-chain store error: {0}")]
    Offchain(#[from] StorageError),

    /// The ledger write committed but the enrichment write failed.
    ///
    /// The ledger is never rolled back. Pass `enrichment` to
    /// [`replay_enrichment`](crate::ConsistencyCoordinator::replay_enrichment)
    /// to complete the record.
    #[error("Ledger record {} committed but enrichment write failed: {source}", asset.item_id)]
    PartialWrite {
        /// The committed ledger payload.
        asset: Box<Asset>,
        /// The enrichment that was not written.
        enrichment: Box<EnrichmentRecord>,
        /// Why the write failed.
        source: StorageError,
    },

    /// A ledger write reached ordering but its outcome could not be
    /// confirmed, even by reading the ledger back.
    ///
    /// Nothing was written off-chain. Once the asset is visible, pass
    /// `pending_enrichment` to
    /// [`replay_enrichment`](crate::ConsistencyCoordinator::replay_enrichment).
    #[error("Outcome of ledger write for {item_id} is unknown: {reason}")]
    OutcomeUnknown {
        /// Identifier the write used.
        item_id: String,
        /// The ambiguous ledger failure.
        #[source]
        reason: LedgerError,
        /// Enrichment still to be written, for creations.
        pending_enrichment: Option<Box<EnrichmentRecord>>,
    },
}

impl CoordinatorError {
    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(item_id: impl Into<String>) -> Self {
        Self::NotFound { item_id: item_id.into() }
    }

    /// What the failed operation left behind on the ledger.
    #[must_use]
    pub fn ledger_state(&self) -> LedgerState {
        match self {
            Self::PartialWrite { .. } => LedgerState::Committed,
            Self::OutcomeUnknown { .. } => LedgerState::Unknown,
            Self::Ledger(err) if err.is_ambiguous() => LedgerState::Unknown,
            Self::InvalidInput { .. }
            | Self::NotFound { .. }
            | Self::Ledger(_)
            | Self::Offchain(_) => LedgerState::Untouched,
        }
    }

    /// The enrichment a caller should replay, if any.
    #[must_use]
    pub fn pending_enrichment(&self) -> Option<&EnrichmentRecord> {
        match self {
            Self::PartialWrite { enrichment, .. } => Some(enrichment),
            Self::OutcomeUnknown { pending_enrichment, .. } => pending_enrichment.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` if repeating the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Ledger(err) => err.is_transient(),
            Self::Offchain(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use assetlink_ledger_gateway::CommitFailure;

    use super::*;

    fn commit_unknown() -> LedgerError {
        LedgerError::Commit {
            tx_id: "tx-1".into(),
            failure: CommitFailure::Unknown { message: "status stream closed".into() },
        }
    }

    #[test]
    fn test_ledger_state() {
        assert_eq!(CoordinatorError::invalid_input("x").ledger_state(), LedgerState::Untouched);
        assert_eq!(CoordinatorError::not_found("x").ledger_state(), LedgerState::Untouched);
        assert_eq!(
            CoordinatorError::from(LedgerError::connection("refused")).ledger_state(),
            LedgerState::Untouched
        );
        assert_eq!(CoordinatorError::from(commit_unknown()).ledger_state(), LedgerState::Unknown);

        let partial = CoordinatorError::PartialWrite {
            asset: Box::new(Asset { item_id: "donation-1".into(), ..Asset::default() }),
            enrichment: Box::new(EnrichmentRecord::new("donation-1")),
            source: StorageError::connection("down"),
        };
        assert_eq!(partial.ledger_state(), LedgerState::Committed);
        assert_eq!(partial.pending_enrichment().map(|e| e.item_id.as_str()), Some("donation-1"));
        assert!(partial.to_string().contains("donation-1"));

        let unknown = CoordinatorError::OutcomeUnknown {
            item_id: "donation-2".into(),
            reason: commit_unknown(),
            pending_enrichment: None,
        };
        assert_eq!(unknown.ledger_state(), LedgerState::Unknown);
        assert!(unknown.pending_enrichment().is_none());
    }

    #[test]
    fn test_source_chain() {
        let partial = CoordinatorError::PartialWrite {
            asset: Box::default(),
            enrichment: Box::new(EnrichmentRecord::new("donation-1")),
            source: StorageError::timeout(Duration::from_secs(5)),
        };
        let source = std::error::Error::source(&partial).unwrap();
        assert!(source.to_string().contains("5000ms"), "unexpected: {source}");
    }

    #[test]
    fn test_transient() {
        assert!(CoordinatorError::from(StorageError::connection("down")).is_transient());
        assert!(CoordinatorError::from(LedgerError::connection("refused")).is_transient());
        assert!(!CoordinatorError::not_found("x").is_transient());
    }
}
