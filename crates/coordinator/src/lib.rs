//! Ledger-first coordination of asset records and their off-chain
//! enrichment.
//!
//! A record has two halves: the [`Asset`](assetlink_ledger_gateway::Asset)
//! on the ledger, which decides existence and status, and an
//! [`EnrichmentRecord`](assetlink_offchain_store::EnrichmentRecord) in the
//! off-chain store. [`ConsistencyCoordinator`] keeps them in step without a
//! distributed transaction:
//!
//! ```text
//! create_record
//!   validate ──► ledger CreateAsset ──► read back ──► enrichment upsert
//!       │               │                   │                 │
//!  InvalidInput   Ledger (nothing     OutcomeUnknown     PartialWrite
//!                 committed)          (ambiguous and     (ledger committed,
//!                                     never visible)     replay later)
//! ```
//!
//! Reads merge both halves with [`RecordMerger`]; either half may be absent
//! on its own. [`ConsistencyCoordinator::replay_enrichment`] completes a
//! partial write and is safe to repeat.
//!
//! # Feature Flags
//!
//! - **`failpoints`**: Enables fail-point injection (`coordinator-before-offchain-write`) for
//!   deterministic partial-write tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod merger;
pub mod types;

pub use config::CoordinatorConfig;
pub use coordinator::ConsistencyCoordinator;
pub use error::{CoordinatorError, LedgerState, Result};
pub use merger::{MergedView, RecordMerger};
pub use types::{CreatedRecord, NewRecord, ReplayOutcome};
