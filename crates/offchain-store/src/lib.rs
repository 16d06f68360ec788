//! Off-chain enrichment store abstraction.
//!
//! Ledger assets carry only the fields that need consensus ordering. Everything
//! else about a donated item (donor contact, recipient school, photos,
//! appraisal) lives in an enrichment store keyed by the ledger `itemID`. This
//! crate defines that boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConsistencyCoordinator                      │
//! │        (ledger first, enrichment second, merge on read)     │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │   ledger gateway client      │   assetlink-offchain-store   │
//! │                              │   OffchainStore trait        │
//! │                              │   (upsert, find)             │
//! │                              ├──────────────────────────────┤
//! │                              │ MemoryOffchainStore │ others │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use assetlink_offchain_store::{EnrichmentRecord, MemoryOffchainStore, OffchainStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryOffchainStore::new();
//!
//!     let mut record = EnrichmentRecord::new("donation-1");
//!     record.category = Some("furniture".into());
//!     store.upsert(&record).await?;
//!
//!     let found = store.find("donation-1").await?;
//!     assert_eq!(found.and_then(|r| r.category), Some("furniture".into()));
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a failure-injecting store wrapper for
//!   integration tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

pub use backend::OffchainStore;
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryOffchainStore;
pub use types::{DonorInfo, EnrichmentRecord, RecipientInfo, DEFAULT_QUANTITY};
