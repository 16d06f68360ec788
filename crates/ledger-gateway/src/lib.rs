//! Client for a permissioned ledger's peer gateway.
//!
//! The ledger is the system of record for asset identity, ownership and
//! status. This crate owns the client side of talking to it: loading
//! credentials, keeping one multiplexed session, and running read-only
//! evaluations and state-changing submissions with per-phase deadlines.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ LedgerClient   evaluate │ submit │ submit_async           │
//! │                create_asset │ update_status │ read_asset  │
//! ├───────────────────────────────────────────────────────────┤
//! │ ConnectionManager   (one shared Session, init-once)       │
//! ├───────────────────────────────────────────────────────────┤
//! │ GatewayTransport    GrpcTransport (tonic, TLS) │ mock     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Transaction phases
//!
//! A submission moves through endorse, submit (ordering hand-off) and
//! commit-status. Failures carry the phase; only an unconfirmed hand-off or
//! an unobserved commit is *ambiguous* ([`LedgerError::is_ambiguous`]) and
//! must be resolved by reading the ledger rather than resubmitting.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use assetlink_ledger_gateway::{ConnectionManager, GatewayConfig, LedgerClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = Arc::new(ConnectionManager::new(GatewayConfig::from_env()?));
//!     let client = LedgerClient::new(Arc::clone(&manager));
//!
//!     for asset in client.get_all_assets().await? {
//!         println!("{} {:?}", asset.item_id, asset.status);
//!     }
//!
//!     manager.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with an in-memory mock gateway, a counting
//!   connector and deterministic credentials.
//! - **`failpoints`**: Enables fail-point injection (`retry-before-sleep`,
//!   `ledger-before-submit`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod asset;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
mod proposal;
pub mod proto;
mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transport;

pub use asset::{Asset, NewAsset, MISSING_ASSET_MARKER};
pub use client::{CommitReceipt, LedgerClient, SubmittedTransaction};
pub use config::{GatewayConfig, PemSource, RetryConfig, TimeoutConfig};
pub use connection::{ConnectionManager, Session};
pub use error::{
    validation_code_name, BoxError, CommitFailure, ConfigError, LedgerError, Result,
    TransactionPhase,
};
pub use identity::{Credentials, Identity, Signer};
pub use transport::{Connector, GatewayTransport, GrpcConnector, GrpcTransport};
