//! Error types for the ledger gateway client.
//!
//! Submission failures are tagged with the phase in which they happened.
//! The phase decides what a caller may do next:
//!
//! | Error | Ledger effect | Caller action |
//! |-------|---------------|---------------|
//! | [`Configuration`](LedgerError::Configuration) | none | fix configuration, never retry |
//! | [`Connection`](LedgerError::Connection) | none | retry with backoff |
//! | [`Endorsement`](LedgerError::Endorsement) | none | report; resubmitting is safe |
//! | [`Ordering`](LedgerError::Ordering) (rejected) | none | report |
//! | [`Ordering`](LedgerError::Ordering) (timed out) | unknown | verify by reading back |
//! | [`Commit`](LedgerError::Commit) ([`CommitFailure::Invalidated`]) | none, recorded as invalid | report |
//! | [`Commit`](LedgerError::Commit) ([`CommitFailure::Unknown`]) | unknown | verify by reading back |

use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

/// A shareable boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for ledger gateway operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// The stage of the transaction flow an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    /// Establishing the transport session.
    Connect,
    /// Read-only evaluation on a single peer.
    Evaluate,
    /// Proposal execution and signing by endorsing peers.
    Endorse,
    /// Hand-off of the endorsed transaction to the ordering service.
    Submit,
    /// Waiting for the committed block and its validation result.
    CommitStatus,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Evaluate => write!(f, "evaluate"),
            Self::Endorse => write!(f, "endorse"),
            Self::Submit => write!(f, "submit"),
            Self::CommitStatus => write!(f, "commit_status"),
        }
    }
}

/// Why a submitted transaction did not commit successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitFailure {
    /// The transaction was ordered into a block but marked invalid, so its
    /// writes were not applied.
    Invalidated {
        /// Validation code reported by the committing peer.
        code: i32,
        /// Block that recorded the invalid transaction.
        block_number: u64,
    },
    /// The transaction reached the ordering service but its outcome could
    /// not be observed. It may or may not have been committed.
    Unknown {
        /// Description of why the outcome is unknown.
        message: String,
    },
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalidated { code, block_number } => write!(
                f,
                "invalidated with {} ({code}) in block {block_number}",
                validation_code_name(*code)
            ),
            Self::Unknown { message } => write!(f, "outcome unknown: {message}"),
        }
    }
}

/// Returns the symbolic name of a transaction validation code.
#[must_use]
pub fn validation_code_name(code: i32) -> &'static str {
    match code {
        0 => "VALID",
        1 => "NIL_ENVELOPE",
        2 => "BAD_PAYLOAD",
        3 => "BAD_COMMON_HEADER",
        4 => "BAD_CREATOR_SIGNATURE",
        5 => "INVALID_ENDORSER_TRANSACTION",
        8 => "BAD_PROPOSAL_TXID",
        9 => "DUPLICATE_TXID",
        10 => "ENDORSEMENT_POLICY_FAILURE",
        11 => "MVCC_READ_CONFLICT",
        12 => "PHANTOM_READ_CONFLICT",
        17 => "EXPIRED_CHAINCODE",
        18 => "CHAINCODE_VERSION_CONFLICT",
        254 => "NOT_VALIDATED",
        255 => "INVALID_OTHER_REASON",
        _ => "UNKNOWN_VALIDATION_CODE",
    }
}

/// Errors produced by the ledger gateway client.
///
/// The type is `Clone` because a single connection attempt is shared by
/// every caller that raced to connect; all of them observe the same error.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Invalid configuration or credential material. Retrying cannot help.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of what is wrong.
        message: String,
        /// The underlying parse or I/O error.
        #[source]
        source: Option<BoxError>,
    },

    /// Transport-level failure before any ledger-side work began.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// A side-effect-free phase exceeded its deadline.
    #[error("{phase} deadline of {}ms elapsed", deadline.as_millis())]
    Timeout {
        /// Phase that timed out.
        phase: TransactionPhase,
        /// The deadline that elapsed.
        deadline: Duration,
    },

    /// A read-only evaluation was rejected by the peer or the chaincode.
    #[error("Evaluation of {function} failed: {message}")]
    Evaluation {
        /// Chaincode function that was evaluated.
        function: String,
        /// Rejection message.
        message: String,
    },

    /// Endorsing peers rejected the proposal; nothing was sent to ordering.
    #[error("Endorsement of transaction {tx_id} rejected: {message}")]
    Endorsement {
        /// Transaction identifier.
        tx_id: String,
        /// Rejection message.
        message: String,
    },

    /// Hand-off to the ordering service failed.
    #[error("Ordering of transaction {tx_id} failed: {message}")]
    Ordering {
        /// Transaction identifier.
        tx_id: String,
        /// Failure message.
        message: String,
        /// Whether the hand-off deadline elapsed rather than being rejected.
        timed_out: bool,
    },

    /// The transaction was handed to ordering but did not commit cleanly.
    #[error("Commit of transaction {tx_id} failed: {failure}")]
    Commit {
        /// Transaction identifier.
        tx_id: String,
        /// What went wrong.
        failure: CommitFailure,
    },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl LedgerError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into(), source: None }
    }

    /// Creates a new `Configuration` error with a source error.
    #[must_use]
    pub fn configuration_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with a source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for failures that happened before anything reached
    /// the ledger and may succeed on a later attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Returns `true` when the transaction may or may not have been
    /// committed. Such failures must be resolved by reading the ledger, never
    /// by resubmitting.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::Ordering { timed_out: true, .. }
                | Self::Commit { failure: CommitFailure::Unknown { .. }, .. }
        )
    }

    /// Returns `true` if the error is fatal configuration input.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns the transaction phase the error belongs to, if any.
    #[must_use]
    pub fn phase(&self) -> Option<TransactionPhase> {
        match self {
            Self::Timeout { phase, .. } => Some(*phase),
            Self::Evaluation { .. } => Some(TransactionPhase::Evaluate),
            Self::Endorsement { .. } => Some(TransactionPhase::Endorse),
            Self::Ordering { .. } => Some(TransactionPhase::Submit),
            Self::Commit { .. } => Some(TransactionPhase::CommitStatus),
            Self::Configuration { .. } | Self::Connection { .. } | Self::Serialization { .. } => {
                None
            },
        }
    }

    /// Returns the transaction id for submission failures.
    #[must_use]
    pub fn tx_id(&self) -> Option<&str> {
        match self {
            Self::Endorsement { tx_id, .. }
            | Self::Ordering { tx_id, .. }
            | Self::Commit { tx_id, .. } => Some(tx_id),
            _ => None,
        }
    }
}

/// Validation errors raised while building configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required string field is empty or whitespace.
    #[error("{field} must not be empty")]
    Empty {
        /// Field name.
        field: &'static str,
    },

    /// A duration or count must be strictly positive.
    #[error("{field} must be positive, got {value}")]
    MustBePositive {
        /// Field name.
        field: &'static str,
        /// Rejected value.
        value: String,
    },

    /// A value is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Field name.
        field: &'static str,
        /// Minimum allowed value.
        min: String,
        /// Rejected value.
        value: String,
    },
}

impl From<ConfigError> for LedgerError {
    fn from(err: ConfigError) -> Self {
        Self::configuration_with_source("invalid gateway configuration", err)
    }
}
