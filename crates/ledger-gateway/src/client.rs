//! Typed ledger operations over the shared session.
//!
//! Reads go through [`LedgerClient::evaluate`], which runs on one peer and
//! never changes state. Writes go through [`LedgerClient::submit`], which
//! endorses, signs, hands off to ordering and waits for commit. Every step
//! is bounded by its own deadline from [`TimeoutConfig`](crate::TimeoutConfig),
//! and failures are tagged with the phase they happened in.
//!
//! # Cancellation
//!
//! Dropping a [`SubmittedTransaction`] (or the future returned by
//! [`LedgerClient::submit`]) after the hand-off to ordering only stops
//! waiting. The ledger effect, if any, is permanent.

use std::{future::Future, sync::Arc, time::Duration};

use fail::fail_point;
use tonic::{Code, Status};

use crate::{
    asset::{functions, Asset, NewAsset, MISSING_ASSET_MARKER},
    connection::{ConnectionManager, Session},
    error::{CommitFailure, LedgerError, Result, TransactionPhase},
    proposal::{
        prepared_result, signed_commit_status_request, signed_proposal, Invocation,
        TransactionContext,
    },
    proto::{EndorseRequest, EvaluateRequest, SubmitRequest, TX_VALIDATION_CODE_VALID},
    retry::with_retry,
};

/// Response status codes at or above this value are chaincode errors.
const ERROR_STATUS_THRESHOLD: i32 = 400;

/// Runs `call`, turning an elapsed `deadline` into `DeadlineExceeded`.
async fn bounded<T>(
    deadline: Duration,
    call: impl Future<Output = std::result::Result<T, Status>>,
) -> std::result::Result<T, Status> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(Status::deadline_exceeded(format!(
            "no response within {}ms",
            deadline.as_millis()
        ))),
    }
}

/// Ledger operations for the configured channel and chaincode.
///
/// Cloning is cheap; clones share the connection manager.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    connections: Arc<ConnectionManager>,
}

impl LedgerClient {
    /// Creates a client over `connections`.
    #[must_use]
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// The underlying connection manager.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Runs a read-only chaincode function and returns its raw payload.
    ///
    /// An empty payload is returned as-is; callers decide whether it means
    /// "absent" or "empty collection".
    ///
    /// # Errors
    ///
    /// [`LedgerError::Connection`] or [`LedgerError::Timeout`] once retries
    /// are exhausted, [`LedgerError::Evaluation`] if the chaincode rejects
    /// the call.
    #[tracing::instrument(skip(self, args), fields(args = args.len()))]
    pub async fn evaluate(&self, function: &str, args: &[String]) -> Result<Vec<u8>> {
        let session = self.connections.connect().await?;
        with_retry(session.retry(), TransactionPhase::Evaluate, || {
            evaluate_once(&session, function, args)
        })
        .await
    }

    /// Submits a state-changing transaction and waits for it to commit.
    ///
    /// Returns the chaincode's result payload.
    ///
    /// # Errors
    ///
    /// See [`submit_async`](Self::submit_async) and
    /// [`SubmittedTransaction::commit_status`]. Use
    /// [`LedgerError::is_ambiguous`] to tell "may have committed" apart from
    /// "definitely did not".
    #[tracing::instrument(skip(self, args), fields(args = args.len()))]
    pub async fn submit(&self, function: &str, args: &[String]) -> Result<Vec<u8>> {
        let submitted = self.submit_async(function, args).await?;
        submitted.commit_status().await?;
        Ok(submitted.into_result())
    }

    /// Endorses the transaction and hands it to ordering without waiting
    /// for commit.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Endorsement`] if peers reject the proposal
    /// - [`LedgerError::Connection`] / [`LedgerError::Timeout`] if
    ///   endorsement could not be reached; nothing was submitted
    /// - [`LedgerError::Ordering`] if the hand-off fails; when
    ///   `timed_out` is set the transaction may still commit
    #[tracing::instrument(
        skip(self, args),
        fields(args = args.len(), tx_id = tracing::field::Empty)
    )]
    pub async fn submit_async(
        &self,
        function: &str,
        args: &[String],
    ) -> Result<SubmittedTransaction> {
        let session = self.connections.connect().await?;
        let credentials = session.credentials();
        let context = TransactionContext::new(credentials.identity());
        let tx_id = context.tx_id.as_str();
        tracing::Span::current().record("tx_id", tx_id);

        let invocation = Invocation {
            channel: session.channel_name(),
            chaincode: session.chaincode_name(),
            function,
            args,
        };
        let proposal = signed_proposal(&context, &invocation, credentials.signer());
        let endorse_request = EndorseRequest {
            transaction_id: context.tx_id.clone(),
            channel_id: session.channel_name().to_owned(),
            proposed_transaction: Some(proposal),
            endorsing_organizations: Vec::new(),
        };

        let transport = session.transport();
        let endorse_deadline = session.timeouts().endorse();
        let endorsed = with_retry(session.retry(), TransactionPhase::Endorse, || {
            let request = endorse_request.clone();
            async move {
                bounded(endorse_deadline, transport.endorse(request, endorse_deadline))
                    .await
                    .map_err(|status| endorse_error(tx_id, endorse_deadline, &status))
            }
        })
        .await?;

        let mut envelope = endorsed.prepared_transaction.ok_or_else(|| LedgerError::Endorsement {
            tx_id: tx_id.to_owned(),
            message: "gateway returned no prepared transaction".into(),
        })?;
        let result = prepared_result(&envelope)?;
        envelope.signature = credentials.signer().sign(&envelope.payload);

        fail_point!("ledger-before-submit", |_| {
            Err(LedgerError::Ordering {
                tx_id: tx_id.to_owned(),
                message: "injected failure before ordering hand-off".into(),
                timed_out: false,
            })
        });

        let submit_deadline = session.timeouts().submit();
        let submit_request = SubmitRequest {
            transaction_id: context.tx_id.clone(),
            channel_id: session.channel_name().to_owned(),
            prepared_transaction: Some(envelope),
        };
        bounded(submit_deadline, transport.submit(submit_request, submit_deadline))
            .await
            .map_err(|status| ordering_error(tx_id, &status))?;

        tracing::debug!("transaction handed to ordering");
        Ok(SubmittedTransaction {
            tx_id: context.tx_id.clone(),
            result,
            session: Arc::clone(&session),
        })
    }

    /// Creates an asset.
    ///
    /// # Errors
    ///
    /// As for [`submit`](Self::submit). A duplicate id is rejected at
    /// endorsement.
    pub async fn create_asset(&self, asset: &NewAsset) -> Result<()> {
        self.submit(functions::CREATE_ASSET, &asset.to_args()).await.map(|_| ())
    }

    /// Sets the status of an existing asset.
    ///
    /// # Errors
    ///
    /// As for [`submit`](Self::submit). An unknown id is rejected at
    /// endorsement.
    pub async fn update_status(&self, item_id: &str, status: &str, timestamp: &str) -> Result<()> {
        let args = [item_id.to_owned(), status.to_owned(), timestamp.to_owned()];
        self.submit(functions::UPDATE_STATUS, &args).await.map(|_| ())
    }

    /// Reads one asset. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Evaluation errors other than "does not exist", and
    /// [`LedgerError::Serialization`] for a payload that is not an asset.
    pub async fn read_asset(&self, item_id: &str) -> Result<Option<Asset>> {
        let payload = match self.evaluate(functions::READ_ASSET, &[item_id.to_owned()]).await {
            Ok(payload) => payload,
            Err(LedgerError::Evaluation { message, .. })
                if message.contains(MISSING_ASSET_MARKER) =>
            {
                return Ok(None);
            },
            Err(err) => return Err(err),
        };
        if payload.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| LedgerError::serialization_with_source("asset payload is not valid JSON", e))
    }

    /// Reads every asset. An empty payload is an empty list.
    ///
    /// Rows that do not decode as an asset are skipped, so one malformed row
    /// never hides the rest of the ledger.
    ///
    /// # Errors
    ///
    /// Evaluation errors, and [`LedgerError::Serialization`] for a payload
    /// that is not a JSON array.
    pub async fn get_all_assets(&self) -> Result<Vec<Asset>> {
        let payload = self.evaluate(functions::GET_ALL_ASSETS, &[]).await?;
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        let rows = serde_json::from_slice::<Option<Vec<serde_json::Value>>>(&payload)
            .map_err(|e| LedgerError::serialization_with_source("asset list is not valid JSON", e))?
            .unwrap_or_default();
        let total = rows.len();
        let assets: Vec<Asset> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| match serde_json::from_value(row) {
                Ok(asset) => Some(asset),
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping ledger row that is not an asset");
                    None
                },
            })
            .collect();
        tracing::debug!(total, decoded = assets.len(), "read asset list");
        Ok(assets)
    }
}

async fn evaluate_once(session: &Session, function: &str, args: &[String]) -> Result<Vec<u8>> {
    let credentials = session.credentials();
    let context = TransactionContext::new(credentials.identity());
    let invocation = Invocation {
        channel: session.channel_name(),
        chaincode: session.chaincode_name(),
        function,
        args,
    };
    let request = EvaluateRequest {
        transaction_id: context.tx_id.clone(),
        channel_id: session.channel_name().to_owned(),
        proposed_transaction: Some(signed_proposal(&context, &invocation, credentials.signer())),
        target_organizations: Vec::new(),
    };

    let deadline = session.timeouts().evaluate();
    let response = bounded(deadline, session.transport().evaluate(request, deadline))
        .await
        .map_err(|status| evaluate_error(function, deadline, &status))?;

    match response.result {
        Some(result) if result.status >= ERROR_STATUS_THRESHOLD => {
            Err(LedgerError::Evaluation { function: function.to_owned(), message: result.message })
        },
        Some(result) => Ok(result.payload),
        None => Ok(Vec::new()),
    }
}

fn evaluate_error(function: &str, deadline: Duration, status: &Status) -> LedgerError {
    match status.code() {
        Code::Unavailable => LedgerError::connection(status.message()),
        Code::DeadlineExceeded => {
            LedgerError::Timeout { phase: TransactionPhase::Evaluate, deadline }
        },
        _ => LedgerError::Evaluation {
            function: function.to_owned(),
            message: status.message().to_owned(),
        },
    }
}

fn endorse_error(tx_id: &str, deadline: Duration, status: &Status) -> LedgerError {
    match status.code() {
        Code::Unavailable => LedgerError::connection(status.message()),
        Code::DeadlineExceeded => {
            LedgerError::Timeout { phase: TransactionPhase::Endorse, deadline }
        },
        _ => LedgerError::Endorsement {
            tx_id: tx_id.to_owned(),
            message: status.message().to_owned(),
        },
    }
}

/// `DeadlineExceeded`, `Cancelled` and `Unknown` leave the hand-off
/// unconfirmed; every other code is a definite rejection.
fn ordering_error(tx_id: &str, status: &Status) -> LedgerError {
    let timed_out =
        matches!(status.code(), Code::DeadlineExceeded | Code::Cancelled | Code::Unknown);
    if timed_out {
        tracing::warn!(tx_id, message = status.message(), "ordering hand-off unconfirmed");
    }
    LedgerError::Ordering {
        tx_id: tx_id.to_owned(),
        message: status.message().to_owned(),
        timed_out,
    }
}

/// Block number of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Block the transaction was committed in.
    pub block_number: u64,
}

/// A transaction that has been handed to ordering.
///
/// Waiting for the outcome is optional and may be abandoned at any time by
/// dropping this value. Abandoning never retracts the transaction.
#[derive(Debug)]
#[must_use = "dropping a submitted transaction stops waiting for its commit but does not undo it"]
pub struct SubmittedTransaction {
    tx_id: String,
    result: Vec<u8>,
    session: Arc<Session>,
}

impl SubmittedTransaction {
    /// The transaction id.
    #[must_use]
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// The chaincode result returned at endorsement.
    #[must_use]
    pub fn result(&self) -> &[u8] {
        &self.result
    }

    /// Consumes the handle, returning the chaincode result.
    #[must_use]
    pub fn into_result(self) -> Vec<u8> {
        self.result
    }

    /// Waits for the transaction to commit.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Commit`] with [`CommitFailure::Invalidated`] if the
    /// transaction was recorded as invalid, or [`CommitFailure::Unknown`]
    /// if the outcome could not be observed within the deadline.
    #[tracing::instrument(skip(self), fields(tx_id = %self.tx_id))]
    pub async fn commit_status(&self) -> Result<CommitReceipt> {
        let credentials = self.session.credentials();
        let request = signed_commit_status_request(
            &self.tx_id,
            self.session.channel_name(),
            credentials.identity(),
            credentials.signer(),
        );
        let deadline = self.session.timeouts().commit_status();

        let status = bounded(deadline, self.session.transport().commit_status(request, deadline))
            .await
            .map_err(|status| {
                tracing::warn!(
                    code = ?status.code(),
                    message = status.message(),
                    "commit outcome unknown"
                );
                LedgerError::Commit {
                    tx_id: self.tx_id.clone(),
                    failure: CommitFailure::Unknown { message: status.message().to_owned() },
                }
            })?;

        if status.result == TX_VALIDATION_CODE_VALID {
            tracing::debug!(block_number = status.block_number, "transaction committed");
            Ok(CommitReceipt { block_number: status.block_number })
        } else {
            Err(LedgerError::Commit {
                tx_id: self.tx_id.clone(),
                failure: CommitFailure::Invalidated {
                    code: status.result,
                    block_number: status.block_number,
                },
            })
        }
    }
}
