//! Shared test utilities for ledger gateway testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! - [`MockGateway`]: an in-memory peer gateway running the asset chaincode
//!   (`CreateAsset`, `UpdateStatus`, `ReadAsset`, `GetAllAssets`), with
//!   failure injection for every transaction phase
//! - [`MockConnector`]: hands out transports to a [`MockGateway`], counting
//!   connects and optionally delaying or failing them
//! - [`TestCredentials`]: deterministic signing key and certificate
//!
//! ```toml
//! [dev-dependencies]
//! assetlink-ledger-gateway = { path = "../ledger-gateway", features = ["testutil"] }
//! ```

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use p256::{
    ecdsa::SigningKey,
    pkcs8::{EncodePrivateKey, LineEnding},
};
use parking_lot::Mutex;
use prost::Message;
use tonic::Status;

use crate::{
    asset::{functions, Asset},
    client::LedgerClient,
    config::{GatewayConfig, PemSource, RetryConfig},
    connection::ConnectionManager,
    error::{LedgerError, Result},
    identity::{Credentials, Identity, Signer},
    proposal::{prepared_envelope, DecodedProposal},
    proto::{
        CommitStatusRequest, CommitStatusResponse, EndorseRequest, EndorseResponse,
        EvaluateRequest, EvaluateResponse, Response, SignedCommitStatusRequest, SubmitRequest,
        SubmitResponse, TX_VALIDATION_CODE_VALID,
    },
    transport::{Connector, GatewayTransport},
};

/// `TxValidationCode::MVCC_READ_CONFLICT`.
pub const MVCC_READ_CONFLICT: i32 = 11;

/// Deterministic client credentials.
#[derive(Debug, Clone)]
pub struct TestCredentials {
    /// PKCS#8 PEM private key.
    pub key_pem: String,
    /// PEM certificate block.
    pub cert_pem: String,
}

impl TestCredentials {
    /// Generates credentials from a fixed P-256 scalar.
    #[must_use]
    pub fn generate() -> Self {
        let key = SigningKey::from_bytes(&p256::FieldBytes::from([7u8; 32]))
            .expect("fixed scalar is a valid P-256 key");
        let key_pem =
            key.to_pkcs8_pem(LineEnding::LF).expect("PKCS#8 encoding succeeds").to_string();
        let cert_pem =
            pem::encode(&pem::Pem::new("CERTIFICATE", b"assetlink test certificate".to_vec()));
        Self { key_pem, cert_pem }
    }

    /// Parsed credentials for `msp_id`, using the certificate as TLS root.
    #[must_use]
    pub fn credentials(&self, msp_id: &str) -> Credentials {
        let identity = Identity::new(msp_id, self.cert_pem.as_bytes().to_vec())
            .expect("test certificate is valid PEM");
        let signer = Signer::from_pkcs8_pem(self.key_pem.as_bytes()).expect("test key parses");
        Credentials::new(identity, signer, self.cert_pem.as_bytes().to_vec())
            .expect("test TLS root is valid PEM")
    }

    /// Gateway configuration with inline credentials and a fast retry policy.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::builder()
            .msp_id("Org1MSP")
            .channel_name("mychannel")
            .chaincode_name("basic")
            .peer_endpoint("localhost:7051")
            .peer_host_alias("peer0.org1.example.com")
            .tls_root_cert(PemSource::inline(self.cert_pem.clone()))
            .user_cert(PemSource::inline(self.cert_pem.clone()))
            .user_key(PemSource::inline(self.key_pem.clone()))
            .retry(fast_retry())
            .build()
            .expect("test gateway config is valid")
    }
}

/// Retry policy with millisecond backoff.
#[must_use]
pub fn fast_retry() -> RetryConfig {
    RetryConfig::builder()
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(5))
        .build()
        .expect("fast retry config is valid")
}

/// Builds a [`LedgerClient`] wired to `gateway`.
#[must_use]
pub fn mock_client(gateway: &MockGateway) -> (LedgerClient, Arc<MockConnector>) {
    mock_client_with_config(gateway, TestCredentials::generate().gateway_config())
}

/// Builds a [`LedgerClient`] wired to `gateway` with a custom configuration.
#[must_use]
pub fn mock_client_with_config(
    gateway: &MockGateway,
    config: GatewayConfig,
) -> (LedgerClient, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new(gateway.clone()));
    let manager = ConnectionManager::with_connector(config, connector.clone());
    (LedgerClient::new(Arc::new(manager)), connector)
}

/// How an injected ordering failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingFault {
    /// The orderer rejects the transaction; nothing is written.
    Rejected,
    /// The hand-off times out and the transaction is dropped.
    TimedOutDropped,
    /// The hand-off times out but the transaction still commits.
    TimedOutApplied,
}

#[derive(Debug, Clone)]
enum Write {
    Create(Asset),
    UpdateStatus { item_id: String, status: String, timestamp: String },
}

impl Write {
    fn item_id(&self) -> &str {
        match self {
            Self::Create(asset) => &asset.item_id,
            Self::UpdateStatus { item_id, .. } => item_id,
        }
    }
}

#[derive(Default)]
struct MockState {
    assets: BTreeMap<String, Asset>,
    raw_rows: Vec<String>,
    pending: HashMap<String, Write>,
    outcomes: HashMap<String, (i32, u64)>,
    lost_status: HashSet<String>,
    read_lag: HashMap<String, u32>,
    block_height: u64,

    endorsement_rejections: VecDeque<String>,
    ordering_faults: VecDeque<OrderingFault>,
    commit_invalidations: VecDeque<i32>,
    lost_commit_statuses: usize,
    next_read_lag: u32,
    unavailable_evaluations: u32,
    unavailable_endorsements: u32,
    hanging_evaluations: u32,

    evaluations: usize,
    endorsements: usize,
    submissions: usize,
}

/// An in-memory peer gateway running the asset chaincode.
///
/// Writes are endorsed against current state, applied when handed to
/// ordering, and re-validated at commit: a create whose id appeared in the
/// meantime is recorded as `MVCC_READ_CONFLICT`. Clones share state.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockGateway")
            .field("assets", &state.assets.len())
            .field("block_height", &state.block_height)
            .finish_non_exhaustive()
    }
}

impl MockGateway {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a committed asset.
    pub fn insert_asset(&self, asset: Asset) {
        self.state.lock().assets.insert(asset.item_id.clone(), asset);
    }

    /// Seeds a raw JSON row returned verbatim by `GetAllAssets`, for rows
    /// written by older chaincode.
    pub fn insert_raw_row(&self, json: impl Into<String>) {
        self.state.lock().raw_rows.push(json.into());
    }

    /// Returns the committed asset, bypassing the chaincode.
    #[must_use]
    pub fn asset(&self, item_id: &str) -> Option<Asset> {
        self.state.lock().assets.get(item_id).cloned()
    }

    /// Number of committed assets.
    #[must_use]
    pub fn asset_count(&self) -> usize {
        self.state.lock().assets.len()
    }

    /// Rejects the next endorsement with `message`.
    pub fn reject_next_endorsement(&self, message: impl Into<String>) {
        self.state.lock().endorsement_rejections.push_back(message.into());
    }

    /// Injects a fault into the next ordering hand-off.
    pub fn fail_next_ordering(&self, fault: OrderingFault) {
        self.state.lock().ordering_faults.push_back(fault);
    }

    /// Records the next committed transaction as invalid with `code`.
    pub fn invalidate_next_commit(&self, code: i32) {
        self.state.lock().commit_invalidations.push_back(code);
    }

    /// Applies the next transaction but fails its commit-status query.
    pub fn lose_next_commit_status(&self) {
        self.state.lock().lost_commit_statuses += 1;
    }

    /// Hides the next created asset from `reads` subsequent reads.
    pub fn delay_visibility_of_next_create(&self, reads: u32) {
        self.state.lock().next_read_lag = reads;
    }

    /// Fails the next `count` evaluations with `Unavailable`.
    pub fn fail_next_evaluations(&self, count: u32) {
        self.state.lock().unavailable_evaluations = count;
    }

    /// Fails the next `count` endorsements with `Unavailable`.
    pub fn fail_next_endorsements_unavailable(&self, count: u32) {
        self.state.lock().unavailable_endorsements = count;
    }

    /// Makes the next `count` evaluations never answer.
    pub fn hang_next_evaluations(&self, count: u32) {
        self.state.lock().hanging_evaluations = count;
    }

    /// Evaluations received.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.state.lock().evaluations
    }

    /// Endorsements received.
    #[must_use]
    pub fn endorsements(&self) -> usize {
        self.state.lock().endorsements
    }

    /// Ordering hand-offs received.
    #[must_use]
    pub fn submissions(&self) -> usize {
        self.state.lock().submissions
    }

    fn evaluate(&self, request: &EvaluateRequest) -> std::result::Result<Vec<u8>, Status> {
        let proposal = decode(request.proposed_transaction.as_ref())?;
        let mut state = self.state.lock();
        state.evaluations += 1;
        if state.unavailable_evaluations > 0 {
            state.unavailable_evaluations -= 1;
            return Err(Status::unavailable("peer unavailable"));
        }

        match proposal.function.as_str() {
            functions::READ_ASSET => {
                let id = arg(&proposal, 0)?;
                if let Some(remaining) = state.read_lag.get_mut(id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(chaincode_error(format!("the asset {id} does not exist")));
                    }
                }
                let asset = state
                    .assets
                    .get(id)
                    .ok_or_else(|| chaincode_error(format!("the asset {id} does not exist")))?;
                serde_json::to_vec(asset).map_err(|e| Status::internal(e.to_string()))
            },
            functions::GET_ALL_ASSETS => {
                let mut rows = state
                    .assets
                    .values()
                    .map(serde_json::to_string)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Status::internal(e.to_string()))?;
                rows.extend(state.raw_rows.iter().cloned());
                if rows.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(format!("[{}]", rows.join(",")).into_bytes())
                }
            },
            other => Err(chaincode_error(format!("unknown or write-only function {other}"))),
        }
    }

    fn endorse(&self, request: &EndorseRequest) -> std::result::Result<EndorseResponse, Status> {
        let proposal = decode(request.proposed_transaction.as_ref())?;
        let mut state = self.state.lock();
        state.endorsements += 1;
        if state.unavailable_endorsements > 0 {
            state.unavailable_endorsements -= 1;
            return Err(Status::unavailable("no endorsing peers available"));
        }
        if let Some(message) = state.endorsement_rejections.pop_front() {
            return Err(Status::aborted(message));
        }

        let write = match proposal.function.as_str() {
            functions::CREATE_ASSET => {
                if proposal.args.len() != 7 {
                    return Err(Status::aborted("CreateAsset expects 7 arguments"));
                }
                let id = &proposal.args[0];
                if state.assets.contains_key(id) {
                    return Err(Status::aborted(format!("the asset {id} already exists")));
                }
                Write::Create(Asset {
                    item_id: id.clone(),
                    item_type: Some(proposal.args[1].clone()),
                    condition: Some(proposal.args[2].clone()),
                    donor_id: Some(proposal.args[3].clone()),
                    current_owner: Some(proposal.args[4].clone()),
                    status: Some(proposal.args[5].clone()),
                    timestamp: Some(proposal.args[6].clone()),
                })
            },
            functions::UPDATE_STATUS => {
                if proposal.args.len() != 3 {
                    return Err(Status::aborted("UpdateStatus expects 3 arguments"));
                }
                let id = &proposal.args[0];
                if !state.assets.contains_key(id) {
                    return Err(Status::aborted(format!("the asset {id} does not exist")));
                }
                Write::UpdateStatus {
                    item_id: id.clone(),
                    status: proposal.args[1].clone(),
                    timestamp: proposal.args[2].clone(),
                }
            },
            other => return Err(Status::aborted(format!("function {other} is not a write"))),
        };

        state.pending.insert(proposal.tx_id.clone(), write);
        Ok(EndorseResponse {
            prepared_transaction: Some(prepared_envelope(&proposal.header, Vec::new())),
        })
    }

    fn submit(&self, request: &SubmitRequest) -> std::result::Result<(), Status> {
        let envelope = request
            .prepared_transaction
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing prepared transaction"))?;
        if envelope.signature.is_empty() {
            return Err(Status::invalid_argument("prepared transaction is not signed"));
        }

        let mut state = self.state.lock();
        state.submissions += 1;
        let write = state
            .pending
            .remove(&request.transaction_id)
            .ok_or_else(|| Status::failed_precondition("transaction was not endorsed"))?;

        match state.ordering_faults.pop_front() {
            Some(OrderingFault::Rejected) => {
                return Err(Status::failed_precondition("orderer rejected transaction"));
            },
            Some(OrderingFault::TimedOutDropped) => {
                return Err(Status::deadline_exceeded("orderer did not acknowledge"));
            },
            Some(OrderingFault::TimedOutApplied) => {
                state.commit(&request.transaction_id, write);
                return Err(Status::deadline_exceeded("orderer did not acknowledge"));
            },
            None => {},
        }

        state.commit(&request.transaction_id, write);
        Ok(())
    }

    fn commit_status(
        &self,
        request: &SignedCommitStatusRequest,
    ) -> std::result::Result<CommitStatusResponse, Status> {
        if request.signature.is_empty() {
            return Err(Status::permission_denied("commit status request is not signed"));
        }
        let request = CommitStatusRequest::decode(request.request.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let state = self.state.lock();
        if state.lost_status.contains(&request.transaction_id) {
            return Err(Status::unavailable("commit status stream closed"));
        }
        let (result, block_number) = state
            .outcomes
            .get(&request.transaction_id)
            .copied()
            .ok_or_else(|| Status::not_found("transaction not committed"))?;
        Ok(CommitStatusResponse { result, block_number })
    }
}

impl MockState {
    fn commit(&mut self, tx_id: &str, write: Write) {
        self.block_height += 1;
        let block = self.block_height;

        let code = if let Some(code) = self.commit_invalidations.pop_front() {
            code
        } else {
            match &write {
                Write::Create(asset) if self.assets.contains_key(&asset.item_id) => {
                    MVCC_READ_CONFLICT
                },
                Write::UpdateStatus { item_id, .. } if !self.assets.contains_key(item_id) => {
                    MVCC_READ_CONFLICT
                },
                _ => TX_VALIDATION_CODE_VALID,
            }
        };

        if code == TX_VALIDATION_CODE_VALID {
            let item_id = write.item_id().to_owned();
            match write {
                Write::Create(asset) => {
                    if self.next_read_lag > 0 {
                        self.read_lag.insert(item_id.clone(), self.next_read_lag);
                        self.next_read_lag = 0;
                    }
                    self.assets.insert(item_id, asset);
                },
                Write::UpdateStatus { item_id, status, timestamp } => {
                    if let Some(asset) = self.assets.get_mut(&item_id) {
                        asset.status = Some(status);
                        asset.timestamp = Some(timestamp);
                    }
                },
            }
        }

        if self.lost_commit_statuses > 0 {
            self.lost_commit_statuses -= 1;
            self.lost_status.insert(tx_id.to_owned());
        }
        self.outcomes.insert(tx_id.to_owned(), (code, block));
    }
}

fn decode(
    proposal: Option<&crate::proto::SignedProposal>,
) -> std::result::Result<DecodedProposal, Status> {
    let signed = proposal.ok_or_else(|| Status::invalid_argument("missing proposal"))?;
    if signed.signature.is_empty() {
        return Err(Status::permission_denied("proposal is not signed"));
    }
    DecodedProposal::decode(signed).map_err(Status::invalid_argument)
}

fn arg(proposal: &DecodedProposal, index: usize) -> std::result::Result<&str, Status> {
    proposal
        .args
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| chaincode_error(format!("{} expects an argument", proposal.function)))
}

fn chaincode_error(message: String) -> Status {
    Status::unknown(format!(
        "evaluate call to endorser returned error: chaincode response 500, {message}"
    ))
}

/// One connection to a [`MockGateway`].
#[derive(Debug)]
pub struct MockTransport {
    gateway: MockGateway,
    closed: AtomicBool,
}

impl MockTransport {
    fn check_open(&self) -> std::result::Result<(), Status> {
        if self.closed.load(Ordering::Acquire) {
            Err(Status::unavailable("transport closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GatewayTransport for MockTransport {
    async fn evaluate(
        &self,
        request: EvaluateRequest,
        _deadline: Duration,
    ) -> std::result::Result<EvaluateResponse, Status> {
        self.check_open()?;
        let hang = {
            let mut state = self.gateway.state.lock();
            let hang = state.hanging_evaluations > 0;
            if hang {
                state.hanging_evaluations -= 1;
            }
            hang
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let payload = self.gateway.evaluate(&request)?;
        Ok(EvaluateResponse {
            result: Some(Response { status: 200, message: String::new(), payload }),
        })
    }

    async fn endorse(
        &self,
        request: EndorseRequest,
        _deadline: Duration,
    ) -> std::result::Result<EndorseResponse, Status> {
        self.check_open()?;
        self.gateway.endorse(&request)
    }

    async fn submit(
        &self,
        request: SubmitRequest,
        _deadline: Duration,
    ) -> std::result::Result<SubmitResponse, Status> {
        self.check_open()?;
        self.gateway.submit(&request).map(|()| SubmitResponse {})
    }

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
        _deadline: Duration,
    ) -> std::result::Result<CommitStatusResponse, Status> {
        self.check_open()?;
        self.gateway.commit_status(&request)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Connector handing out [`MockTransport`]s.
#[derive(Debug)]
pub struct MockConnector {
    gateway: MockGateway,
    connects: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<LedgerError>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    /// Creates a connector for `gateway`.
    #[must_use]
    pub fn new(gateway: MockGateway) -> Self {
        Self {
            gateway,
            connects: AtomicUsize::new(0),
            delay: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
            transports: Mutex::new(Vec::new()),
        }
    }

    /// Delays every connect by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Fails the next connect with `error`.
    pub fn fail_next_connect(&self, error: LedgerError) {
        self.failures.lock().push_back(error);
    }

    /// Connect attempts made, failed or not.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of transports handed out that have since been closed.
    #[must_use]
    pub fn closed_transports(&self) -> usize {
        self.transports.lock().iter().filter(|t| t.closed.load(Ordering::Acquire)).count()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _config: &GatewayConfig,
        _tls_root_cert: &[u8],
    ) -> Result<Arc<dyn GatewayTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        let transport = Arc::new(MockTransport {
            gateway: self.gateway.clone(),
            closed: AtomicBool::new(false),
        });
        self.transports.lock().push(Arc::clone(&transport));
        Ok(transport as Arc<dyn GatewayTransport>)
    }
}
