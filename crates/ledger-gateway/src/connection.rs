//! Session lifecycle.
//!
//! [`ConnectionManager`] owns at most one live [`Session`]. The first
//! `connect()` starts establishing it; callers that arrive while that attempt
//! is in flight join the same attempt and observe the same outcome, so at
//! most one transport is ever opened per attempt. A failed attempt leaves the
//! manager idle so a later call can try again. `close()` releases the session
//! and may be called any number of times.
//!
//! ```text
//!            connect()                 ok
//!   Idle ──────────────▶ Connecting ────────▶ Connected
//!    ▲                       │ err                │
//!    └───────────────────────┘                    │
//!    └─────────────────── close() ────────────────┘
//! ```

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;

use crate::{
    config::{GatewayConfig, RetryConfig, TimeoutConfig},
    error::{LedgerError, Result, TransactionPhase},
    identity::Credentials,
    retry::with_retry,
    transport::{Connector, GatewayTransport, GrpcConnector},
};

type SharedAttempt = Shared<BoxFuture<'static, Result<Arc<Session>>>>;

/// An authenticated, open connection to the gateway.
///
/// Sessions are handed out as `Arc<Session>` and shared by every concurrent
/// operation.
pub struct Session {
    transport: Arc<dyn GatewayTransport>,
    credentials: Credentials,
    channel_name: String,
    chaincode_name: String,
    timeouts: TimeoutConfig,
    retry: RetryConfig,
    generation: u64,
}

impl Session {
    pub(crate) fn transport(&self) -> &dyn GatewayTransport {
        self.transport.as_ref()
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Channel the session transacts on.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Chaincode the session invokes.
    #[must_use]
    pub fn chaincode_name(&self) -> &str {
        &self.chaincode_name
    }

    /// Per-phase deadlines.
    #[must_use]
    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Retry policy for side-effect-free phases.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Monotonic number of the attempt that produced this session.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel_name", &self.channel_name)
            .field("chaincode_name", &self.chaincode_name)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

enum Slot {
    Idle,
    Connecting { generation: u64, attempt: SharedAttempt },
    Connected(Arc<Session>),
}

struct Inner {
    slot: Slot,
    next_generation: u64,
}

/// Lazily establishes and shares the gateway session.
pub struct ConnectionManager {
    config: Arc<GatewayConfig>,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
    established: Arc<AtomicU64>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("peer_endpoint", &self.config.peer_endpoint())
            .field("connected", &self.is_connected())
            .field("sessions_established", &self.sessions_established())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager that connects over gRPC.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_connector(config, Arc::new(GrpcConnector))
    }

    /// Creates a manager that opens transports through `connector`.
    #[must_use]
    pub fn with_connector(config: GatewayConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            inner: Mutex::new(Inner { slot: Slot::Idle, next_generation: 1 }),
            established: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The configuration sessions are built from.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the live session, establishing it on first use.
    ///
    /// Concurrent first callers share one attempt and all receive its
    /// result. After a failure the next call starts a fresh attempt.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Configuration`] for unreadable or malformed
    /// credentials (not retried), [`LedgerError::Connection`] or
    /// [`LedgerError::Timeout`] once connect retries are exhausted.
    #[tracing::instrument(skip(self), fields(peer = %self.config.peer_endpoint()))]
    pub async fn connect(&self) -> Result<Arc<Session>> {
        let (generation, attempt) = match self.current_or_start() {
            Ok(session) => return Ok(session),
            Err(pending) => pending,
        };

        let outcome = attempt.await;

        let mut inner = self.inner.lock();
        let still_current =
            matches!(&inner.slot, Slot::Connecting { generation: g, .. } if *g == generation);
        if still_current {
            inner.slot = match &outcome {
                Ok(session) => Slot::Connected(Arc::clone(session)),
                Err(_) => Slot::Idle,
            };
        }
        drop(inner);

        if let Err(err) = &outcome {
            tracing::warn!(generation, error = %err, "gateway connection failed");
        }
        outcome
    }

    /// Returns the connected session, or the attempt to wait on.
    fn current_or_start(&self) -> std::result::Result<Arc<Session>, (u64, SharedAttempt)> {
        let mut inner = self.inner.lock();
        match &inner.slot {
            Slot::Connected(session) => return Ok(Arc::clone(session)),
            Slot::Connecting { generation, attempt } => return Err((*generation, attempt.clone())),
            Slot::Idle => {},
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let attempt = establish(
            Arc::clone(&self.config),
            Arc::clone(&self.connector),
            Arc::clone(&self.established),
            generation,
        )
        .boxed()
        .shared();
        inner.slot = Slot::Connecting { generation, attempt: attempt.clone() };
        Err((generation, attempt))
    }

    /// Releases the session. Idempotent.
    ///
    /// An attempt still in flight is awaited and its session closed.
    /// Sessions already handed out keep their `Arc` but their transport
    /// rejects further calls.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut self.inner.lock().slot, Slot::Idle);
        let session = match previous {
            Slot::Idle => return,
            Slot::Connected(session) => Some(session),
            Slot::Connecting { attempt, .. } => attempt.await.ok(),
        };
        if let Some(session) = session {
            session.transport.close().await;
            tracing::debug!(generation = session.generation, "gateway session closed");
        }
    }

    /// Returns `true` if a session is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self.inner.lock().slot, Slot::Connected(_))
    }

    /// Number of sessions established over the manager's lifetime.
    #[must_use]
    pub fn sessions_established(&self) -> u64 {
        self.established.load(Ordering::SeqCst)
    }
}

/// Loads credentials, then opens the transport with retry.
async fn establish(
    config: Arc<GatewayConfig>,
    connector: Arc<dyn Connector>,
    established: Arc<AtomicU64>,
    generation: u64,
) -> Result<Arc<Session>> {
    let credentials = Credentials::load(&config)?;
    let deadline = config.timeouts().connect();

    let transport = with_retry(config.retry(), TransactionPhase::Connect, || async {
        match tokio::time::timeout(deadline, connector.connect(&config, credentials.tls_root_cert()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout { phase: TransactionPhase::Connect, deadline }),
        }
    })
    .await?;

    established.fetch_add(1, Ordering::SeqCst);
    tracing::info!(generation, channel = %config.channel_name(), "gateway session established");

    Ok(Arc::new(Session {
        transport,
        credentials,
        channel_name: config.channel_name().to_owned(),
        chaincode_name: config.chaincode_name().to_owned(),
        timeouts: *config.timeouts(),
        retry: config.retry().clone(),
        generation,
    }))
}
