//! Transport seam between the client and the peer gateway.
//!
//! [`GatewayTransport`] mirrors the four unary calls of the gateway service
//! and reports failures as [`tonic::Status`], exactly as a peer would. The
//! client maps status codes to [`LedgerError`](crate::LedgerError) variants
//! per phase. [`Connector`] builds a transport for a session; the production
//! pair is [`GrpcConnector`] and [`GrpcTransport`], one multiplexed TLS
//! channel per session.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use http::uri::PathAndQuery;
use tonic::{
    codec::ProstCodec,
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint},
    Status,
};

use crate::{
    config::GatewayConfig,
    error::{LedgerError, Result},
    proto::{
        paths, CommitStatusResponse, EndorseRequest, EndorseResponse, EvaluateRequest,
        EvaluateResponse, SignedCommitStatusRequest, SubmitRequest, SubmitResponse,
    },
};

/// The peer gateway service.
///
/// Each call carries its phase deadline; implementations should give up
/// with [`tonic::Code::DeadlineExceeded`] once it elapses.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Runs a read-only transaction on one peer.
    async fn evaluate(
        &self,
        request: EvaluateRequest,
        deadline: Duration,
    ) -> std::result::Result<EvaluateResponse, Status>;

    /// Collects endorsements and returns the prepared transaction.
    async fn endorse(
        &self,
        request: EndorseRequest,
        deadline: Duration,
    ) -> std::result::Result<EndorseResponse, Status>;

    /// Hands a signed, prepared transaction to the ordering service.
    async fn submit(
        &self,
        request: SubmitRequest,
        deadline: Duration,
    ) -> std::result::Result<SubmitResponse, Status>;

    /// Waits until the transaction is committed and reports its validation
    /// code.
    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
        deadline: Duration,
    ) -> std::result::Result<CommitStatusResponse, Status>;

    /// Releases the transport. Calls made afterwards fail with
    /// [`tonic::Code::Unavailable`].
    async fn close(&self);
}

/// Opens transports to the configured peer.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes a transport using `tls_root_cert` as the trust anchor.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Connection`] for network failures,
    /// [`LedgerError::Configuration`] for an unusable endpoint or TLS setup.
    async fn connect(
        &self,
        config: &GatewayConfig,
        tls_root_cert: &[u8],
    ) -> Result<Arc<dyn GatewayTransport>>;
}

/// Connects over gRPC with TLS, validating the peer certificate against
/// the configured host alias.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcConnector;

#[async_trait]
impl Connector for GrpcConnector {
    #[tracing::instrument(skip(self, config, tls_root_cert), fields(peer = %config.peer_endpoint()))]
    async fn connect(
        &self,
        config: &GatewayConfig,
        tls_root_cert: &[u8],
    ) -> Result<Arc<dyn GatewayTransport>> {
        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(tls_root_cert))
            .domain_name(config.peer_host_alias());

        let endpoint = Endpoint::from_shared(config.peer_url())
            .map_err(|e| LedgerError::configuration_with_source("invalid peer endpoint", e))?
            .connect_timeout(config.timeouts().connect())
            .tls_config(tls)
            .map_err(|e| LedgerError::configuration_with_source("invalid TLS configuration", e))?;

        let channel = endpoint.connect().await.map_err(|e| {
            LedgerError::connection_with_source(
                format!("failed to connect to {}", config.peer_endpoint()),
                e,
            )
        })?;
        tracing::debug!("gateway channel established");
        Ok(Arc::new(GrpcTransport::new(channel)))
    }
}

/// Gateway transport over a `tonic` channel.
#[derive(Debug)]
pub struct GrpcTransport {
    channel: Channel,
    closed: AtomicBool,
}

impl GrpcTransport {
    /// Wraps an established channel.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self { channel, closed: AtomicBool::new(false) }
    }

    async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        message: Req,
        deadline: Duration,
    ) -> std::result::Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Status::unavailable("transport closed"));
        }
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("gateway service not ready: {e}")))?;

        let mut request = tonic::Request::new(message);
        request.set_timeout(deadline);
        let codec = ProstCodec::<Req, Resp>::default();
        grpc.unary(request, PathAndQuery::from_static(path), codec)
            .await
            .map(tonic::Response::into_inner)
    }
}

#[async_trait]
impl GatewayTransport for GrpcTransport {
    async fn evaluate(
        &self,
        request: EvaluateRequest,
        deadline: Duration,
    ) -> std::result::Result<EvaluateResponse, Status> {
        self.unary(paths::EVALUATE, request, deadline).await
    }

    async fn endorse(
        &self,
        request: EndorseRequest,
        deadline: Duration,
    ) -> std::result::Result<EndorseResponse, Status> {
        self.unary(paths::ENDORSE, request, deadline).await
    }

    async fn submit(
        &self,
        request: SubmitRequest,
        deadline: Duration,
    ) -> std::result::Result<SubmitResponse, Status> {
        self.unary(paths::SUBMIT, request, deadline).await
    }

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
        deadline: Duration,
    ) -> std::result::Result<CommitStatusResponse, Status> {
        self.unary(paths::COMMIT_STATUS, request, deadline).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
