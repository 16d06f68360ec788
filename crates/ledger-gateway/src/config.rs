//! Configuration for the ledger gateway connection.
//!
//! [`GatewayConfig`] is loaded once at startup and validated before the first
//! connect: every identifier must be non-empty and every deadline positive.
//! Credential material is validated later, when the session is established,
//! because parsing it is part of building the signer.

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{ConfigError, LedgerError, Result};

/// Default connection establishment timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read-only evaluation deadline (5 seconds, single peer).
pub const DEFAULT_EVALUATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default endorsement deadline (15 seconds, multi-peer signing).
pub const DEFAULT_ENDORSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default ordering hand-off deadline (15 seconds).
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default commit confirmation deadline (60 seconds, full ordering and commit).
pub const DEFAULT_COMMIT_STATUS_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of retries for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial backoff between retries.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Default cap on the backoff between retries.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Where a piece of PEM material comes from.
///
/// Serialized as `{ "path": "./certs/user-cert.pem" }` or
/// `{ "inline": "-----BEGIN CERTIFICATE-----..." }`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PemSource {
    /// Read from a file when the session is established.
    Path(PathBuf),
    /// Provided directly.
    Inline(Zeroizing<String>),
}

impl PemSource {
    /// Creates an inline source.
    #[must_use]
    pub fn inline(pem: impl Into<String>) -> Self {
        Self::Inline(Zeroizing::new(pem.into()))
    }

    /// Creates a file source.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Loads the PEM bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] if the file cannot be read.
    pub fn load(&self) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            Self::Inline(pem) => Ok(Zeroizing::new(pem.as_bytes().to_vec())),
            Self::Path(path) => std::fs::read(path).map(Zeroizing::new).map_err(|e| {
                LedgerError::configuration_with_source(
                    format!("cannot read PEM file {}", path.display()),
                    e,
                )
            }),
        }
    }
}

impl fmt::Debug for PemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Inline(_) => f.write_str("Inline(<redacted>)"),
        }
    }
}

/// Per-phase deadlines.
///
/// Deadlines are deliberately differentiated: a single global value either
/// starves slow multi-party commits or lets fast reads hang.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Transport establishment.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect: Duration,
    /// Read-only evaluation.
    #[serde(with = "humantime_serde", default = "default_evaluate_timeout")]
    pub(crate) evaluate: Duration,
    /// Endorsement.
    #[serde(with = "humantime_serde", default = "default_endorse_timeout")]
    pub(crate) endorse: Duration,
    /// Hand-off to ordering.
    #[serde(with = "humantime_serde", default = "default_submit_timeout")]
    pub(crate) submit: Duration,
    /// Commit confirmation.
    #[serde(with = "humantime_serde", default = "default_commit_status_timeout")]
    pub(crate) commit_status: Duration,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_evaluate_timeout() -> Duration {
    DEFAULT_EVALUATE_TIMEOUT
}

fn default_endorse_timeout() -> Duration {
    DEFAULT_ENDORSE_TIMEOUT
}

fn default_submit_timeout() -> Duration {
    DEFAULT_SUBMIT_TIMEOUT
}

fn default_commit_status_timeout() -> Duration {
    DEFAULT_COMMIT_STATUS_TIMEOUT
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            evaluate: DEFAULT_EVALUATE_TIMEOUT,
            endorse: DEFAULT_ENDORSE_TIMEOUT,
            submit: DEFAULT_SUBMIT_TIMEOUT,
            commit_status: DEFAULT_COMMIT_STATUS_TIMEOUT,
        }
    }
}

#[bon::bon]
impl TimeoutConfig {
    /// Creates a timeout configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MustBePositive`] if any deadline is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect: Duration,
        #[builder(default = DEFAULT_EVALUATE_TIMEOUT)] evaluate: Duration,
        #[builder(default = DEFAULT_ENDORSE_TIMEOUT)] endorse: Duration,
        #[builder(default = DEFAULT_SUBMIT_TIMEOUT)] submit: Duration,
        #[builder(default = DEFAULT_COMMIT_STATUS_TIMEOUT)] commit_status: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        let config = Self { connect, evaluate, endorse, submit, commit_status };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every deadline is positive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MustBePositive`] naming the first zero deadline.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (field, value) in [
            ("connect", self.connect),
            ("evaluate", self.evaluate),
            ("endorse", self.endorse),
            ("submit", self.submit),
            ("commit_status", self.commit_status),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive { field, value: "0s".into() });
            }
        }
        Ok(())
    }

    /// Transport establishment deadline.
    #[must_use]
    pub fn connect(&self) -> Duration {
        self.connect
    }

    /// Read-only evaluation deadline.
    #[must_use]
    pub fn evaluate(&self) -> Duration {
        self.evaluate
    }

    /// Endorsement deadline.
    #[must_use]
    pub fn endorse(&self) -> Duration {
        self.endorse
    }

    /// Ordering hand-off deadline.
    #[must_use]
    pub fn submit(&self) -> Duration {
        self.submit
    }

    /// Commit confirmation deadline.
    #[must_use]
    pub fn commit_status(&self) -> Duration {
        self.commit_status
    }
}

/// Backoff policy for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub(crate) max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub(crate) initial_backoff: Duration,
    /// Cap on the delay between retries.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub(crate) max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

#[bon::bon]
impl RetryConfig {
    /// Creates a retry configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `initial_backoff` is zero or `max_backoff`
    /// is smaller than `initial_backoff`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_RETRIES)] max_retries: u32,
        #[builder(default = DEFAULT_INITIAL_BACKOFF)] initial_backoff: Duration,
        #[builder(default = DEFAULT_MAX_BACKOFF)] max_backoff: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        if initial_backoff.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "initial_backoff",
                value: "0s".into(),
            });
        }
        if max_backoff < initial_backoff {
            return Err(ConfigError::BelowMinimum {
                field: "max_backoff",
                min: format!("{initial_backoff:?}"),
                value: format!("{max_backoff:?}"),
            });
        }
        Ok(Self { max_retries, initial_backoff, max_backoff })
    }

    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Cap on the delay between retries.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }
}

/// Connection settings for the ledger gateway.
///
/// # Example
///
/// ```
/// use assetlink_ledger_gateway::{GatewayConfig, PemSource};
///
/// let config = GatewayConfig::builder()
///     .msp_id("Org1MSP")
///     .channel_name("mychannel")
///     .chaincode_name("basic")
///     .peer_endpoint("localhost:7051")
///     .peer_host_alias("peer0.org1.example.com")
///     .tls_root_cert(PemSource::path("./certs/peer-tls-root-cert.pem"))
///     .user_cert(PemSource::path("./certs/user-cert.pem"))
///     .user_key(PemSource::path("./certs/user-key.pem"))
///     .build()?;
///
/// assert_eq!(config.channel_name(), "mychannel");
/// # Ok::<(), assetlink_ledger_gateway::ConfigError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Membership service provider id of the client identity.
    pub(crate) msp_id: String,
    /// Channel hosting the chaincode.
    pub(crate) channel_name: String,
    /// Chaincode name.
    pub(crate) chaincode_name: String,
    /// Peer network address (`host:port` or a full URL).
    pub(crate) peer_endpoint: String,
    /// Name the peer's TLS certificate is validated against.
    pub(crate) peer_host_alias: String,
    /// TLS root certificate of the peer's organization.
    pub(crate) tls_root_cert: PemSource,
    /// Client identity certificate.
    pub(crate) user_cert: PemSource,
    /// Client private key.
    pub(crate) user_key: PemSource,
    /// Per-phase deadlines.
    #[serde(default)]
    pub(crate) timeouts: TimeoutConfig,
    /// Backoff policy for transient failures.
    #[serde(default)]
    pub(crate) retry: RetryConfig,
}

#[bon::bon]
impl GatewayConfig {
    /// Creates a new configuration, validating all required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] if any identifier is blank, or a
    /// timeout validation error.
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        #[builder(into)] msp_id: String,
        #[builder(into)] channel_name: String,
        #[builder(into)] chaincode_name: String,
        #[builder(into)] peer_endpoint: String,
        #[builder(into)] peer_host_alias: String,
        tls_root_cert: PemSource,
        user_cert: PemSource,
        user_key: PemSource,
        #[builder(default)] timeouts: TimeoutConfig,
        #[builder(default)] retry: RetryConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let config = Self {
            msp_id,
            channel_name,
            chaincode_name,
            peer_endpoint,
            peer_host_alias,
            tls_root_cert,
            user_cert,
            user_key,
            timeouts,
            retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `MSP_ID` | `Org1MSP` |
    /// | `CHANNEL_NAME` | `mychannel` |
    /// | `CHAINCODE_NAME` | `basic` |
    /// | `PEER_ENDPOINT` | `localhost:7051` |
    /// | `PEER_HOST_ALIAS` | `peer0.org1.example.com` |
    /// | `PEER_TLS_CERT` | `./certs/peer-tls-root-cert.pem` |
    /// | `USER_CERT` | `./certs/user-cert.pem` |
    /// | `USER_KEY` | `./certs/user-key.pem` |
    ///
    /// Certificate and key variables name files; they are read when the
    /// session is established.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a variable is set to a blank value.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a variable resolves to a blank value.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> std::result::Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_owned());

        Self::builder()
            .msp_id(var("MSP_ID", "Org1MSP"))
            .channel_name(var("CHANNEL_NAME", "mychannel"))
            .chaincode_name(var("CHAINCODE_NAME", "basic"))
            .peer_endpoint(var("PEER_ENDPOINT", "localhost:7051"))
            .peer_host_alias(var("PEER_HOST_ALIAS", "peer0.org1.example.com"))
            .tls_root_cert(PemSource::path(var("PEER_TLS_CERT", "./certs/peer-tls-root-cert.pem")))
            .user_cert(PemSource::path(var("USER_CERT", "./certs/user-cert.pem")))
            .user_key(PemSource::path(var("USER_KEY", "./certs/user-key.pem")))
            .build()
    }

    /// Validates identifiers and deadlines.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (field, value) in [
            ("msp_id", &self.msp_id),
            ("channel_name", &self.channel_name),
            ("chaincode_name", &self.chaincode_name),
            ("peer_endpoint", &self.peer_endpoint),
            ("peer_host_alias", &self.peer_host_alias),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty { field });
            }
        }
        self.timeouts.validate()
    }

    /// Membership service provider id.
    #[must_use]
    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    /// Channel name.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Chaincode name.
    #[must_use]
    pub fn chaincode_name(&self) -> &str {
        &self.chaincode_name
    }

    /// Peer network address as configured.
    #[must_use]
    pub fn peer_endpoint(&self) -> &str {
        &self.peer_endpoint
    }

    /// Peer address as a URL; `https://` is assumed when no scheme is given.
    #[must_use]
    pub fn peer_url(&self) -> String {
        if self.peer_endpoint.contains("://") {
            self.peer_endpoint.clone()
        } else {
            format!("https://{}", self.peer_endpoint)
        }
    }

    /// Hostname the peer certificate is validated against.
    #[must_use]
    pub fn peer_host_alias(&self) -> &str {
        &self.peer_host_alias
    }

    /// TLS root certificate source.
    #[must_use]
    pub fn tls_root_cert(&self) -> &PemSource {
        &self.tls_root_cert
    }

    /// User certificate source.
    #[must_use]
    pub fn user_cert(&self) -> &PemSource {
        &self.user_cert
    }

    /// User private key source.
    #[must_use]
    pub fn user_key(&self) -> &PemSource {
        &self.user_key
    }

    /// Per-phase deadlines.
    #[must_use]
    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}
