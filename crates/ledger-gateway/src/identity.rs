//! Client identity and signing credentials.
//!
//! Every proposal, prepared transaction and commit-status request is signed
//! by the client. [`Credentials::load`] reads the PEM material named in
//! [`GatewayConfig`] once per session; any defect in it is a
//! [`LedgerError::Configuration`] and is never retried.

use std::fmt;

use p256::{
    ecdsa::{signature::Signer as _, DerSignature, Signature, SigningKey},
    pkcs8::DecodePrivateKey,
};
use prost::Message;
use zeroize::Zeroizing;

use crate::{
    config::GatewayConfig,
    error::{LedgerError, Result},
    proto::SerializedIdentity,
};

/// PEM label of X.509 certificates.
const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// The client's membership identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    msp_id: String,
    certificate: Vec<u8>,
}

impl Identity {
    /// Creates an identity from an MSP id and a PEM certificate.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] if `certificate` holds no PEM
    /// certificate block.
    pub fn new(msp_id: impl Into<String>, certificate: impl Into<Vec<u8>>) -> Result<Self> {
        let certificate = certificate.into();
        validate_certificate("user certificate", &certificate)?;
        Ok(Self { msp_id: msp_id.into(), certificate })
    }

    /// MSP id the identity belongs to.
    #[must_use]
    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    /// PEM-encoded certificate.
    #[must_use]
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// Serialized form carried as the `creator` of every transaction.
    #[must_use]
    pub fn to_creator_bytes(&self) -> Vec<u8> {
        SerializedIdentity { mspid: self.msp_id.clone(), id_bytes: self.certificate.clone() }
            .encode_to_vec()
    }
}

/// Produces ECDSA P-256 signatures over SHA-256 digests.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    /// Wraps an existing signing key.
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Parses a PKCS#8 PEM private key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] if the PEM is not UTF-8 or not
    /// a P-256 PKCS#8 key.
    pub fn from_pkcs8_pem(pem: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(pem).map_err(|e| {
            LedgerError::configuration_with_source("private key is not valid UTF-8", e)
        })?;
        let key = SigningKey::from_pkcs8_pem(text).map_err(|e| {
            LedgerError::configuration(format!("private key is not a P-256 PKCS#8 key: {e}"))
        })?;
        Ok(Self { key })
    }

    /// Signs `message`, returning a DER-encoded low-S signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.key.sign(message);
        let signature = signature.normalize_s().unwrap_or(signature);
        let der: DerSignature = signature.to_der();
        der.as_bytes().to_vec()
    }

    /// The public half of the key.
    #[must_use]
    pub fn verifying_key(&self) -> p256::ecdsa::VerifyingKey {
        self.key.verifying_key().clone()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Signer(<redacted>)")
    }
}

/// Everything a session needs to authenticate: identity, signer and the TLS
/// trust root of the peer.
#[derive(Clone)]
pub struct Credentials {
    identity: Identity,
    signer: Signer,
    tls_root_cert: Zeroizing<Vec<u8>>,
}

impl Credentials {
    /// Assembles credentials from already-parsed parts.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] if `tls_root_cert` holds no
    /// PEM certificate block.
    pub fn new(identity: Identity, signer: Signer, tls_root_cert: Vec<u8>) -> Result<Self> {
        validate_certificate("TLS root certificate", &tls_root_cert)?;
        Ok(Self { identity, signer, tls_root_cert: Zeroizing::new(tls_root_cert) })
    }

    /// Reads and parses the credential material named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] if a file is unreadable or its
    /// contents are malformed.
    #[tracing::instrument(skip(config), fields(msp_id = %config.msp_id()))]
    pub fn load(config: &GatewayConfig) -> Result<Self> {
        let tls_root_cert = config.tls_root_cert().load()?;
        let user_cert = config.user_cert().load()?;
        let user_key = config.user_key().load()?;

        let identity = Identity::new(config.msp_id(), user_cert.to_vec())?;
        let signer = Signer::from_pkcs8_pem(&user_key)?;
        Self::new(identity, signer, tls_root_cert.to_vec())
    }

    /// The client identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The signer.
    #[must_use]
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// PEM bytes of the peer's TLS root certificate.
    #[must_use]
    pub fn tls_root_cert(&self) -> &[u8] {
        &self.tls_root_cert
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

/// Checks that `bytes` contains at least one PEM certificate block.
fn validate_certificate(what: &str, bytes: &[u8]) -> Result<()> {
    let blocks = pem::parse_many(bytes)
        .map_err(|e| LedgerError::configuration_with_source(format!("{what} is not PEM"), e))?;
    if blocks.iter().any(|block| block.tag() == CERTIFICATE_TAG && !block.contents().is_empty()) {
        Ok(())
    } else {
        Err(LedgerError::configuration(format!("{what} contains no certificate")))
    }
}
