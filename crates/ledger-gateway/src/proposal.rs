//! Chaincode proposal construction.
//!
//! A proposal names the channel, chaincode, function and arguments, and is
//! bound to a transaction id derived from a fresh nonce and the creator:
//! `tx_id = hex(sha256(nonce || creator))`. The same id follows the
//! transaction through endorsement, ordering and commit.

use prost::Message;
use sha2::{Digest, Sha256};

use crate::{
    error::{LedgerError, Result},
    identity::{Identity, Signer},
    proto::{
        ChaincodeAction, ChaincodeActionPayload, ChaincodeHeaderExtension, ChaincodeId,
        ChaincodeInput, ChaincodeInvocationSpec, ChaincodeProposalPayload, ChaincodeSpec,
        ChannelHeader, CommitStatusRequest, Envelope, Header, Payload, Proposal,
        ProposalResponsePayload, SignatureHeader, SignedCommitStatusRequest, SignedProposal,
        Transaction, CHAINCODE_TYPE_GOLANG, HEADER_TYPE_ENDORSER_TRANSACTION,
    },
};

/// Length of the random nonce bound into every transaction id.
const NONCE_LEN: usize = 24;

/// Nonce, creator and derived id of one transaction.
#[derive(Debug, Clone)]
pub(crate) struct TransactionContext {
    pub(crate) tx_id: String,
    nonce: Vec<u8>,
    creator: Vec<u8>,
}

impl TransactionContext {
    /// Draws a fresh nonce for `identity`.
    pub(crate) fn new(identity: &Identity) -> Self {
        let nonce: [u8; NONCE_LEN] = rand::random();
        Self::with_nonce(identity, nonce.to_vec())
    }

    fn with_nonce(identity: &Identity, nonce: Vec<u8>) -> Self {
        let creator = identity.to_creator_bytes();
        let mut hasher = Sha256::new();
        hasher.update(&nonce);
        hasher.update(&creator);
        let tx_id = hex::encode(hasher.finalize());
        Self { tx_id, nonce, creator }
    }
}

/// What a proposal asks a chaincode to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Invocation<'a> {
    pub(crate) channel: &'a str,
    pub(crate) chaincode: &'a str,
    pub(crate) function: &'a str,
    pub(crate) args: &'a [String],
}

/// Builds and signs a proposal for `invocation` under `context`.
pub(crate) fn signed_proposal(
    context: &TransactionContext,
    invocation: &Invocation<'_>,
    signer: &Signer,
) -> SignedProposal {
    let channel_header = ChannelHeader {
        r#type: HEADER_TYPE_ENDORSER_TRANSACTION,
        timestamp: Some(prost_types::Timestamp::from(std::time::SystemTime::now())),
        channel_id: invocation.channel.to_owned(),
        tx_id: context.tx_id.clone(),
        extension: ChaincodeHeaderExtension {
            chaincode_id: Some(ChaincodeId {
                name: invocation.chaincode.to_owned(),
                ..ChaincodeId::default()
            }),
        }
        .encode_to_vec(),
        ..ChannelHeader::default()
    };
    let signature_header =
        SignatureHeader { creator: context.creator.clone(), nonce: context.nonce.clone() };
    let header = Header {
        channel_header: channel_header.encode_to_vec(),
        signature_header: signature_header.encode_to_vec(),
    };

    let mut args = Vec::with_capacity(invocation.args.len() + 1);
    args.push(invocation.function.as_bytes().to_vec());
    args.extend(invocation.args.iter().map(|a| a.as_bytes().to_vec()));
    let spec = ChaincodeInvocationSpec {
        chaincode_spec: Some(ChaincodeSpec {
            r#type: CHAINCODE_TYPE_GOLANG,
            chaincode_id: Some(ChaincodeId {
                name: invocation.chaincode.to_owned(),
                ..ChaincodeId::default()
            }),
            input: Some(ChaincodeInput { args, is_init: false }),
            timeout: 0,
        }),
    };
    let payload = ChaincodeProposalPayload { input: spec.encode_to_vec() };

    let proposal = Proposal {
        header: header.encode_to_vec(),
        payload: payload.encode_to_vec(),
        extension: Vec::new(),
    };
    let proposal_bytes = proposal.encode_to_vec();
    let signature = signer.sign(&proposal_bytes);
    SignedProposal { proposal_bytes, signature }
}

/// Builds the signed request used to wait for a transaction's commit.
pub(crate) fn signed_commit_status_request(
    tx_id: &str,
    channel: &str,
    identity: &Identity,
    signer: &Signer,
) -> SignedCommitStatusRequest {
    let request = CommitStatusRequest {
        transaction_id: tx_id.to_owned(),
        channel_id: channel.to_owned(),
        identity: identity.to_creator_bytes(),
    }
    .encode_to_vec();
    let signature = signer.sign(&request);
    SignedCommitStatusRequest { request, signature }
}

/// Extracts the chaincode response payload from a prepared transaction.
///
/// The result travels as
/// `Envelope.payload -> Payload.data -> Transaction.actions[0].payload ->
/// ChaincodeActionPayload.action -> ProposalResponsePayload.extension ->
/// ChaincodeAction.response.payload`.
pub(crate) fn prepared_result(envelope: &Envelope) -> Result<Vec<u8>> {
    fn malformed(what: &'static str) -> impl FnOnce(prost::DecodeError) -> LedgerError {
        move |e| LedgerError::serialization_with_source(format!("malformed {what}"), e)
    }

    let payload = Payload::decode(envelope.payload.as_slice()).map_err(malformed("payload"))?;
    let transaction =
        Transaction::decode(payload.data.as_slice()).map_err(malformed("transaction"))?;
    let Some(action) = transaction.actions.first() else {
        return Ok(Vec::new());
    };
    let action_payload = ChaincodeActionPayload::decode(action.payload.as_slice())
        .map_err(malformed("chaincode action payload"))?;
    let Some(endorsed) = action_payload.action else {
        return Ok(Vec::new());
    };
    let response_payload =
        ProposalResponsePayload::decode(endorsed.proposal_response_payload.as_slice())
            .map_err(malformed("proposal response payload"))?;
    let chaincode_action = ChaincodeAction::decode(response_payload.extension.as_slice())
        .map_err(malformed("chaincode action"))?;
    Ok(chaincode_action.response.map(|r| r.payload).unwrap_or_default())
}

/// Builds an unsigned prepared transaction carrying `result`, the way an
/// endorsing gateway assembles one from a proposal and its responses.
#[cfg(any(test, feature = "testutil"))]
pub(crate) fn prepared_envelope(proposal_header: &[u8], result: Vec<u8>) -> Envelope {
    use crate::proto::{ChaincodeEndorsedAction, Response, TransactionAction};

    let chaincode_action = ChaincodeAction {
        response: Some(Response { status: 200, message: String::new(), payload: result }),
        ..ChaincodeAction::default()
    };
    let response_payload = ProposalResponsePayload {
        proposal_hash: Sha256::digest(proposal_header).to_vec(),
        extension: chaincode_action.encode_to_vec(),
    };
    let action_payload = ChaincodeActionPayload {
        chaincode_proposal_payload: Vec::new(),
        action: Some(ChaincodeEndorsedAction {
            proposal_response_payload: response_payload.encode_to_vec(),
        }),
    };
    let transaction = Transaction {
        actions: vec![TransactionAction {
            header: Vec::new(),
            payload: action_payload.encode_to_vec(),
        }],
    };
    let header = Header::decode(proposal_header).unwrap_or_default();
    let payload = Payload { header: Some(header), data: transaction.encode_to_vec() };
    Envelope { payload: payload.encode_to_vec(), signature: Vec::new() }
}

/// A proposal decoded back into its parts, as a peer would see it.
#[cfg(any(test, feature = "testutil"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedProposal {
    pub(crate) tx_id: String,
    pub(crate) channel: String,
    pub(crate) chaincode: String,
    pub(crate) function: String,
    pub(crate) args: Vec<String>,
    pub(crate) header: Vec<u8>,
}

#[cfg(any(test, feature = "testutil"))]
impl DecodedProposal {
    /// Decodes a signed proposal. Returns a message suitable for a gRPC
    /// `InvalidArgument` status on failure.
    pub(crate) fn decode(signed: &SignedProposal) -> std::result::Result<Self, String> {
        fn bad(what: &str) -> impl FnOnce(prost::DecodeError) -> String + '_ {
            move |e| format!("malformed {what}: {e}")
        }

        let proposal = Proposal::decode(signed.proposal_bytes.as_slice()).map_err(bad("proposal"))?;
        let header = Header::decode(proposal.header.as_slice()).map_err(bad("header"))?;
        let channel_header = ChannelHeader::decode(header.channel_header.as_slice())
            .map_err(bad("channel header"))?;
        let payload = ChaincodeProposalPayload::decode(proposal.payload.as_slice())
            .map_err(bad("proposal payload"))?;
        let spec = ChaincodeInvocationSpec::decode(payload.input.as_slice())
            .map_err(bad("invocation spec"))?
            .chaincode_spec
            .ok_or_else(|| "missing chaincode spec".to_owned())?;

        let chaincode = spec.chaincode_id.map(|id| id.name).unwrap_or_default();
        let mut args = spec
            .input
            .map(|input| input.args)
            .unwrap_or_default()
            .into_iter()
            .map(|arg| String::from_utf8(arg).map_err(|_| "argument is not UTF-8".to_owned()));
        let function = args.next().ok_or_else(|| "missing function name".to_owned())??;
        let args = args.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            tx_id: channel_header.tx_id,
            channel: channel_header.channel_id,
            chaincode,
            function,
            args,
            header: proposal.header,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil::TestCredentials;

    fn identity_and_signer() -> (Identity, Signer) {
        let creds = TestCredentials::generate();
        let credentials = creds.credentials("Org1MSP");
        (credentials.identity().clone(), credentials.signer().clone())
    }

    #[test]
    fn test_tx_id_is_sha256_of_nonce_and_creator() {
        let (identity, _) = identity_and_signer();
        let context = TransactionContext::with_nonce(&identity, vec![1; NONCE_LEN]);

        let mut expected = Sha256::new();
        expected.update([1u8; NONCE_LEN]);
        expected.update(identity.to_creator_bytes());
        assert_eq!(context.tx_id, hex::encode(expected.finalize()));
        assert_eq!(context.tx_id.len(), 64);
    }

    #[test]
    fn test_fresh_contexts_have_distinct_ids() {
        let (identity, _) = identity_and_signer();
        let a = TransactionContext::new(&identity);
        let b = TransactionContext::new(&identity);
        assert_ne!(a.tx_id, b.tx_id);
    }

    #[test]
    fn test_proposal_decodes_to_invocation() {
        let (identity, signer) = identity_and_signer();
        let context = TransactionContext::new(&identity);
        let args = vec!["donation-1".to_owned(), "delivered".to_owned()];
        let invocation = Invocation {
            channel: "mychannel",
            chaincode: "basic",
            function: "UpdateStatus",
            args: &args,
        };

        let signed = signed_proposal(&context, &invocation, &signer);
        assert!(!signed.signature.is_empty());

        let decoded = DecodedProposal::decode(&signed).unwrap();
        assert_eq!(decoded.tx_id, context.tx_id);
        assert_eq!(decoded.channel, "mychannel");
        assert_eq!(decoded.chaincode, "basic");
        assert_eq!(decoded.function, "UpdateStatus");
        assert_eq!(decoded.args, args);
    }

    #[test]
    fn test_prepared_result_round_trip() {
        let envelope = prepared_envelope(&[], br#"{"itemID":"donation-1"}"#.to_vec());
        assert_eq!(prepared_result(&envelope).unwrap(), br#"{"itemID":"donation-1"}"#);
    }

    #[test]
    fn test_prepared_result_without_actions_is_empty() {
        let payload = Payload { header: None, data: Transaction::default().encode_to_vec() };
        let envelope = Envelope { payload: payload.encode_to_vec(), signature: vec![] };
        assert!(prepared_result(&envelope).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let signed = SignedProposal { proposal_bytes: vec![0xff, 0xff, 0xff], signature: vec![] };
        assert!(DecodedProposal::decode(&signed).is_err());
    }
}
