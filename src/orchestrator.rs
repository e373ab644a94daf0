//! Signing Orchestrator: the per-request pipeline that ties the
//! Signer Record, the Policy Context Assembler, the Rules Engine, the
//! Envelope Store, the Signing Coordinator and the audit log together.
//! The HTTP routes in `crate::routes::signing` are thin adapters over
//! the three entry points here (`start_session`, `process_round`,
//! `complete`) that mirror the three-call shape of `/sign/session`,
//! `/sign/round` and `/sign/complete`.

use std::net::IpAddr;
use std::sync::Arc;

use primitive_types::U256;
use serde_json::json;

use crate::audit::{AuditActor, AuditEventType, AuditLogger, AuditOutcome};
use crate::crypto::{EnvelopeStore, SecretBytes};
use crate::dkg::coordinator::server_share_path;
use crate::dkg::scheme::ProtocolMessage;
use crate::error::{WalletError, WalletResult};
use crate::policy::context::{PolicyContextAssembler, RequestFacts, SpendEntry};
use crate::policy::document::PolicyDocument;
use crate::policy::engine;
use crate::signer::{CredentialVerifier, SignerRecord, SignerStatus};
use crate::signing::coordinator::{SignRoundResult, SignatureOutput, SigningCoordinator};
use crate::signing::session::SessionId;
use crate::signing::tx::UnsignedTransaction;
use crate::storage::Storage;

/// What is being signed: a full transaction (hashed here via RLP) or a
/// pre-hashed arbitrary message.
pub enum SignRequest {
    Transaction(UnsignedTransaction),
    Message { digest: [u8; 32] },
}

/// Everything the caller needs to drive the remaining rounds of a
/// freshly opened signing session.
pub struct StartSessionOutput {
    pub session_id: SessionId,
    pub server_first_messages: Vec<ProtocolMessage>,
    pub message_hash: [u8; 32],
    pub party_config: [u8; 2],
    pub rounds_remaining: u8,
}

/// Result of a finalized session: the ECDSA triple, plus (for a
/// transaction) the externally broadcastable hash. Broadcasting itself
/// is out of scope; only the hash is computed.
pub struct CompletionOutput {
    pub signature: SignatureOutput,
    pub tx_hash: Option<[u8; 32]>,
}

/// Facts about the caller needed to authenticate and evaluate policy,
/// supplied by the HTTP layer.
pub struct CallerContext<'a> {
    pub signer_id: &'a str,
    pub presented_credential: &'a str,
    pub caller_ip: Option<IpAddr>,
    /// Opaque share bytes for the remote cooperating party. In this
    /// collapsed single-process deployment the server simulates both
    /// parties' local computation in-process (the same simplification
    /// the DKG coordinator makes — see `dkg::coordinator`'s doc comment
    /// and DESIGN.md), so the caller supplies its share material
    /// directly rather than exchanging only protocol messages. Held as
    /// `SecretBytes` so the plaintext share is wiped on every exit path
    /// out of `start_session`, the same guarantee the server's own share
    /// gets from `EnvelopeStore::fetch`.
    pub caller_share: SecretBytes,
    pub caller_party_index: u8,
}

pub struct SigningOrchestrator {
    storage: Storage,
    envelopes: EnvelopeStore,
    signing: Arc<SigningCoordinator>,
    policy_assembler: PolicyContextAssembler,
    audit: Arc<AuditLogger>,
    credential_verifier: Arc<dyn CredentialVerifier>,
}

impl SigningOrchestrator {
    pub fn new(
        storage: Storage,
        envelopes: EnvelopeStore,
        signing: Arc<SigningCoordinator>,
        policy_assembler: PolicyContextAssembler,
        audit: Arc<AuditLogger>,
        credential_verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            storage,
            envelopes,
            signing,
            policy_assembler,
            audit,
            credential_verifier,
        }
    }

    fn resolve_active_signer(&self, signer_id: &str, presented_credential: &str) -> WalletResult<SignerRecord> {
        let record: SignerRecord = self
            .storage
            .get_signer_record(signer_id)?
            .ok_or_else(|| WalletError::SignerNotFound(signer_id.to_string()))?;

        if !self.credential_verifier.verify(&record, presented_credential) {
            return Err(WalletError::Unauthenticated);
        }
        if record.status != SignerStatus::Active {
            return Err(WalletError::SignerNotActive);
        }
        Ok(record)
    }

    /// Authenticate, assemble policy context,
    /// evaluate rules, and — if allowed — open the presignature session.
    pub fn start_session(&self, caller: CallerContext<'_>, request: SignRequest, chain_id: u64) -> WalletResult<StartSessionOutput> {
        let record = self.resolve_active_signer(caller.signer_id, caller.presented_credential)?;

        let (digest, to_address, value_wei, data) = match &request {
            SignRequest::Transaction(tx) => {
                let digest = tx.digest()?;
                let to = tx.to.clone();
                let value = parse_context_value(&tx.value_wei);
                let data = decode_context_data(&tx.data);
                (digest, to, value, data)
            }
            SignRequest::Message { digest } => (*digest, None, U256::zero(), None),
        };

        let now = chrono::Utc::now();
        let ctx = self.policy_assembler.assemble(
            &record.signer_id,
            RequestFacts {
                signer_address: record.eth_address.as_deref().unwrap_or_default(),
                to_address: to_address.as_deref(),
                value_wei,
                data: data.as_deref(),
                chain_id,
                caller_ip: caller.caller_ip,
            },
            now,
        )?;

        let document: Option<PolicyDocument> = self.storage.get_policy_document(&record.signer_id)?;
        let result = engine::evaluate(document.as_ref(), &ctx);

        // Every attempt counts toward the rate-limit window, admitted or not.
        self.storage.append_request_timestamp(&record.signer_id, now.timestamp())?;

        if !result.allowed {
            self.audit.append(
                AuditEventType::RequestBlocked,
                AuditActor::Signer { signer_id: record.signer_id.clone() },
                None,
                AuditOutcome::Failure { reason: "policy_violation".to_string() },
                Some(json!({ "violations": result.violations })),
            )?;
            return Err(WalletError::PolicyViolation(result.violations));
        }

        let public_key = record.public_key()?;
        let server_share = self.envelopes.fetch(&server_share_path(&record.signer_id))?;

        let session = self.signing.create_session(
            [server_share, caller.caller_share],
            [crate::dkg::session::SERVER_PARTY_INDEX, caller.caller_party_index],
            public_key,
            Some(digest),
        )?;

        self.audit.append(
            AuditEventType::SigningInit,
            AuditActor::Signer { signer_id: record.signer_id.clone() },
            Some(session.session_id),
            AuditOutcome::Pending,
            None,
        )?;

        Ok(StartSessionOutput {
            session_id: session.session_id,
            server_first_messages: session.outgoing,
            message_hash: digest,
            party_config: [crate::dkg::session::SERVER_PARTY_INDEX, caller.caller_party_index],
            rounds_remaining: 1,
        })
    }

    /// Pass-through to the Signing Coordinator's single presignature
    /// round, auditing the transition.
    pub fn process_round(&self, session_id: SessionId, messages: Vec<ProtocolMessage>) -> WalletResult<SignRoundResult> {
        let result = self.signing.process_round(session_id, 1, messages)?;
        self.audit.append(
            AuditEventType::SigningRound,
            AuditActor::System,
            Some(session_id),
            AuditOutcome::Success,
            None,
        )?;
        Ok(result)
    }

    /// Finalize the signature, record the spend for
    /// policy aggregates, and audit the terminal outcome either way.
    pub fn complete(&self, session_id: SessionId, signer_id: &str, digest: [u8; 32], transaction: Option<UnsignedTransaction>) -> WalletResult<CompletionOutput> {
        let finalize_result = self.signing.finalize(session_id, digest);

        let signature = match finalize_result {
            Ok(signature) => signature,
            Err(err) => {
                self.audit.append(
                    AuditEventType::RequestFailed,
                    AuditActor::Signer { signer_id: signer_id.to_string() },
                    Some(session_id),
                    AuditOutcome::Failure { reason: err.kind().to_string() },
                    None,
                )?;
                return Err(err);
            }
        };

        let tx_hash = match &transaction {
            Some(tx) => {
                let value = parse_context_value(&tx.value_wei);
                self.record_spend(signer_id, value)?;
                Some(tx.signed_hash(signature.r, signature.s, signature.v)?)
            }
            None => None,
        };

        self.audit.append(
            AuditEventType::RequestCompleted,
            AuditActor::Signer { signer_id: signer_id.to_string() },
            Some(session_id),
            AuditOutcome::Success,
            tx_hash.map(|h| json!({ "txHash": hex::encode(h) })),
        )?;

        Ok(CompletionOutput { signature, tx_hash })
    }

    fn record_spend(&self, signer_id: &str, value_wei: U256) -> WalletResult<()> {
        self.storage.append_spend_entry(
            signer_id,
            &SpendEntry {
                value_wei: value_wei.to_string(),
                timestamp_secs: chrono::Utc::now().timestamp(),
            },
        )
    }
}

fn parse_context_value(value_wei: &str) -> U256 {
    crate::policy::criteria::parse_wei(value_wei).unwrap_or_else(U256::zero)
}

fn decode_context_data(data: &str) -> Option<Vec<u8>> {
    let hex_part = data.strip_prefix("0x").unwrap_or(data);
    if hex_part.is_empty() {
        return None;
    }
    hex::decode(hex_part).ok()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kms::LocalFileKms;
    use crate::policy::context::RedbAggregateReader;
    use crate::policy::document::{Rule, RuleAction};
    use crate::signer::{HashedCredentialVerifier, hash_credential};
    use k256::elliptic_curve::sec1::ToEncodedPoint;
    use k256::{ProjectivePoint, Scalar};
    use tempfile::TempDir;

    fn two_shares_and_key() -> (Vec<u8>, Vec<u8>, [u8; 33]) {
        let secret = Scalar::from(55555u64);
        let slope = Scalar::from(13u64);
        let eval = |x: u64| secret + slope * Scalar::from(x);
        let server_share = eval(1).to_bytes().to_vec();
        let caller_share = eval(2).to_bytes().to_vec();
        let public_point = ProjectivePoint::GENERATOR * secret;
        let mut public_key = [0u8; 33];
        public_key.copy_from_slice(public_point.to_affine().to_encoded_point(true).as_bytes());
        (server_share, caller_share, public_key)
    }

    fn test_orchestrator() -> (TempDir, SigningOrchestrator, Storage, EnvelopeStore) {
        let dir = TempDir::new().unwrap();
        let kms = LocalFileKms::from_file_or_generate(&dir.path().join("master.key"), "v1").unwrap();
        let storage = Storage::open_memory().unwrap();
        let envelopes = EnvelopeStore::new(storage.clone(), Arc::new(kms));
        let signing = Arc::new(SigningCoordinator::new(std::time::Duration::from_secs(60)));
        let assembler = PolicyContextAssembler::new(Arc::new(RedbAggregateReader::new(storage.clone())));
        let audit = Arc::new(AuditLogger::new(storage.clone()).unwrap());
        let verifier = Arc::new(HashedCredentialVerifier);

        let orchestrator = SigningOrchestrator::new(
            storage.clone(),
            envelopes.clone(),
            signing,
            assembler,
            audit,
            verifier,
        );
        (dir, orchestrator, storage, envelopes)
    }

    fn allow_all_document(signer_id: &str) -> PolicyDocument {
        PolicyDocument {
            id: "doc".to_string(),
            signer_id: signer_id.to_string(),
            version: 1,
            rules: vec![Rule {
                action: RuleAction::Accept,
                description: Some("allow all".to_string()),
                enabled: true,
                criteria: vec![],
            }],
        }
    }

    fn seed_signer(
        storage: &Storage,
        envelopes: &EnvelopeStore,
        signer_id: &str,
        server_share: &[u8],
        public_key: [u8; 33],
        with_policy: bool,
    ) {
        let mut record = SignerRecord::new(signer_id, "alice", "owner-1", hash_credential("secret"));
        record.mark_dkg_complete(
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            public_key,
            server_share_path(signer_id),
        );
        storage.put_signer_record(signer_id, &record).unwrap();
        envelopes.store(&server_share_path(signer_id), server_share).unwrap();
        if with_policy {
            storage
                .put_policy_document(signer_id, &allow_all_document(signer_id))
                .unwrap();
        }
    }

    #[test]
    fn full_message_signing_flow_completes() {
        let (_dir, orchestrator, storage, envelopes) = test_orchestrator();
        let (server_share, caller_share, public_key) = two_shares_and_key();
        seed_signer(&storage, &envelopes, "signer-1", &server_share, public_key, true);

        let digest = [9u8; 32];
        let start = orchestrator
            .start_session(
                CallerContext {
                    signer_id: "signer-1",
                    presented_credential: "secret",
                    caller_ip: None,
                    caller_share: SecretBytes::new(caller_share),
                    caller_party_index: 1,
                },
                SignRequest::Message { digest },
                1,
            )
            .unwrap();
        assert_eq!(start.message_hash, digest);
        assert_eq!(start.server_first_messages.len(), 2);

        orchestrator
            .process_round(start.session_id, start.server_first_messages)
            .unwrap();

        let completion = orchestrator
            .complete(start.session_id, "signer-1", digest, None)
            .unwrap();
        assert!(matches!(completion.signature.v, 27 | 28));
        assert!(completion.tx_hash.is_none());
    }

    #[test]
    fn bad_credential_is_rejected() {
        let (_dir, orchestrator, storage, envelopes) = test_orchestrator();
        let (server_share, caller_share, public_key) = two_shares_and_key();
        seed_signer(&storage, &envelopes, "signer-1", &server_share, public_key, true);

        let err = orchestrator
            .start_session(
                CallerContext {
                    signer_id: "signer-1",
                    presented_credential: "wrong",
                    caller_ip: None,
                    caller_share: SecretBytes::new(caller_share),
                    caller_party_index: 1,
                },
                SignRequest::Message { digest: [1u8; 32] },
                1,
            )
            .unwrap_err();
        assert!(matches!(err, WalletError::Unauthenticated));
    }

    #[test]
    fn paused_signer_is_rejected() {
        let (_dir, orchestrator, storage, envelopes) = test_orchestrator();
        let (server_share, caller_share, public_key) = two_shares_and_key();
        seed_signer(&storage, &envelopes, "signer-1", &server_share, public_key, true);

        let mut record: SignerRecord = storage.get_signer_record("signer-1").unwrap().unwrap();
        record.transition_to(SignerStatus::Paused).unwrap();
        storage.put_signer_record("signer-1", &record).unwrap();

        let err = orchestrator
            .start_session(
                CallerContext {
                    signer_id: "signer-1",
                    presented_credential: "secret",
                    caller_ip: None,
                    caller_share: SecretBytes::new(caller_share),
                    caller_party_index: 1,
                },
                SignRequest::Message { digest: [1u8; 32] },
                1,
            )
            .unwrap_err();
        assert!(matches!(err, WalletError::SignerNotActive));
    }

    #[test]
    fn no_policy_document_denies_by_default() {
        let (_dir, orchestrator, storage, envelopes) = test_orchestrator();
        let (server_share, caller_share, public_key) = two_shares_and_key();
        seed_signer(&storage, &envelopes, "signer-2", &server_share, public_key, false);

        let err = orchestrator
            .start_session(
                CallerContext {
                    signer_id: "signer-2",
                    presented_credential: "secret",
                    caller_ip: None,
                    caller_share: SecretBytes::new(caller_share),
                    caller_party_index: 1,
                },
                SignRequest::Message { digest: [1u8; 32] },
                1,
            )
            .unwrap_err();
        assert!(matches!(err, WalletError::PolicyViolation(_)));
    }

    #[test]
    fn transaction_signing_records_spend_and_tx_hash() {
        let (_dir, orchestrator, storage, envelopes) = test_orchestrator();
        let (server_share, caller_share, public_key) = two_shares_and_key();
        seed_signer(&storage, &envelopes, "signer-3", &server_share, public_key, true);

        let tx = UnsignedTransaction {
            chain_id: 1,
            nonce: 0,
            to: Some("0xcccccccccccccccccccccccccccccccccccccccc".to_string()),
            value_wei: "1000".to_string(),
            data: String::new(),
            gas_limit: 21_000,
            fees: crate::signing::tx::GasFees::Legacy {
                gas_price: "1000000000".to_string(),
            },
        };

        let start = orchestrator
            .start_session(
                CallerContext {
                    signer_id: "signer-3",
                    presented_credential: "secret",
                    caller_ip: None,
                    caller_share: SecretBytes::new(caller_share),
                    caller_party_index: 1,
                },
                SignRequest::Transaction(tx.clone()),
                1,
            )
            .unwrap();

        orchestrator
            .process_round(start.session_id, start.server_first_messages)
            .unwrap();

        let completion = orchestrator
            .complete(start.session_id, "signer-3", start.message_hash, Some(tx))
            .unwrap();
        assert!(completion.tx_hash.is_some());

        let entries: Vec<SpendEntry> = storage.get_spend_entries("signer-3").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value_wei, "1000");
    }
}
