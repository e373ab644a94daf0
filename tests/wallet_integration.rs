//! End-to-end tests exercising the full DKG and signing flow through the
//! public coordinator and orchestrator APIs with temporary storage, the
//! same shape as the teacher's `frost_integration.rs` but driven against
//! the threshold-ECDSA ceremony this service actually runs.
//!
//! Run with: cargo test --test wallet_integration

use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use tempfile::TempDir;

use wallet_service::audit::AuditLogger;
use wallet_service::crypto::kms::LocalFileKms;
use wallet_service::crypto::{EnvelopeStore, SecretBytes, derive_eth_address};
use wallet_service::dkg::cggmp24_scheme::Cggmp24Scheme;
use wallet_service::dkg::coordinator::{DkgCoordinator, server_share_path};
use wallet_service::orchestrator::{CallerContext, SignRequest, SigningOrchestrator};
use wallet_service::policy::context::{PolicyContextAssembler, RedbAggregateReader};
use wallet_service::policy::criteria::{CriterionConfig, Operator, SetOperator};
use wallet_service::policy::document::{PolicyDocument, Rule, RuleAction};
use wallet_service::policy::engine;
use wallet_service::policy::context::PolicyContext;
use wallet_service::signer::{HashedCredentialVerifier, SignerRecord, hash_credential};
use wallet_service::signing::coordinator::SigningCoordinator;
use wallet_service::storage::Storage;
use wallet_service::WalletError;

struct DkgFixture {
    _dir: TempDir,
    envelopes: EnvelopeStore,
    public_key: [u8; 33],
    eth_address: String,
    /// Raw 32-byte scalar shares for parties 0 (server), 1 and 2,
    /// ordered by party index.
    shares: [Vec<u8>; 3],
}

fn run_full_dkg() -> DkgFixture {
    let dir = TempDir::new().unwrap();
    let kms = LocalFileKms::from_file_or_generate(&dir.path().join("master.key"), "v1").unwrap();
    let storage = Storage::open_memory().unwrap();
    let envelopes = EnvelopeStore::new(storage, Arc::new(kms));
    let coordinator = DkgCoordinator::new(Arc::new(Cggmp24Scheme::new()), envelopes.clone(), Duration::from_secs(60));

    let init = coordinator.init("signer-e2e").unwrap();
    assert_eq!(init.round, 1);

    let mut outgoing = Vec::new();
    let mut round_number = 1u8;
    let (public_key, eth_address, server_share, signer_share, user_share) = loop {
        let result = coordinator.round(init.session_id, round_number, outgoing).unwrap();
        if result.finished {
            break (
                result.public_key.unwrap(),
                result.eth_address.unwrap(),
                envelopes.fetch(&server_share_path("signer-e2e")).unwrap().as_bytes().to_vec(),
                result.signer_share.unwrap(),
                result.user_share.unwrap(),
            );
        }
        outgoing = result.outgoing;
        round_number += 1;
        assert!(round_number <= 10, "ceremony did not converge within a sane round budget");
    };

    DkgFixture {
        _dir: dir,
        envelopes,
        public_key,
        eth_address,
        shares: [server_share, signer_share, user_share],
    }
}

/// Scenario 1 (spec §8): DKG happy path produces three shares, a
/// 33-byte compressed public key and an EIP-55 address.
#[test]
fn dkg_happy_path_produces_shares_key_and_address() {
    let fixture = run_full_dkg();

    assert_eq!(fixture.public_key.len(), 33);
    assert!(fixture.public_key[0] == 0x02 || fixture.public_key[0] == 0x03);

    assert_eq!(fixture.eth_address.len(), 42);
    assert!(fixture.eth_address.starts_with("0x"));
    assert_eq!(derive_eth_address(&fixture.public_key).unwrap(), fixture.eth_address);

    for share in &fixture.shares {
        assert!(share.len() > 16, "share should carry real scalar material");
    }
}

/// Scenario 2 (spec §8): every cooperating pair out of the three DKG
/// shares can jointly sign, and the recovered address matches the
/// ceremony's derived Ethereum address.
#[test]
fn every_pair_of_shares_signs_and_recovers() {
    let fixture = run_full_dkg();
    let coordinator = SigningCoordinator::new(Duration::from_secs(60));

    for (i, j) in [(0u8, 1u8), (0, 2), (1, 2)] {
        let digest = {
            let mut d = [0u8; 32];
            d[0] = i;
            d[1] = j;
            d[31] = 0x42;
            d
        };

        let shares = [
            SecretBytes::new(fixture.shares[usize::from(i)].clone()),
            SecretBytes::new(fixture.shares[usize::from(j)].clone()),
        ];
        let created = coordinator
            .create_session(shares, [i, j], fixture.public_key, Some(digest))
            .unwrap();
        let round = coordinator.process_round(created.session_id, 1, created.outgoing).unwrap();
        assert!(round.presigned);

        let signature = coordinator.finalize(created.session_id, digest).unwrap();
        assert!(matches!(signature.v, 27 | 28));

        let ecdsa_sig = EcdsaSignature::from_scalars(signature.r, signature.s).unwrap();
        let recovery_id = RecoveryId::from_byte(signature.v - 27).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(&digest, &ecdsa_sig, recovery_id).unwrap();
        assert_eq!(recovered.to_encoded_point(true).as_bytes(), fixture.public_key);

        let recovered_address = derive_eth_address(recovered.to_encoded_point(true).as_bytes().try_into().unwrap()).unwrap();
        assert_eq!(recovered_address, fixture.eth_address);
    }
}

/// Scenario 3 (spec §8): copying an envelope row to another path makes
/// decryption fail, proving AAD path-binding holds across the whole
/// store rather than just inside the envelope module's own unit tests.
#[test]
fn envelope_is_bound_to_its_storage_path() {
    let fixture = run_full_dkg();
    let moved_path = "signers/attacker-copy/server";

    // Read the raw envelope row back out and re-persist it under a new path,
    // simulating an attacker with write access to the ciphertext table.
    let raw: serde_json::Value = fixture.envelopes.fetch_opaque(&server_share_path("signer-e2e")).unwrap();
    fixture.envelopes.store_opaque(moved_path, &raw).unwrap();

    assert!(fixture.envelopes.fetch(moved_path).is_err());
    assert!(fixture.envelopes.fetch(&server_share_path("signer-e2e")).is_ok());
}

fn test_orchestrator(storage: Storage, envelopes: EnvelopeStore) -> SigningOrchestrator {
    let signing = Arc::new(SigningCoordinator::new(Duration::from_secs(60)));
    let assembler = PolicyContextAssembler::new(Arc::new(RedbAggregateReader::new(storage.clone())));
    let audit = Arc::new(AuditLogger::new(storage.clone()).unwrap());
    let verifier = Arc::new(HashedCredentialVerifier);
    SigningOrchestrator::new(storage, envelopes, signing, assembler, audit, verifier)
}

/// Scenario 4 (spec §8): the "conservative" two-rule policy document —
/// a deny-list reject ahead of a bounded accept — evaluated through the
/// full orchestrator pipeline (real signer record, real envelope-backed
/// share, real policy document) rather than the rules engine alone.
#[test]
fn conservative_policy_document_end_to_end() {
    let dir = TempDir::new().unwrap();
    let kms = LocalFileKms::from_file_or_generate(&dir.path().join("master.key"), "v1").unwrap();
    let storage = Storage::open_memory().unwrap();
    let envelopes = EnvelopeStore::new(storage.clone(), Arc::new(kms));

    // Two-share ceremony output good enough for a single sign session:
    // reuse the party-scalar construction the unit tests already use.
    use k256::elliptic_curve::Field;
    use k256::{ProjectivePoint, Scalar};
    use rand::rngs::OsRng;

    let secret = Scalar::random(OsRng);
    let slope = Scalar::random(OsRng);
    let eval = |x: u64| secret + slope * Scalar::from(x);
    let server_share = eval(1).to_bytes().to_vec();
    let caller_share = eval(2).to_bytes().to_vec();
    let public_point = ProjectivePoint::GENERATOR * secret;
    let mut public_key = [0u8; 33];
    public_key.copy_from_slice(public_point.to_affine().to_encoded_point(true).as_bytes());

    let signer_id = "signer-conservative";
    let mut record = SignerRecord::new(signer_id, "alice", "owner-1", hash_credential("secret"));
    record.mark_dkg_complete(
        "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string(),
        public_key,
        server_share_path(signer_id),
    );
    storage.put_signer_record(signer_id, &record).unwrap();
    envelopes.store(&server_share_path(signer_id), &server_share).unwrap();

    let blocked_address = "0xdeaddeaddeaddeaddeaddeaddeaddeaddeaddead".to_string();
    let document = PolicyDocument {
        id: "doc".to_string(),
        signer_id: signer_id.to_string(),
        version: 1,
        rules: vec![
            Rule {
                action: RuleAction::Reject,
                description: Some("known-bad address".to_string()),
                enabled: true,
                criteria: vec![CriterionConfig::EvmAddress {
                    operator: SetOperator::In,
                    addresses: vec![blocked_address.clone()],
                    allow_deploy: false,
                }],
            },
            Rule {
                action: RuleAction::Accept,
                description: Some("small, rate-limited, business-hours transfer".to_string()),
                enabled: true,
                criteria: vec![
                    CriterionConfig::EthValue {
                        operator: Operator::Lte,
                        value: "100000000000000000".to_string(), // 1e17
                    },
                    CriterionConfig::DailyLimit {
                        max_wei: "500000000000000000".to_string(), // 5e17
                    },
                    CriterionConfig::RateLimit { max_per_hour: 10 },
                    CriterionConfig::TimeWindow { start_hour: 9, end_hour: 17 },
                ],
            },
        ],
    };
    storage.put_policy_document(signer_id, &document).unwrap();

    let orchestrator = test_orchestrator(storage.clone(), envelopes.clone());

    // Directly probe the assembled-context + rules-engine path at the
    // three boundary points the spec calls out, without going through
    // HTTP or a signing ceremony (that's covered by the orchestrator
    // unit tests already).
    let ctx_allowed = PolicyContext {
        signer_address: record.eth_address.clone().unwrap(),
        to_address: Some("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string()),
        value_wei: primitive_types::U256::from_dec_str("100000000000000000").unwrap(),
        function_selector: None,
        chain_id: 1,
        rolling_daily_spend_wei: primitive_types::U256::from_dec_str("200000000000000000").unwrap(),
        rolling_monthly_spend_wei: primitive_types::U256::zero(),
        request_count_last_hour: 5,
        request_count_today: 5,
        current_hour_utc: 14,
        caller_ip: None,
        timestamp: chrono::Utc::now(),
    };
    let result = engine::evaluate(Some(&document), &ctx_allowed);
    assert!(result.allowed);
    assert!(result.violations.is_empty());

    let mut ctx_blocked = ctx_allowed.clone();
    ctx_blocked.to_address = Some(blocked_address);
    let result = engine::evaluate(Some(&document), &ctx_blocked);
    assert!(!result.allowed);
    assert_eq!(result.violations[0].kind, wallet_service::policy::Violation::rule_reject(None).kind);

    let mut ctx_over_cap = ctx_allowed.clone();
    ctx_over_cap.value_wei = primitive_types::U256::from_dec_str("10000000000000000000").unwrap(); // 1e19
    let result = engine::evaluate(Some(&document), &ctx_over_cap);
    assert!(!result.allowed);
    assert_eq!(
        result.violations[0].kind,
        wallet_service::policy::ViolationKind::DefaultDeny
    );

    // And end-to-end through the orchestrator for the accepted case. The
    // two boundary checks above already exercise the time-window
    // criterion directly against a controlled context; replace the
    // stored document with one that drops it so this assertion doesn't
    // depend on the wall-clock hour the test happens to run at.
    let mut always_on_document = document.clone();
    always_on_document.rules[1].criteria.retain(|c| !matches!(c, CriterionConfig::TimeWindow { .. }));
    storage.put_policy_document(signer_id, &always_on_document).unwrap();

    let digest = [3u8; 32];
    let start = orchestrator
        .start_session(
            CallerContext {
                signer_id,
                presented_credential: "secret",
                caller_ip: None,
                caller_share: SecretBytes::new(caller_share),
                caller_party_index: 1,
            },
            SignRequest::Message { digest },
            1,
        )
        .unwrap();
    orchestrator.process_round(start.session_id, start.server_first_messages).unwrap();
    let completion = orchestrator.complete(start.session_id, signer_id, digest, None).unwrap();
    assert!(matches!(completion.signature.v, 27 | 28));
}

/// Scenario 6 (spec §8): a session that sits idle past its TTL is swept,
/// and the next call against it is rejected as unknown rather than
/// silently resuming.
#[test]
fn idle_signing_session_is_swept_after_ttl() {
    let coordinator = SigningCoordinator::new(Duration::from_millis(0));
    use k256::elliptic_curve::Field;
    use k256::Scalar;
    use rand::rngs::OsRng;

    let secret = Scalar::random(OsRng);
    let slope = Scalar::random(OsRng);
    let eval = |x: u64| secret + slope * Scalar::from(x);
    let share0 = eval(1).to_bytes().to_vec();
    let share1 = eval(2).to_bytes().to_vec();
    let public_point = k256::ProjectivePoint::GENERATOR * secret;
    let mut public_key = [0u8; 33];
    public_key.copy_from_slice(public_point.to_affine().to_encoded_point(true).as_bytes());

    let created = coordinator
        .create_session([SecretBytes::new(share0), SecretBytes::new(share1)], [0, 1], public_key, None)
        .unwrap();

    std::thread::sleep(Duration::from_millis(10));

    let err = coordinator
        .process_round(created.session_id, 1, created.outgoing)
        .unwrap_err();
    assert!(matches!(err, WalletError::SessionExpired(_)));
}
