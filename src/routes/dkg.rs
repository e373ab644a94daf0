//! DKG HTTP endpoints: thin adapters over `DkgCoordinator`.
//! Ceremony initiation and round advancement are operator actions on a
//! signer account that already exists (see `routes::admin`), not
//! caller-authenticated signing requests, so these routes sit behind the
//! admin bearer token rather than the per-signer `CredentialVerifier`.

use actix_web::{HttpResponse, ResponseError, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditActor, AuditEventType, AuditLogger, AuditOutcome};
use crate::dkg::coordinator::DkgCoordinator;
use crate::dkg::scheme::ProtocolMessage;
use crate::error::{WalletError, WalletResult};
use crate::signer::SignerRecord;
use crate::storage::Storage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DkgInitRequest {
    pub signer_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DkgInitResponse {
    pub session_id: Uuid,
    pub signer_id: String,
    pub round: u8,
}

/// POST /dkg/init
#[tracing::instrument(skip(coordinator, storage, audit), fields(signer_id = %request.signer_id))]
pub async fn init_dkg(
    coordinator: web::Data<DkgCoordinator>,
    storage: web::Data<Storage>,
    audit: web::Data<AuditLogger>,
    request: web::Json<DkgInitRequest>,
) -> HttpResponse {
    let record: Option<SignerRecord> = match storage.get_signer_record(&request.signer_id) {
        Ok(record) => record,
        Err(e) => return e.error_response(),
    };
    let Some(record) = record else {
        return WalletError::SignerNotFound(request.signer_id.clone()).error_response();
    };
    if record.dkg_completed {
        return WalletError::InvalidSessionState {
            expected: "dkg not yet completed".to_string(),
            actual: "dkg already completed".to_string(),
        }
        .error_response();
    }

    match coordinator.init(&request.signer_id) {
        Ok(output) => {
            if let Err(e) = audit.append(
                AuditEventType::DkgInit,
                AuditActor::Signer {
                    signer_id: request.signer_id.clone(),
                },
                Some(output.session_id),
                AuditOutcome::Pending,
                None,
            ) {
                tracing::error!(error = %e, "failed to audit dkg init");
            }
            HttpResponse::Ok().json(DkgInitResponse {
                session_id: output.session_id,
                signer_id: output.signer_id,
                round: output.round,
            })
        }
        Err(e) => {
            tracing::error!(error = %e, signer_id = %request.signer_id, "dkg init failed");
            e.error_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DkgRoundRequest {
    pub session_id: Uuid,
    pub round: u8,
    #[serde(default)]
    pub incoming: Vec<ProtocolMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DkgRoundResponse {
    pub outgoing: Vec<ProtocolMessage>,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_share: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_share: Option<String>,
}

/// Persist the completed ceremony's address, public key and server-share
/// path onto the signer's record. `signer_id` comes from the coordinator
/// result, not the request, since a round frame only carries a session id.
fn finalize_signer_record(
    storage: &Storage,
    signer_id: &str,
    eth_address: &str,
    public_key: [u8; 33],
) -> WalletResult<()> {
    let mut record: SignerRecord = storage
        .get_signer_record(signer_id)?
        .ok_or_else(|| WalletError::SignerNotFound(signer_id.to_string()))?;
    record.mark_dkg_complete(
        eth_address.to_string(),
        public_key,
        crate::dkg::coordinator::server_share_path(signer_id),
    );
    storage.put_signer_record(signer_id, &record)
}

/// POST /dkg/round
#[tracing::instrument(skip(coordinator, storage, audit), fields(session_id = %request.session_id, round = request.round))]
pub async fn round_dkg(
    coordinator: web::Data<DkgCoordinator>,
    storage: web::Data<Storage>,
    audit: web::Data<AuditLogger>,
    request: web::Json<DkgRoundRequest>,
) -> HttpResponse {
    let session_id = request.session_id;
    let round = request.round;
    let incoming = request.into_inner().incoming;

    match coordinator.round(session_id, round, incoming) {
        Ok(result) => {
            if result.finished {
                if let (Some(signer_id), Some(public_key), Some(eth_address)) =
                    (&result.signer_id, result.public_key, &result.eth_address)
                {
                    if let Err(e) = finalize_signer_record(&storage, signer_id, eth_address, public_key) {
                        tracing::error!(error = %e, session_id = %session_id, "failed to persist dkg completion");
                        return e.error_response();
                    }
                }
                let _ = audit.append(
                    AuditEventType::DkgFinalize,
                    AuditActor::System,
                    Some(session_id),
                    AuditOutcome::Success,
                    None,
                );
            } else {
                let _ = audit.append(
                    AuditEventType::DkgRound,
                    AuditActor::System,
                    Some(session_id),
                    AuditOutcome::Pending,
                    None,
                );
            }

            HttpResponse::Ok().json(DkgRoundResponse {
                outgoing: result.outgoing,
                finished: result.finished,
                public_key: result.public_key.map(|k| BASE64.encode(k)),
                eth_address: result.eth_address,
                signer_share: result.signer_share.map(|s| BASE64.encode(s)),
                user_share: result.user_share.map(|s| BASE64.encode(s)),
            })
        }
        Err(e) => {
            tracing::error!(error = %e, session_id = %session_id, "dkg round failed");
            e.error_response()
        }
    }
}

/// Configure DKG routes on the given scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/dkg")
            .route("/init", web::post().to(init_dkg))
            .route("/round", web::post().to(round_dkg)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EnvelopeStore;
    use crate::crypto::kms::LocalFileKms;
    use crate::dkg::cggmp24_scheme::Cggmp24Scheme;
    use crate::signer::hash_credential;
    use actix_web::{App, test};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn app_state() -> (TempDir, Storage, web::Data<DkgCoordinator>, web::Data<AuditLogger>) {
        let dir = TempDir::new().unwrap();
        let kms = LocalFileKms::from_file_or_generate(&dir.path().join("master.key"), "v1").unwrap();
        let storage = Storage::open_memory().unwrap();
        let envelopes = EnvelopeStore::new(storage.clone(), Arc::new(kms));
        let coordinator = DkgCoordinator::new(
            Arc::new(Cggmp24Scheme::new()),
            envelopes,
            std::time::Duration::from_secs(60),
        );
        let audit = AuditLogger::new(storage.clone()).unwrap();
        (dir, storage, web::Data::new(coordinator), web::Data::new(audit))
    }

    #[actix_rt::test]
    async fn full_ceremony_persists_signer_record() {
        let (_dir, storage, coordinator, audit) = app_state();
        let record = SignerRecord::new("signer-1", "alice", "owner-1", hash_credential("secret"));
        storage.put_signer_record("signer-1", &record).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(coordinator)
                .app_data(web::Data::new(storage.clone()))
                .app_data(audit)
                .configure(configure),
        )
        .await;

        let init_req = test::TestRequest::post()
            .uri("/dkg/init")
            .set_json(&DkgInitRequest { signer_id: "signer-1".to_string() })
            .to_request();
        let init_resp: DkgInitResponse = test::call_and_read_body_json(&app, init_req).await;
        assert_eq!(init_resp.round, 1);

        let mut outgoing = Vec::new();
        for round in 1u8..=3 {
            let round_req = test::TestRequest::post()
                .uri("/dkg/round")
                .set_json(&DkgRoundRequest {
                    session_id: init_resp.session_id,
                    round,
                    incoming: outgoing,
                })
                .to_request();
            let round_resp: DkgRoundResponse = test::call_and_read_body_json(&app, round_req).await;
            outgoing = round_resp.outgoing;
            if round == 3 {
                assert!(round_resp.finished);
                assert!(round_resp.signer_share.is_some());
            } else {
                assert!(!round_resp.finished);
            }
        }

        let record: SignerRecord = storage.get_signer_record("signer-1").unwrap().unwrap();
        assert!(record.dkg_completed);
        assert!(record.eth_address.unwrap().starts_with("0x"));
    }

    #[actix_rt::test]
    async fn init_rejects_unknown_signer() {
        let (_dir, storage, coordinator, audit) = app_state();
        let app = test::init_service(
            App::new()
                .app_data(coordinator)
                .app_data(web::Data::new(storage))
                .app_data(audit)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/dkg/init")
            .set_json(&DkgInitRequest { signer_id: "ghost".to_string() })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
