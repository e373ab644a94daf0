//! Signer account and policy administration: signer provisioning,
//! lifecycle transitions, policy document replacement, and the opaque
//! wallet-encrypted user-share passthrough. These are operator actions,
//! gated by the admin bearer token rather than the per-signer
//! `CredentialVerifier` the signing routes check.

use actix_web::{HttpResponse, ResponseError, web};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditActor, AuditEventType, AuditLogger, AuditOutcome};
use crate::crypto::EnvelopeStore;
use crate::error::{WalletError, WalletResult};
use crate::policy::document::{PolicyDocument, Rule};
use crate::signer::{SignerRecord, SignerStatus, hash_credential};
use crate::storage::Storage;

/// The storage path a signer's wallet-encrypted (opaque to this service)
/// user share is persisted at.
fn user_share_path(signer_id: &str) -> String {
    format!("user-encrypted/{signer_id}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignerRequest {
    pub signer_id: String,
    pub display_name: String,
    pub owner_identity: String,
    pub credential: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerView {
    pub signer_id: String,
    pub display_name: String,
    pub owner_identity: String,
    pub eth_address: Option<String>,
    pub status: SignerStatus,
    pub dkg_completed: bool,
}

impl From<SignerRecord> for SignerView {
    fn from(record: SignerRecord) -> Self {
        Self {
            signer_id: record.signer_id,
            display_name: record.display_name,
            owner_identity: record.owner_identity,
            eth_address: record.eth_address,
            status: record.status,
            dkg_completed: record.dkg_completed,
        }
    }
}

/// POST /signers
#[tracing::instrument(skip(storage, audit, request), fields(signer_id = %request.signer_id))]
pub async fn create_signer(
    storage: web::Data<Storage>,
    audit: web::Data<AuditLogger>,
    request: web::Json<CreateSignerRequest>,
) -> HttpResponse {
    let existing: WalletResult<Option<SignerRecord>> = storage.get_signer_record(&request.signer_id);
    match existing {
        Ok(Some(_)) => {
            return WalletError::InvalidSessionState {
                expected: "signer id not yet registered".to_string(),
                actual: "signer id already exists".to_string(),
            }
            .error_response();
        }
        Ok(None) => {}
        Err(e) => return e.error_response(),
    }

    let record = SignerRecord::new(
        request.signer_id.clone(),
        request.display_name.clone(),
        request.owner_identity.clone(),
        hash_credential(&request.credential),
    );

    if let Err(e) = storage.put_signer_record(&request.signer_id, &record) {
        return e.error_response();
    }

    let _ = audit.append(
        AuditEventType::SignerCreated,
        AuditActor::Signer {
            signer_id: request.signer_id.clone(),
        },
        None,
        AuditOutcome::Success,
        None,
    );

    HttpResponse::Created().json(SignerView::from(record))
}

/// GET /signers/{id}
#[tracing::instrument(skip(storage))]
pub async fn get_signer(storage: web::Data<Storage>, path: web::Path<String>) -> HttpResponse {
    let signer_id = path.into_inner();
    match storage.get_signer_record::<SignerRecord>(&signer_id) {
        Ok(Some(record)) => HttpResponse::Ok().json(SignerView::from(record)),
        Ok(None) => WalletError::SignerNotFound(signer_id).error_response(),
        Err(e) => e.error_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: SignerStatus,
}

/// POST /signers/{id}/status
#[tracing::instrument(skip(storage, audit, request), fields(signer_id = %path))]
pub async fn update_signer_status(
    storage: web::Data<Storage>,
    audit: web::Data<AuditLogger>,
    path: web::Path<String>,
    request: web::Json<UpdateStatusRequest>,
) -> HttpResponse {
    let signer_id = path.into_inner();
    let mut record: SignerRecord = match storage.get_signer_record(&signer_id) {
        Ok(Some(record)) => record,
        Ok(None) => return WalletError::SignerNotFound(signer_id).error_response(),
        Err(e) => return e.error_response(),
    };

    if let Err(e) = record.transition_to(request.status) {
        return e.error_response();
    }

    if let Err(e) = storage.put_signer_record(&signer_id, &record) {
        return e.error_response();
    }

    let _ = audit.append(
        AuditEventType::SignerStatusChanged,
        AuditActor::Signer {
            signer_id: signer_id.clone(),
        },
        None,
        AuditOutcome::Success,
        Some(serde_json::json!({"status": record.status})),
    );

    HttpResponse::Ok().json(SignerView::from(record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacePolicyRequest {
    pub rules: Vec<Rule>,
}

/// PUT /signers/{id}/policy
///
/// A document is replaced wholesale, never edited in place:
/// `version` increments from whatever document (if any) preceded it.
#[tracing::instrument(skip(storage, audit, request), fields(signer_id = %path))]
pub async fn replace_policy(
    storage: web::Data<Storage>,
    audit: web::Data<AuditLogger>,
    path: web::Path<String>,
    request: web::Json<ReplacePolicyRequest>,
) -> HttpResponse {
    let signer_id = path.into_inner();

    if storage.get_signer_record::<SignerRecord>(&signer_id).ok().flatten().is_none() {
        return WalletError::SignerNotFound(signer_id).error_response();
    }

    let previous_version = match storage.get_policy_document::<PolicyDocument>(&signer_id) {
        Ok(Some(doc)) => doc.version,
        Ok(None) => 0,
        Err(e) => return e.error_response(),
    };

    let document = PolicyDocument {
        id: uuid::Uuid::new_v4().to_string(),
        signer_id: signer_id.clone(),
        rules: request.into_inner().rules,
        version: previous_version + 1,
    };

    if let Err(e) = storage.put_policy_document(&signer_id, &document) {
        return e.error_response();
    }

    let _ = audit.append(
        AuditEventType::PolicyReplaced,
        AuditActor::Signer {
            signer_id: signer_id.clone(),
        },
        None,
        AuditOutcome::Success,
        Some(serde_json::json!({"version": document.version})),
    );

    HttpResponse::Ok().json(document)
}

/// GET /signers/{id}/user-share
///
/// Returns whatever JSON blob the caller last stored via the POST
/// counterpart, verbatim. This service never attempts to decrypt it.
#[tracing::instrument(skip(envelopes))]
pub async fn get_user_share(envelopes: web::Data<EnvelopeStore>, path: web::Path<String>) -> HttpResponse {
    let signer_id = path.into_inner();
    match envelopes.fetch_opaque(&user_share_path(&signer_id)) {
        Ok(value) => HttpResponse::Ok().json(value),
        Err(e) => e.error_response(),
    }
}

/// POST /signers/{id}/user-share
///
/// Stores the wallet-encrypted `{walletAddress, iv, ciphertext, salt}`
/// envelope verbatim at `user-encrypted/{signerId}`. The only validation
/// performed is that the body is well-formed JSON; this service MUST NOT
/// attempt to decrypt or otherwise interpret its contents.
#[tracing::instrument(skip(envelopes, body))]
pub async fn put_user_share(
    envelopes: web::Data<EnvelopeStore>,
    path: web::Path<String>,
    body: web::Json<serde_json::Value>,
) -> HttpResponse {
    let signer_id = path.into_inner();
    match envelopes.store_opaque(&user_share_path(&signer_id), &body) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({"stored": true})),
        Err(e) => e.error_response(),
    }
}

/// Configure admin routes on the given scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/signers")
            .route("", web::post().to(create_signer))
            .route("/{id}", web::get().to(get_signer))
            .route("/{id}/status", web::post().to(update_signer_status))
            .route("/{id}/policy", web::put().to(replace_policy))
            .route("/{id}/user-share", web::get().to(get_user_share))
            .route("/{id}/user-share", web::post().to(put_user_share)),
    );
}
