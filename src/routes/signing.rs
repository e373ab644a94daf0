//! Signing HTTP endpoints: thin adapters over the
//! `SigningOrchestrator`'s three-call shape (`start_session`,
//! `process_round`, `complete`). The caller authenticates with a bearer
//! credential checked against the Signer Record, not the admin token —
//! see `SigningOrchestrator::resolve_active_signer`.

use actix_web::{HttpRequest, HttpResponse, ResponseError, web};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::crypto::SecretBytes;
use crate::dkg::scheme::ProtocolMessage;
use crate::error::WalletError;
use crate::orchestrator::{CallerContext, SignRequest, SigningOrchestrator};
use crate::signing::session::SessionId;
use crate::signing::tx::UnsignedTransaction;

fn bearer_credential(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|s| s.trim().to_string())
}

fn caller_ip(req: &HttpRequest) -> Option<IpAddr> {
    req.peer_addr().map(|addr| addr.ip())
}

fn decode_hash32(hex_str: &str) -> Result<[u8; 32], WalletError> {
    let hex_part = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_part)
        .map_err(|_| WalletError::InvalidInput(format!("invalid hash hex: {hex_str}")))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::InvalidInput(format!("hash must be 32 bytes: {hex_str}")))
}

fn decode_share(hex_str: &str) -> Result<Vec<u8>, WalletError> {
    let hex_part = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_part).map_err(|_| WalletError::InvalidInput("invalid share hex".to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionResponse {
    session_id: SessionId,
    server_first_messages: Vec<ProtocolMessage>,
    message_hash: String,
    party_config: [u8; 2],
    rounds_remaining: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    pub signer_id: String,
    pub caller_share: String,
    pub caller_party_index: u8,
    pub chain_id: u64,
    pub transaction: UnsignedTransaction,
}

/// POST /sign/session
#[tracing::instrument(skip(orchestrator, req, body), fields(signer_id = %body.signer_id))]
pub async fn start_transaction_session(
    orchestrator: web::Data<SigningOrchestrator>,
    req: HttpRequest,
    body: web::Json<StartTransactionRequest>,
) -> HttpResponse {
    let Some(credential) = bearer_credential(&req) else {
        return WalletError::Unauthenticated.error_response();
    };
    let body = body.into_inner();
    let caller_share = match decode_share(&body.caller_share) {
        Ok(bytes) => bytes,
        Err(e) => return e.error_response(),
    };

    let caller = CallerContext {
        signer_id: &body.signer_id,
        presented_credential: &credential,
        caller_ip: caller_ip(&req),
        caller_share: SecretBytes::new(caller_share),
        caller_party_index: body.caller_party_index,
    };

    match orchestrator.start_session(caller, SignRequest::Transaction(body.transaction), body.chain_id) {
        Ok(output) => HttpResponse::Ok().json(StartSessionResponse {
            session_id: output.session_id,
            server_first_messages: output.server_first_messages,
            message_hash: hex::encode(output.message_hash),
            party_config: output.party_config,
            rounds_remaining: output.rounds_remaining,
        }),
        Err(e) => {
            tracing::error!(error = %e, signer_id = %body.signer_id, "signing session start failed");
            e.error_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMessageRequest {
    pub signer_id: String,
    pub caller_share: String,
    pub caller_party_index: u8,
    pub chain_id: u64,
    pub message_hash: String,
}

/// POST /sign-message/session
#[tracing::instrument(skip(orchestrator, req, body), fields(signer_id = %body.signer_id))]
pub async fn start_message_session(
    orchestrator: web::Data<SigningOrchestrator>,
    req: HttpRequest,
    body: web::Json<StartMessageRequest>,
) -> HttpResponse {
    let Some(credential) = bearer_credential(&req) else {
        return WalletError::Unauthenticated.error_response();
    };
    let body = body.into_inner();
    let digest = match decode_hash32(&body.message_hash) {
        Ok(digest) => digest,
        Err(e) => return e.error_response(),
    };
    let caller_share = match decode_share(&body.caller_share) {
        Ok(bytes) => bytes,
        Err(e) => return e.error_response(),
    };

    let caller = CallerContext {
        signer_id: &body.signer_id,
        presented_credential: &credential,
        caller_ip: caller_ip(&req),
        caller_share: SecretBytes::new(caller_share),
        caller_party_index: body.caller_party_index,
    };

    match orchestrator.start_session(caller, SignRequest::Message { digest }, body.chain_id) {
        Ok(output) => HttpResponse::Ok().json(StartSessionResponse {
            session_id: output.session_id,
            server_first_messages: output.server_first_messages,
            message_hash: hex::encode(output.message_hash),
            party_config: output.party_config,
            rounds_remaining: output.rounds_remaining,
        }),
        Err(e) => {
            tracing::error!(error = %e, signer_id = %body.signer_id, "signing session start failed");
            e.error_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRequest {
    pub session_id: SessionId,
    #[serde(default)]
    pub messages: Vec<ProtocolMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoundResponse {
    messages: Vec<ProtocolMessage>,
    rounds_remaining: u8,
    complete: bool,
}

/// POST /sign/round
#[tracing::instrument(skip(orchestrator, body), fields(session_id = %body.session_id))]
pub async fn round(
    orchestrator: web::Data<SigningOrchestrator>,
    body: web::Json<RoundRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    match orchestrator.process_round(body.session_id, body.messages) {
        Ok(result) => HttpResponse::Ok().json(RoundResponse {
            messages: result.outgoing,
            rounds_remaining: u8::from(!result.presigned),
            complete: result.presigned,
        }),
        Err(e) => {
            tracing::error!(error = %e, session_id = %body.session_id, "signing round failed");
            e.error_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct SignatureJson {
    r: String,
    s: String,
    v: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionResponse {
    signature: SignatureJson,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTransactionRequest {
    pub session_id: SessionId,
    pub signer_id: String,
    pub transaction: UnsignedTransaction,
}

/// POST /sign/complete
#[tracing::instrument(skip(orchestrator, body), fields(session_id = %body.session_id, signer_id = %body.signer_id))]
pub async fn complete_transaction(
    orchestrator: web::Data<SigningOrchestrator>,
    body: web::Json<CompleteTransactionRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let digest = match body.transaction.digest() {
        Ok(digest) => digest,
        Err(e) => return e.error_response(),
    };

    match orchestrator.complete(body.session_id, &body.signer_id, digest, Some(body.transaction)) {
        Ok(output) => HttpResponse::Ok().json(CompletionResponse {
            signature: SignatureJson {
                r: hex::encode(output.signature.r),
                s: hex::encode(output.signature.s),
                v: output.signature.v,
            },
            tx_hash: output.tx_hash.map(hex::encode),
        }),
        Err(e) => {
            tracing::error!(error = %e, session_id = %body.session_id, "signing completion failed");
            e.error_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMessageRequest {
    pub session_id: SessionId,
    pub signer_id: String,
    pub message_hash: String,
}

/// POST /sign-message/complete
#[tracing::instrument(skip(orchestrator, body), fields(session_id = %body.session_id, signer_id = %body.signer_id))]
pub async fn complete_message(
    orchestrator: web::Data<SigningOrchestrator>,
    body: web::Json<CompleteMessageRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let digest = match decode_hash32(&body.message_hash) {
        Ok(digest) => digest,
        Err(e) => return e.error_response(),
    };

    match orchestrator.complete(body.session_id, &body.signer_id, digest, None) {
        Ok(output) => HttpResponse::Ok().json(CompletionResponse {
            signature: SignatureJson {
                r: hex::encode(output.signature.r),
                s: hex::encode(output.signature.s),
                v: output.signature.v,
            },
            tx_hash: None,
        }),
        Err(e) => {
            tracing::error!(error = %e, session_id = %body.session_id, "signing completion failed");
            e.error_response()
        }
    }
}

/// Configure signing routes on the given scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/sign/session", web::post().to(start_transaction_session))
        .route("/sign-message/session", web::post().to(start_message_session))
        .route("/sign/round", web::post().to(round))
        .route("/sign/complete", web::post().to(complete_transaction))
        .route("/sign-message/complete", web::post().to(complete_message));
}
