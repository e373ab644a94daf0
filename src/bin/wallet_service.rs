//! Threshold Wallet Service
//!
//! Single-process HTTP service that holds the server's share of a 2-of-3
//! threshold ECDSA key per signer account and drives the DKG and signing
//! ceremonies that involve it.
//!
//! ## Responsibilities
//!
//! - Run the DKG ceremony that establishes a signer's key and server share
//! - Run the interactive presign/combine ceremony for transaction and
//!   message signing requests
//! - Evaluate signing requests against a per-signer policy document before
//!   a ceremony is allowed to start
//! - Append every ceremony outcome and admin action to a hash-chained
//!   audit log
//!
//! ## Security
//!
//! - DKG initiation, round advancement and signer/policy administration
//!   are operator actions gated by `WALLET_ADMIN_TOKEN`
//! - `/sign` and `/sign-message` are caller-credentialed against the
//!   target signer's own hashed credential, independent of the admin gate
//! - The server's key shares are never held in plaintext at rest —
//!   `EnvelopeStore` wraps them with a KMS-backed DEK before every write

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware, web};
use tracing_actix_web::TracingLogger;
use wallet_service::audit::AuditLogger;
use wallet_service::config::{KekProvider, Settings};
use wallet_service::crypto::EnvelopeStore;
use wallet_service::crypto::kms::{KmsProvider, LocalFileKms, default_kek_path};
use wallet_service::dkg::DkgCoordinator;
use wallet_service::dkg::cggmp24_scheme::Cggmp24Scheme;
use wallet_service::middleware::{InternalAuth, RateLimitConfig, general_limiter};
use wallet_service::policy::context::{PolicyContextAssembler, RedbAggregateReader};
use wallet_service::signer::HashedCredentialVerifier;
use wallet_service::signing::coordinator::SigningCoordinator;
use wallet_service::storage::Storage;
use wallet_service::{SigningOrchestrator, routes, telemetry};

fn build_kms(settings: &Settings) -> Arc<dyn KmsProvider> {
    match settings.kek_provider() {
        KekProvider::Local => {
            let path = settings
                .kek_path()
                .cloned()
                .unwrap_or_else(|| default_kek_path(settings.db_path()));
            match LocalFileKms::from_file_or_generate(&path, "local-v1") {
                Ok(kms) => Arc::new(kms),
                Err(e) => {
                    tracing::error!(error = %e, path = %path.display(), "failed to load local KEK");
                    std::process::exit(1);
                }
            }
        }
        KekProvider::Kms => {
            // A remote KMS provider would implement `KmsProvider` against a
            // cloud key-management API here; until one is wired in, running
            // with WALLET_KEK_PROVIDER=kms is a configuration error rather
            // than a silent fallback to the local file provider.
            tracing::error!("WALLET_KEK_PROVIDER=kms has no provider implementation yet");
            std::process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init_tracing();

    let settings = Settings::from_env();

    if let Err(message) = settings.validate() {
        tracing::error!("{message}");
        std::process::exit(1);
    }

    let storage = match Storage::open(settings.db_path()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open storage database");
            std::process::exit(1);
        }
    };

    let kms = build_kms(&settings);
    let envelopes = EnvelopeStore::new(storage.clone(), kms);

    let dkg = Arc::new(DkgCoordinator::new(
        Arc::new(Cggmp24Scheme::new()),
        envelopes.clone(),
        settings.session_ttl(),
    ));
    dkg.spawn_ttl_sweeper();

    let signing = Arc::new(SigningCoordinator::new(settings.session_ttl()));
    signing.spawn_ttl_sweeper();

    let assembler = PolicyContextAssembler::new(Arc::new(RedbAggregateReader::new(storage.clone())));

    let audit = match AuditLogger::new(storage.clone()) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            tracing::error!(error = %e, "failed to open audit log");
            std::process::exit(1);
        }
    };

    let verifier = Arc::new(HashedCredentialVerifier);

    let orchestrator = Arc::new(SigningOrchestrator::new(
        storage.clone(),
        envelopes.clone(),
        Arc::clone(&signing),
        assembler,
        Arc::clone(&audit),
        verifier,
    ));

    let rate_config = RateLimitConfig::from_env();
    tracing::info!(
        dkg_init_per_hour = rate_config.dkg_init_per_hour,
        dkg_round_per_hour = rate_config.dkg_round_per_hour,
        signing_per_hour = rate_config.signing_per_hour,
        "rate limiting enabled"
    );

    let addr = settings.socket_addr();
    tracing::info!(addr = %addr, scheme = %settings.scheme(), "starting threshold wallet service");

    let settings_data = web::Data::new(settings.clone());
    let storage_data = web::Data::new(storage);
    let envelopes_data = web::Data::new(envelopes);
    let dkg_data = web::Data::from(dkg);
    let audit_data = web::Data::from(audit);
    let orchestrator_data = web::Data::from(orchestrator);
    let internal_auth = InternalAuth::new(&settings);
    let body_limit = settings.body_limit_bytes();
    let request_timeout = settings.request_timeout();

    HttpServer::new(move || {
        App::new()
            .wrap(general_limiter())
            .wrap(TracingLogger::default())
            .wrap(middleware::DefaultHeaders::new().add(("X-Service", "threshold-wallet-service")))
            .app_data(web::JsonConfig::default().limit(body_limit))
            .app_data(settings_data.clone())
            .app_data(storage_data.clone())
            .app_data(envelopes_data.clone())
            .app_data(dkg_data.clone())
            .app_data(audit_data.clone())
            .app_data(orchestrator_data.clone())
            .configure(routes::health::configure)
            .configure(routes::signing::configure)
            .service(
                web::scope("")
                    .wrap(internal_auth.clone())
                    .configure(routes::dkg::configure)
                    .configure(routes::admin::configure),
            )
    })
    .client_request_timeout(request_timeout)
    .bind(addr)?
    .run()
    .await?;

    telemetry::shutdown_tracing();

    Ok(())
}
