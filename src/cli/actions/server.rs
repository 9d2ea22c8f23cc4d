use crate::{
    api::{self, gate::TokenGate},
    cli::telemetry,
    identity::{FirebaseVerifier, GOOGLE_SECURETOKEN_JWKS_URL},
    store::{MemoryProfileStore, PgProfileStore},
    sync::ProfileService,
};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub firebase_project_id: Option<String>,
    pub allowed_origins: Vec<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the verifier cannot be configured or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let gate = Arc::new(token_gate(&args).await?);
    let service = Arc::new(profile_service(&args).await);

    info!(
        firebase = gate.is_enabled(),
        store = service.is_enabled(),
        "collaborators ready"
    );

    let result = api::new(args.port, &args.allowed_origins, gate, service).await;

    telemetry::shutdown_tracer();

    result
}

async fn token_gate(args: &Args) -> Result<TokenGate> {
    let Some(project_id) = &args.firebase_project_id else {
        warn!("FIREBASE_PROJECT_ID not set; identity verification disabled");
        return Ok(TokenGate::disabled(args.request_timeout));
    };

    let verifier = FirebaseVerifier::new_remote(
        project_id.clone(),
        GOOGLE_SECURETOKEN_JWKS_URL,
        keyset_fetch_timeout(args.request_timeout),
    )
    .await?;

    Ok(TokenGate::new(Arc::new(verifier), args.request_timeout))
}

/// Signing key fetches must give up inside the gate deadline so the cached
/// keyset can still answer.
fn keyset_fetch_timeout(request_timeout: Duration) -> Duration {
    request_timeout * 3 / 4
}

async fn profile_service(args: &Args) -> ProfileService {
    let Some(dsn) = &args.dsn else {
        warn!("PROFILESYNC_DSN not set; profile store disabled");
        return ProfileService::disabled(args.request_timeout);
    };
    let dsn = dsn.expose_secret();

    if dsn.starts_with("memory:") {
        warn!("using in-memory profile store; documents are lost on restart");
        return ProfileService::new(Arc::new(MemoryProfileStore::new()), args.request_timeout);
    }

    match PgProfileStore::connect(dsn, args.connect_timeout).await {
        Ok(store) => ProfileService::new(Arc::new(store), args.request_timeout),
        Err(err) => {
            error!("Profile store unavailable at startup, continuing without it: {err:#}");
            ProfileService::disabled(args.request_timeout)
        }
    }
}
