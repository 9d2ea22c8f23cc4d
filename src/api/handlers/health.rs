use crate::{GIT_COMMIT_HASH, api::gate::TokenGate, sync::ProfileService};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    status: String,
    commit: String,
    name: String,
    version: String,
    firebase: String,
    database: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Service is up; dependency flags report verifier and store availability", body = Health),
    ),
    tag= "health"
)]
// axum handler for health, answers 200 even when dependencies are down
pub async fn health(
    gate: Extension<Arc<TokenGate>>,
    service: Extension<Arc<ProfileService>>,
) -> impl IntoResponse {
    let store_status = service.status().await;

    let health = Health {
        status: "ok".to_string(),
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        firebase: if gate.is_enabled() {
            "enabled".to_string()
        } else {
            "disabled".to_string()
        },
        database: store_status.as_str().to_string(),
    };

    debug!(
        firebase = %health.firebase,
        database = %health.database,
        "health check"
    );

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .unwrap_or_else(|err| {
            error!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        });

    (StatusCode::OK, headers, Json(health))
}
