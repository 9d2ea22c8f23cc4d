//! Stored profile read and update.
//!
//! Neither endpoint creates a document: a subject that never called
//! `/api/me` gets `404`.

use crate::{
    Error,
    api::gate::TokenGate,
    error::ErrorBody,
    store::{ProfileDocument, ProfileUpdate},
    sync::ProfileService,
};
use axum::{
    extract::{Extension, rejection::JsonRejection},
    http::HeaderMap,
    response::Json,
};
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/api/profile",
    responses(
        (status = 200, description = "Stored profile document.", body = ProfileDocument),
        (status = 401, description = "Missing or invalid bearer token.", body = ErrorBody),
        (status = 404, description = "No profile document exists yet.", body = ErrorBody),
        (status = 503, description = "Identity verifier or profile store unavailable.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "profile"
)]
pub async fn get_profile(
    headers: HeaderMap,
    gate: Extension<Arc<TokenGate>>,
    service: Extension<Arc<ProfileService>>,
) -> Result<Json<ProfileDocument>, Error> {
    let identity = gate.admit(&headers).await?;
    let document = service.get_profile(identity.subject_id()).await?;
    Ok(Json(document))
}

#[utoipa::path(
    put,
    path = "/api/profile",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Profile updated.", body = ProfileDocument),
        (status = 400, description = "Malformed update payload.", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token.", body = ErrorBody),
        (status = 404, description = "No profile document exists yet.", body = ErrorBody),
        (status = 503, description = "Identity verifier or profile store unavailable.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "profile"
)]
pub async fn put_profile(
    headers: HeaderMap,
    gate: Extension<Arc<TokenGate>>,
    service: Extension<Arc<ProfileService>>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<ProfileDocument>, Error> {
    let identity = gate.admit(&headers).await?;

    // Body problems are only reported to authenticated callers.
    let Json(update) = payload.map_err(|rejection| Error::Validation(rejection.body_text()))?;
    let update = normalize(update);

    let document = service
        .update_profile(identity.subject_id(), &update)
        .await?;
    Ok(Json(document))
}

fn normalize(update: ProfileUpdate) -> ProfileUpdate {
    ProfileUpdate {
        display_name: update
            .display_name
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        preferences: update.preferences,
    }
}
