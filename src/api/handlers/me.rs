//! `GET /api/me`: verify the caller and synchronize their profile document.

use crate::{
    Error,
    api::gate::TokenGate,
    error::ErrorBody,
    sync::{MergedView, ProfileService},
};
use axum::{extract::Extension, http::HeaderMap, response::Json};
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Merged identity and profile view; creates the profile on first call.", body = MergedView),
        (status = 401, description = "Missing or invalid bearer token.", body = ErrorBody),
        (status = 503, description = "Identity verifier or profile store unavailable.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "profile"
)]
pub async fn get_me(
    headers: HeaderMap,
    gate: Extension<Arc<TokenGate>>,
    service: Extension<Arc<ProfileService>>,
) -> Result<Json<MergedView>, Error> {
    let identity = gate.admit(&headers).await?;
    let view = service
        .sync(identity.subject_id(), &identity.snapshot)
        .await?;
    Ok(Json(view))
}
