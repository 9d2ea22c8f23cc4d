//! Route handlers for the profile sync API.

pub mod health;
pub mod me;
pub mod profile;
pub mod root;

use crate::error::ErrorBody;
use axum::{
    http::{StatusCode, header::ALLOW},
    response::{IntoResponse, Response},
};
use std::any::Any;
use tracing::error;

/// Fallback for unmatched routes.
pub async fn not_found() -> impl IntoResponse {
    ErrorBody::new("Not found").into_response_with(StatusCode::NOT_FOUND)
}

/// Give the router's bare 405 the JSON error envelope, keeping `Allow`.
pub async fn method_not_allowed(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }

    let allow = response.headers().get(ALLOW).cloned();
    let mut json = ErrorBody::new("Method not allowed")
        .into_response_with(StatusCode::METHOD_NOT_ALLOWED);
    if let Some(allow) = allow {
        json.headers_mut().insert(ALLOW, allow);
    }
    json
}

/// Turn a handler panic into the JSON error envelope.
#[allow(clippy::needless_pass_by_value)]
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {detail}");

    ErrorBody::new("Internal server error").into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
}
