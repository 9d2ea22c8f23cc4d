use super::handlers::{health, me, profile};
use crate::{
    error::ErrorBody,
    store::{ProfileDocument, ProfileUpdate},
    sync::MergedView,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        me::get_me,
        profile::get_profile,
        profile::put_profile,
    ),
    components(schemas(health::Health, MergedView, ProfileDocument, ProfileUpdate, ErrorBody)),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Liveness and dependency flags"),
        (name = "profile", description = "Token-verified profile synchronization"),
    )
)]
pub struct ApiDoc;

/// Registers the Firebase ID token as a bearer security scheme.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
