use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::ALLOW, header::AUTHORIZATION, header::CONTENT_TYPE},
    response::Response,
};
use chrono::{DateTime, FixedOffset};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode, jwk::JwkSet};
use profilesync::{
    api::{self, gate::TokenGate},
    identity::FirebaseVerifier,
    store::MemoryProfileStore,
    sync::ProfileService,
};
use serde_json::{Value, json};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tower::ServiceExt;

const PROJECT: &str = "profilesync-test";
const KID: &str = "test-key-1";
const PRIVATE_KEY_PEM: &str = include_str!("fixtures/firebase_test_key.pem");
const JWKS_JSON: &str = include_str!("fixtures/firebase_test_jwks.json");
const TIMEOUT: Duration = Duration::from_secs(2);

fn gate() -> Result<Arc<TokenGate>> {
    let keyset: JwkSet = serde_json::from_str(JWKS_JSON)?;
    let verifier = FirebaseVerifier::with_keyset(PROJECT, keyset);
    Ok(Arc::new(TokenGate::new(Arc::new(verifier), TIMEOUT)))
}

fn service() -> Arc<ProfileService> {
    Arc::new(ProfileService::new(
        Arc::new(MemoryProfileStore::new()),
        TIMEOUT,
    ))
}

fn app() -> Result<Router> {
    Ok(api::router(gate()?, service()))
}

fn token(sub: &str, name: &str) -> Result<String> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let claims = json!({
        "iss": format!("https://securetoken.google.com/{PROJECT}"),
        "aud": PROJECT,
        "sub": sub,
        "iat": now - 5,
        "exp": now + 3600,
        "email": format!("{sub}@example.com"),
        "name": name,
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let key = EncodingKey::from_rsa_pem(PRIVATE_KEY_PEM.as_bytes())?;
    Ok(encode(&header, &claims, &key)?)
}

fn get(uri: &str, bearer: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {bearer}"));
    }
    Ok(builder.body(Body::empty())?)
}

fn put(uri: &str, bearer: &str, body: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("PUT")
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {bearer}"))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?)
}

fn timestamp(value: &Value) -> Result<DateTime<FixedOffset>> {
    let raw = value
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("timestamp is not a string: {value}"))?;
    Ok(DateTime::parse_from_rfc3339(raw)?)
}

async fn json_body(response: Response) -> Result<Value> {
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[tokio::test]
async fn root_reports_name_and_version() -> Result<()> {
    let response = app()?.oneshot(get("/", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let text = String::from_utf8(body.to_vec())?;
    assert!(text.starts_with(env!("CARGO_PKG_NAME")));
    assert!(text.contains(env!("CARGO_PKG_VERSION")));
    Ok(())
}

#[tokio::test]
async fn health_reports_enabled_collaborators() -> Result<()> {
    let response = app()?.oneshot(get("/health", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));

    let payload = json_body(response).await?;
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(payload["firebase"], "enabled");
    assert_eq!(payload["database"], "connected");
    Ok(())
}

#[tokio::test]
async fn health_is_ok_when_degraded() -> Result<()> {
    let app = api::router(
        Arc::new(TokenGate::disabled(TIMEOUT)),
        Arc::new(ProfileService::disabled(TIMEOUT)),
    );
    let response = app.oneshot(get("/health", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let payload = json_body(response).await?;
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["firebase"], "disabled");
    assert_eq!(payload["database"], "disconnected");
    Ok(())
}

#[tokio::test]
async fn missing_token_is_unauthorized() -> Result<()> {
    let app = app()?;
    for uri in ["/api/me", "/api/profile"] {
        let response = app.clone().oneshot(get(uri, None)?).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        let payload = json_body(response).await?;
        assert!(payload["error"].is_string(), "{uri}");
    }
    Ok(())
}

#[tokio::test]
async fn forged_token_is_unauthorized() -> Result<()> {
    let response = app()?
        .oneshot(get("/api/me", Some("not.a.jwt"))?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = json_body(response).await?;
    assert_eq!(payload["error"], "Invalid token");
    Ok(())
}

#[tokio::test]
async fn me_creates_profile_then_touches_it() -> Result<()> {
    let app = app()?;
    let bearer = token("uid-1", "Ada")?;

    let response = app.clone().oneshot(get("/api/profile", Some(&bearer))?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(get("/api/me", Some(&bearer))?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let first = json_body(response).await?;
    assert_eq!(first["uid"], "uid-1");
    assert_eq!(first["email"], "uid-1@example.com");
    assert_eq!(first["displayName"], "Ada");
    assert_eq!(first["createdAt"], first["lastLoginAt"]);

    let response = app.clone().oneshot(get("/api/me", Some(&bearer))?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let second = json_body(response).await?;
    assert_eq!(second["createdAt"], first["createdAt"]);
    assert!(timestamp(&second["lastLoginAt"])? >= timestamp(&first["lastLoginAt"])?);

    let response = app.oneshot(get("/api/profile", Some(&bearer))?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let stored = json_body(response).await?;
    assert_eq!(stored["uid"], "uid-1");
    assert_eq!(stored["createdAt"], first["createdAt"]);
    Ok(())
}

#[tokio::test]
async fn merged_view_prefers_live_identity() -> Result<()> {
    let app = app()?;

    let response = app
        .clone()
        .oneshot(get("/api/me", Some(&token("uid-2", "Ada")?))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get("/api/me", Some(&token("uid-2", "Ada Lovelace")?))?)
        .await?;
    let view = json_body(response).await?;
    assert_eq!(view["displayName"], "Ada Lovelace");
    Ok(())
}

#[tokio::test]
async fn put_profile_updates_supplied_fields() -> Result<()> {
    let app = app()?;
    let bearer = token("uid-3", "Ada")?;

    let response = app
        .clone()
        .oneshot(put("/api/profile", &bearer, r#"{"displayName":"Countess"}"#)?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.clone().oneshot(get("/api/me", Some(&bearer))?).await?;

    let response = app
        .clone()
        .oneshot(put(
            "/api/profile",
            &bearer,
            r#"{"preferences":{"theme":"dark"}}"#,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await?;
    assert_eq!(updated["preferences"], json!({"theme": "dark"}));
    assert_eq!(updated["displayName"], "Ada");

    let response = app
        .oneshot(put("/api/profile", &bearer, r#"{"displayName":"  Countess "}"#)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await?;
    assert_eq!(updated["displayName"], "Countess");
    assert_eq!(updated["preferences"], json!({"theme": "dark"}));
    Ok(())
}

#[tokio::test]
async fn put_profile_rejects_malformed_body() -> Result<()> {
    let app = app()?;
    let bearer = token("uid-4", "Ada")?;
    app.clone().oneshot(get("/api/me", Some(&bearer))?).await?;

    for body in ["{not json", r#"{"displayName":42}"#, r#"{"role":"admin"}"#] {
        let response = app
            .clone()
            .oneshot(put("/api/profile", &bearer, body)?)
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let payload = json_body(response).await?;
        assert!(payload["error"].is_string(), "{body}");
    }
    Ok(())
}

#[tokio::test]
async fn malformed_body_without_token_is_unauthorized() -> Result<()> {
    let request = Request::builder()
        .method("PUT")
        .uri("/api/profile")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))?;
    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn disabled_collaborators_answer_service_unavailable() -> Result<()> {
    let bearer = token("uid-5", "Ada")?;

    let without_verifier = api::router(Arc::new(TokenGate::disabled(TIMEOUT)), service());
    let response = without_verifier
        .oneshot(get("/api/me", Some(&bearer))?)
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let without_store = api::router(gate()?, Arc::new(ProfileService::disabled(TIMEOUT)));
    let response = without_store
        .clone()
        .oneshot(get("/api/me", Some(&bearer))?)
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let payload = json_body(response).await?;
    assert_eq!(payload["error"], "Profile store unavailable");

    let response = without_store
        .oneshot(get("/api/me", Some("not.a.jwt"))?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_json_not_found() -> Result<()> {
    let response = app()?.oneshot(get("/api/nope", None)?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = json_body(response).await?;
    assert_eq!(payload["error"], "Not found");
    Ok(())
}

#[tokio::test]
async fn wrong_method_is_json_method_not_allowed() -> Result<()> {
    let request = Request::builder()
        .method("POST")
        .uri("/api/profile")
        .body(Body::empty())?;
    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let allow = response
        .headers()
        .get(ALLOW)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(allow.contains("PUT"), "{allow}");

    let payload = json_body(response).await?;
    assert_eq!(payload["error"], "Method not allowed");
    Ok(())
}

#[tokio::test]
async fn request_id_is_generated_or_propagated() -> Result<()> {
    let app = app()?;

    let response = app.clone().oneshot(get("/health", None)?).await?;
    let generated = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    assert!(generated.is_some_and(|id| id.len() == 26));

    let request = Request::builder()
        .uri("/api/me")
        .header("x-request-id", "req-123")
        .body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("req-123")
    );
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let response = app()?
        .oneshot(get("/api-docs/openapi.json", None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await?;
    assert!(payload["paths"]["/api/me"].is_object());
    assert!(payload["paths"]["/api/profile"]["put"].is_object());
    Ok(())
}
