//! Firebase ID token verification.
//!
//! Firebase ID tokens are RS256 JWTs signed by one of the keys Google publishes
//! for `securetoken@system.gserviceaccount.com`. Keys rotate, so they are kept
//! in an in-memory cache that honours the `Cache-Control: max-age` of the key
//! endpoint. A stale cache or a token naming an unknown `kid` triggers a
//! refresh, at most one per cooldown window. If a refresh fails the last known
//! keyset keeps serving until the next window.

use super::{IdentitySnapshot, IdentityVerifier, VerifiedIdentity};
use crate::Error;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header, errors::ErrorKind, jwk::JwkSet,
};
use reqwest::{Client, header::CACHE_CONTROL};
use serde::Deserialize;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

pub const GOOGLE_SECURETOKEN_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const DEFAULT_KEYSET_TTL_SECONDS: u64 = 3600;
const KEYSET_REFRESH_COOLDOWN_SECONDS: u64 = 30;
const CLOCK_SKEW_SECONDS: u64 = 60;
const MAX_SUBJECT_LEN: usize = 128;

#[derive(Debug)]
enum KeysetSource {
    /// Keyset supplied at construction and never refreshed.
    Static,
    /// Keyset fetched from the Google key endpoint.
    Remote { url: String, client: Client },
}

#[derive(Debug, Clone)]
struct KeysetCache {
    keyset: Arc<JwkSet>,
    fetched_at: Instant,
    ttl: Duration,
}

impl KeysetCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Claims the service reads from a Firebase ID token.
#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    iat: u64,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug)]
pub struct FirebaseVerifier {
    project_id: String,
    issuer: String,
    keyset_source: KeysetSource,
    keyset_cache: RwLock<KeysetCache>,
    /// Unix seconds of the last refresh attempt, throttles stale and unknown-kid refreshes.
    last_refresh_unix: AtomicU64,
}

impl FirebaseVerifier {
    /// Build from a fixed keyset, no remote refresh.
    #[must_use]
    pub fn with_keyset(project_id: impl Into<String>, keyset: JwkSet) -> Self {
        let project_id = project_id.into();
        Self {
            issuer: issuer_for(&project_id),
            project_id,
            keyset_source: KeysetSource::Static,
            keyset_cache: RwLock::new(KeysetCache {
                keyset: Arc::new(keyset),
                fetched_at: Instant::now(),
                ttl: Duration::MAX,
            }),
            last_refresh_unix: AtomicU64::new(0),
        }
    }

    /// Build a verifier that fetches signing keys from `url`.
    ///
    /// The startup fetch is best-effort: when the endpoint is unreachable the
    /// verifier starts with an empty, stale cache and fails closed until a
    /// refresh succeeds.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub async fn new_remote(
        project_id: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let project_id = project_id.into();
        let url = url.into();
        let parsed = Url::parse(&url).context("Invalid signing key URL")?;
        if !matches!(parsed.scheme(), "https" | "http") {
            return Err(anyhow!("Signing key URL must use http(s): {url}"));
        }

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build signing key HTTP client")?;

        let (keyset, fetched_at, ttl) = match fetch_keyset(&client, &url).await {
            Ok((keyset, ttl)) => (keyset, Instant::now(), ttl),
            Err(err) => {
                warn!(
                    url = %url,
                    error = %err,
                    "signing key fetch failed during startup; continuing with empty keyset"
                );
                (JwkSet { keys: Vec::new() }, Instant::now(), Duration::ZERO)
            }
        };

        Ok(Self {
            issuer: issuer_for(&project_id),
            project_id,
            keyset_source: KeysetSource::Remote { url, client },
            keyset_cache: RwLock::new(KeysetCache {
                keyset: Arc::new(keyset),
                fetched_at,
                ttl,
            }),
            last_refresh_unix: AtomicU64::new(now_unix_seconds()),
        })
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Return a keyset snapshot; refresh if stale, keep cache if refresh fails.
    async fn keyset_snapshot(&self) -> Result<Arc<JwkSet>, Error> {
        let (cached, fresh) = {
            let cache = self.keyset_cache.read().await;
            (cache.keyset.clone(), cache.is_fresh())
        };

        if fresh {
            return Ok(cached);
        }

        if let KeysetSource::Remote { url, .. } = &self.keyset_source {
            if !cached.keys.is_empty() && !self.claim_refresh() {
                debug!("signing key cache stale, refresh suppressed by cooldown");
                return Ok(cached);
            }
            if let Err(err) = self.refresh_keyset().await {
                warn!(error = %err, url = %url, "failed to refresh signing key cache");
                if cached.keys.is_empty() {
                    return Err(Error::VerifierUnavailable);
                }
                return Ok(cached);
            }
        }

        let cache = self.keyset_cache.read().await;
        Ok(cache.keyset.clone())
    }

    async fn refresh_keyset(&self) -> Result<()> {
        let KeysetSource::Remote { url, client } = &self.keyset_source else {
            return Ok(());
        };

        self.last_refresh_unix
            .store(now_unix_seconds(), Ordering::Relaxed);

        let (keyset, ttl) = fetch_keyset(client, url).await?;
        let mut cache = self.keyset_cache.write().await;
        cache.keyset = Arc::new(keyset);
        cache.fetched_at = Instant::now();
        cache.ttl = ttl;
        info!(
            keyset_keys = cache.keyset.keys.len(),
            "signing key cache refreshed"
        );
        Ok(())
    }

    /// Take the refresh slot unless an attempt, failed or not, happened within
    /// the cooldown. Only one concurrent caller wins.
    fn claim_refresh(&self) -> bool {
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        let now = now_unix_seconds();
        now.saturating_sub(last) >= KEYSET_REFRESH_COOLDOWN_SECONDS
            && self
                .last_refresh_unix
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    /// Refresh if a token `kid` is unknown, with cooldown to avoid hammering Google.
    async fn refresh_on_unknown_kid(&self) -> Result<bool> {
        if matches!(&self.keyset_source, KeysetSource::Static) {
            return Ok(false);
        }
        if !self.claim_refresh() {
            return Ok(false);
        }
        self.refresh_keyset().await?;
        Ok(true)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, Error> {
        let keyset = self.keyset_snapshot().await?;
        if let Some(jwk) = keyset.find(kid) {
            return DecodingKey::from_jwk(jwk).map_err(|err| {
                warn!(kid = %kid, error = %err, "unusable signing key");
                Error::InvalidToken
            });
        }

        match self.refresh_on_unknown_kid().await {
            Ok(true) => {
                let keyset = self.keyset_snapshot().await?;
                let jwk = keyset.find(kid).ok_or_else(|| {
                    debug!(kid = %kid, "token kid not found after refresh");
                    Error::InvalidToken
                })?;
                DecodingKey::from_jwk(jwk).map_err(|_| Error::InvalidToken)
            }
            Ok(false) => {
                debug!(kid = %kid, "token kid not found and refresh suppressed");
                Err(Error::InvalidToken)
            }
            Err(err) => {
                warn!(error = %err, "signing key refresh failed");
                Err(Error::VerifierUnavailable)
            }
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = CLOCK_SKEW_SECONDS;
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "aud", "iss"]);
        validation
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, Error> {
        let header = decode_header(token).map_err(|_| Error::InvalidToken)?;
        if header.alg != Algorithm::RS256 {
            debug!(alg = ?header.alg, "rejecting token with unexpected algorithm");
            return Err(Error::InvalidToken);
        }
        let kid = header.kid.ok_or(Error::InvalidToken)?;

        let key = self.decoding_key(&kid).await?;

        let data = decode::<serde_json::Value>(token, &key, &self.validation()).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => debug!("token expired"),
                kind => debug!(?kind, "token rejected"),
            }
            Error::InvalidToken
        })?;

        let claims: FirebaseClaims =
            serde_json::from_value(data.claims.clone()).map_err(|_| Error::InvalidToken)?;

        if claims.sub.is_empty() || claims.sub.len() > MAX_SUBJECT_LEN {
            return Err(Error::InvalidToken);
        }
        if claims.iat > now_unix_seconds().saturating_add(CLOCK_SKEW_SECONDS) {
            return Err(Error::InvalidToken);
        }

        Ok(VerifiedIdentity {
            snapshot: IdentitySnapshot {
                subject_id: claims.sub,
                email: claims.email,
                display_name: claims.name,
                photo_url: claims.picture,
            },
            claims: data.claims,
        })
    }
}

fn issuer_for(project_id: &str) -> String {
    format!("https://securetoken.google.com/{project_id}")
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Parse `max-age` out of a `Cache-Control` header value.
fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Fetch the JWKS and the TTL announced by the endpoint.
async fn fetch_keyset(client: &Client, url: &str) -> Result<(JwkSet, Duration)> {
    let span = info_span!("identity.keyset.fetch", http.method = "GET", url = %url);
    async {
        let response = client.get(url).send().await?;
        let status = response.status();
        let ttl = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(max_age)
            .unwrap_or(Duration::from_secs(DEFAULT_KEYSET_TTL_SECONDS));

        if !status.is_success() {
            return Err(anyhow!("signing key fetch failed: {status}"));
        }

        let keyset = response
            .json::<JwkSet>()
            .await
            .context("Invalid signing key JSON")?;
        Ok((keyset, ttl))
    }
    .instrument(span)
    .await
}
