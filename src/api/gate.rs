//! Bearer token admission.
//!
//! Every protected handler calls [`TokenGate::admit`] before touching the
//! profile store. The gate is stateless and never retries: a failure is final
//! for the request and the client has to sign in again.

use crate::{
    Error,
    identity::{IdentityVerifier, VerifiedIdentity},
};
use axum::http::{HeaderMap, header::AUTHORIZATION};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

pub struct TokenGate {
    verifier: Option<Arc<dyn IdentityVerifier>>,
    timeout: Duration,
}

impl std::fmt::Debug for TokenGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGate")
            .field("verifier", &self.verifier.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TokenGate {
    #[must_use]
    pub fn new(verifier: Arc<dyn IdentityVerifier>, timeout: Duration) -> Self {
        Self {
            verifier: Some(verifier),
            timeout,
        }
    }

    /// Gate without a configured identity provider.
    #[must_use]
    pub const fn disabled(timeout: Duration) -> Self {
        Self {
            verifier: None,
            timeout,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    /// Extract and verify the bearer token carried by `headers`.
    ///
    /// # Errors
    /// `MissingToken` without a usable `Authorization: Bearer` header,
    /// `VerifierUnavailable` when no verifier is configured or it does not
    /// answer in time, `InvalidToken` when verification fails.
    pub async fn admit(&self, headers: &HeaderMap) -> Result<VerifiedIdentity, Error> {
        let token = bearer_token(headers)?;

        let Some(verifier) = self.verifier.as_deref() else {
            debug!("identity verifier disabled, rejecting request");
            return Err(Error::VerifierUnavailable);
        };

        if let Ok(result) = tokio::time::timeout(self.timeout, verifier.verify(token)).await {
            result
        } else {
            warn!("identity verification timed out after {:?}", self.timeout);
            Err(Error::VerifierUnavailable)
        }
    }
}

/// Return the token of an `Authorization: Bearer <token>` header.
///
/// # Errors
/// `MissingToken` when the header is absent, not UTF-8, uses another scheme or
/// carries an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, Error> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(Error::MissingToken)?;

    let (scheme, token) = value.trim().split_once(' ').ok_or(Error::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(Error::MissingToken);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(Error::MissingToken);
    }
    Ok(token)
}
