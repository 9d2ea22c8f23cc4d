//! Identity verification.
//!
//! The verifier turns a bearer token into a subject and an [`IdentitySnapshot`].
//! It is a trait object so the HTTP boundary can run against Firebase in
//! production and against a fake in tests.

mod firebase;

pub use firebase::{FirebaseVerifier, GOOGLE_SECURETOKEN_JWKS_URL};

use crate::Error;
use async_trait::async_trait;
use serde::Serialize;

/// Identity-provider view of a user at request time. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySnapshot {
    pub subject_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl IdentitySnapshot {
    #[must_use]
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: None,
            display_name: None,
            photo_url: None,
        }
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub snapshot: IdentitySnapshot,
    /// Full claim set of the verified token.
    pub claims: serde_json::Value,
}

impl VerifiedIdentity {
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.snapshot.subject_id
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a raw bearer token.
    ///
    /// # Errors
    /// `InvalidToken` when the token is malformed, badly signed or carries
    /// unexpected claims; `VerifierUnavailable` when signing keys cannot be
    /// obtained.
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, Error>;
}
