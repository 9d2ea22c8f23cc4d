//! # Profilesync
//!
//! `profilesync` is the backend half of a Firebase sign-in demo. The browser
//! signs in with Firebase Authentication and sends the resulting ID token as a
//! bearer token; this service verifies it and mirrors a small profile document
//! per subject into a store.
//!
//! ## Flow
//!
//! 1. The gate extracts the bearer token and verifies it against Google's
//!    published signing keys ([`identity`]).
//! 2. The sync service creates the profile document on first sight and touches
//!    `last_login_at` on every later sight ([`sync`]).
//! 3. The response merges the live identity snapshot with the stored document.
//!
//! ## Degraded Mode
//!
//! The verifier and the store are optional collaborators. When either one is
//! not configured (or the store is unreachable at startup), the service still
//! listens: `/health` reports the missing capability and protected routes
//! answer `503` instead of failing at startup.

pub mod api;
pub mod cli;
pub mod error;
pub mod identity;
pub mod store;
pub mod sync;

pub use error::Error;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
