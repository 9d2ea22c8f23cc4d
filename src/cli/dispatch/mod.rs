//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an [`Action`] carrying the server
//! configuration. Connection strings are checked here so a typo fails at
//! startup instead of silently starting with the store disabled.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{
    ARG_ALLOWED_ORIGINS, ARG_CONNECT_TIMEOUT, ARG_DSN, ARG_FIREBASE_PROJECT_ID, ARG_PORT,
    ARG_REQUEST_TIMEOUT,
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if the DSN is malformed or uses an unsupported scheme.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(3000);

    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .map(|dsn| dsn.trim())
        .filter(|dsn| !dsn.is_empty())
        .map(|dsn| validate_dsn(dsn).map(|()| SecretString::from(dsn.to_string())))
        .transpose()?;

    let firebase_project_id = matches
        .get_one::<String>(ARG_FIREBASE_PROJECT_ID)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    let allowed_origins = matches
        .get_one::<String>(ARG_ALLOWED_ORIGINS)
        .map(|origins| split_origins(origins))
        .unwrap_or_default();

    let connect_timeout = matches
        .get_one::<u64>(ARG_CONNECT_TIMEOUT)
        .copied()
        .unwrap_or(10);
    let request_timeout = matches
        .get_one::<u64>(ARG_REQUEST_TIMEOUT)
        .copied()
        .unwrap_or(10);

    Ok(Action::Server(Args {
        port,
        dsn,
        firebase_project_id,
        allowed_origins,
        connect_timeout: Duration::from_secs(connect_timeout),
        request_timeout: Duration::from_secs(request_timeout),
    }))
}

fn validate_dsn(dsn: &str) -> Result<()> {
    let parsed = Url::parse(dsn).context("Invalid PROFILESYNC_DSN")?;
    match parsed.scheme() {
        "postgres" | "postgresql" | "memory" => Ok(()),
        scheme => Err(anyhow!(
            "Unsupported PROFILESYNC_DSN scheme '{scheme}', expected postgres:// or memory://"
        )),
    }
}

fn split_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(ToString::to_string)
        .collect()
}
