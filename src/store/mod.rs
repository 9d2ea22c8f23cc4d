//! Profile document storage.
//!
//! The store is keyed by subject and enforces at most one document per key.
//! Every mutation is a single-document operation; callers never hold locks
//! across calls.

mod memory;
mod postgres;

pub use memory::MemoryProfileStore;
pub use postgres::PgProfileStore;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

use crate::identity::IdentitySnapshot;

/// Current time at the precision every store keeps (microseconds).
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Persisted mirror of a subject's profile plus login metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDocument {
    #[serde(rename = "uid")]
    pub subject_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub preferences: Option<Map<String, Value>>,
}

impl ProfileDocument {
    /// New document for a first sight of `snapshot` at `now`.
    #[must_use]
    pub fn from_snapshot(snapshot: &IdentitySnapshot, now: DateTime<Utc>) -> Self {
        Self {
            subject_id: snapshot.subject_id.clone(),
            email: snapshot.email.clone(),
            display_name: snapshot.display_name.clone(),
            photo_url: snapshot.photo_url.clone(),
            created_at: now,
            last_login_at: now,
            preferences: None,
        }
    }
}

/// Fields an explicit profile update may set. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub preferences: Option<Map<String, Value>>,
}

impl ProfileUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.preferences.is_none()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A document with this key already exists.
    #[error("duplicate profile key: {0}")]
    Duplicate(String),

    #[error("profile store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the document for `subject_id`, if any.
    async fn get(&self, subject_id: &str) -> Result<Option<ProfileDocument>, StoreError>;

    /// Insert a new document.
    ///
    /// # Errors
    /// `StoreError::Duplicate` when a document with the same key already exists.
    async fn insert(&self, document: &ProfileDocument) -> Result<(), StoreError>;

    /// Move `last_login_at` forward to `at` (never backwards) and return the
    /// updated document, or `None` if it does not exist.
    async fn touch_login(
        &self,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ProfileDocument>, StoreError>;

    /// Apply the supplied fields of `update` and return the updated document,
    /// or `None` if it does not exist.
    async fn update(
        &self,
        subject_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<ProfileDocument>, StoreError>;

    /// Cheap reachability check for `/health`.
    async fn ping(&self) -> Result<(), StoreError>;
}
