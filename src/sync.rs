//! Token-verified profile synchronization.
//!
//! Flow Overview:
//! 1) `sync` looks up the subject's document.
//! 2) First sight inserts a new document; a duplicate-key rejection means a
//!    concurrent first sync won, so the existing document is re-read and
//!    touched instead of failing.
//! 3) Later sights move `last_login_at` forward.
//! 4) The result merges the live identity snapshot with the stored document.

use crate::{
    Error,
    identity::IdentitySnapshot,
    store::{self, ProfileDocument, ProfileStore, ProfileUpdate, StoreError},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

/// Live identity data combined with the persisted profile.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergedView {
    pub uid: String,
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

impl MergedView {
    /// Snapshot wins for identity fields, the document for login metadata.
    #[must_use]
    pub fn merge(snapshot: &IdentitySnapshot, document: ProfileDocument) -> Self {
        Self {
            uid: document.subject_id,
            email: snapshot.email.clone().or(document.email),
            display_name: snapshot.display_name.clone().or(document.display_name),
            photo_url: snapshot.photo_url.clone().or(document.photo_url),
            created_at: document.created_at,
            last_login_at: document.last_login_at,
            preferences: document.preferences,
        }
    }
}

/// Reachability of the profile store as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Connected,
    Disconnected,
}

impl StoreStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Owns the profile store handle. A service without a store is a valid,
/// degraded service: every operation answers `StoreUnavailable`.
pub struct ProfileService {
    store: Option<Arc<dyn ProfileStore>>,
    timeout: Duration,
}

impl std::fmt::Debug for ProfileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileService")
            .field("store", &self.store.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProfileService {
    #[must_use]
    pub fn new(store: Arc<dyn ProfileStore>, timeout: Duration) -> Self {
        Self {
            store: Some(store),
            timeout,
        }
    }

    /// Service whose store could not be configured or reached at startup.
    #[must_use]
    pub const fn disabled(timeout: Duration) -> Self {
        Self {
            store: None,
            timeout,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn store(&self) -> Result<&dyn ProfileStore, Error> {
        self.store.as_deref().ok_or(Error::StoreUnavailable)
    }

    /// Run one store call under the per-call timeout.
    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Backend(format!(
                "{operation} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Ensure exactly one document exists for the subject and return the merged view.
    ///
    /// # Errors
    /// `StoreUnavailable` when the store is disabled, unreachable or too slow.
    #[instrument(skip_all, fields(subject = %subject_id))]
    pub async fn sync(
        &self,
        subject_id: &str,
        snapshot: &IdentitySnapshot,
    ) -> Result<MergedView, Error> {
        let store = self.store()?;
        let now = store::now();

        let existing = self
            .call("get", store.get(subject_id))
            .await
            .map_err(unavailable)?;

        let document = if existing.is_some() {
            self.touch(store, subject_id, now).await?
        } else {
            let document = ProfileDocument::from_snapshot(snapshot, now);
            match self.call("insert", store.insert(&document)).await {
                Ok(()) => {
                    info!("created profile document");
                    document
                }
                Err(StoreError::Duplicate(_)) => {
                    debug!("concurrent first sync won the insert, touching existing document");
                    self.touch(store, subject_id, now).await?
                }
                Err(err) => return Err(unavailable(err)),
            }
        };

        Ok(MergedView::merge(snapshot, document))
    }

    async fn touch(
        &self,
        store: &dyn ProfileStore,
        subject_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProfileDocument, Error> {
        self.call("touch_login", store.touch_login(subject_id, now))
            .await
            .map_err(unavailable)?
            .ok_or_else(|| {
                // Documents are never deleted, so a vanished row means the store misbehaved.
                error!(subject = %subject_id, "profile document disappeared during sync");
                Error::StoreUnavailable
            })
    }

    /// Read the stored document without creating it.
    ///
    /// # Errors
    /// `NotFound` when the subject has never synced; `StoreUnavailable` on store failure.
    #[instrument(skip_all, fields(subject = %subject_id))]
    pub async fn get_profile(&self, subject_id: &str) -> Result<ProfileDocument, Error> {
        let store = self.store()?;
        self.call("get", store.get(subject_id))
            .await
            .map_err(unavailable)?
            .ok_or_else(|| {
                debug!("no profile document yet");
                Error::NotFound
            })
    }

    /// Apply the supplied fields of `update`; login metadata is never touched.
    ///
    /// # Errors
    /// `NotFound` when the subject has never synced; `StoreUnavailable` on store failure.
    #[instrument(skip_all, fields(subject = %subject_id))]
    pub async fn update_profile(
        &self,
        subject_id: &str,
        update: &ProfileUpdate,
    ) -> Result<ProfileDocument, Error> {
        let store = self.store()?;
        let updated = if update.is_empty() {
            self.call("get", store.get(subject_id)).await
        } else {
            self.call("update", store.update(subject_id, update)).await
        };

        updated.map_err(unavailable)?.ok_or_else(|| {
            debug!("no profile document to update");
            Error::NotFound
        })
    }

    /// Live reachability check; a disabled store is reported as disconnected.
    pub async fn status(&self) -> StoreStatus {
        let Some(store) = self.store.as_deref() else {
            return StoreStatus::Disconnected;
        };
        match self.call("ping", store.ping()).await {
            Ok(()) => StoreStatus::Connected,
            Err(err) => {
                error!("Failed to ping profile store: {err}");
                StoreStatus::Disconnected
            }
        }
    }
}

fn unavailable(err: StoreError) -> Error {
    error!("Profile store call failed: {err}");
    Error::StoreUnavailable
}
