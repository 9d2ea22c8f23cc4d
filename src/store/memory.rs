use super::{ProfileDocument, ProfileStore, ProfileUpdate, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, hash_map::Entry};
use tokio::sync::RwLock;

/// Process-local store used for `memory://` development runs and tests.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    documents: RwLock<HashMap<String, ProfileDocument>>,
}

impl MemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, subject_id: &str) -> Result<Option<ProfileDocument>, StoreError> {
        Ok(self.documents.read().await.get(subject_id).cloned())
    }

    async fn insert(&self, document: &ProfileDocument) -> Result<(), StoreError> {
        match self.documents.write().await.entry(document.subject_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(document.subject_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(document.clone());
                Ok(())
            }
        }
    }

    async fn touch_login(
        &self,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ProfileDocument>, StoreError> {
        let mut documents = self.documents.write().await;
        Ok(documents.get_mut(subject_id).map(|document| {
            document.last_login_at = document.last_login_at.max(at);
            document.clone()
        }))
    }

    async fn update(
        &self,
        subject_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<ProfileDocument>, StoreError> {
        let mut documents = self.documents.write().await;
        Ok(documents.get_mut(subject_id).map(|document| {
            if let Some(display_name) = &update.display_name {
                document.display_name = Some(display_name.clone());
            }
            if let Some(preferences) = &update.preferences {
                document.preferences = Some(preferences.clone());
            }
            document.clone()
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentitySnapshot;
    use chrono::Duration;

    fn document(subject: &str) -> ProfileDocument {
        ProfileDocument::from_snapshot(&IdentitySnapshot::new(subject), Utc::now())
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_key() {
        let store = MemoryProfileStore::new();
        assert!(store.insert(&document("uid-1")).await.is_ok());
        assert!(matches!(
            store.insert(&document("uid-1")).await,
            Err(StoreError::Duplicate(key)) if key == "uid-1"
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn touch_login_never_moves_backwards() -> anyhow::Result<()> {
        let store = MemoryProfileStore::new();
        let doc = document("uid-1");
        store.insert(&doc).await?;

        let earlier = doc.last_login_at - Duration::seconds(30);
        let touched = store.touch_login("uid-1", earlier).await?;
        assert_eq!(
            touched.map(|d| d.last_login_at),
            Some(doc.last_login_at)
        );
        Ok(())
    }

    #[tokio::test]
    async fn touch_and_update_missing_return_none() -> anyhow::Result<()> {
        let store = MemoryProfileStore::new();
        assert!(store.touch_login("ghost", Utc::now()).await?.is_none());
        assert!(
            store
                .update("ghost", &ProfileUpdate::default())
                .await?
                .is_none()
        );
        assert!(store.is_empty().await);
        Ok(())
    }
}
