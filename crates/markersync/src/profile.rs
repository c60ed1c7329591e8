//! Owner profile records.
//!
//! Each owner gets one profile document under `users/{owner}` when they
//! register. Marker collections hang off the same path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::marker::{OwnerId, USERS_COLLECTION};
use crate::store::DocumentStore;

/// Profile of a registered owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerProfile {
    /// The owner's id.
    #[serde(rename = "userId")]
    pub owner_id: OwnerId,
    /// Sign-in email.
    pub email: String,
    /// When the profile was created.
    pub created_at: DateTime<Utc>,
}

/// Reads and writes owner profiles.
#[derive(Debug, Clone)]
pub struct ProfileRepository {
    store: Arc<dyn DocumentStore>,
}

impl ProfileRepository {
    /// Create a profile repository on top of a document store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create or replace the owner's profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteFailure`] if the store rejects the write.
    pub async fn register(&self, owner: &OwnerId, email: &str) -> Result<OwnerProfile> {
        let profile = OwnerProfile {
            owner_id: owner.clone(),
            email: email.to_string(),
            created_at: Utc::now(),
        };

        self.store
            .set(USERS_COLLECTION, owner.as_str(), serde_json::to_value(&profile)?)
            .await
            .map_err(|e| {
                warn!(%owner, error = %e, "Error creating owner profile");
                Error::write_failure(owner.as_str(), e.to_string())
            })?;

        info!(%owner, "Owner profile created");
        Ok(profile)
    }

    /// The owner's profile, if they registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FetchFailure`] if the store cannot be read and
    /// [`Error::MalformedRecord`] if the stored profile cannot be decoded.
    pub async fn get(&self, owner: &OwnerId) -> Result<Option<OwnerProfile>> {
        let data = self
            .store
            .get(USERS_COLLECTION, owner.as_str())
            .await
            .map_err(|e| Error::fetch_failure(owner.as_str(), e.to_string()))?;

        data.map(|value| {
            serde_json::from_value(value).map_err(|e| Error::malformed(owner.as_str(), e.to_string()))
        })
        .transpose()
    }

    /// Whether the owner has a profile. Read failures count as "no".
    pub async fn exists(&self, owner: &OwnerId) -> bool {
        match self.get(owner).await {
            Ok(profile) => profile.is_some(),
            Err(e) => {
                warn!(%owner, error = %e, "Error verifying owner profile");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn repo() -> ProfileRepository {
        ProfileRepository::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let repo = repo();
        let owner = OwnerId::new("u1");
        let created = repo.register(&owner, "u1@example.com").await.unwrap();

        let fetched = repo.get(&owner).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(repo.exists(&owner).await);
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let repo = repo();
        let owner = OwnerId::new("nobody");
        assert!(repo.get(&owner).await.unwrap().is_none());
        assert!(!repo.exists(&owner).await);
    }

    #[test]
    fn test_profile_wire_names() {
        let profile = OwnerProfile {
            owner_id: OwnerId::new("u1"),
            email: "e".into(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["userId"], "u1");
        assert!(value.get("createdAt").is_some());
    }
}
