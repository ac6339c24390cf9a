use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::{authorize, require_text, UserId};
use crate::auth::Principal;
use crate::clock::Clock;
use crate::error::HealthError;
use crate::storage::{KvStore, StoreError};

pub const MAX_AGE: u32 = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub diseases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allergies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub diseases: Vec<String>,
}

impl NewProfile {
    pub fn validate(&self) -> Result<(), HealthError> {
        if !self.email.contains('@') {
            return Err(HealthError::validation("email must contain '@'"));
        }
        require_text("name", &self.name)?;
        match self.age {
            Some(age) if age > MAX_AGE => Err(HealthError::validation(format!("age must be 0-{}", MAX_AGE))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthInfoUpdate {
    pub diseases: Vec<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn profile_key(owner: &UserId) -> String {
    format!("user:{}", owner)
}

/// Profiles live under `user:<id>` and are not indexed.
#[derive(Clone)]
pub struct ProfileRepository {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl ProfileRepository {
    pub(crate) fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        ProfileRepository { store, clock }
    }

    /// Store the profile of a freshly registered user. There is no principal
    /// yet at registration time, so this is the one unauthenticated write.
    pub async fn create(&self, owner: &UserId, input: NewProfile) -> Result<UserProfile, HealthError> {
        input.validate()?;
        let key = profile_key(owner);
        if self.store.get(&key).await?.is_some() {
            return Err(HealthError::validation(format!("profile {} already exists", owner)));
        }

        let profile = UserProfile {
            id: owner.clone(),
            email: input.email,
            name: input.name,
            age: input.age,
            diseases: input.diseases,
            allergies: None,
            notes: None,
            created_at: self.clock.now(),
            updated_at: None,
        };
        self.write(&profile).await?;
        info!(owner = %owner, "created profile");
        Ok(profile)
    }

    pub async fn get(&self, principal: &Principal, owner: &UserId) -> Result<UserProfile, HealthError> {
        authorize(principal, owner)?;
        self.read(owner).await
    }

    /// Replace diseases, allergies and notes and stamp `updatedAt`.
    pub async fn update_health_info(
        &self,
        principal: &Principal,
        owner: &UserId,
        update: HealthInfoUpdate,
    ) -> Result<UserProfile, HealthError> {
        authorize(principal, owner)?;
        let mut profile = self.read(owner).await?;
        profile.diseases = update.diseases;
        profile.allergies = update.allergies;
        profile.notes = update.notes;
        profile.updated_at = Some(self.clock.now());
        self.write(&profile).await?;
        info!(owner = %owner, "updated health info");
        Ok(profile)
    }

    async fn read(&self, owner: &UserId) -> Result<UserProfile, HealthError> {
        let key = profile_key(owner);
        let value: Value = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| HealthError::not_found(format!("profile {}", owner)))?;
        serde_json::from_value(value).map_err(|e| HealthError::Corrupted(format!("{}: {}", key, e)))
    }

    async fn write(&self, profile: &UserProfile) -> Result<(), HealthError> {
        let value = serde_json::to_value(profile).map_err(StoreError::from)?;
        self.store.set(&profile_key(&profile.id), value).await?;
        Ok(())
    }
}
