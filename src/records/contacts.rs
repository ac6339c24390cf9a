use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{authorize, require_text, UserId};
use crate::auth::Principal;
use crate::clock::Clock;
use crate::error::HealthError;
use crate::storage::{IndexKind, IndexManager};

/// Embedded in the owner's `emergency_contacts:<owner>` list; has no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relationship: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewEmergencyContact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relationship: String,
}

#[derive(Clone)]
pub struct EmergencyContactRepository {
    index: IndexManager,
    clock: Arc<dyn Clock>,
}

impl EmergencyContactRepository {
    pub(crate) fn new(index: IndexManager, clock: Arc<dyn Clock>) -> Self {
        EmergencyContactRepository { index, clock }
    }

    /// Append a contact and return the whole list.
    pub async fn add(
        &self,
        principal: &Principal,
        owner: &UserId,
        input: NewEmergencyContact,
    ) -> Result<Vec<EmergencyContact>, HealthError> {
        authorize(principal, owner)?;
        require_text("name", &input.name)?;
        require_text("phone", &input.phone)?;

        let contact = EmergencyContact {
            name: input.name,
            phone: input.phone,
            relationship: input.relationship,
            added_at: self.clock.now(),
        };
        let contacts = self
            .index
            .push_entry(owner, IndexKind::EmergencyContacts, contact)
            .await?;
        info!(owner = %owner, contacts = contacts.len(), "added emergency contact");
        Ok(contacts)
    }

    pub async fn list(&self, principal: &Principal, owner: &UserId) -> Result<Vec<EmergencyContact>, HealthError> {
        authorize(principal, owner)?;
        Ok(self.index.entries(owner, IndexKind::EmergencyContacts).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Repositories;
    use crate::storage::MemoryStore;
    use crate::testing::{fixed_clock, principal};
    use pretty_assertions::assert_eq;

    fn contact(name: &str, phone: &str) -> NewEmergencyContact {
        NewEmergencyContact {
            name: name.to_string(),
            phone: phone.to_string(),
            relationship: String::new(),
        }
    }

    #[tokio::test]
    async fn add_returns_the_list_in_insertion_order() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()), fixed_clock());
        let (who, owner) = principal("u1");
        repos.contacts.add(&who, &owner, contact("김영희", "010-1234-5678")).await.unwrap();
        let all = repos.contacts.add(&who, &owner, contact("박철수", "010-9876-5432")).await.unwrap();

        let names: Vec<&str> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["김영희", "박철수"]);
        assert_eq!(repos.contacts.list(&who, &owner).await.unwrap(), all);
    }

    #[tokio::test]
    async fn requires_name_and_phone() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()), fixed_clock());
        let (who, owner) = principal("u1");
        assert!(matches!(
            repos.contacts.add(&who, &owner, contact("김영희", "")).await,
            Err(HealthError::Validation(_))
        ));
        assert!(repos.contacts.list(&who, &owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_are_private() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()), fixed_clock());
        let (_, owner) = principal("u1");
        let (intruder, _) = principal("u2");
        assert_eq!(repos.contacts.list(&intruder, &owner).await.unwrap_err(), HealthError::Unauthorized);
    }
}
