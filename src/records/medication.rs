use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{authorize, require_text, IdGenerator, OwnedRecord, RecordSet, UserId};
use crate::auth::Principal;
use crate::clock::Clock;
use crate::error::HealthError;
use crate::schedule::TimeOfDay;
use crate::storage::IndexKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub id: String,
    pub user_id: UserId,
    pub name: String,
    pub dosage: String,
    pub times: Vec<TimeOfDay>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Medication {
    /// Inclusive on both ends.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

impl OwnedRecord for Medication {
    const KIND: IndexKind = IndexKind::Medications;
    const ID_PREFIX: &'static str = "medication";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewMedication {
    pub name: String,
    pub dosage: String,
    pub times: Vec<TimeOfDay>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl NewMedication {
    fn validate(&self) -> Result<(), HealthError> {
        require_text("name", &self.name)?;
        require_text("dosage", &self.dosage)?;
        if self.times.is_empty() {
            return Err(HealthError::validation("times must contain at least one dose time"));
        }
        if self.start_date > self.end_date {
            return Err(HealthError::validation(format!(
                "startDate {} is after endDate {}",
                self.start_date, self.end_date
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MedicationRepository {
    records: RecordSet<Medication>,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl MedicationRepository {
    pub(crate) fn new(records: RecordSet<Medication>, ids: Arc<IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        MedicationRepository { records, ids, clock }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        owner: &UserId,
        input: NewMedication,
    ) -> Result<Medication, HealthError> {
        authorize(principal, owner)?;
        input.validate()?;

        let now = self.clock.now();
        let medication = Medication {
            id: self.records.next_id(&self.ids, owner, now),
            user_id: owner.clone(),
            name: input.name,
            dosage: input.dosage,
            times: input.times,
            start_date: input.start_date,
            end_date: input.end_date,
            instructions: input.instructions.filter(|text| !text.trim().is_empty()),
            created_at: now,
        };

        self.records.insert(&medication).await?;
        info!(id = %medication.id, owner = %owner, doses = medication.times.len(), "created medication");
        Ok(medication)
    }

    pub async fn list_for_owner(&self, principal: &Principal, owner: &UserId) -> Result<Vec<Medication>, HealthError> {
        authorize(principal, owner)?;
        self.records.load_all(owner).await
    }

    pub async fn get(&self, principal: &Principal, owner: &UserId, id: &str) -> Result<Medication, HealthError> {
        authorize(principal, owner)?;
        self.records.fetch(owner, id).await
    }

    /// Medications whose date range covers `date`, in creation order.
    pub async fn active_on(
        &self,
        principal: &Principal,
        owner: &UserId,
        date: NaiveDate,
    ) -> Result<Vec<Medication>, HealthError> {
        let all = self.list_for_owner(principal, owner).await?;
        Ok(all.into_iter().filter(|m| m.is_active_on(date)).collect())
    }
}
