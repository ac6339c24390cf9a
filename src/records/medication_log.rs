use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{authorize, require_text, IdGenerator, MedicationRepository, OwnedRecord, RecordSet, UserId};
use crate::auth::Principal;
use crate::clock::Clock;
use crate::error::HealthError;
use crate::storage::IndexKind;

/// One "taken" event. Logging the same dose twice produces two logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationLog {
    pub id: String,
    pub user_id: UserId,
    pub medication_id: String,
    pub taken_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl OwnedRecord for MedicationLog {
    const KIND: IndexKind = IndexKind::MedicationLogs;
    const ID_PREFIX: &'static str = "medication_log";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewMedicationLog {
    pub medication_id: String,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct MedicationLogRepository {
    records: RecordSet<MedicationLog>,
    medications: MedicationRepository,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl MedicationLogRepository {
    pub(crate) fn new(
        records: RecordSet<MedicationLog>,
        medications: MedicationRepository,
        ids: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        MedicationLogRepository {
            records,
            medications,
            ids,
            clock,
        }
    }

    /// Record a taken dose. The medication must exist and belong to `owner`;
    /// a foreign medication id is reported as not found.
    pub async fn create(
        &self,
        principal: &Principal,
        owner: &UserId,
        input: NewMedicationLog,
    ) -> Result<MedicationLog, HealthError> {
        authorize(principal, owner)?;
        require_text("medicationId", &input.medication_id)?;
        match self.medications.get(principal, owner, &input.medication_id).await {
            Ok(_) => {}
            Err(HealthError::Unauthorized) => return Err(HealthError::not_found(&input.medication_id)),
            Err(e) => return Err(e),
        }

        let now = self.clock.now();
        let log = MedicationLog {
            id: self.records.next_id(&self.ids, owner, now),
            user_id: owner.clone(),
            medication_id: input.medication_id,
            taken_at: input.taken_at.unwrap_or(now),
            notes: input.notes.filter(|text| !text.trim().is_empty()),
        };

        self.records.insert(&log).await?;
        info!(id = %log.id, medication = %log.medication_id, "logged dose");
        Ok(log)
    }

    pub async fn list_for_owner(&self, principal: &Principal, owner: &UserId) -> Result<Vec<MedicationLog>, HealthError> {
        authorize(principal, owner)?;
        self.records.load_all(owner).await
    }

    /// Logs whose `takenAt` falls on `date` (UTC calendar day).
    pub async fn list_on(
        &self,
        principal: &Principal,
        owner: &UserId,
        date: NaiveDate,
    ) -> Result<Vec<MedicationLog>, HealthError> {
        let all = self.list_for_owner(principal, owner).await?;
        Ok(all.into_iter().filter(|log| log.taken_at.date_naive() == date).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{NewMedication, Repositories};
    use crate::storage::MemoryStore;
    use crate::testing::{fixed_clock, principal};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    async fn with_medication(repos: &Repositories, who: &Principal, owner: &UserId) -> String {
        let input = NewMedication {
            name: "메트포르민".to_string(),
            dosage: "500mg".to_string(),
            times: vec!["08:00".parse().unwrap()],
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 31).unwrap(),
            instructions: None,
        };
        repos.medications.create(who, owner, input).await.unwrap().id
    }

    fn log_for(medication_id: &str) -> NewMedicationLog {
        NewMedicationLog {
            medication_id: medication_id.to_string(),
            taken_at: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn taken_at_defaults_to_now_and_repeats_are_kept() {
        let clock = fixed_clock();
        let repos = Repositories::new(Arc::new(MemoryStore::new()), clock.clone());
        let (who, owner) = principal("u1");
        let medication_id = with_medication(&repos, &who, &owner).await;

        let first = repos.medication_logs.create(&who, &owner, log_for(&medication_id)).await.unwrap();
        let second = repos.medication_logs.create(&who, &owner, log_for(&medication_id)).await.unwrap();

        assert_eq!(first.taken_at, clock.now());
        assert_ne!(first.id, second.id);
        assert_eq!(repos.medication_logs.list_for_owner(&who, &owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_or_foreign_medication_is_not_found() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()), fixed_clock());
        let (alice, alice_id) = principal("alice");
        let (bob, bob_id) = principal("bob");
        let alices_medication = with_medication(&repos, &alice, &alice_id).await;

        let missing = repos
            .medication_logs
            .create(&bob, &bob_id, log_for("medication:bob:1"))
            .await
            .unwrap_err();
        assert!(matches!(missing, HealthError::NotFound(_)));

        let foreign = repos
            .medication_logs
            .create(&bob, &bob_id, log_for(&alices_medication))
            .await
            .unwrap_err();
        assert!(matches!(foreign, HealthError::NotFound(_)));
        assert!(repos.medication_logs.list_for_owner(&bob, &bob_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_medication_id_is_a_validation_error() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()), fixed_clock());
        let (who, owner) = principal("u1");

        for blank in ["", "  "] {
            let err = repos.medication_logs.create(&who, &owner, log_for(blank)).await.unwrap_err();
            assert!(matches!(err, HealthError::Validation(_)), "{:?}", err);
        }
        assert!(repos.medication_logs.list_for_owner(&who, &owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_on_filters_by_utc_day() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()), fixed_clock());
        let (who, owner) = principal("u1");
        let medication_id = with_medication(&repos, &who, &owner).await;
        let today = Utc.with_ymd_and_hms(2026, 10, 16, 8, 5, 0).unwrap();

        for taken_at in [today, today - Duration::days(1), today + Duration::hours(15)] {
            let mut input = log_for(&medication_id);
            input.taken_at = Some(taken_at);
            repos.medication_logs.create(&who, &owner, input).await.unwrap();
        }

        let on_day = repos
            .medication_logs
            .list_on(&who, &owner, NaiveDate::from_ymd_opt(2026, 10, 16).unwrap())
            .await
            .unwrap();
        assert_eq!(on_day.len(), 1);
        assert_eq!(on_day[0].taken_at, today);
    }
}
