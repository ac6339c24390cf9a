//! Request-level operations
//!
//! `CareService` is what the HTTP handlers call. Every operation acts on the
//! caller's own records, so the owner passed to the repositories is always
//! the principal's user id.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{IdentityProvider, Principal, Session};
use crate::clock::{wall_clock, Clock};
use crate::error::HealthError;
use crate::records::{
    Appointment, AppointmentStatus, BloodSugarRecord, BloodSugarSummary, EmergencyContact, HealthInfoUpdate,
    Medication, MedicationLog, NewAppointment, NewBloodSugar, NewEmergencyContact, NewMedication, NewMedicationLog,
    NewProfile, Repositories, UserId, UserProfile,
};
use crate::schedule::{AdherenceAggregator, AdherenceSummary, DoseSchedule, ScheduleStatus};
use crate::storage::{IndexKind, KvStore, ReconcileReport};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub diseases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub access_token: String,
}

/// An active medication with its schedule signals at the current wall clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayMedication {
    #[serde(flatten)]
    pub medication: Medication,
    #[serde(flatten)]
    pub schedule: ScheduleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCheck {
    pub kind: IndexKind,
    pub missing: Vec<String>,
}

#[derive(Clone)]
pub struct CareService {
    repos: Repositories,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    backend: &'static str,
}

impl CareService {
    pub fn new(
        store: Arc<dyn KvStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        CareService {
            backend: store.backend_tag(),
            repos: Repositories::new(store, Arc::clone(&clock)),
            identity,
            clock,
            offset,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub async fn authenticate(&self, token: &str) -> Result<Principal, HealthError> {
        self.identity.resolve(token).await.ok_or(HealthError::Unauthorized)
    }

    /// Register an account and store its profile. `token` pins the access
    /// token, which is how configured seed users get stable credentials; a
    /// seeded user whose profile is already stored keeps it.
    pub async fn signup(&self, request: SignupRequest, token: Option<String>) -> Result<RegisteredUser, HealthError> {
        let profile = NewProfile {
            email: request.email.trim().to_lowercase(),
            name: request.name,
            age: request.age,
            diseases: request.diseases,
        };
        profile.validate()?;

        let seeded = token.is_some();
        let Session { user_id, access_token } = self.identity.register(&profile.email, &request.password, token).await?;

        if seeded {
            let principal = Principal::new(user_id.clone());
            match self.repos.profiles.get(&principal, &user_id).await {
                Ok(existing) => {
                    info!(user = %user_id, "reattached seeded user to stored profile");
                    return Ok(RegisteredUser {
                        id: user_id,
                        email: existing.email,
                        name: existing.name,
                        access_token,
                    });
                }
                Err(HealthError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let stored = match self.repos.profiles.create(&user_id, profile).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(user = %user_id, error = %e, "account registered but profile write failed");
                return Err(e);
            }
        };

        info!(user = %user_id, "signed up");
        Ok(RegisteredUser {
            id: user_id,
            email: stored.email,
            name: stored.name,
            access_token,
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, HealthError> {
        Ok(self.identity.sign_in(email, password).await?)
    }

    pub async fn profile(&self, principal: &Principal) -> Result<UserProfile, HealthError> {
        self.repos.profiles.get(principal, &principal.user_id).await
    }

    pub async fn update_health_info(
        &self,
        principal: &Principal,
        update: HealthInfoUpdate,
    ) -> Result<UserProfile, HealthError> {
        self.repos.profiles.update_health_info(principal, &principal.user_id, update).await
    }

    pub async fn create_appointment(
        &self,
        principal: &Principal,
        input: NewAppointment,
    ) -> Result<Appointment, HealthError> {
        self.repos.appointments.create(principal, &principal.user_id, input).await
    }

    pub async fn appointments(&self, principal: &Principal) -> Result<Vec<Appointment>, HealthError> {
        self.repos.appointments.list_for_owner(principal, &principal.user_id).await
    }

    pub async fn update_appointment_status(
        &self,
        principal: &Principal,
        id: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment, HealthError> {
        self.repos
            .appointments
            .update_status(principal, &principal.user_id, id, status)
            .await
    }

    pub async fn create_medication(&self, principal: &Principal, input: NewMedication) -> Result<Medication, HealthError> {
        self.repos.medications.create(principal, &principal.user_id, input).await
    }

    pub async fn medications(&self, principal: &Principal) -> Result<Vec<Medication>, HealthError> {
        self.repos.medications.list_for_owner(principal, &principal.user_id).await
    }

    /// Medications active on today's (UTC) date with next-dose and overdue
    /// signals against the local wall clock.
    pub async fn today_medications(&self, principal: &Principal) -> Result<Vec<TodayMedication>, HealthError> {
        let now = self.clock.now();
        let local = wall_clock(now, self.offset);
        let active = self
            .repos
            .medications
            .active_on(principal, &principal.user_id, self.clock.today())
            .await?;

        Ok(active
            .into_iter()
            .map(|medication| TodayMedication {
                schedule: DoseSchedule::status(&medication.times, local),
                medication,
            })
            .collect())
    }

    pub async fn log_medication(
        &self,
        principal: &Principal,
        input: NewMedicationLog,
    ) -> Result<MedicationLog, HealthError> {
        self.repos.medication_logs.create(principal, &principal.user_id, input).await
    }

    pub async fn medication_logs(&self, principal: &Principal) -> Result<Vec<MedicationLog>, HealthError> {
        self.repos.medication_logs.list_for_owner(principal, &principal.user_id).await
    }

    pub async fn adherence_today(&self, principal: &Principal) -> Result<AdherenceSummary, HealthError> {
        let today = self.clock.today();
        let owner = &principal.user_id;
        let active = self.repos.medications.active_on(principal, owner, today).await?;
        let logs = self.repos.medication_logs.list_on(principal, owner, today).await?;
        Ok(AdherenceAggregator::summarize(today, &active, &logs))
    }

    pub async fn record_blood_sugar(
        &self,
        principal: &Principal,
        input: NewBloodSugar,
    ) -> Result<BloodSugarRecord, HealthError> {
        self.repos.blood_sugar.create(principal, &principal.user_id, input).await
    }

    pub async fn blood_sugar(&self, principal: &Principal) -> Result<Vec<BloodSugarRecord>, HealthError> {
        self.repos.blood_sugar.recent(principal, &principal.user_id).await
    }

    pub async fn blood_sugar_summary(&self, principal: &Principal) -> Result<BloodSugarSummary, HealthError> {
        self.repos.blood_sugar.summary(principal, &principal.user_id).await
    }

    pub async fn add_contact(
        &self,
        principal: &Principal,
        input: NewEmergencyContact,
    ) -> Result<Vec<EmergencyContact>, HealthError> {
        self.repos.contacts.add(principal, &principal.user_id, input).await
    }

    pub async fn contacts(&self, principal: &Principal) -> Result<Vec<EmergencyContact>, HealthError> {
        self.repos.contacts.list(principal, &principal.user_id).await
    }

    /// Dry run of `reindex`: the stored records each index is missing,
    /// without rewriting anything.
    pub async fn check_indexes(&self, principal: &Principal) -> Result<Vec<IndexCheck>, HealthError> {
        let mut checks = Vec::with_capacity(IndexKind::RECORD_KINDS.len());
        for kind in IndexKind::RECORD_KINDS {
            let missing = match self.repos.index.verify(&principal.user_id, kind).await {
                Ok(()) => Vec::new(),
                Err(HealthError::PartialIndexFailure { missing, .. }) => missing,
                Err(e) => return Err(e),
            };
            checks.push(IndexCheck { kind, missing });
        }
        Ok(checks)
    }

    /// Rebuild every record index of the caller from prefix scans.
    pub async fn reindex(&self, principal: &Principal) -> Result<Vec<ReconcileReport>, HealthError> {
        let mut reports = Vec::with_capacity(IndexKind::RECORD_KINDS.len());
        for kind in IndexKind::RECORD_KINDS {
            reports.push(self.repos.index.reconcile(&principal.user_id, kind).await?);
        }
        let recovered: usize = reports.iter().map(|r| r.recovered.len()).sum();
        info!(user = %principal.user_id, recovered, "reindexed");
        Ok(reports)
    }
}
