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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    /// scheduled -> confirmed | cancelled, confirmed -> cancelled.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (AppointmentStatus::Scheduled, AppointmentStatus::Confirmed)
                | (AppointmentStatus::Scheduled, AppointmentStatus::Cancelled)
                | (AppointmentStatus::Confirmed, AppointmentStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub user_id: UserId,
    pub hospital_name: String,
    pub department: String,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    #[serde(default)]
    pub doctor_name: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OwnedRecord for Appointment {
    const KIND: IndexKind = IndexKind::Appointments;
    const ID_PREFIX: &'static str = "appointment";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewAppointment {
    pub hospital_name: String,
    pub department: String,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    #[serde(default)]
    pub doctor_name: Option<String>,
}

#[derive(Clone)]
pub struct AppointmentRepository {
    records: RecordSet<Appointment>,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl AppointmentRepository {
    pub(crate) fn new(records: RecordSet<Appointment>, ids: Arc<IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        AppointmentRepository { records, ids, clock }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        owner: &UserId,
        input: NewAppointment,
    ) -> Result<Appointment, HealthError> {
        authorize(principal, owner)?;
        require_text("hospitalName", &input.hospital_name)?;
        require_text("department", &input.department)?;

        let now = self.clock.now();
        let appointment = Appointment {
            id: self.records.next_id(&self.ids, owner, now),
            user_id: owner.clone(),
            hospital_name: input.hospital_name,
            department: input.department,
            date: input.date,
            time: input.time,
            doctor_name: input.doctor_name.filter(|name| !name.trim().is_empty()),
            status: AppointmentStatus::Scheduled,
            created_at: now,
            updated_at: None,
        };

        self.records.insert(&appointment).await?;
        info!(id = %appointment.id, owner = %owner, "created appointment");
        Ok(appointment)
    }

    pub async fn list_for_owner(&self, principal: &Principal, owner: &UserId) -> Result<Vec<Appointment>, HealthError> {
        authorize(principal, owner)?;
        self.records.load_all(owner).await
    }

    pub async fn get(&self, principal: &Principal, owner: &UserId, id: &str) -> Result<Appointment, HealthError> {
        authorize(principal, owner)?;
        self.records.fetch(owner, id).await
    }

    pub async fn update_status(
        &self,
        principal: &Principal,
        owner: &UserId,
        id: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment, HealthError> {
        authorize(principal, owner)?;
        let mut appointment = self.records.fetch(owner, id).await?;
        if !appointment.status.can_transition_to(status) {
            return Err(HealthError::validation(format!(
                "cannot move appointment from {} to {}",
                appointment.status.as_str(),
                status.as_str()
            )));
        }

        appointment.status = status;
        appointment.updated_at = Some(self.clock.now());
        self.records.put(&appointment).await?;
        info!(id = %appointment.id, status = status.as_str(), "updated appointment status");
        Ok(appointment)
    }
}
