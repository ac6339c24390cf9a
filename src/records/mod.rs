//! Typed record repositories
//!
//! Each repository is a façade over the KV store and the index manager for
//! one record kind. Every operation takes the authenticated principal and the
//! owner it acts on, and refuses to proceed when they differ.

mod appointment;
mod blood_sugar;
mod contacts;
mod ids;
mod medication;
mod medication_log;
mod profile;

pub use appointment::{Appointment, AppointmentRepository, AppointmentStatus, NewAppointment};
pub use blood_sugar::{
    BloodSugarRecord, BloodSugarRepository, BloodSugarStatus, BloodSugarSummary, MeasurementType, NewBloodSugar, Trend,
};
pub use contacts::{EmergencyContact, EmergencyContactRepository, NewEmergencyContact};
pub use ids::IdGenerator;
pub use medication::{Medication, MedicationRepository, NewMedication};
pub use medication_log::{MedicationLog, MedicationLogRepository, NewMedicationLog};
pub use profile::{HealthInfoUpdate, NewProfile, ProfileRepository, UserProfile};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::Principal;
use crate::clock::Clock;
use crate::error::HealthError;
use crate::storage::{IndexKind, IndexManager, KvStore, StoreError};

/// Identifier of the user owning a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        UserId(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record stored under its own id and listed in a per-owner index.
pub(crate) trait OwnedRecord: Serialize + DeserializeOwned + Send + Sync {
    const KIND: IndexKind;
    /// Leading segment of ids; matches `KIND.record_prefix()`.
    const ID_PREFIX: &'static str;

    fn id(&self) -> &str;

    fn owner(&self) -> &UserId;
}

/// Typed access to one record kind: write-then-index on insert, and
/// index -> multi-get -> decode on list.
pub(crate) struct RecordSet<T> {
    store: Arc<dyn KvStore>,
    index: IndexManager,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordSet<T> {
    fn clone(&self) -> Self {
        RecordSet {
            store: Arc::clone(&self.store),
            index: self.index.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: OwnedRecord> RecordSet<T> {
    pub(crate) fn new(store: Arc<dyn KvStore>, index: IndexManager) -> Self {
        RecordSet {
            store,
            index,
            _record: PhantomData,
        }
    }

    pub(crate) fn next_id(&self, ids: &IdGenerator, owner: &UserId, now: DateTime<Utc>) -> String {
        ids.record_id(T::ID_PREFIX, owner, now)
    }

    /// Write the record, then append its id to the owner's index. The two
    /// steps are not atomic and nothing is rolled back when the second fails.
    pub(crate) async fn insert(&self, record: &T) -> Result<(), HealthError> {
        self.put(record).await?;
        if let Err(e) = self.index.append(record.owner(), T::KIND, record.id()).await {
            warn!(
                id = record.id(),
                index = %T::KIND,
                error = %e,
                "record stored but index append failed; reconcile to recover"
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// Overwrite the stored record without touching the index.
    pub(crate) async fn put(&self, record: &T) -> Result<(), HealthError> {
        let value = serde_json::to_value(record).map_err(StoreError::from)?;
        self.store.set(record.id(), value).await?;
        Ok(())
    }

    pub(crate) async fn fetch(&self, owner: &UserId, id: &str) -> Result<T, HealthError> {
        let belongs_to_kind = id
            .strip_prefix(T::ID_PREFIX)
            .map_or(false, |rest| rest.starts_with(':'));
        if !belongs_to_kind {
            return Err(HealthError::not_found(id));
        }

        let value = self.store.get(id).await?.ok_or_else(|| HealthError::not_found(id))?;
        let record = decode::<T>(id, value)?;
        if record.owner() != owner {
            warn!(id, owner = %owner, "record belongs to another owner");
            return Err(HealthError::Unauthorized);
        }
        Ok(record)
    }

    /// All records the owner's index resolves to, in index order. Dangling
    /// ids and records stamped with another owner are skipped.
    pub(crate) async fn load_all(&self, owner: &UserId) -> Result<Vec<T>, HealthError> {
        let ids = self.index.list(owner, T::KIND).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.store.mget(&ids).await?;
        let mut records = Vec::with_capacity(ids.len());
        for (id, value) in ids.iter().zip(values) {
            let Some(value) = value else {
                debug!(id = %id, index = %T::KIND, "skipping dangling index entry");
                continue;
            };
            let record = decode::<T>(id, value)?;
            if record.owner() != owner {
                warn!(id = %id, owner = %owner, "skipping record stamped with another owner");
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }
}

fn decode<T: DeserializeOwned>(id: &str, value: serde_json::Value) -> Result<T, HealthError> {
    serde_json::from_value(value).map_err(|e| HealthError::Corrupted(format!("{}: {}", id, e)))
}

pub(crate) fn authorize(principal: &Principal, owner: &UserId) -> Result<(), HealthError> {
    if &principal.user_id == owner {
        Ok(())
    } else {
        warn!(principal = %principal.user_id, owner = %owner, "principal does not own target records");
        Err(HealthError::Unauthorized)
    }
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), HealthError> {
    if value.trim().is_empty() {
        Err(HealthError::validation(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

/// Every repository wired to one store, one index manager and one id source.
#[derive(Clone)]
pub struct Repositories {
    pub profiles: ProfileRepository,
    pub appointments: AppointmentRepository,
    pub medications: MedicationRepository,
    pub medication_logs: MedicationLogRepository,
    pub blood_sugar: BloodSugarRepository,
    pub contacts: EmergencyContactRepository,
    pub index: IndexManager,
}

impl Repositories {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let index = IndexManager::new(Arc::clone(&store));
        let ids = Arc::new(IdGenerator::new());
        let medications = MedicationRepository::new(
            RecordSet::new(Arc::clone(&store), index.clone()),
            Arc::clone(&ids),
            Arc::clone(&clock),
        );

        Repositories {
            profiles: ProfileRepository::new(Arc::clone(&store), Arc::clone(&clock)),
            appointments: AppointmentRepository::new(
                RecordSet::new(Arc::clone(&store), index.clone()),
                Arc::clone(&ids),
                Arc::clone(&clock),
            ),
            medication_logs: MedicationLogRepository::new(
                RecordSet::new(Arc::clone(&store), index.clone()),
                medications.clone(),
                Arc::clone(&ids),
                Arc::clone(&clock),
            ),
            medications,
            blood_sugar: BloodSugarRepository::new(
                RecordSet::new(Arc::clone(&store), index.clone()),
                Arc::clone(&ids),
                Arc::clone(&clock),
            ),
            contacts: EmergencyContactRepository::new(index.clone(), Arc::clone(&clock)),
            index,
        }
    }
}
