//! Per-owner secondary index lists
//!
//! Each owner has one list per record kind stored under
//! `<index prefix>:<owner>`. Appends are read-modify-write with no
//! compare-and-set, so two concurrent appends to the same list can lose one
//! id. The records themselves stay reachable by key and `reconcile` rebuilds
//! the list from a prefix scan of `<record prefix>:<owner>:`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{KvStore, StoreError};
use crate::error::HealthError;
use crate::records::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Appointments,
    Medications,
    MedicationLogs,
    BloodSugar,
    EmergencyContacts,
}

impl IndexKind {
    /// Kinds whose entries are ids of independently stored records.
    pub const RECORD_KINDS: [IndexKind; 4] = [
        IndexKind::Appointments,
        IndexKind::Medications,
        IndexKind::MedicationLogs,
        IndexKind::BloodSugar,
    ];

    pub fn index_prefix(&self) -> &'static str {
        match self {
            IndexKind::Appointments => "user_appointments",
            IndexKind::Medications => "user_medications",
            IndexKind::MedicationLogs => "user_medication_logs",
            IndexKind::BloodSugar => "user_blood_sugar",
            IndexKind::EmergencyContacts => "emergency_contacts",
        }
    }

    /// Leading segment of record ids for this kind. Emergency contacts are
    /// embedded in their list and have none.
    pub fn record_prefix(&self) -> Option<&'static str> {
        match self {
            IndexKind::Appointments => Some("appointment"),
            IndexKind::Medications => Some("medication"),
            IndexKind::MedicationLogs => Some("medication_log"),
            IndexKind::BloodSugar => Some("blood_sugar"),
            IndexKind::EmergencyContacts => None,
        }
    }

    pub fn index_key(&self, owner: &UserId) -> String {
        format!("{}:{}", self.index_prefix(), owner)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.index_prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub kind: IndexKind,
    /// Length of the index after reconciliation.
    pub indexed: usize,
    /// Stored records that were missing from the index and got re-appended.
    pub recovered: Vec<String>,
    /// Indexed ids with no stored record; dropped from the index.
    pub dangling: Vec<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.recovered.is_empty() || !self.dangling.is_empty()
    }
}

#[derive(Clone)]
pub struct IndexManager {
    store: Arc<dyn KvStore>,
}

impl IndexManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        IndexManager { store }
    }

    /// Read the list (default empty), push `record_id`, write it back.
    pub async fn append(&self, owner: &UserId, kind: IndexKind, record_id: &str) -> Result<(), StoreError> {
        let key = kind.index_key(owner);
        let mut ids: Vec<String> = self.read_list(&key).await?;
        ids.push(record_id.to_string());
        self.store.set(&key, serde_json::to_value(&ids)?).await?;
        debug!(index = %key, len = ids.len(), "appended to index");
        Ok(())
    }

    pub async fn list(&self, owner: &UserId, kind: IndexKind) -> Result<Vec<String>, StoreError> {
        self.read_list(&kind.index_key(owner)).await
    }

    /// Same read-modify-write as `append`, for lists that embed their entries
    /// instead of referencing records. Returns the list after the push.
    pub async fn push_entry<T>(&self, owner: &UserId, kind: IndexKind, entry: T) -> Result<Vec<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        let key = kind.index_key(owner);
        let mut entries: Vec<T> = self.read_list(&key).await?;
        entries.push(entry);
        self.store.set(&key, serde_json::to_value(&entries)?).await?;
        Ok(entries)
    }

    pub async fn entries<T: DeserializeOwned>(&self, owner: &UserId, kind: IndexKind) -> Result<Vec<T>, StoreError> {
        self.read_list(&kind.index_key(owner)).await
    }

    /// Fails with `PartialIndexFailure` when stored records of this kind are
    /// missing from the owner's index.
    pub async fn verify(&self, owner: &UserId, kind: IndexKind) -> Result<(), HealthError> {
        let stored = self.stored_ids(owner, kind).await?;
        let indexed: HashSet<String> = self.list(owner, kind).await?.into_iter().collect();
        let missing: Vec<String> = stored.into_iter().filter(|id| !indexed.contains(id)).collect();

        if missing.is_empty() {
            Ok(())
        } else {
            warn!(owner = %owner, index = %kind, missing = missing.len(), "index is missing stored records");
            Err(HealthError::PartialIndexFailure { kind, missing })
        }
    }

    /// Rebuild the owner's index from a prefix scan. Indexed ids that still
    /// resolve keep their order, recovered ids follow in key order, dangling
    /// ids are dropped. Running it twice is a no-op the second time.
    pub async fn reconcile(&self, owner: &UserId, kind: IndexKind) -> Result<ReconcileReport, HealthError> {
        let stored = self.stored_ids(owner, kind).await?;
        let stored_set: HashSet<&str> = stored.iter().map(String::as_str).collect();
        let indexed = self.list(owner, kind).await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut rebuilt = Vec::with_capacity(stored.len());
        let mut dangling = Vec::new();
        for id in &indexed {
            if !stored_set.contains(id.as_str()) {
                dangling.push(id.clone());
            } else if seen.insert(id.clone()) {
                rebuilt.push(id.clone());
            }
        }

        let recovered: Vec<String> = stored.iter().filter(|id| !seen.contains(*id)).cloned().collect();
        rebuilt.extend(recovered.iter().cloned());

        if rebuilt != indexed {
            self.store
                .set(&kind.index_key(owner), serde_json::to_value(&rebuilt).map_err(StoreError::from)?)
                .await?;
        }

        let report = ReconcileReport {
            kind,
            indexed: rebuilt.len(),
            recovered,
            dangling,
        };
        if report.changed() {
            info!(
                owner = %owner,
                index = %kind,
                recovered = report.recovered.len(),
                dangling = report.dangling.len(),
                "reconciled index"
            );
        }
        Ok(report)
    }

    async fn stored_ids(&self, owner: &UserId, kind: IndexKind) -> Result<Vec<String>, HealthError> {
        let record_prefix = kind.record_prefix().ok_or_else(|| {
            HealthError::validation(format!("{} has no record prefix to scan", kind))
        })?;
        let scan = format!("{}:{}:", record_prefix, owner);
        let stored = self.store.scan_prefix(&scan).await?;
        Ok(stored.into_iter().map(|(key, _)| key).collect())
    }

    async fn read_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StoreError> {
        match self.store.get(key).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::Serialization(format!("index {}: {}", key, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn manager() -> (Arc<MemoryStore>, IndexManager) {
        let store = Arc::new(MemoryStore::new());
        let index = IndexManager::new(store.clone());
        (store, index)
    }

    #[tokio::test]
    async fn sequential_appends_keep_creation_order() {
        let (_, index) = manager();
        let owner = UserId::from("u1");
        for n in 1..=5 {
            index
                .append(&owner, IndexKind::Appointments, &format!("appointment:u1:{}", n))
                .await
                .unwrap();
        }

        let ids = index.list(&owner, IndexKind::Appointments).await.unwrap();
        assert_eq!(
            ids,
            (1..=5).map(|n| format!("appointment:u1:{}", n)).collect::<Vec<_>>()
        );
        assert!(index.list(&owner, IndexKind::Medications).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn indices_are_partitioned_by_owner() {
        let (store, index) = manager();
        index.append(&UserId::from("u1"), IndexKind::BloodSugar, "blood_sugar:u1:1").await.unwrap();
        index.append(&UserId::from("u2"), IndexKind::BloodSugar, "blood_sugar:u2:1").await.unwrap();

        assert_eq!(
            store.get("user_blood_sugar:u1").await.unwrap(),
            Some(json!(["blood_sugar:u1:1"]))
        );
        assert_eq!(
            index.list(&UserId::from("u2"), IndexKind::BloodSugar).await.unwrap(),
            vec!["blood_sugar:u2:1".to_string()]
        );
    }

    #[tokio::test]
    async fn push_entry_returns_the_whole_list() {
        let (_, index) = manager();
        let owner = UserId::from("u1");
        index.push_entry(&owner, IndexKind::EmergencyContacts, json!({"name": "a"})).await.unwrap();
        let all = index
            .push_entry(&owner, IndexKind::EmergencyContacts, json!({"name": "b"}))
            .await
            .unwrap();
        assert_eq!(all, vec![json!({"name": "a"}), json!({"name": "b"})]);
    }

    #[tokio::test]
    async fn verify_detects_unindexed_records() {
        let (store, index) = manager();
        let owner = UserId::from("u1");
        store.set("medication:u1:1", json!({})).await.unwrap();
        index.append(&owner, IndexKind::Medications, "medication:u1:1").await.unwrap();
        assert!(index.verify(&owner, IndexKind::Medications).await.is_ok());

        // Record written, index append never happened.
        store.set("medication:u1:2", json!({})).await.unwrap();
        let err = index.verify(&owner, IndexKind::Medications).await.unwrap_err();
        assert_eq!(
            err,
            HealthError::PartialIndexFailure {
                kind: IndexKind::Medications,
                missing: vec!["medication:u1:2".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn reconcile_recovers_and_prunes() {
        let (store, index) = manager();
        let owner = UserId::from("u1");
        store.set("appointment:u1:1", json!({})).await.unwrap();
        store.set("appointment:u1:3", json!({})).await.unwrap();
        store.set("appointment:u1:2", json!({})).await.unwrap();
        store
            .set("user_appointments:u1", json!(["appointment:u1:3", "appointment:u1:9"]))
            .await
            .unwrap();

        let report = index.reconcile(&owner, IndexKind::Appointments).await.unwrap();
        assert_eq!(report.recovered, vec!["appointment:u1:1".to_string(), "appointment:u1:2".to_string()]);
        assert_eq!(report.dangling, vec!["appointment:u1:9".to_string()]);
        assert_eq!(report.indexed, 3);
        assert_eq!(
            index.list(&owner, IndexKind::Appointments).await.unwrap(),
            vec!["appointment:u1:3", "appointment:u1:1", "appointment:u1:2"]
        );

        let again = index.reconcile(&owner, IndexKind::Appointments).await.unwrap();
        assert!(!again.changed());
    }

    #[tokio::test]
    async fn medication_scan_does_not_pick_up_logs() {
        let (store, index) = manager();
        let owner = UserId::from("u1");
        store.set("medication_log:u1:1", json!({})).await.unwrap();
        let report = index.reconcile(&owner, IndexKind::Medications).await.unwrap();
        assert!(report.recovered.is_empty());
    }

    #[tokio::test]
    async fn contacts_cannot_be_reconciled() {
        let (_, index) = manager();
        let err = index
            .reconcile(&UserId::from("u1"), IndexKind::EmergencyContacts)
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::Validation(_)));
    }
}
