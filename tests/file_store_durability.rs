use chrono::{Duration, FixedOffset, TimeZone, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use carestore::records::{MeasurementType, NewBloodSugar, NewMedication};
use carestore::service::SignupRequest;
use carestore::{CareService, FileStore, FixedClock, KvStore, MemoryIdentityProvider, Principal, Repositories, UserId};

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()))
}

fn medication() -> NewMedication {
    let start = Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap().date_naive();
    NewMedication {
        name: "레보도파".to_string(),
        dosage: "100mg".to_string(),
        times: vec!["08:00".parse().unwrap(), "08:00".parse().unwrap()],
        start_date: start,
        end_date: start + Duration::days(90),
        instructions: None,
    }
}

#[tokio::test]
async fn records_and_indexes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let owner = UserId::from("u1");
    let who = Principal::new(owner.clone());

    let created = {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let repos = Repositories::new(store, clock());
        repos.medications.create(&who, &owner, medication()).await.unwrap()
    };

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let repos = Repositories::new(store, clock());
    let listed = repos.medications.list_for_owner(&who, &owner).await.unwrap();
    assert_eq!(listed, vec![created.clone()]);
    // Repeated dose times come back unchanged.
    assert_eq!(listed[0].times, created.times);
}

#[tokio::test]
async fn compaction_keeps_data_and_empties_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let owner = UserId::from("u1");
    let who = Principal::new(owner.clone());

    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let repos = Repositories::new(store.clone(), clock());
        for value in [95.0, 180.0] {
            let reading = NewBloodSugar {
                value,
                measured_at: None,
                measurement: MeasurementType::AfterMeal,
            };
            repos.blood_sugar.create(&who, &owner, reading).await.unwrap();
        }
        store.compact().unwrap();
    }

    let wal_len = std::fs::metadata(dir.path().join("store.wal")).unwrap().len();
    assert_eq!(wal_len, 0);

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let repos = Repositories::new(store, clock());
    let summary = repos.blood_sugar.summary(&who, &owner).await.unwrap();
    assert_eq!(summary.count, 2);
}

#[tokio::test]
async fn torn_log_tail_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileStore::open(dir.path()).unwrap();
        store.set("k1", serde_json::json!(1)).await.unwrap();
    }

    // Simulate a crash halfway through an append.
    let mut wal = OpenOptions::new()
        .append(true)
        .open(dir.path().join("store.wal"))
        .unwrap();
    wal.write_all(&[0, 0, 0, 42, b'{']).unwrap();
    drop(wal);

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.get("k1").await.unwrap(), Some(serde_json::json!(1)));
    store.set("k2", serde_json::json!(2)).await.unwrap();
    drop(store);

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.get("k2").await.unwrap(), Some(serde_json::json!(2)));
}

#[tokio::test]
async fn seeded_user_keeps_records_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let kim = || SignupRequest {
        email: "kim@example.com".to_string(),
        password: "password123".to_string(),
        name: "김철수".to_string(),
        age: Some(65),
        diseases: vec!["diabetes".to_string()],
    };
    let boot = || {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        CareService::new(
            store,
            Arc::new(MemoryIdentityProvider::new()),
            clock(),
            FixedOffset::east_opt(9 * 3600).unwrap(),
        )
    };

    let first_id = {
        let service = boot();
        let user = service.signup(kim(), Some("kim-token".to_string())).await.unwrap();
        let principal = service.authenticate("kim-token").await.unwrap();
        service.create_medication(&principal, medication()).await.unwrap();
        user.id
    };

    let service = boot();
    let user = service.signup(kim(), Some("kim-token".to_string())).await.unwrap();
    assert_eq!(user.id, first_id);

    let principal = service.authenticate("kim-token").await.unwrap();
    assert_eq!(service.medications(&principal).await.unwrap().len(), 1);
    assert_eq!(service.profile(&principal).await.unwrap().diseases, vec!["diabetes".to_string()]);

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.scan_prefix("user:").await.unwrap().len(), 1);
}
