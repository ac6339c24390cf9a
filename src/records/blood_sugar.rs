use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{authorize, IdGenerator, OwnedRecord, RecordSet, UserId};
use crate::auth::Principal;
use crate::clock::Clock;
use crate::error::HealthError;
use crate::storage::IndexKind;

pub const MIN_READING: f64 = 1.0;
pub const MAX_READING: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Fasting,
    AfterMeal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BloodSugarStatus {
    Low,
    Normal,
    Prediabetes,
    High,
}

impl BloodSugarStatus {
    /// mg/dL bands; after-meal readings get wider normal and prediabetes bands.
    pub fn classify(value: f64, kind: MeasurementType) -> Self {
        let (normal_max, prediabetes_max) = match kind {
            MeasurementType::Fasting => (100.0, 125.0),
            MeasurementType::AfterMeal => (140.0, 199.0),
        };

        if value < 70.0 {
            BloodSugarStatus::Low
        } else if value <= normal_max {
            BloodSugarStatus::Normal
        } else if value <= prediabetes_max {
            BloodSugarStatus::Prediabetes
        } else {
            BloodSugarStatus::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn between(previous: f64, latest: f64) -> Self {
        if latest > previous {
            Trend::Up
        } else if latest < previous {
            Trend::Down
        } else {
            Trend::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodSugarRecord {
    pub id: String,
    pub user_id: UserId,
    pub value: f64,
    pub measured_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub measurement: MeasurementType,
    pub created_at: DateTime<Utc>,
}

impl BloodSugarRecord {
    pub fn status(&self) -> BloodSugarStatus {
        BloodSugarStatus::classify(self.value, self.measurement)
    }
}

impl OwnedRecord for BloodSugarRecord {
    const KIND: IndexKind = IndexKind::BloodSugar;
    const ID_PREFIX: &'static str = "blood_sugar";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewBloodSugar {
    pub value: f64,
    #[serde(default)]
    pub measured_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub measurement: MeasurementType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodSugarSummary {
    pub latest: Option<BloodSugarRecord>,
    pub status: Option<BloodSugarStatus>,
    pub trend: Option<Trend>,
    pub count: usize,
    /// Mean of all readings, rounded to one decimal place.
    pub average: Option<f64>,
}

impl BloodSugarSummary {
    /// `readings` must be sorted newest first.
    pub fn from_recent(readings: &[BloodSugarRecord]) -> Self {
        let latest = readings.first().cloned();
        let trend = match readings {
            [latest, previous, ..] => Some(Trend::between(previous.value, latest.value)),
            _ => None,
        };
        let average = if readings.is_empty() {
            None
        } else {
            let sum: f64 = readings.iter().map(|r| r.value).sum();
            Some((sum / readings.len() as f64 * 10.0).round() / 10.0)
        };

        BloodSugarSummary {
            status: latest.as_ref().map(BloodSugarRecord::status),
            latest,
            trend,
            count: readings.len(),
            average,
        }
    }
}

#[derive(Clone)]
pub struct BloodSugarRepository {
    records: RecordSet<BloodSugarRecord>,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl BloodSugarRepository {
    pub(crate) fn new(records: RecordSet<BloodSugarRecord>, ids: Arc<IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        BloodSugarRepository { records, ids, clock }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        owner: &UserId,
        input: NewBloodSugar,
    ) -> Result<BloodSugarRecord, HealthError> {
        authorize(principal, owner)?;
        if !input.value.is_finite() || input.value < MIN_READING || input.value > MAX_READING {
            return Err(HealthError::validation(format!(
                "value must be between {} and {} mg/dL",
                MIN_READING, MAX_READING
            )));
        }

        let now = self.clock.now();
        let record = BloodSugarRecord {
            id: self.records.next_id(&self.ids, owner, now),
            user_id: owner.clone(),
            value: input.value,
            measured_at: input.measured_at.unwrap_or(now),
            measurement: input.measurement,
            created_at: now,
        };

        self.records.insert(&record).await?;
        info!(id = %record.id, owner = %owner, value = record.value, "recorded blood sugar");
        Ok(record)
    }

    pub async fn list_for_owner(
        &self,
        principal: &Principal,
        owner: &UserId,
    ) -> Result<Vec<BloodSugarRecord>, HealthError> {
        authorize(principal, owner)?;
        self.records.load_all(owner).await
    }

    /// Newest `measuredAt` first.
    pub async fn recent(&self, principal: &Principal, owner: &UserId) -> Result<Vec<BloodSugarRecord>, HealthError> {
        let mut readings = self.list_for_owner(principal, owner).await?;
        readings.sort_by(|a, b| b.measured_at.cmp(&a.measured_at));
        Ok(readings)
    }

    pub async fn summary(&self, principal: &Principal, owner: &UserId) -> Result<BloodSugarSummary, HealthError> {
        let readings = self.recent(principal, owner).await?;
        Ok(BloodSugarSummary::from_recent(&readings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Repositories;
    use crate::storage::MemoryStore;
    use crate::testing::{fixed_clock, principal};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn reading(value: f64, measurement: MeasurementType) -> NewBloodSugar {
        NewBloodSugar {
            value,
            measured_at: None,
            measurement,
        }
    }

    #[tokio::test]
    async fn range_limits_are_inclusive() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()), fixed_clock());
        let (who, owner) = principal("u1");

        for bad in [0.0, 601.0, f64::NAN, f64::INFINITY, -5.0] {
            let err = repos
                .blood_sugar
                .create(&who, &owner, reading(bad, MeasurementType::Fasting))
                .await
                .unwrap_err();
            assert!(matches!(err, HealthError::Validation(_)));
        }
        for good in [1.0, 600.0] {
            repos
                .blood_sugar
                .create(&who, &owner, reading(good, MeasurementType::Fasting))
                .await
                .unwrap();
        }
        assert_eq!(repos.blood_sugar.list_for_owner(&who, &owner).await.unwrap().len(), 2);
    }

    #[test]
    fn classification_bands() {
        use BloodSugarStatus::*;
        use MeasurementType::*;
        let cases = [
            (69.0, Fasting, Low),
            (70.0, Fasting, Normal),
            (100.0, Fasting, Normal),
            (101.0, Fasting, Prediabetes),
            (125.0, Fasting, Prediabetes),
            (126.0, Fasting, High),
            (140.0, AfterMeal, Normal),
            (141.0, AfterMeal, Prediabetes),
            (199.0, AfterMeal, Prediabetes),
            (200.0, AfterMeal, High),
        ];
        for (value, kind, expected) in cases {
            assert_eq!(BloodSugarStatus::classify(value, kind), expected, "{} {:?}", value, kind);
        }
    }

    #[tokio::test]
    async fn recent_and_summary_order_by_measurement_time() {
        let clock = fixed_clock();
        let repos = Repositories::new(Arc::new(MemoryStore::new()), clock.clone());
        let (who, owner) = principal("u1");
        let base = Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).unwrap();

        // Entered out of order: the 110 reading was measured last.
        for (value, offset_hours) in [(110.0, 2), (95.0, 0), (130.0, 1)] {
            let mut input = reading(value, MeasurementType::Fasting);
            input.measured_at = Some(base + Duration::hours(offset_hours));
            repos.blood_sugar.create(&who, &owner, input).await.unwrap();
        }

        let recent = repos.blood_sugar.recent(&who, &owner).await.unwrap();
        let values: Vec<f64> = recent.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![110.0, 130.0, 95.0]);

        let summary = repos.blood_sugar.summary(&who, &owner).await.unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.trend, Some(Trend::Down));
        assert_eq!(summary.status, Some(BloodSugarStatus::Prediabetes));
        assert_eq!(summary.average, Some(111.7));
    }

    #[test]
    fn summary_of_few_readings() {
        let empty = BloodSugarSummary::from_recent(&[]);
        assert_eq!(empty.count, 0);
        assert_eq!(empty.latest, None);
        assert_eq!(empty.average, None);

        let one = BloodSugarRecord {
            id: "blood_sugar:u1:1".to_string(),
            user_id: UserId::from("u1"),
            value: 88.0,
            measured_at: Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).unwrap(),
            measurement: MeasurementType::AfterMeal,
            created_at: Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).unwrap(),
        };
        let summary = BloodSugarSummary::from_recent(std::slice::from_ref(&one));
        assert_eq!(summary.trend, None);
        assert_eq!(summary.status, Some(BloodSugarStatus::Normal));
    }

    #[test]
    fn wire_format_uses_type_and_snake_case() {
        let body = serde_json::json!({ "value": 120, "type": "after_meal" });
        let parsed: NewBloodSugar = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.measurement, MeasurementType::AfterMeal);
        assert_eq!(Trend::between(100.0, 100.0), Trend::Stable);
    }
}
