use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::TimeOfDay;
use crate::records::{Medication, MedicationLog};

/// One scheduled occurrence of a medication on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseSlot {
    pub time: TimeOfDay,
    pub taken: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationAdherence {
    pub medication_id: String,
    pub name: String,
    pub scheduled: usize,
    /// Raw number of logs for the day; can exceed `scheduled`.
    pub logged: usize,
    pub slots: Vec<DoseSlot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceSummary {
    pub date: NaiveDate,
    pub total_doses: usize,
    /// Count of the day's logs that reference an active medication.
    pub taken_doses: usize,
    pub completion_rate: u32,
    /// Slots flagged as taken; never more than `total_doses`.
    pub slot_taken_doses: usize,
    pub slot_completion_rate: u32,
    pub medications: Vec<MedicationAdherence>,
}

/// `round(taken / total * 100)`, and 0 when nothing is scheduled.
pub fn completion_rate(taken: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((taken as f64 / total as f64) * 100.0).round() as u32
}

pub struct AdherenceAggregator;

impl AdherenceAggregator {
    /// Combine the day's active medications with logs. Logs outside `date`
    /// or for medications not in `medications` are ignored.
    ///
    /// Slot flags: a medication's logs, oldest first, each mark the earliest
    /// still-pending slot. Slots only move Pending -> Taken.
    pub fn summarize(date: NaiveDate, medications: &[Medication], logs: &[MedicationLog]) -> AdherenceSummary {
        let mut logs_by_medication: HashMap<&str, Vec<&MedicationLog>> = HashMap::new();
        for log in logs.iter().filter(|log| log.taken_at.date_naive() == date) {
            logs_by_medication
                .entry(log.medication_id.as_str())
                .or_default()
                .push(log);
        }

        let mut per_medication = Vec::with_capacity(medications.len());
        for medication in medications {
            let mut todays_logs = logs_by_medication
                .get(medication.id.as_str())
                .cloned()
                .unwrap_or_default();
            todays_logs.sort_by_key(|log| log.taken_at);

            per_medication.push(MedicationAdherence {
                medication_id: medication.id.clone(),
                name: medication.name.clone(),
                scheduled: medication.times.len(),
                logged: todays_logs.len(),
                slots: Self::slot_flags(&medication.times, &todays_logs),
            });
        }

        let total_doses: usize = per_medication.iter().map(|m| m.scheduled).sum();
        let taken_doses: usize = per_medication.iter().map(|m| m.logged).sum();
        let slot_taken_doses: usize = per_medication
            .iter()
            .map(|m| m.slots.iter().filter(|slot| slot.taken).count())
            .sum();

        AdherenceSummary {
            date,
            total_doses,
            taken_doses,
            completion_rate: completion_rate(taken_doses, total_doses),
            slot_taken_doses,
            slot_completion_rate: completion_rate(slot_taken_doses, total_doses),
            medications: per_medication,
        }
    }

    /// `logs` must already be sorted by `taken_at`.
    pub fn slot_flags(times: &[TimeOfDay], logs: &[&MedicationLog]) -> Vec<DoseSlot> {
        let mut sorted = times.to_vec();
        sorted.sort();

        let mut taken = logs.iter();
        sorted
            .into_iter()
            .map(|time| match taken.next() {
                Some(log) => DoseSlot {
                    time,
                    taken: true,
                    taken_at: Some(log.taken_at),
                },
                None => DoseSlot {
                    time,
                    taken: false,
                    taken_at: None,
                },
            })
            .collect()
    }
}
