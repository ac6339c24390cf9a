//! Dose schedules and adherence
//!
//! Pure computations over medication records:
//! - Next dose and overdue signals from daily `HH:MM` dose times
//! - Daily completion counts and per-slot taken flags

pub mod adherence;
pub mod calculator;
mod time_of_day;

pub use adherence::{completion_rate, AdherenceAggregator, AdherenceSummary, DoseSlot, MedicationAdherence};
pub use calculator::{DoseSchedule, ScheduleStatus};
pub use time_of_day::{ParseTimeOfDayError, TimeOfDay};
