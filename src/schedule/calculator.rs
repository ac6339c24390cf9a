use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::TimeOfDay;

/// Schedule signals for one medication at a reference wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    pub next_dose: Option<TimeOfDay>,
    /// True when the next dose wrapped around to tomorrow's first slot.
    pub next_dose_is_tomorrow: bool,
    pub is_overdue: bool,
}

/// Pure dose-time calculations.
pub struct DoseSchedule;

impl DoseSchedule {
    /// First dose time strictly after `now`, or the earliest dose time
    /// (tomorrow's first dose) when none remain today.
    ///
    /// Duplicate entries are not merged; a repeated time is simply returned.
    pub fn next_dose(dose_times: &[TimeOfDay], now: NaiveTime) -> Option<TimeOfDay> {
        let current = TimeOfDay::from(now).minute_of_day();
        let mut sorted = dose_times.to_vec();
        sorted.sort_by_key(TimeOfDay::minute_of_day);

        sorted
            .iter()
            .copied()
            .find(|time| time.minute_of_day() > current)
            .or_else(|| sorted.first().copied())
    }

    /// True if any dose time today is strictly before `now`.
    ///
    /// This does not look at medication logs: a dose that was already taken
    /// still counts. It means "a dose time has passed", not "a dose was missed".
    pub fn is_overdue(dose_times: &[TimeOfDay], now: NaiveTime) -> bool {
        let current = TimeOfDay::from(now).minute_of_day();
        dose_times.iter().any(|time| time.minute_of_day() < current)
    }

    pub fn status(dose_times: &[TimeOfDay], now: NaiveTime) -> ScheduleStatus {
        let current = TimeOfDay::from(now).minute_of_day();
        let next_dose = Self::next_dose(dose_times, now);
        ScheduleStatus {
            next_dose,
            next_dose_is_tomorrow: next_dose.map_or(false, |t| t.minute_of_day() <= current),
            is_overdue: Self::is_overdue(dose_times, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn times(raw: &[&str]) -> Vec<TimeOfDay> {
        raw.iter().map(|t| t.parse().unwrap()).collect()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn next_dose_picks_the_upcoming_slot() {
        let doses = times(&["08:00", "20:00"]);
        assert_eq!(DoseSchedule::next_dose(&doses, at(7, 0)), Some("08:00".parse().unwrap()));
        assert_eq!(DoseSchedule::next_dose(&doses, at(12, 0)), Some("20:00".parse().unwrap()));
    }

    #[test]
    fn next_dose_wraps_to_tomorrow() {
        let doses = times(&["08:00", "20:00"]);
        assert_eq!(DoseSchedule::next_dose(&doses, at(21, 0)), Some("08:00".parse().unwrap()));
    }

    #[test]
    fn next_dose_is_strictly_after_now() {
        let doses = times(&["08:00", "20:00"]);
        assert_eq!(DoseSchedule::next_dose(&doses, at(8, 0)), Some("20:00".parse().unwrap()));
    }

    #[test]
    fn next_dose_sorts_unsorted_input() {
        let doses = times(&["20:00", "14:00", "08:00"]);
        assert_eq!(DoseSchedule::next_dose(&doses, at(9, 0)), Some("14:00".parse().unwrap()));
        assert_eq!(DoseSchedule::next_dose(&doses, at(22, 0)), Some("08:00".parse().unwrap()));
    }

    #[test]
    fn next_dose_returns_duplicates_as_is() {
        let doses = times(&["08:00", "08:00"]);
        assert_eq!(DoseSchedule::next_dose(&doses, at(7, 0)), Some("08:00".parse().unwrap()));
    }

    #[test]
    fn next_dose_of_nothing_is_none() {
        assert_eq!(DoseSchedule::next_dose(&[], at(7, 0)), None);
    }

    #[test]
    fn overdue_boundaries() {
        let doses = times(&["08:00"]);
        assert!(!DoseSchedule::is_overdue(&doses, at(7, 59)));
        assert!(!DoseSchedule::is_overdue(&doses, at(8, 0)));
        assert!(DoseSchedule::is_overdue(&doses, at(8, 1)));
    }

    #[test]
    fn overdue_ignores_whether_the_dose_was_taken() {
        // Only the clock is consulted; there is no notion of logs here.
        let doses = times(&["08:00", "20:00"]);
        assert!(DoseSchedule::is_overdue(&doses, at(9, 0)));
    }

    #[test]
    fn seconds_do_not_count() {
        let doses = times(&["08:00"]);
        let just_after = NaiveTime::from_hms_opt(8, 0, 59).unwrap();
        assert!(!DoseSchedule::is_overdue(&doses, just_after));
    }

    #[test]
    fn status_flags_tomorrow() {
        let doses = times(&["08:00", "20:00"]);
        let status = DoseSchedule::status(&doses, at(21, 0));
        assert_eq!(
            status,
            ScheduleStatus {
                next_dose: Some("08:00".parse().unwrap()),
                next_dose_is_tomorrow: true,
                is_overdue: true,
            }
        );
        assert!(!DoseSchedule::status(&doses, at(7, 0)).next_dose_is_tomorrow);
    }
}
