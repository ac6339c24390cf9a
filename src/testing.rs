//! Shared fixtures for unit tests.

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use crate::auth::Principal;
use crate::clock::FixedClock;
use crate::records::UserId;

/// 2026-10-16 09:00 UTC.
pub(crate) fn fixed_clock() -> Arc<FixedClock> {
    let instant = Utc
        .with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    Arc::new(FixedClock::new(instant))
}

pub(crate) fn principal(id: &str) -> (Principal, UserId) {
    let owner = UserId::from(id);
    (Principal::new(owner.clone()), owner)
}
