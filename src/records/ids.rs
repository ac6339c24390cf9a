use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

use super::UserId;

/// Mints `<kind>:<owner>:<suffix>` ids. The suffix is the creation time in
/// milliseconds, bumped so it strictly increases across the process even when
/// several ids are minted within the same millisecond.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator::default()
    }

    pub fn next_suffix(&self, now: DateTime<Utc>) -> i64 {
        let millis = now.timestamp_millis();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = millis.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn record_id(&self, prefix: &str, owner: &UserId, now: DateTime<Utc>) -> String {
        format!("{}:{}:{}", prefix, owner, self.next_suffix(now))
    }
}
