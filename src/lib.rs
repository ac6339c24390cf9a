//! Carestore: a per-user health record store
//!
//! Carestore keeps medications, appointments, blood-sugar readings, dose logs
//! and emergency contacts for each user in a generic key-value backend with
//! per-owner index lists, and derives "what is due now" and daily adherence
//! from them.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod records;
pub mod schedule;
pub mod service;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{IdentityProvider, MemoryIdentityProvider, Principal};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::HealthError;
pub use records::{Repositories, UserId};
pub use service::CareService;
pub use storage::{FileStore, IndexKind, IndexManager, KvStore, MemoryStore, StoreError};
