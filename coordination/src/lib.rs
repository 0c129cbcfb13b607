//! Cross-cutting coordination primitives shared by the write-path
//! components: the advisory Distributed Lock Manager (§4.1), the
//! Idempotency Cache (§4.2), and the Availability Calculator's cache
//! layer (§4.3).

pub mod availability;
pub mod error;
pub mod idempotency;
pub mod lock;

pub use availability::{AvailabilityCalculator, AvailabilityResult, DayPrice};
pub use error::CoordinationError;
pub use idempotency::{IdempotencyCache, ReserveOutcome};
pub use lock::{DistributedLockManager, Lock, LockOpts};
