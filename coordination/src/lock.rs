use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tollgate_kv::Kv;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::CoordinationError;

#[derive(Clone, Copy, Debug)]
pub struct LockOpts {
    pub ttl: Duration,
    pub retries: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl Default for LockOpts {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retries: 3,
            base_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
        }
    }
}

/// A held advisory lock. Carries the key and the unique token that proves
/// ownership, so `release`/`extend` can compare-and-swap instead of
/// blindly clobbering whoever holds the key now (spec.md §4.1).
pub struct Lock {
    key: String,
    token: String,
}

/// Redis-backed advisory lock manager. Advisory: callers still need the DB
/// row lock for the decisive check (spec.md §4.1 design rationale) — this
/// only keeps concurrent callers from racing each other into that check.
#[derive(Clone)]
pub struct DistributedLockManager {
    kv: Kv,
    counters: tollgate_telemetry::Counters,
}

impl DistributedLockManager {
    pub fn new(kv: Kv) -> Self {
        Self {
            kv,
            counters: tollgate_telemetry::Counters::default(),
        }
    }

    /// Returns the lock-contention counters, so a caller (e.g. the binary's
    /// startup code) can log a periodic snapshot without each acquire call
    /// needing its own metrics export path.
    pub fn counters(&self) -> &tollgate_telemetry::Counters {
        &self.counters
    }

    #[instrument(skip(self, opts), fields(ttl_ms = opts.ttl.as_millis()))]
    pub async fn acquire(
        &self,
        resource: &str,
        opts: LockOpts,
    ) -> Result<Option<Lock>, CoordinationError> {
        tollgate_telemetry::warn_if_slow("lock_acquire", Duration::from_millis(250), self.acquire_inner(resource, opts)).await
    }

    async fn acquire_inner(
        &self,
        resource: &str,
        opts: LockOpts,
    ) -> Result<Option<Lock>, CoordinationError> {
        let key = format!("lock:{resource}");
        let token = Uuid::new_v4().to_string();

        for attempt in 0..=opts.retries {
            let acquired = self
                .kv
                .set_nx_px(&key, &token, opts.ttl.as_millis() as u64)
                .await?;

            if acquired {
                self.counters.lock_acquired.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Ok(Some(Lock { key, token }));
            }

            if attempt == opts.retries {
                break;
            }

            self.counters.lock_retried.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let jitter_ms = if opts.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..opts.jitter.as_millis() as u64)
            };
            tokio::time::sleep(backoff_delay(attempt, opts.base_delay) + Duration::from_millis(jitter_ms)).await;
        }

        self.counters.lock_unavailable.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(None)
    }

    /// Idempotent on double-release: a miss just means someone else's TTL
    /// expiry or a prior release already cleared the key.
    #[instrument(skip(self), fields(key = %lock.key))]
    pub async fn release(&self, lock: &Lock) -> Result<(), CoordinationError> {
        self.kv.compare_and_delete(&lock.key, &lock.token).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %lock.key))]
    pub async fn extend(&self, lock: &Lock, ttl: Duration) -> Result<bool, CoordinationError> {
        Ok(self
            .kv
            .compare_and_pexpire(&lock.key, &lock.token, ttl.as_millis() as u64)
            .await?)
    }

    /// Scoped acquisition: acquire, run `f`, release on every exit path —
    /// including `f` returning an error, since `f`'s result is captured
    /// before release runs either way.
    ///
    /// Callers own their own error type `E`, so lock failures are reported
    /// through `on_unavailable` rather than a blanket `From<CoordinationError>`
    /// bound (that would need an impl living outside both this crate and
    /// the caller's error type — not something the orphan rules allow).
    #[instrument(skip(self, opts, on_unavailable, f))]
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        resource: &str,
        opts: LockOpts,
        on_unavailable: impl FnOnce(CoordinationError) -> E,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let acquired = self.acquire(resource, opts).await;
        let lock = match acquired {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                return Err(on_unavailable(CoordinationError::LockUnavailable {
                    resource: resource.to_string(),
                }));
            }
            Err(e) => return Err(on_unavailable(e)),
        };

        let result = f().await;

        if let Err(e) = self.release(&lock).await {
            warn!(resource, error = %e, "failed to release advisory lock");
        }

        result
    }
}

/// Exponential backoff, excluding jitter so the growth curve itself is
/// deterministic and testable.
fn backoff_delay(attempt: u32, base_delay: Duration) -> Duration {
    base_delay.saturating_mul(1u32 << attempt.min(31))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(0, base), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, base), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(800));
    }

    #[test]
    fn backoff_does_not_panic_on_large_attempt() {
        let base = Duration::from_millis(100);
        let _ = backoff_delay(1000, base);
    }

    #[test]
    fn default_opts_match_spec() {
        let opts = LockOpts::default();
        assert_eq!(opts.ttl, Duration::from_secs(30));
        assert_eq!(opts.retries, 3);
        assert_eq!(opts.base_delay, Duration::from_millis(100));
        assert_eq!(opts.jitter, Duration::from_millis(50));
    }
}
