use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tollgate_coordination::AvailabilityCalculator;
use tollgate_store::ReservationRepository;
use tracing::{info, warn};

/// Background expiry sweep (spec.md §4.4 state transitions): periodically
/// flips `reserved` reservations whose hold has lapsed to `expired` and
/// invalidates the availability cache for each one, same shutdown shape as
/// the teacher's main loop tasks (`tokio::select!` against a cancellation
/// signal instead of running forever).
pub async fn run<R: ReservationRepository>(
    store: R,
    avail: AvailabilityCalculator,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("reservation expiry sweep shutting down");
                return;
            }
            _ = ticker.tick() => {
                match store.sweep_expired(Utc::now()).await {
                    Ok(expired) => {
                        for r in &expired {
                            if let Err(e) = avail.invalidate(r.resource_id, r.range).await {
                                warn!(resource_id = %r.resource_id, error = %e, "cache invalidation failed during sweep");
                            }
                        }
                        if !expired.is_empty() {
                            info!(count = expired.len(), "expired reservations swept");
                        }
                    }
                    Err(e) => warn!(error = %e, "reservation expiry sweep failed"),
                }
            }
        }
    }
}
