use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tollgate_coordination::{
    AvailabilityCalculator, CoordinationError, DistributedLockManager, IdempotencyCache, LockOpts,
    ReserveOutcome,
};
use tollgate_domain::{AppError, DateRange, Reservation};
use tollgate_kv::Bus;
use tollgate_store::{CreateReservationParams, ReservationRepository};
use tracing::{info, warn};
use uuid::Uuid;

pub struct CreateReservationRequest {
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub range: DateRange,
    pub room_count: u32,
    /// Caller-supplied override for the idempotency key (spec.md §4.2
    /// "clients may pre-supply a key via header to override").
    pub client_key: Option<String>,
}

/// Orchestrates the Resource-Reservation Engine's write path (spec.md
/// §4.4): idempotency guard, advisory lock, the store's locked
/// read-compute-write transaction, cache invalidation, and publish —
/// each in the order the protocol's failure semantics depend on.
pub struct ReservationService<R: ReservationRepository> {
    store: R,
    dlm: DistributedLockManager,
    idem: IdempotencyCache,
    avail: AvailabilityCalculator,
    bus: Bus,
    hold_duration: ChronoDuration,
}

fn derive_key(req: &CreateReservationRequest, actor_id: Uuid) -> String {
    if let Some(k) = &req.client_key {
        return k.clone();
    }
    let tuple = format!(
        "{}|{}|{}|{}|{}",
        actor_id, req.resource_id, req.range.check_in, req.range.check_out, req.room_count
    );
    IdempotencyCache::derive_key(&tuple)
}

fn lock_error(e: CoordinationError) -> AppError {
    match e {
        CoordinationError::LockUnavailable { resource } => AppError::LockUnavailable { resource },
        other => AppError::internal("coordination", other),
    }
}

impl<R: ReservationRepository> ReservationService<R> {
    pub fn new(
        store: R,
        dlm: DistributedLockManager,
        idem: IdempotencyCache,
        avail: AvailabilityCalculator,
        bus: Bus,
        hold_duration: ChronoDuration,
    ) -> Self {
        Self {
            store,
            dlm,
            idem,
            avail,
            bus,
            hold_duration,
        }
    }

    pub async fn create_reservation(
        &self,
        req: CreateReservationRequest,
        actor_id: Uuid,
    ) -> Result<Reservation, AppError> {
        let key = derive_key(&req, actor_id);

        match self
            .idem
            .reserve(&key)
            .await
            .map_err(|e| AppError::internal("coordination", e.into()))?
        {
            ReserveOutcome::Completed(value) => {
                return serde_json::from_str(&value)
                    .map_err(|e| AppError::internal("coordination", e.into()));
            }
            ReserveOutcome::InProgress => {
                return Err(AppError::Conflict(
                    "reservation request already in progress".into(),
                ));
            }
            ReserveOutcome::Acquired => {}
        }

        let resource_key = format!(
            "resource:{}:{}:{}",
            req.resource_id, req.range.check_in, req.range.check_out
        );

        let opts = LockOpts {
            ttl: Duration::from_secs(30),
            retries: 3,
            base_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
        };

        let id = Uuid::new_v4();
        let range = req.range;
        let room_count = req.room_count;
        let user_id = req.user_id;
        let resource_id = req.resource_id;
        let now = Utc::now();
        let hold_duration = self.hold_duration;

        let result = self
            .dlm
            .with_lock(&resource_key, opts, lock_error, || async {
                self.store
                    .create_reservation(CreateReservationParams {
                        id,
                        user_id,
                        resource_id,
                        range,
                        room_count,
                        idempotency_key: key.clone(),
                        hold_duration,
                        now,
                    })
                    .await
            })
            .await;

        match result {
            Ok(reservation) => {
                if let Err(e) = self.avail.invalidate(resource_id, range).await {
                    warn!(resource_id = %resource_id, error = %e, "availability cache invalidation failed");
                }

                let payload = serde_json::json!({
                    "type": "reservation_created",
                    "reservation_id": reservation.id,
                    "resource_id": reservation.resource_id,
                    "room_count": reservation.room_count,
                });
                if let Err(e) = self
                    .bus
                    .publish(&format!("resource:{resource_id}"), &payload.to_string())
                    .await
                {
                    warn!(resource_id = %resource_id, error = %e, "reservation_created publish failed");
                }

                if let Err(e) = self.idem.publish(&key, &reservation).await {
                    warn!(error = %e, "idempotency publish failed after commit");
                }

                info!(reservation_id = %reservation.id, resource_id = %resource_id, "reservation created");
                Ok(reservation)
            }
            Err(e) => {
                if let Err(abandon_err) = self.idem.abandon(&key).await {
                    warn!(error = %abandon_err, "idempotency abandon failed");
                }
                Err(e)
            }
        }
    }

    pub async fn confirm(
        &self,
        reservation_id: Uuid,
        payment_id: &str,
    ) -> anyhow::Result<Option<Reservation>> {
        let confirmed = self.store.confirm_reservation(reservation_id, payment_id).await?;
        Ok(confirmed)
    }

    pub async fn cancel(&self, reservation_id: Uuid) -> anyhow::Result<Option<Reservation>> {
        let cancelled = self.store.cancel_reservation(reservation_id).await?;
        if let Some(r) = &cancelled {
            if let Err(e) = self.avail.invalidate(r.resource_id, r.range).await {
                warn!(resource_id = %r.resource_id, error = %e, "availability cache invalidation failed on cancel");
            }
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_request(client_key: Option<&str>) -> CreateReservationRequest {
        CreateReservationRequest {
            user_id: Uuid::new_v4(),
            resource_id: Uuid::new_v4(),
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            )
            .unwrap(),
            room_count: 2,
            client_key: client_key.map(String::from),
        }
    }

    #[test]
    fn derive_key_prefers_client_supplied_key() {
        let req = sample_request(Some("client-supplied"));
        assert_eq!(derive_key(&req, Uuid::new_v4()), "client-supplied");
    }

    #[test]
    fn derive_key_is_stable_for_identical_requests() {
        let actor = Uuid::new_v4();
        let req = sample_request(None);
        let a = derive_key(&req, actor);
        let b = derive_key(&req, actor);
        assert_eq!(a, b);
    }

    #[test]
    fn derive_key_differs_by_actor() {
        let req = sample_request(None);
        let a = derive_key(&req, Uuid::new_v4());
        let b = derive_key(&req, Uuid::new_v4());
        assert_ne!(a, b);
    }
}
