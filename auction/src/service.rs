use std::time::Duration;

use chrono::Utc;
use tollgate_coordination::{CoordinationError, DistributedLockManager, IdempotencyCache, LockOpts, ReserveOutcome};
use tollgate_domain::{AppError, Money};
use tollgate_kv::{Bus, Kv};
use tollgate_store::{AuctionRepository, AuctionSnapshot, BidOutcome, BidPlan};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::resolver::{resolve_auto_bid, resolve_bid};
use crate::scheduler;

const RATE_LIMIT_WINDOW_SECS: i64 = 60;
const RATE_LIMIT_MAX_BIDS: i64 = 10;
const CURRENT_BID_CACHE_TTL_MS: u64 = 30_000;

pub struct PlaceBidRequest {
    pub auction_id: Uuid,
    pub amount: Money,
    /// Caller-supplied override for the idempotency key.
    pub client_key: Option<String>,
}

fn lock_error(e: CoordinationError) -> AppError {
    match e {
        CoordinationError::LockUnavailable { resource } => AppError::LockUnavailable { resource },
        other => AppError::internal("coordination", other),
    }
}

fn recent_bids_cache_key(auction_id: Uuid) -> String {
    format!("auction:bids:{auction_id}")
}

fn current_bid_cache_key(auction_id: Uuid) -> String {
    format!("auction:current_bid:{auction_id}")
}

fn rate_limit_key(actor_id: Uuid) -> String {
    format!("rate:{actor_id}:bid")
}

/// Orchestrates the Auction-Bid State Machine's write paths (spec.md
/// §4.5): rate limiting and idempotency ahead of the per-auction lock, the
/// store's locked read-resolve-apply transaction, then cache invalidation,
/// publish, and per-outbid notification — mirroring the same
/// logged-not-fatal treatment of side effects the Resource-Reservation
/// Engine uses for its own write path.
pub struct AuctionService<A: AuctionRepository> {
    store: A,
    dlm: DistributedLockManager,
    idem: IdempotencyCache,
    kv: Kv,
    bus: Bus,
}

impl<A: AuctionRepository> AuctionService<A> {
    pub fn new(store: A, dlm: DistributedLockManager, idem: IdempotencyCache, kv: Kv, bus: Bus) -> Self {
        Self { store, dlm, idem, kv, bus }
    }

    #[instrument(skip(self, req), fields(auction_id = %req.auction_id, actor_id = %actor_id))]
    pub async fn place_bid(&self, req: PlaceBidRequest, actor_id: Uuid) -> Result<BidOutcome, AppError> {
        let rate_key = rate_limit_key(actor_id);
        let count = self
            .kv
            .incr_with_window(&rate_key, RATE_LIMIT_WINDOW_SECS)
            .await
            .map_err(|e| AppError::internal("kv", e))?;
        if count > RATE_LIMIT_MAX_BIDS {
            return Err(AppError::RateLimited {
                retry_after_ms: (RATE_LIMIT_WINDOW_SECS * 1000) as u64,
            });
        }

        let key = req.client_key.clone().unwrap_or_else(|| {
            let bucket = Utc::now().timestamp();
            let tuple = format!("{}|{}|{}|{}", req.auction_id, actor_id, req.amount.cents(), bucket);
            IdempotencyCache::derive_key(&tuple)
        });

        match self.idem.reserve(&key).await.map_err(|e| AppError::internal("coordination", e))? {
            ReserveOutcome::Completed(value) => {
                return serde_json::from_str::<StoredOutcome>(&value)
                    .map(Into::into)
                    .map_err(|e| AppError::internal("coordination", e));
            }
            ReserveOutcome::InProgress => {
                return Err(AppError::Conflict("bid already in progress".into()));
            }
            ReserveOutcome::Acquired => {}
        }

        let auction_id = req.auction_id;
        let amount = req.amount;
        let opts = LockOpts {
            ttl: Duration::from_secs(5),
            ..Default::default()
        };

        let result = self
            .dlm
            .with_lock(&format!("auction:{auction_id}"), opts, lock_error, || async {
                let resolver = Box::new(move |snapshot: AuctionSnapshot| resolve_bid(&snapshot, actor_id, amount, Utc::now()));
                self.store.run_bid_transaction(auction_id, actor_id, resolver).await
            })
            .await;

        match result {
            Ok(outcome) => {
                self.after_commit(auction_id, &outcome).await;

                if let Err(e) = self.idem.publish(&key, &StoredOutcome::from(&outcome)).await {
                    warn!(error = %e, "idempotency publish failed after bid commit");
                }

                info!(auction_id = %auction_id, bidder_id = %actor_id, amount = %amount, "bid accepted");
                Ok(outcome)
            }
            Err(e) => {
                if let Err(abandon_err) = self.idem.abandon(&key).await {
                    warn!(error = %abandon_err, "idempotency abandon failed");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(auction_id = %auction_id, actor_id = %actor_id))]
    pub async fn set_auto_bid(&self, auction_id: Uuid, actor_id: Uuid, max_amount: Money) -> Result<Option<BidOutcome>, AppError> {
        self.store
            .upsert_auto_bid(auction_id, actor_id, max_amount)
            .await
            .map_err(|e| AppError::internal("db", e))?;

        let opts = LockOpts {
            ttl: Duration::from_secs(5),
            ..Default::default()
        };

        let outcome = self
            .dlm
            .with_lock(&format!("auction:{auction_id}"), opts, lock_error, || async {
                let resolver: Box<dyn FnOnce(AuctionSnapshot) -> Result<BidPlan, AppError> + Send> =
                    Box::new(move |snapshot: AuctionSnapshot| resolve_auto_bid(&snapshot, actor_id, max_amount, Utc::now()));
                self.store.run_bid_transaction(auction_id, actor_id, resolver).await
            })
            .await?;

        if !outcome.bids.is_empty() {
            self.after_commit(auction_id, &outcome).await;
            return Ok(Some(outcome));
        }

        Ok(None)
    }

    #[instrument(skip(self), fields(auction_id = %auction_id, actor_id = %actor_id))]
    pub async fn cancel_auto_bid(&self, auction_id: Uuid, actor_id: Uuid) -> Result<(), AppError> {
        self.store
            .deactivate_auto_bid(auction_id, actor_id)
            .await
            .map_err(|e| AppError::internal("db", e))
    }

    #[instrument(skip(self), fields(auction_id = %auction_id))]
    pub async fn recent_bids(&self, auction_id: Uuid, limit: i64) -> Result<Vec<tollgate_domain::Bid>, AppError> {
        let cache_key = recent_bids_cache_key(auction_id);
        if let Ok(Some(raw)) = self.kv.get(&cache_key).await {
            if let Ok(bids) = serde_json::from_str(&raw) {
                return Ok(bids);
            }
        }

        let bids = self
            .store
            .recent_bids(auction_id, limit)
            .await
            .map_err(|e| AppError::internal("db", e))?;

        if let Ok(raw) = serde_json::to_string(&bids) {
            if let Err(e) = self.kv.set_px(&cache_key, &raw, 30_000).await {
                warn!(auction_id = %auction_id, error = %e, "bid history cache write failed");
            }
        }

        Ok(bids)
    }

    /// Invalidates the bid history cache, refreshes the last-accepted-bid
    /// cache, re-pins the scheduler's KV entry to the auction's current
    /// `end_time` (a no-op unless this bid triggered a snipe extension),
    /// publishes `new_bid`, and notifies whichever bidder from this
    /// transaction didn't end up holding the winning amount (spec.md §4.5
    /// step 12 "record per-outbid-user notifications").
    async fn after_commit(&self, auction_id: Uuid, outcome: &BidOutcome) {
        if let Err(e) = self.kv.del(&recent_bids_cache_key(auction_id)).await {
            warn!(auction_id = %auction_id, error = %e, "bid history cache invalidation failed");
        }

        if let Ok(raw) = serde_json::to_string(&outcome.current_price) {
            if let Err(e) = self
                .kv
                .set_px(&current_bid_cache_key(auction_id), &raw, CURRENT_BID_CACHE_TTL_MS)
                .await
            {
                warn!(auction_id = %auction_id, error = %e, "current bid cache write failed");
            }
        }

        if let Err(e) = scheduler::reschedule(&self.kv, auction_id, outcome.end_time).await {
            warn!(auction_id = %auction_id, error = %e, "auction scheduler reschedule failed");
        }

        let payload = serde_json::json!({
            "type": "new_bid",
            "auction_id": auction_id,
            "current_price": outcome.current_price,
            "version": outcome.version,
            "end_time": outcome.end_time,
        });
        if let Err(e) = self.bus.publish(&format!("auction:{auction_id}"), &payload.to_string()).await {
            warn!(auction_id = %auction_id, error = %e, "new_bid publish failed");
        }

        for bid in &outcome.bids {
            if bid.amount != outcome.current_price {
                let notice = serde_json::json!({
                    "type": "outbid",
                    "auction_id": auction_id,
                    "current_price": outcome.current_price,
                });
                if let Err(e) = self.bus.publish(&format!("user:{}", bid.bidder_id), &notice.to_string()).await {
                    warn!(bidder_id = %bid.bidder_id, error = %e, "outbid notification publish failed");
                }
            }
        }
    }
}

/// Serializable projection of `BidOutcome` used for idempotency replay —
/// `BidOutcome` itself stays store-crate-local since it isn't otherwise
/// meant to cross a serialization boundary.
#[derive(serde::Serialize, serde::Deserialize)]
struct StoredOutcome {
    bids: Vec<tollgate_domain::Bid>,
    current_price: Money,
    version: i64,
    end_time: chrono::DateTime<Utc>,
}

impl From<&BidOutcome> for StoredOutcome {
    fn from(o: &BidOutcome) -> Self {
        Self {
            bids: o.bids.clone(),
            current_price: o.current_price,
            version: o.version,
            end_time: o.end_time,
        }
    }
}

impl From<StoredOutcome> for BidOutcome {
    fn from(s: StoredOutcome) -> Self {
        Self {
            bids: s.bids,
            current_price: s.current_price,
            version: s.version,
            end_time: s.end_time,
        }
    }
}
