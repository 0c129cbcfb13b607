use std::sync::Arc;

use tokio::sync::mpsc;
use tollgate_auction::AuctionService;
use tollgate_coordination::{AvailabilityCalculator, DistributedLockManager, IdempotencyCache};
use tollgate_fanout::SessionManager;
use tollgate_kv::Kv;
use tollgate_reservation::ReservationService;
use tollgate_store::{Db, SqlxAuctionRepository, SqlxReservationRepository, SqlxVideoRepository};
use tollgate_trending::{TrendingService, ViewCounter};

use crate::config::AppConfig;
use crate::state_sync::AppStateSync;

/// Every long-lived handle the binary's request-handling surface and
/// background tasks share, constructed once at startup — same role as the
/// teacher's `init_store`/`start_*` helpers, collected into one place
/// instead of threaded through loose function arguments. Each background
/// loop that needs its own bus subscription (the auction scheduler, the
/// fan-out relay) opens a fresh `Kv::bus` connection in `main` rather than
/// sharing one from here, since a pub/sub connection can't be driven from
/// two tasks at once.
pub struct Services {
    pub reservations: Arc<ReservationService<SqlxReservationRepository>>,
    pub auctions: Arc<AuctionService<SqlxAuctionRepository>>,
    pub trending: Arc<TrendingService<SqlxVideoRepository>>,
    pub sessions: Arc<SessionManager>,
    pub room_ops_rx: mpsc::Receiver<tollgate_fanout::RoomOp>,
    pub pool: sqlx::AnyPool,
    pub kv: Kv,
    /// Handles the reservation expiry sweep needs directly, independent of
    /// `reservations` (the service owns its own copies internally).
    pub sweep_repo: SqlxReservationRepository,
    pub sweep_avail: AvailabilityCalculator,
}

impl Services {
    pub async fn build(cfg: &AppConfig) -> anyhow::Result<Self> {
        let db = Db::connect(&cfg.database_url).await?;
        db.migrate().await?;
        let pool = (*db.pool).clone();

        let kv = Kv::connect(&cfg.redis_url).await?;

        let dlm = DistributedLockManager::new(kv.clone());
        let avail = AvailabilityCalculator::new(kv.clone());

        let reservation_repo = SqlxReservationRepository::new(pool.clone());
        let sweep_repo = reservation_repo.clone();
        let sweep_avail = avail.clone();
        let reservations = Arc::new(ReservationService::new(
            reservation_repo,
            dlm.clone(),
            IdempotencyCache::new(kv.clone()),
            avail,
            Kv::bus(&cfg.redis_url).await?,
            cfg.reservation_hold,
        ));

        let auction_repo = Arc::new(SqlxAuctionRepository::new(pool.clone()));
        let auctions = Arc::new(AuctionService::new(
            (*auction_repo).clone(),
            dlm.clone(),
            IdempotencyCache::new(kv.clone()),
            kv.clone(),
            Kv::bus(&cfg.redis_url).await?,
        ));

        let view_counter = ViewCounter::new(
            kv.clone(),
            IdempotencyCache::new(kv.clone()),
            cfg.trending_bucket_minutes,
            cfg.trending_window_minutes,
        );
        let videos = SqlxVideoRepository::new(pool.clone());
        let trending = Arc::new(TrendingService::new(
            view_counter,
            videos,
            Kv::bus(&cfg.redis_url).await?,
            cfg.trending_top_k,
            cfg.trending_categories.clone(),
        ));

        let (room_ops_tx, room_ops_rx) = mpsc::channel(256);
        let state_sync = Arc::new(AppStateSync::new(auction_repo, trending.clone()));
        let sessions = Arc::new(SessionManager::new(room_ops_tx, state_sync));

        Ok(Self {
            reservations,
            auctions,
            trending,
            sessions,
            room_ops_rx,
            pool,
            kv,
            sweep_repo,
            sweep_avail,
        })
    }
}
