use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};
use tollgate_domain::{AppError, AuctionStatus, Bid, Money};
use tracing::instrument;
use uuid::Uuid;

/// Everything the bid-resolution logic (spec.md §4.5 steps 6-9) needs to
/// see under the auction row's lock. Plain data so the resolver that
/// consumes it can be a pure function, independent of sqlx.
#[derive(Clone, Debug)]
pub struct AuctionSnapshot {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub current_price: Money,
    pub bid_increment: Money,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub snipe_protection_minutes: i64,
    pub status: AuctionStatus,
    pub version: i64,
    pub next_sequence: i64,
    /// Other actors' active auto-bids, ordered by `max_amount` descending.
    pub competing_auto_bids: Vec<AutoBidRow>,
}

#[derive(Clone, Copy, Debug)]
pub struct AutoBidRow {
    pub bidder_id: Uuid,
    pub max_amount: Money,
}

/// What the resolver decides should happen, handed back to the repository
/// to apply atomically (spec.md §4.5 steps 8-10).
#[derive(Clone, Debug)]
pub struct BidPlan {
    pub bids: Vec<NewBid>,
    pub new_current_price: Money,
    pub deactivate_auto_bids: Vec<Uuid>,
    pub new_end_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct NewBid {
    pub id: Uuid,
    pub bidder_id: Uuid,
    pub amount: Money,
    pub is_auto_bid: bool,
}

#[derive(Clone, Debug)]
pub struct BidOutcome {
    pub bids: Vec<Bid>,
    pub current_price: Money,
    pub version: i64,
    pub end_time: DateTime<Utc>,
}

#[async_trait]
pub trait AuctionRepository: Send + Sync {
    /// Runs `resolver` against a row-locked snapshot of the auction and its
    /// competing auto-bids, then applies the `BidPlan` it returns in the
    /// same transaction. `resolver` stays a plain closure over owned data so
    /// the case A/B/tie-break logic in the auction crate can be unit-tested
    /// without a database at all.
    async fn run_bid_transaction(
        &self,
        auction_id: Uuid,
        actor_id: Uuid,
        resolver: Box<dyn FnOnce(AuctionSnapshot) -> Result<BidPlan, AppError> + Send>,
    ) -> Result<BidOutcome, AppError>;

    async fn upsert_auto_bid(
        &self,
        auction_id: Uuid,
        bidder_id: Uuid,
        max_amount: Money,
    ) -> anyhow::Result<()>;

    async fn deactivate_auto_bid(&self, auction_id: Uuid, bidder_id: Uuid) -> anyhow::Result<()>;

    async fn recent_bids(&self, auction_id: Uuid, limit: i64) -> anyhow::Result<Vec<Bid>>;
}

#[derive(Clone)]
pub struct SqlxAuctionRepository {
    pool: AnyPool,
}

impl SqlxAuctionRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuctionRepository for SqlxAuctionRepository {
    #[instrument(skip(self, resolver), fields(auction_id = %auction_id, actor_id = %actor_id))]
    async fn run_bid_transaction(
        &self,
        auction_id: Uuid,
        actor_id: Uuid,
        resolver: Box<dyn FnOnce(AuctionSnapshot) -> Result<BidPlan, AppError> + Send>,
    ) -> Result<BidOutcome, AppError> {
        tollgate_telemetry::warn_if_slow(
            "run_bid_transaction",
            std::time::Duration::from_millis(500),
            self.run_bid_transaction_inner(auction_id, actor_id, resolver),
        )
        .await
    }

    async fn upsert_auto_bid(
        &self,
        auction_id: Uuid,
        bidder_id: Uuid,
        max_amount: Money,
    ) -> anyhow::Result<()> {
        let updated = sqlx::query(
            r#"UPDATE auto_bids SET max_amount_cents = ?, is_active = true
WHERE auction_id = ? AND bidder_id = ?;"#,
        )
        .bind(max_amount.cents())
        .bind(auction_id.to_string())
        .bind(bidder_id.to_string())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"INSERT INTO auto_bids (auction_id, bidder_id, max_amount_cents, is_active)
VALUES (?, ?, ?, true);"#,
            )
            .bind(auction_id.to_string())
            .bind(bidder_id.to_string())
            .bind(max_amount.cents())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn deactivate_auto_bid(&self, auction_id: Uuid, bidder_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE auto_bids SET is_active = false WHERE auction_id = ? AND bidder_id = ?;"#,
        )
        .bind(auction_id.to_string())
        .bind(bidder_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_bids(&self, auction_id: Uuid, limit: i64) -> anyhow::Result<Vec<Bid>> {
        let rows = sqlx::query(
            r#"SELECT id, bidder_id, amount_cents,
CASE WHEN is_auto_bid THEN 1 ELSE 0 END AS auto_bid_i64,
sequence_num, created_ms
FROM bids WHERE auction_id = ? ORDER BY sequence_num DESC LIMIT ?;"#,
        )
        .bind(auction_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let id_str: String = r.try_get("id")?;
            let bidder_str: String = r.try_get("bidder_id")?;
            let amount_cents: i64 = r.try_get("amount_cents")?;
            let auto_bid_i64: i64 = r.try_get("auto_bid_i64")?;
            let sequence_num: i64 = r.try_get("sequence_num")?;
            let created_ms: i64 = r.try_get("created_ms")?;

            out.push(Bid {
                id: Uuid::parse_str(&id_str)?,
                auction_id,
                bidder_id: Uuid::parse_str(&bidder_str)?,
                amount: Money::from_cents(amount_cents),
                is_auto_bid: auto_bid_i64 != 0,
                sequence: sequence_num,
                created_at: DateTime::from_timestamp_millis(created_ms)
                    .ok_or_else(|| anyhow::anyhow!("invalid created_ms"))?,
            });
        }

        Ok(out)
    }
}

impl SqlxAuctionRepository {
    async fn run_bid_transaction_inner(
        &self,
        auction_id: Uuid,
        actor_id: Uuid,
        resolver: Box<dyn FnOnce(AuctionSnapshot) -> Result<BidPlan, AppError> + Send>,
    ) -> Result<BidOutcome, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::internal("db", e.into()))?;

        let row = sqlx::query(
            r#"SELECT id, seller_id, current_price_cents, bid_increment_cents, start_ms,
end_ms, snipe_protection_minutes, status, version
FROM auctions WHERE id = ?;"#,
        )
        .bind(auction_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::internal("db", e.into()))?;

        let row = row.ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;

        let seller_id_str: String = row.try_get("seller_id").map_err(|e| AppError::internal("db", e.into()))?;
        let seller_id = Uuid::parse_str(&seller_id_str).map_err(|e| AppError::internal("db", e.into()))?;

        if seller_id == actor_id {
            return Err(AppError::Forbidden("seller cannot bid on own auction".into()));
        }

        let status_str: String = row.try_get("status").map_err(|e| AppError::internal("db", e.into()))?;
        let status: AuctionStatus = status_str
            .parse()
            .map_err(|e: String| AppError::internal("db", anyhow::anyhow!(e)))?;

        let current_price = Money::from_cents(
            row.try_get::<i64, _>("current_price_cents")
                .map_err(|e| AppError::internal("db", e.into()))?,
        );
        let bid_increment = Money::from_cents(
            row.try_get::<i64, _>("bid_increment_cents")
                .map_err(|e| AppError::internal("db", e.into()))?,
        );
        let start_ms: i64 = row.try_get("start_ms").map_err(|e| AppError::internal("db", e.into()))?;
        let end_ms: i64 = row.try_get("end_ms").map_err(|e| AppError::internal("db", e.into()))?;
        let snipe_protection_minutes: i64 = row
            .try_get("snipe_protection_minutes")
            .map_err(|e| AppError::internal("db", e.into()))?;
        let version: i64 = row.try_get("version").map_err(|e| AppError::internal("db", e.into()))?;

        let auto_bid_rows = sqlx::query(
            r#"SELECT bidder_id, max_amount_cents FROM auto_bids
WHERE auction_id = ? AND is_active = true AND bidder_id != ?
ORDER BY max_amount_cents DESC;"#,
        )
        .bind(auction_id.to_string())
        .bind(actor_id.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::internal("db", e.into()))?;

        let mut competing_auto_bids = Vec::with_capacity(auto_bid_rows.len());
        for r in &auto_bid_rows {
            let bidder_str: String = r.try_get("bidder_id").map_err(|e| AppError::internal("db", e.into()))?;
            let max_amount_cents: i64 = r
                .try_get("max_amount_cents")
                .map_err(|e| AppError::internal("db", e.into()))?;
            competing_auto_bids.push(AutoBidRow {
                bidder_id: Uuid::parse_str(&bidder_str).map_err(|e| AppError::internal("db", e.into()))?,
                max_amount: Money::from_cents(max_amount_cents),
            });
        }

        let next_sequence_row = sqlx::query(
            r#"SELECT COALESCE(MAX(sequence_num), 0) + 1 AS next_seq FROM bids WHERE auction_id = ?;"#,
        )
        .bind(auction_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::internal("db", e.into()))?;
        let next_sequence: i64 = next_sequence_row
            .try_get("next_seq")
            .map_err(|e| AppError::internal("db", e.into()))?;

        let snapshot = AuctionSnapshot {
            id: auction_id,
            seller_id,
            current_price,
            bid_increment,
            start_time: DateTime::from_timestamp_millis(start_ms)
                .ok_or_else(|| AppError::internal("db", anyhow::anyhow!("invalid start_ms")))?,
            end_time: DateTime::from_timestamp_millis(end_ms)
                .ok_or_else(|| AppError::internal("db", anyhow::anyhow!("invalid end_ms")))?,
            snipe_protection_minutes,
            status,
            version,
            next_sequence,
            competing_auto_bids,
        };

        let end_time_before = snapshot.end_time;
        let plan = resolver(snapshot)?;

        let mut bids_out = Vec::with_capacity(plan.bids.len());
        let created_at = Utc::now();
        for (i, nb) in plan.bids.iter().enumerate() {
            let sequence = next_sequence + i as i64;
            sqlx::query(
                r#"INSERT INTO bids
(id, auction_id, bidder_id, amount_cents, is_auto_bid, sequence_num, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?);"#,
            )
            .bind(nb.id.to_string())
            .bind(auction_id.to_string())
            .bind(nb.bidder_id.to_string())
            .bind(nb.amount.cents())
            .bind(nb.is_auto_bid)
            .bind(sequence)
            .bind(created_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::internal("db", e.into()))?;

            bids_out.push(Bid {
                id: nb.id,
                auction_id,
                bidder_id: nb.bidder_id,
                amount: nb.amount,
                is_auto_bid: nb.is_auto_bid,
                sequence,
                created_at,
            });
        }

        let new_end_time = plan.new_end_time.unwrap_or(end_time_before);

        sqlx::query(
            r#"UPDATE auctions SET current_price_cents = ?, version = version + 1, end_ms = ?
WHERE id = ?;"#,
        )
        .bind(plan.new_current_price.cents())
        .bind(new_end_time.timestamp_millis())
        .bind(auction_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::internal("db", e.into()))?;

        for bidder_id in &plan.deactivate_auto_bids {
            sqlx::query(
                r#"UPDATE auto_bids SET is_active = false WHERE auction_id = ? AND bidder_id = ?;"#,
            )
            .bind(auction_id.to_string())
            .bind(bidder_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::internal("db", e.into()))?;
        }

        tx.commit().await.map_err(|e| AppError::internal("db", e.into()))?;

        Ok(BidOutcome {
            bids: bids_out,
            current_price: plan.new_current_price,
            version: version + 1,
            end_time: new_end_time,
        })
    }
}
