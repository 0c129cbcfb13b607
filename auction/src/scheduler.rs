use chrono::Utc;
use sqlx::{AnyPool, Row};
use tokio_util::sync::CancellationToken;
use tollgate_kv::{Bus, Kv};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ENDINGS_KEY: &str = "auction_endings";

/// Background closer for the Auction Scheduler (spec.md §4.7). Multiple
/// instances may run this tick concurrently; correctness comes from the
/// atomic `UPDATE … WHERE status='active' AND end_ms < now` below (at most
/// one instance's update affects a row, and a row mid-snipe-extension never
/// matches), the same CAS discipline the store crate's reservation sweep
/// relies on. The KV sorted set is best-effort: a missed tick just means the
/// auction closes on the next one.
pub async fn run(pool: AnyPool, kv: Kv, bus: Bus, interval: std::time::Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("auction scheduler shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = tick(&pool, &kv, &bus).await {
                    warn!(error = %e, "auction scheduler tick failed");
                }
            }
        }
    }
}

#[instrument(skip(pool, kv, bus))]
async fn tick(pool: &AnyPool, kv: &Kv, bus: &Bus) -> anyhow::Result<()> {
    let now = Utc::now().timestamp_millis() as f64;
    let due = kv.zrangebyscore(ENDINGS_KEY, f64::MIN, now).await?;

    for auction_id_str in due {
        let Ok(auction_id) = Uuid::parse_str(&auction_id_str) else {
            warn!(raw = %auction_id_str, "malformed auction id in auction_endings, dropping");
            kv.zrem(ENDINGS_KEY, &auction_id_str).await?;
            continue;
        };

        match close_auction(pool, auction_id).await {
            Ok(CloseOutcome::Closed(winner_id)) => {
                let payload = serde_json::json!({
                    "type": "auction_ended",
                    "auction_id": auction_id,
                    "winner_id": winner_id,
                });
                if let Err(e) = bus.publish(&format!("auction:{auction_id}"), &payload.to_string()).await {
                    warn!(auction_id = %auction_id, error = %e, "auction_ended publish failed");
                }
                kv.zrem(ENDINGS_KEY, &auction_id_str).await?;
                info!(auction_id = %auction_id, ?winner_id, "auction closed");
            }
            Ok(CloseOutcome::AlreadyEnded) => {
                // Another instance's UPDATE won; drop our best-effort entry.
                kv.zrem(ENDINGS_KEY, &auction_id_str).await?;
            }
            Ok(CloseOutcome::Extended(new_end_time)) => {
                // The `end_time < now` guard blocked us: a bid extended the
                // auction after ZRANGEBYSCORE read this entry. Re-pin the
                // entry to the real end time instead of dropping it, so the
                // extension still gets closed later.
                if let Err(e) = reschedule(kv, auction_id, new_end_time).await {
                    warn!(auction_id = %auction_id, error = %e, "failed to re-pin extended auction");
                }
            }
            Err(e) => {
                warn!(auction_id = %auction_id, error = %e, "auction close attempt failed");
            }
        }
    }

    Ok(())
}

enum CloseOutcome {
    Closed(Option<Uuid>),
    AlreadyEnded,
    Extended(chrono::DateTime<Utc>),
}

/// `winner_id` is the highest bid's bidder, if any bids were ever placed.
async fn close_auction(pool: &AnyPool, auction_id: Uuid) -> anyhow::Result<CloseOutcome> {
    let winner_row = sqlx::query(
        r#"SELECT bidder_id FROM bids WHERE auction_id = ? ORDER BY sequence_num DESC LIMIT 1;"#,
    )
    .bind(auction_id.to_string())
    .fetch_optional(pool)
    .await?;

    let winner_id = match &winner_row {
        Some(r) => {
            let s: String = r.try_get("bidder_id")?;
            Some(Uuid::parse_str(&s)?)
        }
        None => None,
    };

    let now_ms = Utc::now().timestamp_millis();

    // The `end_time < now` guard (spec.md §9's recommended fix for the
    // snipe race) stops this tick from closing an auction a concurrent
    // `placeBid` just extended between the ZRANGEBYSCORE read above and
    // this UPDATE reaching the database.
    let updated = sqlx::query(
        r#"UPDATE auctions SET status = 'ended', winner_id = ?
WHERE id = ? AND status = 'active' AND end_ms < ?;"#,
    )
    .bind(winner_id.map(|u| u.to_string()))
    .bind(auction_id.to_string())
    .bind(now_ms)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        let row = sqlx::query(r#"SELECT status, end_ms FROM auctions WHERE id = ?;"#)
            .bind(auction_id.to_string())
            .fetch_optional(pool)
            .await?;

        if let Some(row) = row {
            let status: String = row.try_get("status")?;
            if status == "active" {
                let end_ms: i64 = row.try_get("end_ms")?;
                if let Some(end_time) = chrono::DateTime::from_timestamp_millis(end_ms) {
                    return Ok(CloseOutcome::Extended(end_time));
                }
            }
        }

        return Ok(CloseOutcome::AlreadyEnded);
    }

    Ok(CloseOutcome::Closed(winner_id))
}

/// Reschedules `auction_id` to close at `new_end_time` — called after a
/// snipe-extension bid (spec.md §4.5 step 10, §4.7 "replacing it").
pub async fn reschedule(kv: &Kv, auction_id: Uuid, new_end_time: chrono::DateTime<Utc>) -> anyhow::Result<()> {
    kv.zadd(ENDINGS_KEY, &auction_id.to_string(), new_end_time.timestamp_millis() as f64).await?;
    Ok(())
}
