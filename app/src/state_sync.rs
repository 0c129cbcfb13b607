use std::sync::Arc;

use async_trait::async_trait;
use tollgate_fanout::StateSyncProvider;
use tollgate_store::{AuctionRepository, SqlxAuctionRepository, VideoRepository};
use tollgate_trending::TrendingService;
use uuid::Uuid;

const RECENT_BIDS_LIMIT: i64 = 20;

/// Loads the snapshot a newly-subscribing fan-out session needs (spec.md
/// §4.8 "initial STATE_SYNC on subscription, loaded by the calling app from
/// the Store"). Dispatches on the room's prefix, the same `kind:id` room
/// naming spec.md §4.8 uses (`resource:<id>`, `auction:<id>`,
/// `trending:<category>`).
pub struct AppStateSync<V: VideoRepository> {
    auctions: Arc<SqlxAuctionRepository>,
    trending: Arc<TrendingService<V>>,
}

impl<V: VideoRepository> AppStateSync<V> {
    pub fn new(auctions: Arc<SqlxAuctionRepository>, trending: Arc<TrendingService<V>>) -> Self {
        Self { auctions, trending }
    }
}

#[async_trait]
impl<V: VideoRepository + Send + Sync> StateSyncProvider for AppStateSync<V> {
    async fn state_sync(&self, room: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let Some((kind, id)) = room.split_once(':') else {
            return Ok(None);
        };

        match kind {
            "auction" => {
                let Ok(auction_id) = id.parse::<Uuid>() else {
                    return Ok(None);
                };
                let bids = self.auctions.recent_bids(auction_id, RECENT_BIDS_LIMIT).await?;
                Ok(Some(serde_json::json!({ "recent_bids": bids })))
            }
            "trending" => Ok(self
                .trending
                .snapshot(id)
                .map(|snapshot| serde_json::to_value(snapshot.as_ref()).unwrap_or(serde_json::Value::Null))),
            // Resource-room state sync needs a check-in/check-out range the
            // room name doesn't carry; subscribers fetch availability via
            // the reservation engine's own read path instead.
            "resource" => Ok(None),
            _ => Ok(None),
        }
    }
}
