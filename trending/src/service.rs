use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tollgate_kv::Bus;
use tollgate_store::VideoRepository;
use tracing::{info, warn};
use uuid::Uuid;

use crate::counter::ViewCounter;

#[derive(Clone, Debug, Serialize)]
pub struct TrendingEntry {
    pub video_id: Uuid,
    pub window_views: f64,
    pub total_views: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrendingSnapshot {
    pub videos: Vec<TrendingEntry>,
    pub updated_at: DateTime<Utc>,
}

/// Recomputes and fans out top-K snapshots per category on a fixed
/// interval (spec.md §4.6 "Trending Service loop"). Holds the latest
/// snapshot per category in memory so a fan-out session's initial
/// `STATE_SYNC` can be served without round-tripping to the KV store.
pub struct TrendingService<V: VideoRepository> {
    counter: ViewCounter,
    videos: V,
    bus: Bus,
    k: usize,
    categories: Vec<String>,
    snapshots: RwLock<HashMap<String, Arc<TrendingSnapshot>>>,
}

impl<V: VideoRepository> TrendingService<V> {
    pub fn new(counter: ViewCounter, videos: V, bus: Bus, k: usize, categories: Vec<String>) -> Self {
        Self {
            counter,
            videos,
            bus,
            k,
            categories,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self, category: &str) -> Option<Arc<TrendingSnapshot>> {
        self.snapshots.read().get(category).cloned()
    }

    pub async fn recompute(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        for category in &self.categories {
            let pairs = self.counter.top_k(self.k, category, now).await?;

            let mut entries = Vec::with_capacity(pairs.len());
            for (video_id, window_views) in pairs {
                let total_views = match self.videos.fetch(video_id).await {
                    Ok(Some(video)) => video.total_views,
                    Ok(None) => 0,
                    Err(e) => {
                        warn!(video_id = %video_id, error = %e, "video metadata lookup failed during recompute");
                        0
                    }
                };
                entries.push(TrendingEntry {
                    video_id,
                    window_views,
                    total_views,
                });
            }

            let snapshot = Arc::new(TrendingSnapshot {
                videos: entries,
                updated_at: now,
            });
            self.snapshots.write().insert(category.clone(), snapshot.clone());

            let payload = serde_json::json!({
                "type": "trending-update",
                "category": category,
                "videos": snapshot.videos,
                "updated_at": snapshot.updated_at,
            });
            if let Err(e) = self.bus.publish(&format!("trending:{category}"), &payload.to_string()).await {
                warn!(category = %category, error = %e, "trending-update publish failed");
            }
        }

        Ok(())
    }

    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("trending recompute loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.recompute(Utc::now()).await {
                        warn!(error = %e, "trending recompute failed");
                    }
                }
            }
        }
    }
}
