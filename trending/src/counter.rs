use chrono::{DateTime, Utc};
use tollgate_coordination::{IdempotencyCache, ReserveOutcome};
use tollgate_kv::Kv;
use uuid::Uuid;

/// Extra minutes of TTL past the trending window so a bucket a slow
/// reader is still scanning doesn't expire mid-read (spec.md §4.6
/// `(windowMinutes + buffer)·60 s`).
const BUFFER_MINUTES: i64 = 5;

pub struct RecordViewRequest {
    pub video_id: Uuid,
    pub category: String,
    pub client_key: Option<String>,
}

/// Top-K Windowed Counter (spec.md §4.6): bucketed sorted-set view
/// recording and the top-K read, shared by every category plus the
/// category-agnostic `all` view.
#[derive(Clone)]
pub struct ViewCounter {
    kv: Kv,
    idem: IdempotencyCache,
    bucket_minutes: i64,
    window_minutes: i64,
}

impl ViewCounter {
    pub fn new(kv: Kv, idem: IdempotencyCache, bucket_minutes: i64, window_minutes: i64) -> Self {
        Self {
            kv,
            idem,
            bucket_minutes,
            window_minutes,
        }
    }

    fn current_bucket(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.bucket_minutes * 60)
    }

    fn bucket_keys(category: &str, bucket: i64) -> (String, String) {
        (format!("views:bucket:all:{bucket}"), format!("views:bucket:{category}:{bucket}"))
    }

    /// Idempotent per `(video, category, 10-second bucket)` unless the
    /// caller supplies its own request id. The two category writes, their
    /// TTL refresh, and the lifetime-views increment go out in a single
    /// `Kv::record_view_batch` pipeline call, the "pipeline-batched"
    /// contract spec.md §4.6 asks for.
    pub async fn record_view(&self, req: RecordViewRequest, now: DateTime<Utc>) -> anyhow::Result<()> {
        let key = req.client_key.clone().unwrap_or_else(|| {
            let ten_sec_bucket = now.timestamp().div_euclid(10);
            IdempotencyCache::derive_key(&format!("{}|{}|{}", req.video_id, req.category, ten_sec_bucket))
        });

        match self.idem.reserve(&key).await? {
            ReserveOutcome::Completed(_) | ReserveOutcome::InProgress => return Ok(()),
            ReserveOutcome::Acquired => {}
        }

        let bucket = self.current_bucket(now);
        let (all_key, category_key) = Self::bucket_keys(&req.category, bucket);
        let ttl_secs = (self.window_minutes + BUFFER_MINUTES) * 60;
        let member = req.video_id.to_string();

        self.kv
            .record_view_batch(&all_key, &category_key, &member, ttl_secs, "views:total")
            .await?;

        self.idem.publish(&key, &true).await?;
        Ok(())
    }

    /// spec.md §4.6 `topK`: narrow to the existing buckets in the window,
    /// then either read the lone survivor directly or merge them with a
    /// throwaway `ZUNIONSTORE` key.
    pub async fn top_k(&self, k: usize, category: &str, now: DateTime<Utc>) -> anyhow::Result<Vec<(Uuid, f64)>> {
        let bucket_count = (self.window_minutes as f64 / self.bucket_minutes as f64).ceil() as i64;
        let current = self.current_bucket(now);

        let mut existing = Vec::new();
        for i in 0..bucket_count {
            let key = format!("views:bucket:{category}:{}", current - i);
            if self.kv.exists(&key).await? {
                existing.push(key);
            }
        }

        let pairs = match existing.as_slice() {
            [] => vec![],
            [single] => self.kv.zrange_rev_withscores(single, k).await?,
            _ => {
                let temp_key = format!("views:topk:tmp:{}", Uuid::new_v4());
                self.kv.zunionstore(&temp_key, &existing).await?;
                let result = self.kv.zrange_rev_withscores(&temp_key, k).await?;
                self.kv.del(&temp_key).await?;
                result
            }
        };

        Ok(pairs
            .into_iter()
            .filter_map(|(member, score)| Uuid::parse_str(&member).ok().map(|id| (id, score)))
            .collect())
    }
}
