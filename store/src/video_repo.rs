use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tollgate_domain::Video;
use uuid::Uuid;

/// Lifetime view-count metadata backing the Trending Service's `videos`
/// reads (spec.md §4.6 "a global hash `views:total` tracks lifetime counts
/// for metadata reads" — the hash itself lives in the KV store; this is the
/// durable row each increment eventually reconciles against).
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn fetch(&self, id: Uuid) -> anyhow::Result<Option<Video>>;
    async fn increment_total_views(&self, id: Uuid, category: &str, delta: u64) -> anyhow::Result<()>;
}

pub struct SqlxVideoRepository {
    pool: AnyPool,
}

impl SqlxVideoRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoRepository for SqlxVideoRepository {
    async fn fetch(&self, id: Uuid) -> anyhow::Result<Option<Video>> {
        let row = sqlx::query(r#"SELECT id, category, total_views FROM videos WHERE id = ?;"#)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let category: String = r.try_get("category")?;
                let total_views: i64 = r.try_get("total_views")?;
                Ok(Some(Video {
                    id,
                    category,
                    total_views: total_views as u64,
                }))
            }
            None => Ok(None),
        }
    }

    async fn increment_total_views(&self, id: Uuid, category: &str, delta: u64) -> anyhow::Result<()> {
        let updated = sqlx::query(r#"UPDATE videos SET total_views = total_views + ? WHERE id = ?;"#)
            .bind(delta as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(r#"INSERT INTO videos (id, category, total_views) VALUES (?, ?, ?);"#)
                .bind(id.to_string())
                .bind(category)
                .bind(delta as i64)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}
