use std::sync::Arc;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

#[derive(Clone)]
pub struct Db {
    pub pool: Arc<AnyPool>,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        if database_url.starts_with("sqlite") {
            // sqlite otherwise fails a blocked writer immediately
            // (SQLITE_BUSY) instead of waiting for the holder to commit,
            // which is what the reservation transaction's resource-row
            // write lock relies on for mutual exclusion.
            sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        }

        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        crate::schema::migrate(&self.pool).await
    }
}
