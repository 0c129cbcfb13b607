use std::time::Duration;

/// Process-wide configuration, loaded from the environment with the same
/// struct-of-fields-plus-defaults shape as the teacher's `config.rs`.
/// Values the services bake in as constants (lock TTLs, idempotency TTLs)
/// aren't duplicated here — only the knobs this binary actually threads
/// through at construction time.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,

    /// Resource-Reservation Engine hold duration (spec.md §4.4 `reservedUntil`).
    pub reservation_hold: chrono::Duration,
    pub reservation_sweep_interval: Duration,

    /// Auction scheduler tick cadence (spec.md §4.7).
    pub auction_scheduler_interval: Duration,

    // Top-K Windowed Counter / Trending (spec.md §4.6).
    pub trending_bucket_minutes: i64,
    pub trending_window_minutes: i64,
    pub trending_top_k: usize,
    pub trending_categories: Vec<String>,
    pub trending_update_interval: Duration,

    /// Fan-out Gateway liveness sweep cadence (spec.md §4.8 `heartbeatInterval`).
    pub heartbeat_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());

        Self {
            database_url,
            redis_url,

            reservation_hold: chrono::Duration::minutes(15),
            reservation_sweep_interval: Duration::from_secs(60),

            auction_scheduler_interval: Duration::from_secs(1),

            trending_bucket_minutes: 1,
            trending_window_minutes: 5,
            trending_top_k: 10,
            trending_categories: vec!["all".to_string()],
            trending_update_interval: Duration::from_secs(5),

            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
