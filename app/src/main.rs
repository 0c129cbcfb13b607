mod config;
mod services;
mod state_sync;

use tokio_util::sync::CancellationToken;
use tollgate_kv::Kv;

use config::AppConfig;
use services::Services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    tollgate_telemetry::init_tracing(is_production);

    tracing::info!("starting tollgate core");

    let cfg = AppConfig::from_env();
    let services = Services::build(&cfg).await?;
    let cancel = CancellationToken::new();

    let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    {
        let repo = services.sweep_repo;
        let avail = services.sweep_avail;
        let interval = cfg.reservation_sweep_interval;
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            tollgate_reservation::sweep::run(repo, avail, interval, token).await;
        }));
    }

    {
        let pool = services.pool.clone();
        let kv = services.kv.clone();
        let bus = Kv::bus(&cfg.redis_url).await?;
        let interval = cfg.auction_scheduler_interval;
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            tollgate_auction::scheduler::run(pool, kv, bus, interval, token).await;
        }));
    }

    {
        let trending = services.trending.clone();
        let interval = cfg.trending_update_interval;
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            trending.run(interval, token).await;
        }));
    }

    {
        let sessions = services.sessions.clone();
        let interval = cfg.heartbeat_interval;
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            tollgate_fanout::heartbeat::run(sessions, interval, token).await;
        }));
    }

    {
        let bus = Kv::bus(&cfg.redis_url).await?;
        let sessions = services.sessions.clone();
        let room_ops_rx = services.room_ops_rx;
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = tollgate_fanout::bus_relay::run(bus, sessions, room_ops_rx, token).await {
                tracing::error!(error = %e, "bus relay exited with an error");
            }
        }));
    }

    // Kept alive so request handlers (out of scope per spec.md §1) would
    // have somewhere to reach for them; unused for now beyond construction.
    let _reservations = services.reservations;
    let _auctions = services.auctions;

    tracing::info!("tollgate core started; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping background tasks");
    cancel.cancel();

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
