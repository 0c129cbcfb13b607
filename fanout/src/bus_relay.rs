use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tollgate_kv::Bus;
use tracing::{info, warn};

use crate::manager::{RoomOp, SessionManager};

/// Keeps this instance's pub/sub subscription in sync with which rooms
/// have at least one local subscriber, and forwards every message it
/// receives to the manager's local broadcast (spec.md §4.8 "every
/// instance subscribes to the pub/sub channel for each active room").
///
/// Runs against a single dedicated `Subscription` connection, so room
/// (un)subscription requests come in over `room_ops` rather than being
/// called directly — a redis pub/sub connection can't be driven from two
/// tasks at once.
pub async fn run(
    bus: Bus,
    manager: Arc<SessionManager>,
    mut room_ops: mpsc::Receiver<RoomOp>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut subscription = bus.subscribe(&[]).await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("bus relay shutting down");
                return Ok(());
            }
            op = room_ops.recv() => {
                match op {
                    Some(RoomOp::Subscribe(room)) => {
                        if let Err(e) = subscription.subscribe(&room).await {
                            warn!(room = %room, error = %e, "bus subscribe failed");
                        }
                    }
                    Some(RoomOp::Unsubscribe(room)) => {
                        if let Err(e) = subscription.unsubscribe(&room).await {
                            warn!(room = %room, error = %e, "bus unsubscribe failed");
                        }
                    }
                    None => {
                        info!("room op channel closed, bus relay shutting down");
                        return Ok(());
                    }
                }
            }
            msg = subscription.next() => {
                match msg {
                    Some((channel, payload)) => manager.broadcast_local(&channel, &payload).await,
                    None => {
                        warn!("bus subscription stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}
