use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::{self, InboundMessage, ServerMessage, Session};

/// Loads the snapshot a newly subscribing session needs to catch up on a
/// room (spec.md §4.8 "initial STATE_SYNC on subscription (loaded by the
/// calling app from the Store)"). Implemented by whichever app wires this
/// gateway up against `tollgate-store`/`tollgate-trending`.
#[async_trait]
pub trait StateSyncProvider: Send + Sync {
    async fn state_sync(&self, room: &str) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Told to the bus relay task when a room gains its first local
/// subscriber or loses its last one, so it can join/leave that pub/sub
/// channel without the gateway holding the subscription connection
/// itself (see `bus_relay`).
#[derive(Debug)]
pub enum RoomOp {
    Subscribe(String),
    Unsubscribe(String),
}

/// Session registry and room membership table for the Fan-out Gateway
/// (spec.md §4.8). Guarded by `parking_lot::RwLock` the same way the
/// teacher's session cache is, since membership lookups are
/// read-dominated and never held across an `.await`.
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
    room_ops: mpsc::Sender<RoomOp>,
    state_sync: Arc<dyn StateSyncProvider>,
}

impl SessionManager {
    pub fn new(room_ops: mpsc::Sender<RoomOp>, state_sync: Arc<dyn StateSyncProvider>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            room_ops,
            state_sync,
        }
    }

    /// Registers a newly-accepted connection and acknowledges it with a
    /// `connected` message (spec.md §6's wire-message set) before it
    /// subscribes to anything.
    pub async fn register(&self, session: Arc<Session>) {
        let session_id = session.id;
        self.sessions.write().insert(session_id, session.clone());

        if let Err(e) = session
            .send(&serde_json::to_string(&ServerMessage::Connected).unwrap())
            .await
        {
            warn!(session_id = %session_id, error = %e, "connected delivery failed");
        }
    }

    /// Removes the session and drops its membership from every room,
    /// notifying the relay for any room this was the last subscriber of.
    pub fn unregister(&self, session_id: Uuid) {
        self.sessions.write().remove(&session_id);

        let mut emptied = Vec::new();
        {
            let mut rooms = self.rooms.write();
            rooms.retain(|room, members| {
                members.remove(&session_id);
                if members.is_empty() {
                    emptied.push(room.clone());
                    false
                } else {
                    true
                }
            });
        }
        for room in emptied {
            self.notify_room_op(RoomOp::Unsubscribe(room));
        }
    }

    /// Parses `raw` and dispatches it, or sends back `ERROR` if it
    /// doesn't match one of the recognized inbound shapes.
    pub async fn handle_raw(&self, session_id: Uuid, raw: &str) {
        match session::parse_inbound(raw) {
            Ok(msg) => self.handle_inbound(session_id, msg).await,
            Err(reason) => {
                if let Some(session) = self.sessions.read().get(&session_id).cloned() {
                    let err = ServerMessage::Error { reason: &reason };
                    if let Err(e) = session.send(&serde_json::to_string(&err).unwrap()).await {
                        warn!(session_id = %session_id, error = %e, "error reply delivery failed");
                    }
                }
            }
        }
    }

    pub async fn handle_inbound(&self, session_id: Uuid, msg: InboundMessage) {
        let Some(session) = self.sessions.read().get(&session_id).cloned() else {
            return;
        };
        session.mark_alive();

        match msg {
            InboundMessage::Subscribe { room } => self.subscribe(&session, room).await,
            InboundMessage::Unsubscribe { room } => self.unsubscribe(session_id, &room),
            InboundMessage::Ping => {
                if let Err(e) = session.send(&serde_json::to_string(&ServerMessage::Pong).unwrap()).await {
                    warn!(session_id = %session_id, error = %e, "pong delivery failed");
                }
            }
        }
    }

    async fn subscribe(&self, session: &Arc<Session>, room: String) {
        let newly_active = {
            let mut rooms = self.rooms.write();
            let members = rooms.entry(room.clone()).or_default();
            let was_active = !members.is_empty();
            members.insert(session.id);
            !was_active
        };

        if newly_active {
            self.notify_room_op(RoomOp::Subscribe(room.clone()));
        }

        match self.state_sync.state_sync(&room).await {
            Ok(Some(payload)) => {
                let msg = ServerMessage::StateSync { room: &room, payload };
                if let Err(e) = session.send(&serde_json::to_string(&msg).unwrap()).await {
                    warn!(session_id = %session.id, room = %room, error = %e, "state_sync delivery failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(room = %room, error = %e, "state_sync lookup failed"),
        }
    }

    fn unsubscribe(&self, session_id: Uuid, room: &str) {
        let emptied = {
            let mut rooms = self.rooms.write();
            match rooms.get_mut(room) {
                Some(members) => {
                    members.remove(&session_id);
                    if members.is_empty() {
                        rooms.remove(room);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if emptied {
            self.notify_room_op(RoomOp::Unsubscribe(room.to_string()));
        }
    }

    fn notify_room_op(&self, op: RoomOp) {
        if self.room_ops.try_send(op).is_err() {
            warn!("room op channel full or closed, bus subscription may lag");
        }
    }

    /// Delivers a bus payload to every local session subscribed to
    /// `room`, dropping sessions with no local subscribers (spec.md §4.8
    /// "non-subscribers drop").
    pub async fn broadcast_local(&self, room: &str, payload: &str) {
        let members: Vec<Uuid> = match self.rooms.read().get(room) {
            Some(set) => set.iter().copied().collect(),
            None => return,
        };

        for id in members {
            let Some(session) = self.sessions.read().get(&id).cloned() else {
                continue;
            };
            if let Err(e) = session.send(payload).await {
                warn!(session_id = %id, room = %room, error = %e, "broadcast delivery failed");
            }
        }
    }

    /// Heartbeat sweep (spec.md §4.8): ping every session, then terminate
    /// whichever one was already not-alive going into this tick.
    pub async fn sweep(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        let mut dead = Vec::new();

        for session in sessions {
            if !session.take_alive() {
                dead.push(session.id);
                continue;
            }
            if let Err(e) = session.send(&serde_json::to_string(&ServerMessage::Pong).unwrap()).await {
                warn!(session_id = %session.id, error = %e, "heartbeat ping failed");
            }
        }

        for id in &dead {
            self.unregister(*id);
        }
        if !dead.is_empty() {
            info!(count = dead.len(), "heartbeat sweep evicted dead sessions");
        }
    }

    pub fn room_member_count(&self, room: &str) -> usize {
        self.rooms.read().get(room).map(HashSet::len).unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Sink;
    use tollgate_domain::UserRole;

    struct Recorder {
        sent: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Sink for Recorder {
        async fn send(&self, payload: &str) -> anyhow::Result<()> {
            self.sent.lock().push(payload.to_string());
            Ok(())
        }
    }

    struct NoSync;

    #[async_trait]
    impl StateSyncProvider for NoSync {
        async fn state_sync(&self, _room: &str) -> anyhow::Result<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    fn manager() -> (SessionManager, mpsc::Receiver<RoomOp>) {
        let (tx, rx) = mpsc::channel(16);
        (SessionManager::new(tx, Arc::new(NoSync)), rx)
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            UserRole::User,
            None,
            Box::new(Recorder { sent: parking_lot::Mutex::new(vec![]) }),
        ))
    }

    #[tokio::test]
    async fn subscribe_notifies_relay_only_on_first_subscriber() {
        let (mgr, mut rx) = manager();
        let a = session();
        let b = session();
        mgr.register(a.clone()).await;
        mgr.register(b.clone()).await;

        mgr.handle_inbound(a.id, InboundMessage::Subscribe { room: "auction:1".into() }).await;
        assert!(matches!(rx.try_recv(), Ok(RoomOp::Subscribe(r)) if r == "auction:1"));

        mgr.handle_inbound(b.id, InboundMessage::Subscribe { room: "auction:1".into() }).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(mgr.room_member_count("auction:1"), 2);
    }

    #[tokio::test]
    async fn unsubscribe_notifies_relay_only_when_room_empties() {
        let (mgr, mut rx) = manager();
        let a = session();
        let b = session();
        mgr.register(a.clone()).await;
        mgr.register(b.clone()).await;
        mgr.handle_inbound(a.id, InboundMessage::Subscribe { room: "resource:1".into() }).await;
        mgr.handle_inbound(b.id, InboundMessage::Subscribe { room: "resource:1".into() }).await;
        let _ = rx.try_recv();

        mgr.handle_inbound(a.id, InboundMessage::Unsubscribe { room: "resource:1".into() }).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(mgr.room_member_count("resource:1"), 1);

        mgr.handle_inbound(b.id, InboundMessage::Unsubscribe { room: "resource:1".into() }).await;
        assert!(matches!(rx.try_recv(), Ok(RoomOp::Unsubscribe(r)) if r == "resource:1"));
        assert_eq!(mgr.room_member_count("resource:1"), 0);
    }

    #[tokio::test]
    async fn unregister_drops_membership_and_notifies_relay() {
        let (mgr, mut rx) = manager();
        let a = session();
        mgr.register(a.clone()).await;
        mgr.handle_inbound(a.id, InboundMessage::Subscribe { room: "trending:music".into() }).await;
        let _ = rx.try_recv();

        mgr.unregister(a.id);
        assert_eq!(mgr.session_count(), 0);
        assert!(matches!(rx.try_recv(), Ok(RoomOp::Unsubscribe(r)) if r == "trending:music"));
    }

    #[tokio::test]
    async fn sweep_evicts_sessions_dead_for_a_full_cycle() {
        let (mgr, _rx) = manager();
        let a = session();
        mgr.register(a.clone()).await;

        // First sweep: alive was true at registration, so it survives and
        // is reset to false.
        mgr.sweep().await;
        assert_eq!(mgr.session_count(), 1);

        // No inbound traffic in between: second sweep finds it still
        // false and evicts it.
        mgr.sweep().await;
        assert_eq!(mgr.session_count(), 0);
    }

    #[tokio::test]
    async fn malformed_inbound_gets_an_error_reply_not_a_panic() {
        let (mgr, _rx) = manager();
        let a = session();
        mgr.register(a.clone()).await;

        mgr.handle_raw(a.id, "not json").await;
        mgr.handle_raw(a.id, r#"{"type":"nonsense"}"#).await;

        assert_eq!(mgr.session_count(), 1);
    }

    #[tokio::test]
    async fn inbound_traffic_keeps_a_session_alive_across_sweeps() {
        let (mgr, _rx) = manager();
        let a = session();
        mgr.register(a.clone()).await;

        mgr.sweep().await;
        mgr.handle_inbound(a.id, InboundMessage::Ping).await;
        mgr.sweep().await;

        assert_eq!(mgr.session_count(), 1);
    }
}
