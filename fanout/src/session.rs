use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tollgate_domain::UserRole;
use uuid::Uuid;

/// Transport-agnostic delivery handle for one connection — a WebSocket
/// sink, an SSE stream writer, or (in tests) an in-memory recorder. The
/// gateway never touches sockets directly (spec.md §1 keeps HTTP/WS
/// transport out of scope); it only ever calls `send`.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, payload: &str) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Subscribe { room: String },
    Unsubscribe { room: String },
    Ping,
}

/// `subscribe`/`unsubscribe`/`ping` are the only inbound shapes the
/// protocol recognizes (spec.md §4.8); anything else is an `ERROR`, not a
/// silently dropped message.
pub fn parse_inbound(raw: &str) -> Result<InboundMessage, String> {
    serde_json::from_str(raw).map_err(|_| "unrecognized message".to_string())
}

/// Mirrors spec.md §6's exact enumerated `type` literal set
/// (`STATE_SYNC | ... | connected | ERROR`) — the variants don't share a
/// single case convention, so each carries its own `rename` rather than a
/// blanket `rename_all`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage<'a> {
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "ERROR")]
    Error { reason: &'a str },
    #[serde(rename = "STATE_SYNC")]
    StateSync { room: &'a str, payload: serde_json::Value },
}

/// One WebSocket or SSE connection's identity and subscription state
/// (spec.md §4.8). `alive` is flipped by the heartbeat sweep and reset on
/// every inbound message; a session that's still `false` at the next
/// sweep is considered dead.
pub struct Session {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub role: UserRole,
    pub colour: Option<String>,
    alive: AtomicBool,
    sink: Box<dyn Sink>,
}

impl Session {
    pub fn new(id: Uuid, actor_id: Uuid, role: UserRole, colour: Option<String>, sink: Box<dyn Sink>) -> Self {
        Self {
            id,
            actor_id,
            role,
            colour,
            alive: AtomicBool::new(true),
            sink,
        }
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Returns whether the session was alive going into this sweep, then
    /// clears the flag so the next sweep requires fresh proof of life.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub async fn send(&self, payload: &str) -> anyhow::Result<()> {
        self.sink.send(payload).await
    }
}
