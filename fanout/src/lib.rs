//! Fan-out Gateway (spec.md §4.8): session/room bookkeeping, the bus
//! relay that keeps each instance's pub/sub subscriptions in sync with
//! local room membership, and the heartbeat liveness sweep.

pub mod bus_relay;
pub mod heartbeat;
pub mod manager;
pub mod session;

pub use manager::{RoomOp, SessionManager, StateSyncProvider};
pub use session::{InboundMessage, ServerMessage, Session, Sink};
