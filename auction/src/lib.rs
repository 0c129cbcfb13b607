//! Auction-Bid State Machine orchestration (spec.md §4.5, §4.7): pure
//! bid-resolution logic, the service that wraps it in rate limiting,
//! idempotency, and the per-auction lock, and the background scheduler
//! that closes auctions and applies snipe-extension rescheduling.

pub mod resolver;
pub mod scheduler;
pub mod service;

pub use resolver::{resolve_auto_bid, resolve_bid};
pub use service::{AuctionService, PlaceBidRequest};
