//! Relational persistence for the reservation/auction/trending core
//! (spec.md §1 component 1, §6). Backend-agnostic via `sqlx::AnyPool`: a
//! sqlite in-memory pool drives the test suite, a Postgres pool drives
//! production, same as the teacher crate's `db`/`session::repository_sqlx`
//! split.

pub mod auction_repo;
pub mod db;
pub mod reservation_repo;
pub mod schema;
pub mod video_repo;

pub use auction_repo::{AuctionRepository, AuctionSnapshot, AutoBidRow, BidOutcome, BidPlan, NewBid, SqlxAuctionRepository};
pub use db::Db;
pub use reservation_repo::{CreateReservationParams, ReservationRepository, SqlxReservationRepository};
pub use video_repo::{SqlxVideoRepository, VideoRepository};
