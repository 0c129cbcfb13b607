//! Shared domain types for the reservation/auction/trending core.
//!
//! These are the durable entities spec.md §3 names. The Store (see
//! `tollgate-store`) owns their persisted form; this crate only defines the
//! shapes and the invariants that are cheap to check in-process.

pub mod error;
pub mod money;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub use error::AppError;
pub use money::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    User,
    Owner,
    Admin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role: UserRole,
}

/// A countable scarce resource: a hotel room-type inventory, or (by
/// extension) any inventory the Resource-Reservation Engine reserves
/// against. `total_count` is the hard ceiling I1 is checked against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub total_count: u32,
    pub base_price: Money,
    pub active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Reserved,
    Confirmed,
    Cancelled,
    Completed,
    Expired,
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(Self::Reserved),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// Half-open date range `[check_in, check_out)`. Overlap with a single day
/// `d` is `check_in <= d < check_out` (spec.md §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub check_in: chrono::NaiveDate,
    pub check_out: chrono::NaiveDate,
}

impl DateRange {
    pub fn new(check_in: chrono::NaiveDate, check_out: chrono::NaiveDate) -> Result<Self, AppError> {
        if check_out <= check_in {
            return Err(AppError::BadRequest(
                "check_out must be after check_in".into(),
            ));
        }
        Ok(Self { check_in, check_out })
    }

    /// Iterates every day in the half-open range.
    pub fn days(&self) -> impl Iterator<Item = chrono::NaiveDate> + '_ {
        let mut d = self.check_in;
        std::iter::from_fn(move || {
            if d >= self.check_out {
                None
            } else {
                let cur = d;
                d = d.succ_opt().expect("date overflow");
                Some(cur)
            }
        })
    }

    pub fn covers(&self, d: chrono::NaiveDate) -> bool {
        self.check_in <= d && d < self.check_out
    }

    pub fn months(&self) -> Vec<(i32, u32)> {
        let mut out = Vec::new();
        for d in self.days() {
            let key = (d.year(), d.month());
            if out.last() != Some(&key) {
                out.push(key);
            }
        }
        out
    }
}

use chrono::Datelike;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub range: DateRange,
    pub room_count: u32,
    pub total_price: Money,
    pub status: ReservationStatus,
    pub idempotency_key: String,
    pub reserved_until: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceOverride {
    pub resource_id: Uuid,
    pub date: chrono::NaiveDate,
    pub price: Money,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Active => "active",
            AuctionStatus::Ended => "ended",
            AuctionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for AuctionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown auction status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Auction {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub start_price: Money,
    pub current_price: Money,
    pub bid_increment: Money,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub snipe_protection_minutes: i64,
    pub status: AuctionStatus,
    pub version: i64,
    pub winner_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: Money,
    pub is_auto_bid: bool,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutoBid {
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    pub max_amount: Money,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Watch {
    pub user_id: Uuid,
    pub auction_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub category: String,
    pub total_views: u64,
}
