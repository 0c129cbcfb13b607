//! Resource-Reservation Engine orchestration (spec.md §4.4): the
//! `createReservation` write protocol, confirm/cancel transitions, and the
//! background expiry sweep.

pub mod service;
pub mod sweep;

pub use service::{CreateReservationRequest, ReservationService};
