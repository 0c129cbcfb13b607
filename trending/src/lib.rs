//! Top-K Windowed Counter and Trending Service (spec.md §4.6): bucketed
//! view recording, the top-K read, and the periodic recompute-and-fan-out
//! loop.

pub mod counter;
pub mod service;

pub use counter::{RecordViewRequest, ViewCounter};
pub use service::{TrendingEntry, TrendingService, TrendingSnapshot};
