use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tollgate_domain::{DateRange, Money};
use tollgate_kv::Kv;
use uuid::Uuid;

use crate::error::CoordinationError;

const CHECK_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub available: bool,
    pub available_rooms: u32,
    pub total_rooms: u32,
    pub requested: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DayPrice {
    pub date: NaiveDate,
    pub price: Money,
}

/// Caches availability and month-view calendar reads (spec.md §4.3). The
/// authoritative check under the row lock lives in
/// `tollgate_store::ReservationRepository::create_reservation`; this is
/// only the read-side cache the public availability query hits.
#[derive(Clone)]
pub struct AvailabilityCalculator {
    kv: Kv,
}

impl AvailabilityCalculator {
    pub fn new(kv: Kv) -> Self {
        Self { kv }
    }

    fn check_key(resource_id: Uuid, range: DateRange) -> String {
        format!(
            "avail:check:{}:{}:{}",
            resource_id, range.check_in, range.check_out
        )
    }

    fn month_key(resource_id: Uuid, year: i32, month: u32) -> String {
        format!("avail:{resource_id}:{year}-{month}")
    }

    pub async fn get_cached_check(
        &self,
        resource_id: Uuid,
        range: DateRange,
    ) -> Result<Option<AvailabilityResult>, CoordinationError> {
        let key = Self::check_key(resource_id, range);
        match self.kv.get(&key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub async fn cache_check(
        &self,
        resource_id: Uuid,
        range: DateRange,
        result: &AvailabilityResult,
    ) -> Result<(), CoordinationError> {
        let key = Self::check_key(resource_id, range);
        let raw = serde_json::to_string(result)?;
        self.kv.set_px(&key, &raw, CHECK_TTL.as_millis() as u64).await?;
        Ok(())
    }

    pub async fn get_cached_month(
        &self,
        resource_id: Uuid,
        year: i32,
        month: u32,
    ) -> Result<Option<Vec<DayPrice>>, CoordinationError> {
        let key = Self::month_key(resource_id, year, month);
        match self.kv.get(&key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub async fn cache_month(
        &self,
        resource_id: Uuid,
        year: i32,
        month: u32,
        days: &[DayPrice],
    ) -> Result<(), CoordinationError> {
        let key = Self::month_key(resource_id, year, month);
        let raw = serde_json::to_string(days)?;
        self.kv.set_px(&key, &raw, CHECK_TTL.as_millis() as u64).await?;
        Ok(())
    }

    /// Deletes every cache entry a state change touching `resource_id`
    /// over `range` could have produced: the months it spans, and the
    /// single `avail:check:…` entry for that exact range (spec.md §4.3
    /// "avoid wildcard scans" — invalidation enumerates keys instead of
    /// pattern-deleting, since KEYS/SCAN over a hot keyspace is unsafe in
    /// production Redis).
    pub async fn invalidate(
        &self,
        resource_id: Uuid,
        range: DateRange,
    ) -> Result<(), CoordinationError> {
        self.kv.del(&Self::check_key(resource_id, range)).await?;
        for (year, month) in range.months() {
            self.kv.del(&Self::month_key(resource_id, year, month)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(ci: (i32, u32, u32), co: (i32, u32, u32)) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(ci.0, ci.1, ci.2).unwrap(),
            NaiveDate::from_ymd_opt(co.0, co.1, co.2).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn check_key_is_stable_for_same_range() {
        let id = Uuid::new_v4();
        let r = range((2026, 8, 1), (2026, 8, 5));
        assert_eq!(
            AvailabilityCalculator::check_key(id, r),
            AvailabilityCalculator::check_key(id, r)
        );
    }

    #[test]
    fn month_key_covers_every_spanned_month() {
        let r = range((2026, 1, 30), (2026, 2, 2));
        let months = r.months();
        assert_eq!(months, vec![(2026, 1), (2026, 2)]);
    }
}
