use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{AnyPool, Row};
use tollgate_domain::{AppError, DateRange, Money, Reservation, ReservationStatus, Resource};
use tracing::instrument;
use uuid::Uuid;

/// Persistence seam for the Resource-Reservation Engine (spec.md §4.4).
/// `create_reservation` owns the whole locked read-compute-write sequence
/// because the availability check, the price computation and the insert
/// all need to see the same row lock; splitting it across several trait
/// methods would let another writer interleave between them.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn fetch_resource(&self, resource_id: Uuid) -> anyhow::Result<Option<Resource>>;

    async fn fetch_price_overrides(
        &self,
        resource_id: Uuid,
        range: DateRange,
    ) -> anyhow::Result<Vec<(NaiveDate, Money)>>;

    async fn fetch_by_idempotency_key(
        &self,
        key: &str,
    ) -> anyhow::Result<Option<Reservation>>;

    /// Runs steps 4-9 of §4.4 under a single transaction and row lock.
    /// Returns `Unavailable` as a typed error rather than an empty Option
    /// so the caller doesn't need to re-derive the availability numbers.
    async fn create_reservation(
        &self,
        params: CreateReservationParams,
    ) -> Result<Reservation, AppError>;

    async fn confirm_reservation(
        &self,
        reservation_id: Uuid,
        payment_id: &str,
    ) -> anyhow::Result<Option<Reservation>>;

    async fn cancel_reservation(&self, reservation_id: Uuid) -> anyhow::Result<Option<Reservation>>;

    /// `UPDATE ... SET status='expired' WHERE status='reserved' AND
    /// reserved_until < now RETURNING ...` (spec.md §4.4 state transitions).
    /// Every row returned here still needs its availability cache invalidated
    /// by the caller.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Reservation>>;
}

pub struct CreateReservationParams {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub range: DateRange,
    pub room_count: u32,
    pub idempotency_key: String,
    pub hold_duration: chrono::Duration,
    pub now: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqlxReservationRepository {
    pool: AnyPool,
}

impl SqlxReservationRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationRepository for SqlxReservationRepository {
    async fn fetch_resource(&self, resource_id: Uuid) -> anyhow::Result<Option<Resource>> {
        let row = sqlx::query(
            r#"SELECT id, owner_id, total_count, base_price_cents,
CASE WHEN is_active THEN 1 ELSE 0 END AS active_i64
FROM resources WHERE id = ?;"#,
        )
        .bind(resource_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_resource(&r)).transpose()?)
    }

    async fn fetch_price_overrides(
        &self,
        resource_id: Uuid,
        range: DateRange,
    ) -> anyhow::Result<Vec<(NaiveDate, Money)>> {
        let rows = sqlx::query(
            r#"SELECT date, price_cents FROM pricing_overrides
WHERE resource_id = ? AND date >= ? AND date < ?;"#,
        )
        .bind(resource_id.to_string())
        .bind(range.check_in.to_string())
        .bind(range.check_out.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let date_str: String = r.try_get("date")?;
            let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")?;
            let cents: i64 = r.try_get("price_cents")?;
            out.push((date, Money::from_cents(cents)));
        }
        Ok(out)
    }

    async fn fetch_by_idempotency_key(&self, key: &str) -> anyhow::Result<Option<Reservation>> {
        let row = sqlx::query(
            r#"SELECT id, user_id, resource_id, check_in, check_out, room_count,
total_price_cents, status, idempotency_key, reserved_until_ms
FROM reservations WHERE idempotency_key = ?;"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_reservation(&r)).transpose()?)
    }

    #[instrument(skip(self, params), fields(resource_id = %params.resource_id))]
    async fn create_reservation(
        &self,
        params: CreateReservationParams,
    ) -> Result<Reservation, AppError> {
        tollgate_telemetry::warn_if_slow(
            "create_reservation_tx",
            std::time::Duration::from_millis(500),
            self.create_reservation_inner(params),
        )
        .await
    }

    async fn confirm_reservation(
        &self,
        reservation_id: Uuid,
        payment_id: &str,
    ) -> anyhow::Result<Option<Reservation>> {
        let res = sqlx::query(
            r#"UPDATE reservations SET status = 'confirmed', payment_id = ?
WHERE id = ? AND status = 'reserved';"#,
        )
        .bind(payment_id)
        .bind(reservation_id.to_string())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"SELECT id, user_id, resource_id, check_in, check_out, room_count,
total_price_cents, status, idempotency_key, reserved_until_ms
FROM reservations WHERE id = ?;"#,
        )
        .bind(reservation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_reservation(&r)).transpose()
    }

    async fn cancel_reservation(&self, reservation_id: Uuid) -> anyhow::Result<Option<Reservation>> {
        let res = sqlx::query(
            r#"UPDATE reservations SET status = 'cancelled'
WHERE id = ? AND status IN ('reserved', 'confirmed');"#,
        )
        .bind(reservation_id.to_string())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"SELECT id, user_id, resource_id, check_in, check_out, room_count,
total_price_cents, status, idempotency_key, reserved_until_ms
FROM reservations WHERE id = ?;"#,
        )
        .bind(reservation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_reservation(&r)).transpose()
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Reservation>> {
        // Any/sqlite's driver doesn't support UPDATE ... RETURNING, so we
        // select the affected ids first and then update them; on Postgres
        // this narrows to the same single-statement RETURNING semantics
        // described in spec.md §4.4.
        let rows = sqlx::query(
            r#"SELECT id FROM reservations WHERE status = 'reserved' AND reserved_until_ms < ?;"#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id_str: String = row.try_get("id")?;
            let id = Uuid::parse_str(&id_str)?;

            let updated = sqlx::query(
                r#"UPDATE reservations SET status = 'expired'
WHERE id = ? AND status = 'reserved' AND reserved_until_ms < ?;"#,
            )
            .bind(&id_str)
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 0 {
                continue;
            }

            let row = sqlx::query(
                r#"SELECT id, user_id, resource_id, check_in, check_out, room_count,
total_price_cents, status, idempotency_key, reserved_until_ms
FROM reservations WHERE id = ?;"#,
            )
            .bind(&id_str)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(r) = row {
                out.push(row_to_reservation(&r)?);
            }
            let _ = id;
        }

        Ok(out)
    }
}

impl SqlxReservationRepository {
    async fn create_reservation_inner(&self, params: CreateReservationParams) -> Result<Reservation, AppError> {
        let CreateReservationParams {
            id,
            user_id,
            resource_id,
            range,
            room_count,
            idempotency_key,
            hold_duration,
            now,
        } = params;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::internal("db", e.into()))?;

        // The distributed lock the caller takes is keyed on the exact
        // `<checkIn>:<checkOut>` range, so two requests for overlapping but
        // non-identical ranges on the same resource can enter this
        // transaction concurrently. The Any driver doesn't speak `SELECT
        // ... FOR UPDATE` (sqlite backs the test pool, Postgres backs
        // production), so the mutual exclusion the availability check
        // below needs comes from a real write against the resource row
        // instead: it takes sqlite's reserved-lock / Postgres's row lock,
        // so a second transaction touching the same resource blocks here
        // until this one commits or rolls back.
        sqlx::query("UPDATE resources SET total_count = total_count WHERE id = ?;")
            .bind(resource_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::internal("db", e.into()))?;

        let resource_row = sqlx::query(
            r#"SELECT id, owner_id, total_count, base_price_cents,
CASE WHEN is_active THEN 1 ELSE 0 END AS active_i64
FROM resources WHERE id = ?;"#,
        )
        .bind(resource_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::internal("db", e.into()))?;

        let resource = match resource_row {
            Some(r) => row_to_resource(&r).map_err(|e| AppError::internal("db", e))?,
            None => return Err(AppError::NotFound(format!("resource {resource_id}"))),
        };

        if !resource.active {
            return Err(AppError::BadRequest("resource is not active".into()));
        }

        let booked_rows = sqlx::query(
            r#"SELECT check_in, check_out, room_count FROM reservations
WHERE resource_id = ? AND status IN ('reserved', 'confirmed')
  AND check_in < ? AND check_out > ?;"#,
        )
        .bind(resource_id.to_string())
        .bind(range.check_out.to_string())
        .bind(range.check_in.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::internal("db", e.into()))?;

        let mut max_daily_booked: u32 = 0;
        for d in range.days() {
            let mut booked_on_day: u32 = 0;
            for row in &booked_rows {
                let ci: String = row.try_get("check_in").map_err(|e| AppError::internal("db", e.into()))?;
                let co: String = row.try_get("check_out").map_err(|e| AppError::internal("db", e.into()))?;
                let ci = NaiveDate::parse_from_str(&ci, "%Y-%m-%d").map_err(|e| AppError::internal("db", e.into()))?;
                let co = NaiveDate::parse_from_str(&co, "%Y-%m-%d").map_err(|e| AppError::internal("db", e.into()))?;
                if ci <= d && d < co {
                    let rc: i64 = row.try_get("room_count").map_err(|e| AppError::internal("db", e.into()))?;
                    booked_on_day += rc as u32;
                }
            }
            max_daily_booked = max_daily_booked.max(booked_on_day);
        }

        let available = resource.total_count.saturating_sub(max_daily_booked);
        if available < room_count {
            tx.rollback().await.ok();
            return Err(AppError::Unavailable { available });
        }

        let override_rows = sqlx::query(
            r#"SELECT date, price_cents FROM pricing_overrides
WHERE resource_id = ? AND date >= ? AND date < ?;"#,
        )
        .bind(resource_id.to_string())
        .bind(range.check_in.to_string())
        .bind(range.check_out.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::internal("db", e.into()))?;

        let mut overrides = std::collections::HashMap::new();
        for row in &override_rows {
            let date_str: String = row.try_get("date").map_err(|e| AppError::internal("db", e.into()))?;
            let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| AppError::internal("db", e.into()))?;
            let cents: i64 = row.try_get("price_cents").map_err(|e| AppError::internal("db", e.into()))?;
            overrides.insert(date, Money::from_cents(cents));
        }

        let mut total_price = Money::ZERO;
        for d in range.days() {
            let day_price = overrides.get(&d).copied().unwrap_or(resource.base_price);
            total_price = total_price
                .checked_add(day_price.saturating_mul_u32(room_count))
                .ok_or_else(|| AppError::internal("db", anyhow::anyhow!("price overflow")))?;
        }

        let reserved_until = now + hold_duration;

        sqlx::query(
            r#"INSERT INTO reservations
(id, user_id, resource_id, check_in, check_out, room_count, total_price_cents,
 status, payment_id, idempotency_key, reserved_until_ms, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, 'reserved', NULL, ?, ?, ?);"#,
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(resource_id.to_string())
        .bind(range.check_in.to_string())
        .bind(range.check_out.to_string())
        .bind(room_count as i64)
        .bind(total_price.cents())
        .bind(&idempotency_key)
        .bind(reserved_until.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::internal("db", e.into()))?;

        tx.commit().await.map_err(|e| AppError::internal("db", e.into()))?;

        Ok(Reservation {
            id,
            user_id,
            resource_id,
            range,
            room_count,
            total_price,
            status: ReservationStatus::Reserved,
            idempotency_key,
            reserved_until,
        })
    }
}

fn row_to_resource(r: &sqlx::any::AnyRow) -> anyhow::Result<Resource> {
    let id_str: String = r.try_get("id")?;
    let owner_str: String = r.try_get("owner_id")?;
    let total_count: i64 = r.try_get("total_count")?;
    let base_price_cents: i64 = r.try_get("base_price_cents")?;
    let active_i64: i64 = r.try_get("active_i64")?;

    Ok(Resource {
        id: Uuid::parse_str(&id_str)?,
        owner_id: Uuid::parse_str(&owner_str)?,
        total_count: total_count as u32,
        base_price: Money::from_cents(base_price_cents),
        active: active_i64 != 0,
    })
}

fn row_to_reservation(r: &sqlx::any::AnyRow) -> anyhow::Result<Reservation> {
    let id_str: String = r.try_get("id")?;
    let user_str: String = r.try_get("user_id")?;
    let resource_str: String = r.try_get("resource_id")?;
    let check_in: String = r.try_get("check_in")?;
    let check_out: String = r.try_get("check_out")?;
    let room_count: i64 = r.try_get("room_count")?;
    let total_price_cents: i64 = r.try_get("total_price_cents")?;
    let status: String = r.try_get("status")?;
    let idempotency_key: String = r.try_get("idempotency_key")?;
    let reserved_until_ms: i64 = r.try_get("reserved_until_ms")?;

    let range = DateRange::new(
        NaiveDate::parse_from_str(&check_in, "%Y-%m-%d")?,
        NaiveDate::parse_from_str(&check_out, "%Y-%m-%d")?,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(Reservation {
        id: Uuid::parse_str(&id_str)?,
        user_id: Uuid::parse_str(&user_str)?,
        resource_id: Uuid::parse_str(&resource_str)?,
        range,
        room_count: room_count as u32,
        total_price: Money::from_cents(total_price_cents),
        status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        idempotency_key,
        reserved_until: DateTime::from_timestamp_millis(reserved_until_ms)
            .ok_or_else(|| anyhow::anyhow!("invalid reserved_until_ms"))?,
    })
}
