use chrono::{Duration, NaiveDate, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tollgate_domain::{AppError, DateRange, Money};
use tollgate_store::{CreateReservationParams, ReservationRepository, SqlxReservationRepository};
use uuid::Uuid;

async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();
    let db_name = Uuid::new_v4().to_string();
    let conn_str = format!("sqlite:file:{db_name}?mode=memory&cache=shared");
    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn_str)
        .await
        .unwrap();
    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&pool)
        .await
        .unwrap();
    tollgate_store::schema::migrate(&pool).await.unwrap();
    pool
}

async fn seed_resource(pool: &AnyPool, id: Uuid, owner: Uuid, total_count: i64, base_price_cents: i64) {
    sqlx::query("INSERT INTO users (id, email, password_hash, role) VALUES (?, 'o@x.test', 'h', 'owner');")
        .bind(owner.to_string())
        .execute(pool)
        .await
        .unwrap();

    sqlx::query(
        "INSERT INTO resources (id, owner_id, total_count, base_price_cents, is_active) VALUES (?, ?, ?, ?, true);",
    )
    .bind(id.to_string())
    .bind(owner.to_string())
    .bind(total_count)
    .bind(base_price_cents)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn creates_reservation_when_rooms_available() {
    let pool = setup_db().await;
    let resource_id = Uuid::new_v4();
    let owner_id = Uuid::new_v4();
    seed_resource(&pool, resource_id, owner_id, 3, 10_000).await;

    let repo = SqlxReservationRepository::new(pool);
    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
    )
    .unwrap();

    let reservation = repo
        .create_reservation(CreateReservationParams {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            resource_id,
            range,
            room_count: 2,
            idempotency_key: "key-1".into(),
            hold_duration: Duration::minutes(15),
            now: Utc::now(),
        })
        .await
        .unwrap();

    assert_eq!(reservation.room_count, 2);
    assert_eq!(reservation.total_price, Money::from_cents(40_000));
}

#[tokio::test]
async fn rejects_reservation_when_oversubscribed() {
    let pool = setup_db().await;
    let resource_id = Uuid::new_v4();
    let owner_id = Uuid::new_v4();
    seed_resource(&pool, resource_id, owner_id, 2, 10_000).await;

    let repo = SqlxReservationRepository::new(pool);
    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
    )
    .unwrap();

    repo.create_reservation(CreateReservationParams {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        resource_id,
        range,
        room_count: 2,
        idempotency_key: "key-a".into(),
        hold_duration: Duration::minutes(15),
        now: Utc::now(),
    })
    .await
    .unwrap();

    let err = repo
        .create_reservation(CreateReservationParams {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            resource_id,
            range,
            room_count: 1,
            idempotency_key: "key-b".into(),
            hold_duration: Duration::minutes(15),
            now: Utc::now(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Unavailable { available: 0 }));
}

#[tokio::test]
async fn sweep_expires_past_hold_reservations() {
    let pool = setup_db().await;
    let resource_id = Uuid::new_v4();
    let owner_id = Uuid::new_v4();
    seed_resource(&pool, resource_id, owner_id, 5, 5_000).await;

    let repo = SqlxReservationRepository::new(pool);
    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(),
    )
    .unwrap();

    let now = Utc::now() - Duration::minutes(30);
    repo.create_reservation(CreateReservationParams {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        resource_id,
        range,
        room_count: 1,
        idempotency_key: "key-expiring".into(),
        hold_duration: Duration::minutes(15),
        now,
    })
    .await
    .unwrap();

    let expired = repo.sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status.to_string(), "expired");

    let again = repo.sweep_expired(Utc::now()).await.unwrap();
    assert!(again.is_empty());
}

/// Two overlapping-but-non-identical ranges take different distributed-lock
/// keys (the lock is keyed on the exact check-in/check-out pair), so this
/// exercises the in-transaction mutual exclusion directly rather than
/// relying on the caller's lock.
#[tokio::test]
async fn concurrent_overlapping_reservations_never_oversell() {
    let pool = setup_db().await;
    let resource_id = Uuid::new_v4();
    let owner_id = Uuid::new_v4();
    seed_resource(&pool, resource_id, owner_id, 1, 10_000).await;

    let repo = SqlxReservationRepository::new(pool);

    let range_a = DateRange::new(
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
    )
    .unwrap();
    let range_b = DateRange::new(
        NaiveDate::from_ymd_opt(2026, 8, 2).unwrap(),
        NaiveDate::from_ymd_opt(2026, 8, 4).unwrap(),
    )
    .unwrap();

    let repo_a = repo.clone();
    let repo_b = repo.clone();

    let task_a = tokio::spawn(async move {
        repo_a
            .create_reservation(CreateReservationParams {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                resource_id,
                range: range_a,
                room_count: 1,
                idempotency_key: "key-concurrent-a".into(),
                hold_duration: Duration::minutes(15),
                now: Utc::now(),
            })
            .await
    });
    let task_b = tokio::spawn(async move {
        repo_b
            .create_reservation(CreateReservationParams {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                resource_id,
                range: range_b,
                room_count: 1,
                idempotency_key: "key-concurrent-b".into(),
                hold_duration: Duration::minutes(15),
                now: Utc::now(),
            })
            .await
    });

    let (result_a, result_b) = tokio::join!(task_a, task_b);
    let results = [result_a.unwrap(), result_b.unwrap()];

    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    let unavailable_count = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::Unavailable { available: 0 })))
        .count();

    assert_eq!(ok_count, 1, "exactly one overlapping request should win the room");
    assert_eq!(unavailable_count, 1, "the loser should see Unavailable, not a silent oversell");
}
