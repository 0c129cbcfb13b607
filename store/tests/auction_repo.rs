use chrono::{Duration, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tollgate_domain::Money;
use tollgate_store::{AuctionRepository, BidPlan, NewBid, SqlxAuctionRepository};
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
    tollgate_store::schema::migrate(&pool).await.unwrap();
    pool
}

async fn seed_auction(pool: &AnyPool, id: Uuid, seller_id: Uuid) {
    sqlx::query("INSERT INTO users (id, email, password_hash, role) VALUES (?, 's@x.test', 'h', 'user');")
        .bind(seller_id.to_string())
        .execute(pool)
        .await
        .unwrap();

    let now = Utc::now();
    sqlx::query(
        "INSERT INTO auctions (id, seller_id, starting_price_cents, current_price_cents, \
bid_increment_cents, start_ms, end_ms, snipe_protection_minutes, status, version, winner_id) \
VALUES (?, ?, 1000, 1000, 100, ?, ?, 2, 'active', 0, NULL);",
    )
    .bind(id.to_string())
    .bind(seller_id.to_string())
    .bind((now - Duration::minutes(1)).timestamp_millis())
    .bind((now + Duration::minutes(10)).timestamp_millis())
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn applies_bid_plan_and_bumps_version() {
    let pool = setup_db().await;
    let auction_id = Uuid::new_v4();
    let seller_id = Uuid::new_v4();
    let bidder_id = Uuid::new_v4();
    seed_auction(&pool, auction_id, seller_id).await;

    let repo = SqlxAuctionRepository::new(pool);
    let bid_id = Uuid::new_v4();

    let outcome = repo
        .run_bid_transaction(
            auction_id,
            bidder_id,
            Box::new(move |snapshot| {
                assert_eq!(snapshot.version, 0);
                assert!(snapshot.competing_auto_bids.is_empty());
                Ok(BidPlan {
                    bids: vec![NewBid {
                        id: bid_id,
                        bidder_id,
                        amount: Money::from_cents(1_100),
                        is_auto_bid: false,
                    }],
                    new_current_price: Money::from_cents(1_100),
                    deactivate_auto_bids: vec![],
                    new_end_time: None,
                })
            }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.current_price, Money::from_cents(1_100));
    assert_eq!(outcome.version, 1);
    assert_eq!(outcome.bids.len(), 1);
    assert_eq!(outcome.bids[0].sequence, 1);
}

#[tokio::test]
async fn rejects_seller_bidding_on_own_auction() {
    let pool = setup_db().await;
    let auction_id = Uuid::new_v4();
    let seller_id = Uuid::new_v4();
    seed_auction(&pool, auction_id, seller_id).await;

    let repo = SqlxAuctionRepository::new(pool);
    let err = repo
        .run_bid_transaction(
            auction_id,
            seller_id,
            Box::new(|_snapshot| unreachable!("resolver must not run for the seller")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, tollgate_domain::AppError::Forbidden(_)));
}
