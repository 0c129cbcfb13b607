use sqlx::AnyPool;

/// Bootstraps the relational schema from spec.md §6 (abridged). Kept
/// backend-agnostic (`TEXT` ids, `BIGINT` epoch-millisecond timestamps)
/// so the same DDL runs against the in-memory sqlite pool used in tests
/// and a real Postgres pool in production, same as the teacher crate's
/// `db::schema::migrate`.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  email TEXT NOT NULL,
  password_hash TEXT NOT NULL,
  role TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS resources (
  id TEXT PRIMARY KEY,
  owner_id TEXT NOT NULL,
  total_count BIGINT NOT NULL,
  base_price_cents BIGINT NOT NULL,
  is_active BOOLEAN NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS pricing_overrides (
  resource_id TEXT NOT NULL,
  date TEXT NOT NULL,
  price_cents BIGINT NOT NULL,
  PRIMARY KEY (resource_id, date)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS reservations (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  resource_id TEXT NOT NULL,
  check_in TEXT NOT NULL,
  check_out TEXT NOT NULL,
  room_count BIGINT NOT NULL,
  total_price_cents BIGINT NOT NULL,
  status TEXT NOT NULL,
  payment_id TEXT,
  idempotency_key TEXT NOT NULL UNIQUE,
  reserved_until_ms BIGINT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_reservations_resource_range
    ON reservations(resource_id, check_in, check_out);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS auctions (
  id TEXT PRIMARY KEY,
  seller_id TEXT NOT NULL,
  starting_price_cents BIGINT NOT NULL,
  current_price_cents BIGINT NOT NULL,
  bid_increment_cents BIGINT NOT NULL,
  start_ms BIGINT NOT NULL,
  end_ms BIGINT NOT NULL,
  snipe_protection_minutes BIGINT NOT NULL,
  status TEXT NOT NULL,
  version BIGINT NOT NULL,
  winner_id TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS bids (
  id TEXT PRIMARY KEY,
  auction_id TEXT NOT NULL,
  bidder_id TEXT NOT NULL,
  amount_cents BIGINT NOT NULL,
  is_auto_bid BOOLEAN NOT NULL,
  sequence_num BIGINT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_bids_auction ON bids(auction_id, sequence_num);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS auto_bids (
  auction_id TEXT NOT NULL,
  bidder_id TEXT NOT NULL,
  max_amount_cents BIGINT NOT NULL,
  is_active BOOLEAN NOT NULL,
  PRIMARY KEY (auction_id, bidder_id)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS watches (
  user_id TEXT NOT NULL,
  auction_id TEXT NOT NULL,
  PRIMARY KEY (user_id, auction_id)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS videos (
  id TEXT PRIMARY KEY,
  category TEXT NOT NULL,
  total_views BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_videos_category ON videos(category);"#)
        .execute(pool)
        .await?;

    Ok(())
}
