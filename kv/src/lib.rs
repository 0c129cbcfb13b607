//! A Redis-shaped key/value store: string SETNX with TTL, sorted sets, hash
//! maps, pub/sub, and Lua-style atomic eval (spec.md §2 component 2).
//!
//! One process holds a single `redis::Client` but opens two independent
//! connections from it: `Kv` (a `ConnectionManager`, auto-reconnecting,
//! used for every RPC call) and `Bus` (a dedicated pub/sub connection,
//! see `bus.rs`) so a long `SUBSCRIBE` never blocks an ordinary read.

pub mod bus;
pub mod error;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

pub use bus::Bus;
pub use error::KvError;

/// Async client over the RPC half of the connection. Cheap to clone: it
/// wraps `ConnectionManager`, which multiplexes over a single socket and
/// reconnects transparently.
#[derive(Clone)]
pub struct Kv {
    conn: ConnectionManager,
}

impl Kv {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// For building a second, independent connection for the pub/sub bus
    /// from the same URL (spec.md: "two duplicated clients for publisher
    /// and subscriber").
    pub async fn bus(url: &str) -> Result<Bus, KvError> {
        Bus::connect(url).await
    }

    /// `SET key value NX PX ttl_ms`. Returns true if this call created the
    /// key (i.e. this caller is the first writer).
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let res: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(res.is_some())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_ms.div_ceil(1000).max(1)).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    pub async fn expire(&self, key: &str, ttl_secs: i64) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_secs).await?;
        Ok(())
    }

    /// Deletes `key` only if its current value equals `expected` — the
    /// compare-and-delete primitive the DLM's `release` builds on. Atomic
    /// via a Lua script so no other client can race between the GET and
    /// the DEL.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        const SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    /// Extends `key`'s TTL only if its current value equals `expected` — the
    /// DLM's `extend` primitive.
    pub async fn compare_and_pexpire(
        &self,
        key: &str,
        expected: &str,
        ttl_ms: u64,
    ) -> Result<bool, KvError> {
        const SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;
        let mut conn = self.conn.clone();
        let ok: i64 = redis::Script::new(SCRIPT)
            .key(key)
            .arg(expected)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(ok == 1)
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    pub async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.zincr(key, member, delta).await?)
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    pub async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.zrangebyscore(key, min, max).await?)
    }

    /// Top-`k` members in descending score order, with scores.
    pub async fn zrange_rev_withscores(
        &self,
        key: &str,
        k: usize,
    ) -> Result<Vec<(String, f64)>, KvError> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(String, f64)> = conn
            .zrevrange_withscores(key, 0, k.saturating_sub(1) as isize)
            .await?;
        Ok(pairs)
    }

    /// Merges the given sorted sets into `dest` by summing member scores
    /// (sliding-window bucket aggregation, spec.md §4.6).
    pub async fn zunionstore(&self, dest: &str, keys: &[String]) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zunionstore(dest, keys).await?;
        Ok(())
    }

    pub async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(key, field, delta).await?)
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<i64>, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    /// Atomically increments `key` and sets its expiry on first increment,
    /// returning the post-increment count (rate limiting, spec.md §5).
    pub async fn incr_with_window(&self, key: &str, window_secs: i64) -> Result<i64, KvError> {
        const SCRIPT: &str = r#"
local n = redis.call("INCR", KEYS[1])
if n == 1 then
    redis.call("EXPIRE", KEYS[1], ARGV[1])
end
return n
"#;
        let mut conn = self.conn.clone();
        let n: i64 = redis::Script::new(SCRIPT)
            .key(key)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(n)
    }

    #[tracing::instrument(skip(self, payload), fields(channel))]
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    /// Batches the all-category and per-category view increments, their
    /// TTL refresh, and the lifetime hash increment into a single
    /// `redis::pipe()` round trip (spec.md §4.6's pipelining requirement).
    /// `MULTI/EXEC` isn't needed here — nothing downstream reads these keys
    /// atomically as a set, so a plain (non-transactional) pipeline is
    /// enough to save the network round trips without paying for
    /// transactional bookkeeping the caller doesn't need.
    #[tracing::instrument(skip(self))]
    pub async fn record_view_batch(
        &self,
        all_key: &str,
        category_key: &str,
        member: &str,
        ttl_secs: i64,
        lifetime_key: &str,
    ) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .zincr(all_key, member, 1.0)
            .ignore()
            .expire(all_key, ttl_secs)
            .ignore()
            .zincr(category_key, member, 1.0)
            .ignore()
            .expire(category_key, ttl_secs)
            .ignore()
            .hincr(lifetime_key, member, 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
