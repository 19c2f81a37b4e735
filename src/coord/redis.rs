//! Redis-backed coordinator.
//!
//! The canonical distributed backend. Maps the capability surface onto
//! Redis primitives:
//!
//! - mutex → `SET key token NX PX ttl` with a uuid fencing token, released
//!   by a compare-and-delete script so an expired holder can never delete a
//!   successor's lock
//! - counter → `INCR` / `GET`
//! - lists → `RPUSH` / `LPOP` / `LREM count=1` / `LRANGE` / `LLEN`
//! - TTL keys → `SET .. PX` / `EXISTS` / `DEL` / `PEXPIRE`
//! - batch → `redis::pipe()` in one round trip
//!
//! Connections go through `ConnectionManager`, which reconnects under the
//! hood and is cheap to clone per operation.

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use super::{CoordOp, Coordinator};

/// Compare-and-delete: release only the lock we still hold.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// [`Coordinator`] implementation over a shared Redis instance.
pub struct RedisCoordinator {
    conn: ConnectionManager,
    release: Script,
}

impl RedisCoordinator {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self::new(conn))
    }

    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is an error; round sub-millisecond TTLs up.
    (ttl.as_millis() as u64).max(1)
}

fn add_to_pipe(pipe: &mut redis::Pipeline, op: CoordOp) {
    match op {
        CoordOp::Push { key, value } => {
            pipe.rpush(key, value).ignore();
        }
        CoordOp::Remove { key, value } => {
            pipe.lrem(key, 1, value).ignore();
        }
        CoordOp::SetEx { key, value, ttl } => {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .ignore();
        }
        CoordOp::Expire { key, ttl } => {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
        CoordOp::Del { key } => {
            pipe.del(key).ignore();
        }
    }
}

#[async_trait::async_trait]
impl Coordinator for RedisCoordinator {
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<Option<String>> {
        let mut conn = self.conn();
        let token = Uuid::new_v4().to_string();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(acquired.map(|_| token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value as u64)
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0) as u64)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.lpop(key, None).await?;
        Ok(value)
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<usize> {
        let mut conn = self.conn();
        let removed: i64 = conn.lrem(key, 1, value).await?;
        Ok(removed as usize)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let values: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(values)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn();
        let len: i64 = conn.llen(key).await?;
        Ok(len as usize)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn batch(&self, ops: Vec<CoordOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        for op in ops {
            add_to_pipe(&mut pipe, op);
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
