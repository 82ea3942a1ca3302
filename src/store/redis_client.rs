//! Redis implementation of [`StoreClient`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use super::{StoreClient, StoreResult};

/// A Redis client with an auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
    scripting: bool,
}

impl RedisClient {
    /// Connect to the server at `url`.
    pub async fn connect(url: &str, scripting: bool) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(scripting, "Connected to Redis counter store");
        Ok(Self { conn, scripting })
    }
}

#[async_trait]
impl StoreClient for RedisClient {
    fn supports_scripting(&self) -> bool {
        self.scripting
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn pexpire(&self, key: &str, ms: u64) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let set: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ms)
            .query_async(&mut conn)
            .await?;
        Ok(set)
    }

    async fn pttl(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl)
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[String]) -> StoreResult<Vec<i64>> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = redis::cmd("EVAL")
            .arg(script)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut conn)
            .await?;
        Ok(reply)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed)
    }
}
