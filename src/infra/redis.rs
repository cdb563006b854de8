//! Redis-backed cache tier.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::cache::{CacheError, CacheTier};

use super::error::InfraError;

const SOURCE: &str = "infra::redis";

/// `INCR`, wrapping to ARGV[2] once the value exceeds ARGV[1].
const INCR_WRAPPING_SCRIPT: &str = r#"
local value = redis.call('INCR', KEYS[1])
if value > tonumber(ARGV[1]) then
    redis.call('SET', KEYS[1], ARGV[2])
    value = tonumber(ARGV[2])
end
return value
"#;

/// Delete KEYS[1] only while it holds ARGV[1].
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisCacheTier {
    connection: ConnectionManager,
    incr_wrapping: redis::Script,
    compare_and_delete: redis::Script,
}

impl RedisCacheTier {
    pub async fn connect(url: &str) -> Result<Self, InfraError> {
        let client = redis::Client::open(url)
            .map_err(|err| InfraError::cache(format!("invalid redis url: {err}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| InfraError::cache(format!("failed to connect to redis: {err}")))?;
        info!(target = SOURCE, "Connected to redis cache tier");
        Ok(Self {
            connection,
            incr_wrapping: redis::Script::new(INCR_WRAPPING_SCRIPT),
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheTier for RedisCacheTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await.map_err(CacheError::unavailable)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(CacheError::unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: i64 = conn.del(key).await.map_err(CacheError::unavailable)?;
        Ok(())
    }

    async fn incr_wrapping(&self, key: &str, ceiling: i64, floor: i64) -> Result<i64, CacheError> {
        let mut conn = self.conn();
        self.incr_wrapping
            .key(key)
            .arg(ceiling)
            .arg(floor)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|err| CacheError::script("incr_wrapping", err))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let added: i64 = conn
            .sadd(key, member)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let removed: i64 = conn
            .srem(key, member)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(removed > 0)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let present: bool = conn
            .sismember(key, member)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(present)
    }

    async fn zset_add(&self, key: &str, entries: &[(String, f64)]) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let items: Vec<(f64, &str)> = entries
            .iter()
            .map(|(member, score)| (*score, member.as_str()))
            .collect();
        let mut conn = self.conn();
        let _: i64 = conn
            .zadd_multiple(key, items.as_slice())
            .await
            .map_err(CacheError::unavailable)?;
        Ok(())
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: i64 = conn
            .zrem(key, member)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(())
    }

    async fn zset_rev_range_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        let start = isize::try_from(start).map_err(CacheError::unavailable)?;
        let stop = isize::try_from(stop).map_err(CacheError::unavailable)?;
        let mut conn = self.conn();
        let members: Vec<(String, f64)> = conn
            .zrevrange_withscores(key, start, stop)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(members)
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| CacheError::script("compare_and_delete", err))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_sent_in_whole_milliseconds() {
        assert_eq!(millis(Duration::from_secs(5)), 5_000);
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
