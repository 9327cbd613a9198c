use std::time::Duration;

use bb8_redis::RedisConnectionManager;
use redis::Script;
use tracing::warn;

use crate::domain::error::RateLimitError;

/// Resultado de una verificación de límite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_in_seconds: u64,
}

impl RateLimitDecision {
    fn allow_all(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            retry_in_seconds: 0,
        }
    }
}

/// Limitador de ventana deslizante sobre Redis.
///
/// El recorte de entradas viejas, el conteo y la inserción ocurren en un
/// solo round-trip vía script Lua sobre un sorted set, así varias
/// instancias del API comparten el mismo estado. Ante un error del
/// store, la política es fail-open: se permite la petición y se loguea.
pub struct SlidingWindowLimiter {
    pool: bb8::Pool<RedisConnectionManager>,
    script: Script,
}

/// KEYS[1] = llave; ARGV = [ahora_ms, ventana_ms, limite, miembro]
const SLIDING_WINDOW_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)

if count < limit then
    redis.call('ZADD', key, now, ARGV[4])
    redis.call('PEXPIRE', key, window)
    return {1, limit - count - 1, 0}
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local retry_ms = window
if oldest[2] then
    retry_ms = math.max(tonumber(oldest[2]) + window - now, 0)
end
return {0, 0, retry_ms}
"#;

impl SlidingWindowLimiter {
    pub fn new(pool: bb8::Pool<RedisConnectionManager>) -> Self {
        Self {
            pool,
            script: Script::new(SLIDING_WINDOW_LUA),
        }
    }

    pub async fn check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RateLimitError::StoreError(e.to_string()))?;

        let (allowed, remaining, retry_ms): (i64, i64, i64) = self
            .script
            .key(format!("ratelimit:{}", key))
            .arg(now_ms)
            .arg(window.as_millis() as i64)
            .arg(limit as i64)
            .arg(member)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| RateLimitError::StoreError(e.to_string()))?;

        Ok(RateLimitDecision {
            allowed: allowed == 1,
            limit,
            remaining: remaining.max(0) as u32,
            retry_in_seconds: (retry_ms.max(0) as u64).div_ceil(1000),
        })
    }

    /// Verificación con política fail-open aplicada.
    pub async fn check_or_allow(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        match self.check(key, limit, window).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Rate limit store unavailable, failing open: {}", e);
                RateLimitDecision::allow_all(limit)
            }
        }
    }
}
