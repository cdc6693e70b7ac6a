use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncConnectionConfig, Client as RedisClient, Script};

use crate::cache::connector::{AtomicLimitStore, CacheConnector};
use crate::config::RedisConfig;
use crate::error::CacheError;

/// 固定窗口计数脚本
///
/// KEYS[1] 计数器键；ARGV[1] 窗口内允许次数；ARGV[2] 窗口毫秒数。
/// 仅在首次自增时设置 TTL。超限时返回剩余 TTL（毫秒，至少 1），否则返回 0。
pub const FIXED_WINDOW_LUA: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

local current = redis.call('INCR', key)
if current == 1 then
    redis.call('PEXPIRE', key, window)
end

if current > limit then
    local ttl = redis.call('PTTL', key)
    if ttl < 0 then
        redis.call('PEXPIRE', key, window)
        ttl = window
    end
    if ttl == 0 then
        ttl = 1
    end
    return ttl
end

return 0
"#;

// 脚本只计算一次 SHA1；invoke 时先 EVALSHA，遇到 NOSCRIPT 自动加载
static FIXED_WINDOW_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(FIXED_WINDOW_LUA));

pub struct RedisConnector {
    client: RedisClient,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RedisConnector {
    pub fn new(config: &RedisConfig) -> Result<Self, CacheError> {
        let client = RedisClient::open(config.url())
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
        })
    }
}

#[async_trait]
impl CacheConnector for RedisConnector {
    type Connection = MultiplexedConnection;

    async fn connect(&self) -> Result<Self::Connection, CacheError> {
        let connection_config = AsyncConnectionConfig::new()
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.command_timeout);
        self.client
            .get_multiplexed_async_connection_with_config(&connection_config)
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CacheError::ConnectTimeout
                } else {
                    CacheError::Unavailable(e.to_string())
                }
            })
    }

    async fn ping(&self, conn: &mut Self::Connection) -> Result<(), CacheError> {
        let _: String = redis::cmd("PING").query_async(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl AtomicLimitStore for MultiplexedConnection {
    async fn incr_window(
        &mut self,
        key: &str,
        limit: u64,
        window_ms: u64,
    ) -> Result<u64, CacheError> {
        let remaining: i64 = FIXED_WINDOW_SCRIPT
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .invoke_async(self)
            .await?;
        Ok(remaining.max(0) as u64)
    }
}
