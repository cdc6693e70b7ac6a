use std::time::Instant;

use metrics::{counter, histogram};
use tokio::time::timeout;
use tracing::warn;

use crate::cache::connector::{AtomicLimitStore, CacheConnector};
use crate::cache::models::rate_limit::WindowVerdict;
use crate::cache::pool::CachePool;
use crate::error::CacheError;

/// 速率限制缓存操作
pub struct RateLimitCacheOperations;

impl RateLimitCacheOperations {
    /// 借出连接并执行一次原子计数
    ///
    /// 开启 `retry_on_timeout` 时，超时的调用会换一个新连接重试一次。
    pub async fn evaluate<C: CacheConnector>(
        pool: &CachePool<C>,
        key: &str,
        limit: u64,
        window_ms: u64,
    ) -> Result<WindowVerdict, CacheError> {
        let attempts = if pool.settings().retry_on_timeout { 2 } else { 1 };
        let mut attempt = 1;
        loop {
            let mut conn = pool.acquire().await?;
            match Self::evaluate_on(&mut *conn, key, limit, window_ms, pool).await {
                Ok(remaining_ms) => return Ok(WindowVerdict::from(remaining_ms)),
                Err(e) => {
                    conn.mark_broken();
                    if e.is_timeout() && attempt < attempts {
                        warn!("Rate limit evaluation for {} timed out, retrying", key);
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn evaluate_on<C: CacheConnector>(
        conn: &mut C::Connection,
        key: &str,
        limit: u64,
        window_ms: u64,
        pool: &CachePool<C>,
    ) -> Result<u64, CacheError> {
        let started = Instant::now();
        let result = match timeout(
            pool.settings().command_timeout,
            conn.incr_window(key, limit, window_ms),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CacheError::CommandTimeout),
        };

        counter!("redis_commands_total", "command" => "EVALSHA").increment(1);
        histogram!("redis_command_duration_ms", "command" => "EVALSHA")
            .record(started.elapsed().as_secs_f64() * 1000.0);

        result
    }
}
