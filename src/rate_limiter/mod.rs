//! 分布式限流器
//!
//! 由 (identity, service) 生成计数器键，在缓存端原子计数后给出放行/拒绝结论。
//! 缓存不可用时放行请求（fail-open），只通过降级计数和日志暴露故障。

mod stats;

use tracing::{debug, error};

use crate::cache::keys::rate_limit_key;
use crate::cache::{
    CacheConnector, CachePool, DegradedFlag, LimitConfig, RateLimitCacheOperations, WindowVerdict,
};
use crate::error::{CacheError, RateLimitError};

pub use stats::{LimiterStats, LimiterStatus};

/// 单次限流判断的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    Rejected { retry_after_seconds: u64 },
    /// 缓存后端故障，按放行处理
    Degraded,
}

impl Decision {
    /// `Degraded` 同样放行
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Decision::Rejected { .. })
    }
}

pub struct RateLimiter<C: CacheConnector> {
    pool: CachePool<C>,
    degraded: DegradedFlag,
    stats: LimiterStats,
}

impl<C: CacheConnector> RateLimiter<C> {
    pub fn new(pool: CachePool<C>) -> Self {
        let degraded = pool.degraded_flag();
        Self {
            pool,
            degraded,
            stats: LimiterStats::default(),
        }
    }

    pub fn pool(&self) -> &CachePool<C> {
        &self.pool
    }

    pub fn stats(&self) -> &LimiterStats {
        &self.stats
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_degraded()
    }

    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            allowed_total: self.stats.allowed(),
            rejected_total: self.stats.rejected(),
            degraded_total: self.stats.degraded(),
            degraded: self.degraded.is_degraded(),
            degraded_since: self.degraded.since(),
            max_connections: self.pool.settings().max_connections,
            idle_connections: self.pool.idle_connections(),
        }
    }

    /// 窗口 `seconds` 秒内最多放行 `times` 次
    ///
    /// 只有参数非法时返回错误；缓存故障一律放行，返回 `Decision::Degraded`。
    pub async fn check(
        &self,
        identity: &str,
        service: &str,
        times: i64,
        seconds: i64,
    ) -> Result<Decision, RateLimitError> {
        let limit = LimitConfig::new(times, seconds)?;
        Ok(self.check_with(identity, service, limit).await)
    }

    pub async fn check_with(&self, identity: &str, service: &str, limit: LimitConfig) -> Decision {
        let key = rate_limit_key(identity, service);
        let pool = self.pool.clone();

        // 在独立任务中执行：调用方被取消时计数操作仍会完成，结果被丢弃
        let evaluation = tokio::spawn(async move {
            RateLimitCacheOperations::evaluate(&pool, &key, limit.times(), limit.window_ms()).await
        });
        let outcome = match evaluation.await {
            Ok(outcome) => outcome,
            Err(e) => Err(CacheError::Unavailable(format!(
                "evaluation task failed: {e}"
            ))),
        };

        self.decide(identity, service, outcome)
    }

    fn decide(
        &self,
        identity: &str,
        service: &str,
        outcome: Result<WindowVerdict, CacheError>,
    ) -> Decision {
        match outcome {
            Ok(WindowVerdict::Admitted) => {
                self.degraded.clear();
                self.stats.record_allowed(service);
                Decision::Admitted
            }
            Ok(WindowVerdict::Blocked { remaining_ms }) => {
                self.degraded.clear();
                self.stats.record_rejected(service);
                let retry_after_seconds = WindowVerdict::retry_after_seconds(remaining_ms);
                debug!(
                    "Rate limit hit for {} on {}, retry after {}s",
                    identity, service, retry_after_seconds
                );
                Decision::Rejected {
                    retry_after_seconds,
                }
            }
            Err(e) => {
                error!(
                    "Rate limiting check failed for {}: {}. Allowing request to proceed.",
                    service, e
                );
                self.degraded.raise(&e.to_string());
                self.stats.record_degraded(service);
                Decision::Degraded
            }
        }
    }
}
