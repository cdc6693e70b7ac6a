use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::cache::connector::CacheConnector;
use crate::cache::health::DegradedFlag;
use crate::config::RedisConfig;
use crate::error::CacheError;

/// 连接池参数
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub keepalive: bool,
    pub retry_on_timeout: bool,
    pub health_check_interval: Duration,
}

impl From<&RedisConfig> for PoolSettings {
    fn from(config: &RedisConfig) -> Self {
        Self {
            max_connections: config.max_connections.max(1),
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
            keepalive: config.keepalive,
            retry_on_timeout: config.retry_on_timeout,
            health_check_interval: config.health_check_interval(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            keepalive: true,
            retry_on_timeout: true,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

struct IdleConnection<T> {
    conn: T,
    checked_at: Instant,
}

struct PoolInner<C: CacheConnector> {
    connector: C,
    settings: PoolSettings,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
    permits: Arc<Semaphore>,
    degraded: DegradedFlag,
    closed: AtomicBool,
}

impl<C: CacheConnector> PoolInner<C> {
    fn pop_idle(&self) -> Option<IdleConnection<C::Connection>> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn push_idle(&self, idle: IdleConnection<C::Connection>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(idle);
    }

    async fn check(&self, conn: &mut C::Connection) -> bool {
        matches!(
            timeout(self.settings.connect_timeout, self.connector.ping(conn)).await,
            Ok(Ok(()))
        )
    }
}

/// 带健康检查的共享缓存连接池
///
/// 同时借出的连接数不超过 `max_connections`；池满时等待至多 `connect_timeout`。
pub struct CachePool<C: CacheConnector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: CacheConnector> Clone for CachePool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: CacheConnector> CachePool<C> {
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        Self::with_degraded_flag(connector, settings, DegradedFlag::new())
    }

    pub fn with_degraded_flag(
        connector: C,
        settings: PoolSettings,
        degraded: DegradedFlag,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_connections.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                connector,
                settings,
                idle: Mutex::new(VecDeque::new()),
                permits,
                degraded,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    pub fn degraded_flag(&self) -> DegradedFlag {
        self.inner.degraded.clone()
    }

    pub fn idle_connections(&self) -> usize {
        self.inner.idle_len()
    }

    pub fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 借出一个连接；归还在 [`PooledConnection`] 析构时自动完成
    pub async fn acquire(&self) -> Result<PooledConnection<C>, CacheError> {
        let inner = &self.inner;
        let permit = match timeout(
            inner.settings.connect_timeout,
            Arc::clone(&inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(CacheError::PoolClosed),
            Err(_) => return Err(CacheError::PoolExhausted),
        };

        while let Some(idle) = inner.pop_idle() {
            if idle.checked_at.elapsed() < inner.settings.health_check_interval {
                return Ok(self.wrap(idle.conn, idle.checked_at, permit));
            }
            let mut conn = idle.conn;
            if inner.check(&mut conn).await {
                return Ok(self.wrap(conn, Instant::now(), permit));
            }
            debug!("Evicting idle cache connection that failed its health check");
        }

        let conn = match timeout(inner.settings.connect_timeout, inner.connector.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                inner.degraded.raise(&e.to_string());
                return Err(e);
            }
            Err(_) => {
                let err = CacheError::ConnectTimeout;
                inner.degraded.raise(&err.to_string());
                return Err(err);
            }
        };
        inner.degraded.clear();
        Ok(self.wrap(conn, Instant::now(), permit))
    }

    fn wrap(
        &self,
        conn: C::Connection,
        checked_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection<C> {
        PooledConnection {
            conn: Some(conn),
            checked_at,
            broken: false,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// 启动时校验后端可达
    pub async fn verify(&self) -> Result<(), CacheError> {
        let mut conn = self.acquire().await?;
        let result = match timeout(
            self.inner.settings.connect_timeout,
            self.inner.connector.ping(&mut *conn),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CacheError::ConnectTimeout),
        };
        if result.is_err() {
            conn.mark_broken();
        }
        result
    }

    /// 周期性检查空闲连接，淘汰探活失败的连接
    pub fn spawn_health_checker(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let period = inner.settings.health_check_interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }

                // 每检查一个连接先占一个借出名额，检查期间存活连接数不会超过上限
                let total = inner.idle_len();
                let mut evicted = 0;
                for _ in 0..total {
                    let Ok(permit) = Arc::clone(&inner.permits).try_acquire_owned() else {
                        break;
                    };
                    let Some(mut idle) = inner.pop_idle() else {
                        break;
                    };
                    if inner.check(&mut idle.conn).await {
                        idle.checked_at = Instant::now();
                        inner.push_idle(idle);
                    } else {
                        evicted += 1;
                    }
                    drop(permit);
                }
                if evicted > 0 {
                    warn!(
                        "Health check evicted {} of {} idle cache connections",
                        evicted, total
                    );
                }
            }
            debug!("Cache pool health checker stopped");
        })
    }

    /// 关闭连接池：拒绝后续借出并丢弃空闲连接
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// 借出的连接，析构时归还（损坏时丢弃）
pub struct PooledConnection<C: CacheConnector> {
    conn: Option<C::Connection>,
    checked_at: Instant,
    broken: bool,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: CacheConnector> PooledConnection<C> {
    /// 标记为损坏，归还时直接丢弃
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: CacheConnector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: CacheConnector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: CacheConnector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken || !self.pool.settings.keepalive {
            return;
        }
        self.pool.push_idle(IdleConnection {
            conn,
            checked_at: self.checked_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryConnector;

    fn settings(max_connections: usize) -> PoolSettings {
        PoolSettings {
            max_connections,
            connect_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(30),
            ..PoolSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connections_are_reused_after_release() {
        let connector = InMemoryConnector::new();
        let pool = CachePool::new(connector.clone(), settings(2));

        drop(pool.acquire().await.unwrap());
        drop(pool.acquire().await.unwrap());

        assert_eq!(connector.connections_opened(), 1);
        assert_eq!(pool.idle_connections(), 1);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_times_out() {
        let pool = CachePool::new(InMemoryConnector::new(), settings(1));

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, CacheError::PoolExhausted));

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_connection_once_released() {
        let pool = CachePool::new(InMemoryConnector::new(), settings(1));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn broken_connections_are_discarded() {
        let connector = InMemoryConnector::new();
        let pool = CachePool::new(connector.clone(), settings(1));

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);
        assert_eq!(pool.idle_connections(), 0);

        drop(pool.acquire().await.unwrap());
        assert_eq!(connector.connections_opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn without_keepalive_connections_are_not_kept() {
        let connector = InMemoryConnector::new();
        let pool = CachePool::new(
            connector.clone(),
            PoolSettings {
                keepalive: false,
                ..settings(1)
            },
        );

        drop(pool.acquire().await.unwrap());
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.idle_connections(), 0);
        assert_eq!(connector.connections_opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_backend_raises_and_recovery_clears_degraded() {
        let connector = InMemoryConnector::new();
        let pool = CachePool::new(connector.clone(), settings(1));
        let flag = pool.degraded_flag();

        connector.set_reachable(false);
        assert!(matches!(
            pool.acquire().await.err().unwrap(),
            CacheError::Unavailable(_)
        ));
        assert!(flag.is_degraded());

        connector.set_reachable(true);
        assert!(pool.acquire().await.is_ok());
        assert!(!flag.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_idle_connection_is_replaced_when_ping_fails() {
        let connector = InMemoryConnector::new();
        let pool = CachePool::new(connector.clone(), settings(1));
        drop(pool.acquire().await.unwrap());

        tokio::time::advance(Duration::from_secs(31)).await;
        connector.fail_pings(true);
        drop(pool.acquire().await.unwrap());

        assert_eq!(connector.connections_opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn health_checker_evicts_failing_idle_connections() {
        let connector = InMemoryConnector::new();
        let pool = CachePool::new(connector.clone(), settings(2));
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.idle_connections(), 2);

        let checker = pool.spawn_health_checker();
        connector.fail_pings(true);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(pool.idle_connections(), 0);
        checker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn borrowing_during_a_sweep_stays_within_max_connections() {
        let connector = InMemoryConnector::new().with_ping_latency(Duration::from_millis(100));
        let pool = CachePool::new(connector.clone(), settings(1));
        drop(pool.acquire().await.unwrap());

        let checker = pool.spawn_health_checker();
        // 第 30 秒开始检查，探活持续 100ms
        tokio::time::sleep(Duration::from_millis(30_050)).await;
        drop(pool.acquire().await.unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(pool.idle_connections() <= 1);
        assert_eq!(connector.connections_opened(), 1);
        assert_eq!(pool.available_permits(), 1);
        checker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_pool_refuses_new_borrowers() {
        let pool = CachePool::new(InMemoryConnector::new(), settings(1));
        drop(pool.acquire().await.unwrap());

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.idle_connections(), 0);
        assert!(matches!(
            pool.acquire().await.err().unwrap(),
            CacheError::PoolClosed
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn verify_reports_unreachable_backend() {
        let connector = InMemoryConnector::new();
        let pool = CachePool::new(connector.clone(), settings(1));
        assert!(pool.verify().await.is_ok());

        connector.fail_pings(true);
        assert!(pool.verify().await.is_err());
    }
}
