//! 进程内缓存后端
//!
//! 与 Redis 脚本相同的固定窗口语义，时间取自 tokio 时钟，测试中可用暂停时钟模拟。
//! 可以切换为“不可达”状态来模拟后端故障。过期窗口每分钟至多清理一次。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::cache::connector::{AtomicLimitStore, CacheConnector};
use crate::error::CacheError;

#[derive(Debug)]
struct Window {
    count: u64,
    expires_at: Instant,
}

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct WindowTable {
    entries: HashMap<String, Window>,
    last_pruned: Option<Instant>,
}

impl WindowTable {
    fn prune_if_due(&mut self, now: Instant) {
        let due = self
            .last_pruned
            .is_none_or(|at| now.saturating_duration_since(at) >= PRUNE_INTERVAL);
        if due {
            self.prune(now);
        }
    }

    fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, w| w.expires_at > now);
        self.last_pruned = Some(now);
        before - self.entries.len()
    }
}

#[derive(Debug, Default)]
struct Shared {
    windows: Mutex<WindowTable>,
    unreachable: AtomicBool,
    failing_pings: AtomicBool,
    failing_scripts: AtomicBool,
    latency_ms: AtomicU64,
    ping_latency_ms: AtomicU64,
    connections_opened: AtomicU64,
}

impl Shared {
    fn ensure_reachable(&self) -> Result<(), CacheError> {
        if self.unreachable.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    shared: Arc<Shared>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次计数操作前等待的模拟往返时延
    pub fn with_latency(self, latency: Duration) -> Self {
        self.shared
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Release);
        self
    }

    /// 每次 PING 的模拟时延
    pub fn with_ping_latency(self, latency: Duration) -> Self {
        self.shared
            .ping_latency_ms
            .store(latency.as_millis() as u64, Ordering::Release);
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.shared.unreachable.store(!reachable, Ordering::Release);
    }

    pub fn fail_pings(&self, failing: bool) {
        self.shared.failing_pings.store(failing, Ordering::Release);
    }

    /// 模拟脚本执行错误（连接正常，但命令返回错误）
    pub fn fail_scripts(&self, failing: bool) {
        self.shared.failing_scripts.store(failing, Ordering::Release);
    }

    pub fn connections_opened(&self) -> u64 {
        self.shared.connections_opened.load(Ordering::Acquire)
    }

    fn windows(&self) -> MutexGuard<'_, WindowTable> {
        self.shared
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前窗口计数，窗口已过期时为 `None`
    pub fn counter(&self, key: &str) -> Option<u64> {
        self.windows()
            .entries
            .get(key)
            .filter(|w| w.expires_at > Instant::now())
            .map(|w| w.count)
    }

    /// 保存的窗口数（含尚未清理的过期窗口）
    pub fn window_count(&self) -> usize {
        self.windows().entries.len()
    }

    /// 立即清理过期窗口，返回清理数量
    pub fn cleanup(&self) -> usize {
        self.windows().prune(Instant::now())
    }
}

#[async_trait]
impl CacheConnector for InMemoryConnector {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, CacheError> {
        self.shared.ensure_reachable()?;
        self.shared.connections_opened.fetch_add(1, Ordering::AcqRel);
        Ok(InMemoryConnection {
            shared: Arc::clone(&self.shared),
        })
    }

    async fn ping(&self, _conn: &mut Self::Connection) -> Result<(), CacheError> {
        let latency = self.shared.ping_latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.shared.ensure_reachable()?;
        if self.shared.failing_pings.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable("PING failed".into()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemoryConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl AtomicLimitStore for InMemoryConnection {
    async fn incr_window(
        &mut self,
        key: &str,
        limit: u64,
        window_ms: u64,
    ) -> Result<u64, CacheError> {
        let latency = self.shared.latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.shared.ensure_reachable()?;
        if self.shared.failing_scripts.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable("script error".into()));
        }

        let now = Instant::now();
        let mut windows = self
            .shared
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        windows.prune_if_due(now);
        let window = windows.entries.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now,
        });
        if window.expires_at <= now {
            window.count = 0;
        }

        window.count += 1;
        if window.count == 1 {
            window.expires_at = now + Duration::from_millis(window_ms);
        }

        if window.count > limit {
            let remaining = window.expires_at.saturating_duration_since(now).as_millis() as u64;
            return Ok(remaining.max(1));
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counts_within_fixed_window() {
        let connector = InMemoryConnector::new();
        let mut conn = connector.connect().await.unwrap();

        for _ in 0..3 {
            assert_eq!(conn.incr_window("k", 3, 60_000).await.unwrap(), 0);
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(conn.incr_window("k", 3, 60_000).await.unwrap(), 50_000);
        assert_eq!(connector.counter("k"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_is_not_refreshed_by_later_calls() {
        let connector = InMemoryConnector::new();
        let mut conn = connector.connect().await.unwrap();

        conn.incr_window("k", 1, 1_000).await.unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(conn.incr_window("k", 1, 1_000).await.unwrap(), 400);
        tokio::time::advance(Duration::from_millis(401)).await;
        assert_eq!(conn.incr_window("k", 1, 1_000).await.unwrap(), 0);
        assert_eq!(connector.counter("k"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_are_dropped() {
        let connector = InMemoryConnector::new();
        let mut conn = connector.connect().await.unwrap();

        for i in 0..10_000 {
            conn.incr_window(&format!("rl:ip:{i}:svc"), 5, 1_000)
                .await
                .unwrap();
        }
        assert_eq!(connector.window_count(), 10_000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        conn.incr_window("rl:ip:fresh:svc", 5, 1_000).await.unwrap();
        assert_eq!(connector.window_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_keeps_live_windows() {
        let connector = InMemoryConnector::new();
        let mut conn = connector.connect().await.unwrap();
        conn.incr_window("short", 5, 1_000).await.unwrap();
        conn.incr_window("long", 5, 60_000).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(connector.cleanup(), 1);
        assert_eq!(connector.counter("long"), Some(1));
        assert_eq!(connector.window_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_backend_refuses_connections() {
        let connector = InMemoryConnector::new();
        connector.set_reachable(false);
        assert!(matches!(
            connector.connect().await,
            Err(CacheError::Unavailable(_))
        ));
    }
}
