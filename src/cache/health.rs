use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// 进程级降级标志：缓存不可达或脚本失败时置位，后续调用成功后清除
#[derive(Debug, Clone, Default)]
pub struct DegradedFlag {
    inner: Arc<DegradedInner>,
}

#[derive(Debug, Default)]
struct DegradedInner {
    degraded: AtomicBool,
    since: Mutex<Option<DateTime<Utc>>>,
}

impl DegradedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Acquire)
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        *self.since_guard()
    }

    fn since_guard(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.inner
            .since
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 置位，返回是否发生了状态切换
    ///
    /// 标志和 `since` 在同一把锁内修改。
    pub fn raise(&self, reason: &str) -> bool {
        if self.is_degraded() {
            return false;
        }
        let mut since = self.since_guard();
        let switched = !self.inner.degraded.swap(true, Ordering::AcqRel);
        if switched {
            *since = Some(Utc::now());
            warn!("Cache backend degraded, rate limiting fails open: {}", reason);
        }
        switched
    }

    /// 清除，返回是否发生了状态切换
    pub fn clear(&self) -> bool {
        if !self.is_degraded() {
            return false;
        }
        let mut since = self.since_guard();
        let switched = self.inner.degraded.swap(false, Ordering::AcqRel);
        if switched {
            *since = None;
            info!("Cache backend recovered, rate limiting enforced again");
        }
        switched
    }
}
