use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

/// 限流决策计数，同时上报到 `metrics`（按 service 打标签）
#[derive(Debug, Default)]
pub struct LimiterStats {
    allowed: AtomicU64,
    rejected: AtomicU64,
    degraded: AtomicU64,
}

impl LimiterStats {
    pub fn record_allowed(&self, service: &str) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        counter!("ratelimiter_allowed_total", "service" => service.to_string()).increment(1);
    }

    pub fn record_rejected(&self, service: &str) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("ratelimiter_rejected_total", "service" => service.to_string()).increment(1);
    }

    pub fn record_degraded(&self, service: &str) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
        counter!("ratelimiter_degraded_total", "service" => service.to_string()).increment(1);
    }

    pub fn allowed(&self) -> u64 {
        self.allowed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn degraded(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// 限流器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStatus {
    pub allowed_total: u64,
    pub rejected_total: u64,
    pub degraded_total: u64,
    pub degraded: bool,
    pub degraded_since: Option<DateTime<Utc>>,
    pub max_connections: usize,
    pub idle_connections: usize,
}
