use async_trait::async_trait;

use crate::error::CacheError;

/// 建立并探活缓存连接，由连接池调用
#[async_trait]
pub trait CacheConnector: Send + Sync + 'static {
    type Connection: AtomicLimitStore + Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, CacheError>;

    async fn ping(&self, conn: &mut Self::Connection) -> Result<(), CacheError>;
}

/// 在服务端原子地执行“自增 + 首次设置 TTL + 阈值判断”
#[async_trait]
pub trait AtomicLimitStore {
    /// 返回 0 表示放行，正数为该键剩余的毫秒 TTL
    async fn incr_window(
        &mut self,
        key: &str,
        limit: u64,
        window_ms: u64,
    ) -> Result<u64, CacheError>;
}
