// 缓存模块
// 包含连接池、后端实现、键和限流计数操作

pub mod connector;
pub mod health;
pub mod keys;
pub mod memory;
pub mod models;
pub mod operations;
pub mod pool;
pub mod redis_backend;

pub use connector::{AtomicLimitStore, CacheConnector};
pub use health::DegradedFlag;
pub use memory::InMemoryConnector;
pub use models::{LimitConfig, WindowVerdict};
pub use operations::RateLimitCacheOperations;
pub use pool::{CachePool, PoolSettings, PooledConnection};
pub use redis_backend::RedisConnector;
