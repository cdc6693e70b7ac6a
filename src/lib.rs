use std::sync::Arc;

use cache::{CacheConnector, RedisConnector};
use config::Config;
use rate_limiter::RateLimiter;

pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod rate_limiter;
pub mod result;
pub mod router;
pub mod routes;

pub struct AppState<C: CacheConnector = RedisConnector> {
    pub config: Arc<Config>,
    pub limiter: Arc<RateLimiter<C>>,
}

impl<C: CacheConnector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            limiter: Arc::clone(&self.limiter),
        }
    }
}
