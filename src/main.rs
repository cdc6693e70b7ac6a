use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use todo_backend::{
    AppState,
    cache::{CacheConnector, CachePool, InMemoryConnector, PoolSettings, RedisConnector},
    config::{CacheBackend, Config},
    rate_limiter::RateLimiter,
    router::build_router,
};
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");
    let settings = PoolSettings::from(&config.redis);

    match config.cache_backend {
        CacheBackend::Redis => {
            // 设置 Redis 连接池，启动时必须可达
            let connector =
                RedisConnector::new(&config.redis).expect("Failed to create Redis client");
            let pool = CachePool::new(connector, settings);
            pool.verify().await.expect("Redis connection failed");
            tracing::info!(
                "Connected to Redis at {}:{} (max {} connections)",
                config.redis.host,
                config.redis.port,
                pool.settings().max_connections
            );
            serve(config, pool).await;
        }
        CacheBackend::Memory => {
            tracing::warn!("Using in-process rate limit counters, limits are not shared");
            serve(config, CachePool::new(InMemoryConnector::new(), settings)).await;
        }
    }
}

async fn serve<C: CacheConnector>(config: Config, pool: CachePool<C>) {
    let health_checker = pool.spawn_health_checker();

    // 设置限流器和应用状态
    let limiter = Arc::new(RateLimiter::new(pool.clone()));
    let state = AppState {
        config: Arc::new(config.clone()),
        limiter,
    };

    let router = build_router(state).expect("Invalid rate limit configuration");

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // 关闭连接池
    health_checker.abort();
    pool.close();
    tracing::info!("Cache pool closed, shutting down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
