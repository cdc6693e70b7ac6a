use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    cache::{CacheConnector, LimitConfig, keys::ip_identity},
    config::RateLimitConfig,
    error::{AppError, RateLimitError},
    rate_limiter::{Decision, RateLimiter},
};

/// 上游认证中间件写入请求扩展的当前用户标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

/// 路由级限流策略：读请求和写请求分别计数
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub read_service: String,
    pub write_service: String,
    pub read: LimitConfig,
    pub write: LimitConfig,
    pub trust_proxy_headers: bool,
}

impl RoutePolicy {
    /// `<service>_read` / `<service>_write`，次数取自配置，窗口 60 秒
    pub fn per_minute(service: &str, config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        Ok(Self {
            read_service: format!("{service}_read"),
            write_service: format!("{service}_write"),
            read: LimitConfig::per_minute(config.read_per_min)?,
            write: LimitConfig::per_minute(config.write_per_min)?,
            trust_proxy_headers: config.trust_proxy_headers,
        })
    }

    pub fn for_method(&self, method: &Method) -> (&str, LimitConfig) {
        if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
            (&self.read_service, self.read)
        } else {
            (&self.write_service, self.write)
        }
    }
}

pub struct RateLimitState<C: CacheConnector> {
    pub limiter: Arc<RateLimiter<C>>,
    pub policy: Arc<RoutePolicy>,
}

impl<C: CacheConnector> Clone for RateLimitState<C> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<C: CacheConnector> RateLimitState<C> {
    pub fn new(limiter: Arc<RateLimiter<C>>, policy: RoutePolicy) -> Self {
        Self {
            limiter,
            policy: Arc::new(policy),
        }
    }
}

/// 请求的限流身份：已认证用户用用户 ID，否则用客户端 IP
///
/// 默认只认连接的对端地址；`trust_proxy_headers` 打开时才读取代理头。
pub fn request_identity(req: &Request<Body>, trust_proxy_headers: bool) -> String {
    if let Some(CallerIdentity(user_id)) = req.extensions().get::<CallerIdentity>() {
        return user_id.clone();
    }

    // 从连接信息获取原始IP
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let forwarded_ip = if trust_proxy_headers {
        req.headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                req.headers()
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
    } else {
        None
    };

    let ip = forwarded_ip
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim();

    ip_identity(ip)
}

pub async fn rate_limit<C: CacheConnector>(
    State(state): State<RateLimitState<C>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let identity = request_identity(&req, state.policy.trust_proxy_headers);
    let (service, limit) = state.policy.for_method(req.method());

    match state.limiter.check_with(&identity, service, limit).await {
        Decision::Rejected {
            retry_after_seconds,
        } => AppError::RateLimited {
            retry_after_seconds,
        }
        .into_response(),
        Decision::Admitted | Decision::Degraded => next.run(req).await,
    }
}
