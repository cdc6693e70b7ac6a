use axum::{Router, routing::get};

use crate::{
    AppState,
    cache::CacheConnector,
    error::RateLimitError,
    middleware::{RateLimitState, RoutePolicy, rate_limit},
    routes,
};

// 限流状态路由，按 `status` 服务名计数
pub fn status_routes<C: CacheConnector>(
    state: &AppState<C>,
) -> Result<Router<AppState<C>>, RateLimitError> {
    let policy = RoutePolicy::per_minute("status", &state.config.rate_limit)?;
    let limit_state = RateLimitState::new(state.limiter.clone(), policy);

    Ok(Router::new()
        .route("/rate-limit/status", get(routes::status::limiter_status::<C>))
        .layer(axum::middleware::from_fn_with_state(
            limit_state,
            rate_limit::<C>,
        )))
}

pub fn build_router<C: CacheConnector>(state: AppState<C>) -> Result<Router, RateLimitError> {
    let api = Router::new().merge(status_routes(&state)?);
    let router = Router::new().nest(&state.config.api_base_uri, api);
    Ok(router.with_state(state))
}
