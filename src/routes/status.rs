use axum::{Json, extract::State};

use crate::{AppState, cache::CacheConnector, rate_limiter::LimiterStatus, result::ApiResult};

/// 返回限流器计数和降级状态
pub async fn limiter_status<C: CacheConnector>(
    State(state): State<AppState<C>>,
) -> Json<ApiResult<LimiterStatus>> {
    Json(ApiResult::success(state.limiter.status()))
}
