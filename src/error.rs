use axum::Json;
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::result::ApiResult;

/// 缓存后端相关错误，全部由限流器在本地吸收（fail-open）
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache pool exhausted: no connection freed up within the connect timeout")]
    PoolExhausted,
    #[error("timed out connecting to the cache backend")]
    ConnectTimeout,
    #[error("cache command timed out")]
    CommandTimeout,
    #[error("cache pool is closed")]
    PoolClosed,
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache evaluation failed: {0}")]
    Evaluation(#[from] redis::RedisError),
}

impl CacheError {
    pub fn is_timeout(&self) -> bool {
        match self {
            CacheError::CommandTimeout => true,
            CacheError::Evaluation(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// 调用方传入的限流参数非法，属于编程错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("invalid rate limit configuration: times={times}, seconds={seconds}")]
    InvalidConfiguration { times: i64, seconds: i64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug)]
pub enum AppError {
    RateLimited { retry_after_seconds: u64 },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::RateLimited {
                retry_after_seconds,
            } => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                let message =
                    format!("Rate limit exceeded. Try again in {retry_after_seconds} seconds.");
                let body = Json(ApiResult::<()>::error(status.as_u16() as i32, &message));
                let mut response = (status, body).into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_seconds),
                );
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limited_maps_to_429_with_retry_after() {
        let response = AppError::RateLimited {
            retry_after_seconds: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");

        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], 429);
        assert_eq!(
            body["error_message"],
            "Rate limit exceeded. Try again in 42 seconds."
        );
    }

    #[test]
    fn timeout_classification() {
        assert!(CacheError::CommandTimeout.is_timeout());
        assert!(!CacheError::PoolExhausted.is_timeout());
        assert!(!CacheError::Unavailable("down".into()).is_timeout());
    }
}
