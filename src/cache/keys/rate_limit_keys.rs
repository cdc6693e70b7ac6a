/// 限流计数器键前缀
const RATE_LIMIT_PREFIX: &str = "rl";

/// 生成限流计数器键：`rl:<identity>:<service>`
///
/// 同一 (identity, service) 组合总是落在同一个计数器上。
pub fn rate_limit_key(identity: &str, service: &str) -> String {
    format!("{}:{}:{}", RATE_LIMIT_PREFIX, identity, service)
}

/// 未认证请求使用的 IP 身份
pub fn ip_identity(ip: &str) -> String {
    format!("ip:{}", ip)
}
