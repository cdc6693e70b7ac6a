/// 缓存键模块
pub mod rate_limit_keys;

pub use rate_limit_keys::{ip_identity, rate_limit_key};
