use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// 服务整体配置
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub cache_backend: CacheBackend,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitConfig,
}

/// 限流计数所用的缓存后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    /// 进程内计数，仅适合单进程部署
    Memory,
}

impl FromStr for CacheBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            _ => Err(()),
        }
    }
}

/// Redis 连接池配置
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub max_connections: usize,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub keepalive: bool,
    pub retry_on_timeout: bool,
    pub health_check_interval_secs: u64,
}

/// 读写接口的限流配置（每分钟次数）
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub read_per_min: i64,
    pub write_per_min: i64,
    /// 是否信任 `x-real-ip` / `x-forwarded-for`，仅在可信反向代理之后开启
    pub trust_proxy_headers: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 通过任意键值来源构建配置，未设置的项使用默认值
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let password = lookup("REDIS_PASSWORD").filter(|p| !p.is_empty());

        Ok(Config {
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: parse_or(&lookup, "SERVER_PORT", 3000)?,
            api_base_uri: lookup("API_BASE_URI").unwrap_or_else(|| "/api".into()),
            cache_backend: parse_or(&lookup, "CACHE_BACKEND", CacheBackend::Redis)?,
            redis: RedisConfig {
                host: lookup("REDIS_HOST").unwrap_or_else(|| "localhost".into()),
                port: parse_or(&lookup, "REDIS_PORT", 6379)?,
                db: parse_or(&lookup, "REDIS_DB", 0)?,
                password,
                max_connections: parse_or(&lookup, "REDIS_MAX_CONNECTIONS", 10)?,
                connect_timeout_secs: parse_or(&lookup, "REDIS_CONNECTION_TIMEOUT", 5)?,
                command_timeout_secs: parse_or(&lookup, "REDIS_COMMAND_TIMEOUT", 5)?,
                keepalive: flag_or(&lookup, "REDIS_KEEPALIVE", true)?,
                retry_on_timeout: flag_or(&lookup, "REDIS_RETRY_ON_TIMEOUT", true)?,
                health_check_interval_secs: parse_or(&lookup, "REDIS_HEALTH_CHECK_INTERVAL", 30)?,
            },
            rate_limit: RateLimitConfig {
                read_per_min: parse_or(&lookup, "READ_RATE_LIMITING_PER_MIN", 60)?,
                write_per_min: parse_or(&lookup, "WRITE_RATE_LIMITING_PER_MIN", 10)?,
                trust_proxy_headers: flag_or(&lookup, "TRUST_PROXY_HEADERS", false)?,
            },
        })
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn flag_or<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.redis.max_connections, 10);
        assert_eq!(config.redis.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.redis.health_check_interval(), Duration::from_secs(30));
        assert!(config.redis.keepalive);
        assert!(config.redis.retry_on_timeout);
        assert_eq!(config.rate_limit.read_per_min, 60);
        assert_eq!(config.rate_limit.write_per_min, 10);
        assert!(!config.rate_limit.trust_proxy_headers);
        assert_eq!(config.cache_backend, CacheBackend::Redis);
        assert_eq!(config.redis.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn password_and_db_end_up_in_url() {
        let config = config_from(&[
            ("REDIS_HOST", "cache"),
            ("REDIS_PORT", "6380"),
            ("REDIS_DB", "2"),
            ("REDIS_PASSWORD", "s3cret"),
        ])
        .unwrap();
        assert_eq!(config.redis.url(), "redis://:s3cret@cache:6380/2");
    }

    #[test]
    fn empty_password_is_ignored() {
        let config = config_from(&[("REDIS_PASSWORD", "")]).unwrap();
        assert!(config.redis.password.is_none());
    }

    #[test]
    fn flags_accept_common_spellings() {
        let config = config_from(&[
            ("REDIS_KEEPALIVE", "no"),
            ("REDIS_RETRY_ON_TIMEOUT", "0"),
        ])
        .unwrap();
        assert!(!config.redis.keepalive);
        assert!(!config.redis.retry_on_timeout);
    }

    #[test]
    fn memory_backend_and_proxy_trust_are_opt_in() {
        let config = config_from(&[
            ("CACHE_BACKEND", "Memory"),
            ("TRUST_PROXY_HEADERS", "true"),
        ])
        .unwrap();
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert!(config.rate_limit.trust_proxy_headers);

        let err = config_from(&[("CACHE_BACKEND", "memcached")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CACHE_BACKEND", .. }));
    }

    #[test]
    fn garbage_values_are_rejected() {
        let err = config_from(&[("REDIS_MAX_CONNECTIONS", "lots")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "REDIS_MAX_CONNECTIONS", .. }
        ));

        let err = config_from(&[("REDIS_KEEPALIVE", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "REDIS_KEEPALIVE", .. }));
    }
}
