use crate::error::RateLimitError;

/// 单次调用的限流参数：窗口内最多 `times` 次，窗口长度 `seconds` 秒
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    times: u64,
    seconds: u64,
}

impl LimitConfig {
    pub fn new(times: i64, seconds: i64) -> Result<Self, RateLimitError> {
        let invalid = RateLimitError::InvalidConfiguration { times, seconds };
        if times <= 0 || seconds <= 0 {
            return Err(invalid);
        }
        // 窗口毫秒数必须能放进 i64，Redis 的 PEXPIRE 参数是有符号的
        if (seconds as u64).checked_mul(1000).is_none_or(|ms| ms > i64::MAX as u64) {
            return Err(invalid);
        }
        Ok(Self {
            times: times as u64,
            seconds: seconds as u64,
        })
    }

    /// 每分钟 `times` 次
    pub fn per_minute(times: i64) -> Result<Self, RateLimitError> {
        Self::new(times, 60)
    }

    pub fn times(&self) -> u64 {
        self.times
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn window_ms(&self) -> u64 {
        self.seconds * 1000
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            times: 5,
            seconds: 60,
        }
    }
}

/// 原子计数脚本的结果：0 表示放行，正数表示剩余封禁毫秒数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowVerdict {
    Admitted,
    Blocked { remaining_ms: u64 },
}

impl From<u64> for WindowVerdict {
    fn from(remaining_ms: u64) -> Self {
        match remaining_ms {
            0 => WindowVerdict::Admitted,
            remaining_ms => WindowVerdict::Blocked { remaining_ms },
        }
    }
}

impl WindowVerdict {
    /// 向上取整到秒，至少为 1
    pub fn retry_after_seconds(remaining_ms: u64) -> u64 {
        remaining_ms.div_ceil(1000).max(1)
    }
}
