use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use crate::core::{Result, UploadError};

/// 重试策略
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed {
        delay_ms: u64,
    },
    /// 指数退避
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
    },
    /// 线性退避
    Linear {
        initial_ms: u64,
        increment_ms: u64,
        max_delay_ms: u64,
    },
}

impl RetryStrategy {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// 计算第 n 次重试的延迟（n 从 0 开始）
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            RetryStrategy::Exponential { initial_ms, multiplier, max_delay_ms } => {
                let delay = *initial_ms as f64 * multiplier.powf(attempt as f64);
                let delay = if delay.is_finite() { delay.min(*max_delay_ms as f64) } else { *max_delay_ms as f64 };
                Duration::from_millis(delay as u64)
            }
            RetryStrategy::Linear { initial_ms, increment_ms, max_delay_ms } => {
                let delay = initial_ms.saturating_add(increment_ms.saturating_mul(attempt as u64));
                Duration::from_millis(std::cmp::min(delay, *max_delay_ms))
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Fixed { delay_ms: 1000 }
    }
}

/// 分片重试策略
///
/// `max_attempts` 为 `None` 时同一个分片会一直重试，
/// 为 `Some(n)` 时同一分片连续失败 n 次后上传失败。
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    pub fn unbounded(strategy: RetryStrategy) -> Self {
        Self {
            max_attempts: None,
            strategy,
        }
    }

    pub fn capped(max_attempts: u32, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            strategy,
        }
    }

    /// 已经失败 `attempts` 次后是否还允许再试
    pub fn allows_another(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }

    /// 等待第 `retry` 次重试的退避时间，可被取消
    pub async fn backoff(&self, retry: u32, token: &CancellationToken) -> Result<()> {
        let delay = self.strategy.get_delay(retry);

        tokio::select! {
            _ = sleep(delay) => Ok(()),
            _ = token.cancelled() => Err(UploadError::Cancelled),
        }
    }
}

/// 重试策略构建器
pub struct RetryBuilder {
    policy: RetryPolicy,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = Some(attempts);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.policy.max_attempts = None;
        self
    }

    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.policy.strategy = strategy;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
