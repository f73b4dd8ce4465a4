//! 外部调用的退避重试
//!
//! 承运商和支付网关偶尔会返回 5xx、超时或限流，这类瞬时故障值得原地再试几次；
//! 参数错误、凭据错误之类的确定性失败则立即返回。是否可重试由调用方判断。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// 退避参数
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次调用之外最多再试几次
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 只调用一次，测试和手动触发的场景使用
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 依次产出每次重试前的等待时长，长度即 `max_retries`
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            remaining: self.max_retries,
            max: self.max_delay,
            multiplier: self.multiplier.max(1.0),
        }
    }
}

/// 指数退避序列
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    remaining: u32,
    max: Duration,
    multiplier: f64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        self.next = current.mul_f64(self.multiplier).min(self.max);
        Some(current)
    }
}

/// 按策略执行 `operation`，仅 `is_retryable` 认可的错误会等待后重来
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delays = policy.backoff();
    let mut retried = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retried > 0 {
                    debug!(operation = operation_name, retried, "重试后调用成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(err);
        }
        let Some(delay) = delays.next() else {
            warn!(operation = operation_name, retried, error = %err, "重试次数用尽");
            return Err(err);
        };

        retried += 1;
        warn!(
            operation = operation_name,
            retried,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "外部调用失败，稍后重试"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_until_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            multiplier: 2.0,
        };
        let delays: Vec<u64> = policy.backoff().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 3000, 3000]);
    }

    #[test]
    fn test_none_has_no_delays() {
        assert_eq!(RetryPolicy::none().backoff().count(), 0);
    }

    #[tokio::test]
    async fn test_recovers_from_transient_gateway_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(
            &quick(3),
            "create_refund",
            |_: &String| true,
            || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err("502 bad gateway".to_string()),
                    _ => Ok("rfnd_1"),
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "rfnd_1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_policy(
            &quick(5),
            "create_refund",
            |e: &String| e.starts_with('5'),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("400 amount exceeds captured".to_string())
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_policy(
            &quick(2),
            "track_awb",
            |_: &String| true,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("timeout".to_string())
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), "timeout");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
