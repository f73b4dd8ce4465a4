//! 滚动窗口限流器
//!
//! 约束对外部 API 的调用频率：任意长度为 `window` 的时间段内最多放行
//! `max_requests` 次调用。额度耗尽时 `acquire` 会挂起调用方，直到窗口内
//! 最早的一次调用过期。
//!
//! 对端返回 429 时通过 `penalize` 设置冷却截止时间，冷却期内所有调用方
//! 都会被阻塞，避免继续消耗对端配额。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct WindowState {
    /// 窗口内已放行调用的时间戳，按时间升序
    calls: VecDeque<Instant>,
    /// 429 冷却截止时间
    blocked_until: Option<Instant>,
}

/// 滚动窗口限流器
///
/// 内部状态由 Arc 共享，Clone 后的实例共用同一份额度。
#[derive(Clone)]
pub struct RateLimiter {
    name: Arc<str>,
    max_requests: usize,
    window: Duration,
    state: Arc<Mutex<WindowState>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, max_requests: usize, window: Duration) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name.as_str()),
            // 0 会让所有调用永久挂起
            max_requests: max_requests.max(1),
            window,
            state: Arc::new(Mutex::new(WindowState {
                calls: VecDeque::with_capacity(max_requests.max(1)),
                blocked_until: None,
            })),
        }
    }

    /// 每分钟 N 次的常用构造
    pub fn per_minute(name: impl Into<String>, max_requests: usize) -> Self {
        Self::new(name, max_requests, Duration::from_secs(60))
    }

    /// 尝试立即获取一个调用额度，不等待
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        if self.wait_time(&mut state, now).is_zero() {
            state.calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// 获取一个调用额度，额度耗尽时挂起直到可用
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let wait = self.wait_time(&mut state, now);
                if wait.is_zero() {
                    state.calls.push_back(now);
                    return;
                }
                wait
            };

            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "限流额度耗尽，等待窗口释放"
            );
            metrics::counter!("rate_limiter_waits_total", "name" => self.name.to_string())
                .increment(1);
            tokio::time::sleep(wait).await;
        }
    }

    /// 距离下一个可用额度的等待时间，为 0 表示立即可用
    pub fn time_until_available(&self) -> Duration {
        let mut state = self.state.lock();
        self.wait_time(&mut state, Instant::now())
    }

    /// 对端要求退避（HTTP 429 Retry-After），冷却期内阻塞所有调用
    ///
    /// 多次调用取最晚的截止时间。
    pub fn penalize(&self, retry_after: Duration) {
        let mut state = self.state.lock();
        let until = Instant::now() + retry_after;
        let extended = match state.blocked_until {
            Some(existing) if existing >= until => false,
            _ => {
                state.blocked_until = Some(until);
                true
            }
        };
        if extended {
            warn!(
                limiter = %self.name,
                retry_after_ms = retry_after.as_millis() as u64,
                "对端要求退避，暂停所有调用"
            );
        }
    }

    /// 当前窗口内已放行的调用数
    pub fn in_window(&self) -> usize {
        let mut state = self.state.lock();
        self.prune(&mut state, Instant::now());
        state.calls.len()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    fn prune(&self, state: &mut WindowState, now: Instant) {
        while let Some(&oldest) = state.calls.front() {
            if now.duration_since(oldest) >= self.window {
                state.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_time(&self, state: &mut WindowState, now: Instant) -> Duration {
        if let Some(until) = state.blocked_until {
            if until > now {
                return until - now;
            }
            state.blocked_until = None;
        }

        self.prune(state, now);
        if state.calls.len() < self.max_requests {
            return Duration::ZERO;
        }

        state
            .calls
            .front()
            .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}
