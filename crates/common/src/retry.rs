//! 通用重试机制模块
//!
//! 提供不带抖动的指数退避重试逻辑。单次尝试的结果用 [`Attempt`] 表达，
//! 可重试的失败在循环内被吞掉，只有终止性失败和耗尽才会返回给调用方。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

/// 指数退避（无抖动）
///
/// 第 `n` 次尝试失败之后的等待时间为 `unit * 2^n`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    unit: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ExponentialBackoff {
    /// 创建新的退避策略，`unit` 为时间单位
    pub fn new(unit: Duration) -> Self {
        Self { unit }
    }

    /// 时间单位
    pub fn unit(&self) -> Duration {
        self.unit
    }

    /// 计算第 `attempt` 次尝试（从 1 开始）失败之后的等待时间
    pub fn delay_after(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.unit.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 退避策略
    pub backoff: ExponentialBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: ExponentialBackoff::default(),
        }
    }
}

impl RetryPolicy {
    /// 创建新的重试策略
    pub fn new(max_attempts: u32, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// 单次尝试的结果
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// 成功
    Ready(T),
    /// 可重试的失败，由重试循环吞掉
    Retryable(E),
    /// 终止性失败，立即返回给调用方
    Terminal(E),
}

impl<T, E> Attempt<T, E> {
    /// 把普通 `Result` 视为可重试的尝试
    pub fn retryable(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(e) => Self::Retryable(e),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// 失败后的重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待 `delay` 后进行第 `next_attempt` 次尝试
    Retry { next_attempt: u32, delay: Duration },
    /// 等待 `delay` 后放弃，已用尽所有尝试
    Exhausted { attempts: u32, delay: Duration },
}

/// 单次重试调用内的临时状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
}

impl RetryState {
    /// 创建新的重试状态，尝试计数从 1 开始
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    /// 当前尝试序号（从 1 开始）
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 当前尝试失败后推进状态
    ///
    /// 每次失败（包括最后一次）都要先退避。
    pub fn advance(&mut self, backoff: &ExponentialBackoff) -> RetryDecision {
        let delay = backoff.delay_after(self.attempt);
        if self.attempt >= self.max_attempts {
            return RetryDecision::Exhausted {
                attempts: self.attempt,
                delay,
            };
        }
        self.attempt += 1;
        RetryDecision::Retry {
            next_attempt: self.attempt,
            delay,
        }
    }
}

/// 重试失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// 所有尝试均为可重试失败
    Exhausted { attempts: u32, last_error: E },
    /// 某次尝试返回了终止性失败
    Terminal(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
            Self::Terminal(e) => write!(f, "{}", e),
        }
    }
}

/// 退避等待
///
/// 等待发生在调用方自己的任务上，测试时可替换为记录型实现。
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// 基于 tokio 计时器的等待
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 只记录等待时长、立即返回的 [`Sleeper`]，用于确定性测试
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录的等待时长
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

/// 带指数退避的异步操作执行器
///
/// `operation` 接收当前尝试序号（从 1 开始）。可重试失败会被记录日志并在
/// 退避之后重试；最后一次失败同样先退避，再返回 [`RetryError::Exhausted`]。
pub async fn with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
    E: fmt::Display,
{
    let mut state = RetryState::new(policy.max_attempts);

    loop {
        let attempt = state.attempt();
        let error = match operation(attempt).await {
            Attempt::Ready(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Attempt::Terminal(e) => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %e,
                    "Operation failed with non-retryable error"
                );
                return Err(RetryError::Terminal(e));
            }
            Attempt::Retryable(e) => e,
        };

        match state.advance(&policy.backoff) {
            RetryDecision::Retry {
                next_attempt,
                delay,
            } => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    next_attempt = next_attempt,
                    max_attempts = state.max_attempts(),
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                sleeper.sleep(delay).await;
            }
            RetryDecision::Exhausted { attempts, delay } => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_attempts = state.max_attempts(),
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, no more retries"
                );
                sleeper.sleep(delay).await;
                return Err(RetryError::Exhausted {
                    attempts,
                    last_error: error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, ExponentialBackoff::new(Duration::from_secs(1)))
    }

    #[test]
    fn test_delay_calculation() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100));

        assert_eq!(backoff.delay_after(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_after(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_saturates() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1));
        assert_eq!(backoff.delay_after(64), Duration::MAX);
    }

    #[test]
    fn test_retry_state_advance() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1));
        let mut state = RetryState::new(3);
        assert_eq!(state.attempt(), 1);

        assert_eq!(
            state.advance(&backoff),
            RetryDecision::Retry {
                next_attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            state.advance(&backoff),
            RetryDecision::Retry {
                next_attempt: 3,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(
            state.advance(&backoff),
            RetryDecision::Exhausted {
                attempts: 3,
                delay: Duration::from_secs(8)
            }
        );
    }

    #[test]
    fn test_retry_state_zero_ceiling_still_allows_one_attempt() {
        let mut state = RetryState::new(0);
        assert_eq!(state.max_attempts(), 1);
        assert_eq!(
            state.advance(&ExponentialBackoff::default()),
            RetryDecision::Exhausted {
                attempts: 1,
                delay: Duration::from_secs(2)
            }
        );
    }

    #[tokio::test]
    async fn test_success_first_attempt_does_not_sleep() {
        let sleeper = RecordingSleeper::new();
        let result: Result<i32, RetryError<&str>> =
            with_backoff(&policy(3), &sleeper, "test", |_| async { Attempt::Ready(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let sleeper = RecordingSleeper::new();
        let counter = AtomicU32::new(0);

        let result: Result<i32, RetryError<&str>> =
            with_backoff(&policy(5), &sleeper, "test", |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Attempt::Retryable("temporary error")
                    } else {
                        Attempt::Ready(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_all_failures_back_off_after_every_attempt() {
        let sleeper = RecordingSleeper::new();
        let counter = AtomicU32::new(0);

        let result: Result<i32, RetryError<&str>> =
            with_backoff(&policy(3), &sleeper, "test", |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Retryable("permanent error") }
            })
            .await;

        assert_eq!(
            result.unwrap_err(),
            RetryError::Exhausted {
                attempts: 3,
                last_error: "permanent error"
            }
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.sleeps(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[tokio::test]
    async fn test_terminal_failure_stops_immediately() {
        let sleeper = RecordingSleeper::new();
        let counter = AtomicU32::new(0);

        let result: Result<i32, RetryError<&str>> =
            with_backoff(&policy(5), &sleeper, "test", |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Terminal("bad address") }
            })
            .await;

        assert_eq!(result.unwrap_err(), RetryError::Terminal("bad address"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_advances_clock() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(4)).await;
        assert!(start.elapsed() >= Duration::from_secs(4));
    }
}
