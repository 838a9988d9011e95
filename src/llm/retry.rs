//! 指数退避重试
//!
//! retry_with_backoff 包装任意可失败的异步操作；RetryingLanguageModel 将其应用到模型调用上。
//! 重试耗尽时返回最后一次尝试的原始错误，不构造合成的「已耗尽」错误。

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LanguageModel, LlmError, ModelResponse, ResponseStream};
use crate::memory::Message;
use crate::tools::ToolSpec;

/// 重试策略：delay = min(initial_delay × multiplier^attempt, max_delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次重试前的等待时间（attempt 从 0 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let raw_ms = self.initial_delay.as_millis() as f64 * factor;
        let cap_ms = self.max_delay.as_millis() as f64;
        let ms = if raw_ms.is_finite() { raw_ms.min(cap_ms) } else { cap_ms };
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// 执行 operation，失败时按 should_retry 判定是否重试
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !should_retry(&err) {
                    tracing::debug!(error = %err, "Error is not retryable");
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    tracing::warn!(
                        attempts = attempt + 1,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// 重试判定函数
pub type RetryPredicate = Arc<dyn Fn(&LlmError) -> bool + Send + Sync>;

/// 带退避重试的模型装饰器；默认判定为 LlmError::is_retryable
pub struct RetryingLanguageModel {
    inner: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
    predicate: RetryPredicate,
}

impl RetryingLanguageModel {
    pub fn new(inner: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            predicate: Arc::new(LlmError::is_retryable),
        }
    }

    /// 替换重试判定
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&LlmError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }
}

#[async_trait]
impl LanguageModel for RetryingLanguageModel {
    async fn send_message(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, LlmError> {
        let predicate = self.predicate.clone();
        retry_with_backoff(
            &self.policy,
            move |e: &LlmError| predicate(e),
            || self.inner.send_message(history, tools),
        )
        .await
    }

    /// 只重试建立流的阶段；流中途的错误原样交给调用方
    async fn send_message_stream(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ResponseStream, LlmError> {
        let predicate = self.predicate.clone();
        retry_with_backoff(
            &self.policy,
            move |e: &LlmError| predicate(e),
            || self.inner.send_message_stream(history, tools),
        )
        .await
    }
}
