//! 语言模型协作方抽象
//!
//! 任何后端（HTTP 传输、Mock、脚本化测试替身）实现 LanguageModel：
//! send_message（非流式）与 send_message_stream（流式快照，默认由非流式包装而来）。

use std::pin::Pin;
use std::sync::OnceLock;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use regex::Regex;
use thiserror::Error;

use crate::llm::ModelResponse;
use crate::memory::Message;
use crate::tools::ToolSpec;

/// 流式响应：逐步产出累积的 ModelResponse 快照
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ModelResponse, LlmError>> + Send>>;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// 后端未分类的错误，只有原始消息可用
    #[error("API error: {0}")]
    Api(String),

    #[error("Model client not initialized")]
    NotInitialized,
}

/// HTTP 状态码中可重试的集合
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

fn retryable_message_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)network|timeout|timed out|econnreset|fetch failed|\b(429|500|502|503|504)\b")
                .ok()
        })
        .as_ref()
}

impl LlmError {
    /// 默认重试判定：网络错误、超时、429/5xx 可重试；鉴权失败等其余错误不重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Timeout => true,
            LlmError::Http { status, .. } => RETRYABLE_STATUS.contains(status),
            LlmError::Api(msg) => retryable_message_pattern().is_some_and(|re| re.is_match(msg)),
            LlmError::Unauthorized(_) | LlmError::InvalidResponse(_) | LlmError::NotInitialized => {
                false
            }
        }
    }
}

/// 语言模型 trait：history 为完整消息序列，tools 为 ToolRegistry::list_for_model 的原样输出
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn send_message(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, LlmError>;

    /// 流式变体；默认产出单个完整快照
    async fn send_message_stream(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ResponseStream, LlmError> {
        let response = self.send_message(history, tools).await?;
        Ok(Box::pin(stream::iter(vec![Ok(response)])))
    }
}
