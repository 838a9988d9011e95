//! 编排层错误类型
//!
//! 工具错误在工具执行步骤内被完全吸收（只记录不上抛）；模型错误在重试耗尽后保留原始错误上抛给错误观察者。

use thiserror::Error;

use crate::core::SessionStatus;
use crate::llm::LlmError;

/// 工具注册与执行错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool already registered: {0}")]
    Duplicate(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool '{name}' failed: {message}")]
    Execution { name: String, message: String },

    /// 超时不计入 tool_call_count
    #[error("Tool '{name}' timed out after {elapsed_ms}ms")]
    Timeout { name: String, elapsed_ms: u64 },
}

/// 语音输入/输出协作方错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeechError {
    #[error("{0} used before initialization")]
    NotInitialized(&'static str),

    #[error("Speech device error: {0}")]
    Device(String),
}

/// 编排器错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// 重试耗尽后的模型调用错误，保留原始错误以便调用方按内容分支
    #[error("Model call failed: {0}")]
    Model(#[from] LlmError),

    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("No active session")]
    NoSession,

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
}
