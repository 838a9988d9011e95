//! 编排器事件：宿主通过订阅广播通道观察状态变化、错误、转写、AI 回复与工具调用

use serde::Serialize;

use crate::core::SessionSnapshot;

/// 单次工具调用的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallOutcome {
    Succeeded,
    Failed { reason: String },
    TimedOut { elapsed_ms: u64 },
}

/// 编排器事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// 会话状态变化（含时钟自动进入 wrapping_up）
    StateChange { session: SessionSnapshot },
    Error { message: String },
    /// 语音识别结果（含中间结果）
    Transcript { text: String, is_final: bool },
    /// 即将播报的 AI 回复
    AiResponse { content: String },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
        outcome: ToolCallOutcome,
    },
}
