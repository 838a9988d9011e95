//! 模型响应类型：文本内容、工具调用、结束原因

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 模型停止生成的原因
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
}

/// 一次模型调用的结果（流式时为累积快照）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: FinishReason,
}

impl ModelResponse {
    /// 纯文本回复
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        }
    }

    /// 附带工具调用；结束原因随之变为 ToolCalls
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        if !tool_calls.is_empty() {
            self.finish_reason = FinishReason::ToolCalls;
        }
        self.tool_calls = tool_calls;
        self
    }
}
