//! Mock 语言模型（无需 API，本地跑通完整对话流程）
//!
//! 开场时根据 system 指令回一句问候；之后回显用户最后一句话，并请求 emoji 工具。

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LanguageModel, LlmError, ModelResponse, ToolCall};
use crate::memory::{Message, Role};
use crate::tools::ToolSpec;

/// Mock 模型：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLanguageModel;

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn send_message(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, LlmError> {
        let last_user = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str());

        let Some(text) = last_user else {
            return Ok(ModelResponse::text(
                "Hi! Let's talk about what you see. What catches your eye first?",
            ));
        };

        let wrapping_up = history
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("wrap up"));
        let reply = if wrapping_up {
            format!("You said \"{text}\". That was fun, we're almost out of time!")
        } else {
            format!("You said \"{text}\". Tell me more!")
        };

        let response = ModelResponse::text(reply);
        if tools.iter().any(|t| t.name == "emoji") {
            let turn = history.iter().filter(|m| m.role == Role::User).count();
            Ok(response.with_tool_calls(vec![ToolCall::new(
                format!("mock-call-{turn}"),
                "emoji",
                json!({ "emoji": "😀" }),
            )]))
        } else {
            Ok(response)
        }
    }
}
