//! 工具执行器
//!
//! 持有共享的 ToolRegistry 与单次调用超时，execute(tool_name, args) 在超时内调用 registry.execute。
//! 超时返回 ToolError::Timeout，超时的 handler future 被直接丢弃（取消），其结果不会被计入；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};

use crate::core::ToolError;
use crate::tools::{ToolRegistry, ToolSpec};

/// 默认单次工具调用超时
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_millis(500);

/// 工具执行器：对每次调用施加超时
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn list_for_model(&self) -> Vec<ToolSpec> {
        self.registry.list_for_model()
    }

    /// 执行指定工具；超时返回 Timeout，其余失败原样返回 registry 的错误
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<(), ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(())) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ToolError::Timeout {
                name: tool_name.to_string(),
                elapsed_ms: duration_ms,
            }),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
