//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute），由 ToolRegistry 按名注册与查找。
//! 名称在注册表生命周期内唯一；handler 只在注册表内部可见，list_for_model 只输出 schema。
//! handler 的失败（含 panic）被捕获、记录上下文后包装为 ToolError::Execution，不影响其它工具。

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::observability::{default_sink, ErrorRecord, LogSink};
use crate::tools::{ToolParameters, ToolSpec};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON，无返回值）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 默认无参数
    fn parameters(&self) -> ToolParameters {
        ToolParameters::empty()
    }

    async fn execute(&self, args: Value) -> Result<(), String>;
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// 以闭包作为 handler 的工具定义，便于临时注册
#[derive(Clone)]
pub struct ToolDefinition {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Handler,
}

impl ToolDefinition {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }
}

#[async_trait]
impl Tool for ToolDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> ToolParameters {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<(), String> {
        (self.handler)(args).await
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    sink: Arc<dyn LogSink>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            tools: HashMap::new(),
            sink,
        }
    }

    /// 注册工具；同名已存在时返回 Duplicate，原工具保持不变
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        tracing::debug!(tool = %name, "Tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 面向模型的工具目录（按名称排序）
    pub fn list_for_model(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<(), ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let logged_args = args.clone();
        let outcome = AssertUnwindSafe(tool.execute(args)).catch_unwind().await;
        let message = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(message)) => message,
            Err(panic) => panic_message(panic.as_ref()),
        };

        self.sink.record(
            ErrorRecord::new("tool_registry", format!("Tool '{name}' failed: {message}"))
                .with_details(json!({ "tool": name, "args": logged_args })),
        );
        Err(ToolError::Execution {
            name: name.to_string(),
            message,
        })
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
