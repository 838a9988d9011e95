//! 可观测性：tracing 初始化与可注入的错误日志接收端
//!
//! 错误记录通过显式传入的 LogSink 输出，不依赖全局单例；测试可换成 CapturingSink 断言内容。

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 一条错误记录：发生位置 + 错误消息 + 结构化上下文（工具名、参数、耗时等）
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub context: String,
    pub message: String,
    pub details: Value,
}

impl ErrorRecord {
    pub fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// 错误日志接收端
pub trait LogSink: Send + Sync {
    fn record(&self, record: ErrorRecord);
}

/// 默认接收端：转发到 tracing::error!
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, record: ErrorRecord) {
        tracing::error!(
            context = %record.context,
            details = %record.details,
            "{}",
            record.message
        );
    }
}

/// 测试用接收端：在内存中保存所有记录
#[derive(Debug, Default)]
pub struct CapturingSink {
    records: Mutex<Vec<ErrorRecord>>,
}

impl CapturingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// 按 context 过滤
    pub fn records_for(&self, context: &str) -> Vec<ErrorRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.context == context)
            .collect()
    }
}

impl LogSink for CapturingSink {
    fn record(&self, record: ErrorRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

/// 默认接收端的共享句柄
pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingSink)
}
