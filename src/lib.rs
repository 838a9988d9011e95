//! Parley - 限时语音对话编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态机、轮次流水线、工具调用策略、会话定时器
//! - **llm**: 语言模型协作方抽象、退避重试、Mock 实现
//! - **memory**: 会话内对话历史
//! - **observability**: tracing 初始化与可注入的错误日志接收端
//! - **speech**: 语音输入 / 输出协作方抽象与终端适配器
//! - **tools**: 工具注册表、限时执行器、视觉效果工具

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod speech;
pub mod tools;

pub use crate::core::{ConversationOrchestrator, OrchestratorConfig, OrchestratorEvent, TurnOutcome};
