//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PARLEY__*` 覆盖（双下划线表示嵌套，如 `PARLEY__TOOLS__TIMEOUT_MS=800`）。
//! 所有时长均以毫秒配置，orchestrator_config 转为运行时的 Duration。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{OrchestratorConfig, SessionConfig};
use crate::llm::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSection,
    pub tools: ToolsSection,
    pub retry: RetrySection,
    pub llm: LlmSection,
}

/// [session] 段：会话时长、收尾阈值、时钟周期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub target_duration_ms: u64,
    /// elapsed 达到该值时进入 wrapping_up
    pub wrap_up_threshold_ms: u64,
    pub clock_tick_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            target_duration_ms: 60_000,
            wrap_up_threshold_ms: 50_000,
            clock_tick_ms: 100,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（毫秒）
    pub timeout_ms: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self { timeout_ms: 500 }
    }
}

/// [retry] 段：模型调用的退避重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// [llm] 段：后端选择（目前只有 mock；真实 HTTP 传输在本 crate 之外）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
        }
    }
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            session: SessionConfig {
                wrap_up_threshold: Duration::from_millis(self.session.wrap_up_threshold_ms),
                tick_interval: Duration::from_millis(self.session.clock_tick_ms),
            },
            default_duration: Duration::from_millis(self.session.target_duration_ms),
            tool_timeout: Duration::from_millis(self.tools.timeout_ms),
            retry: self.retry_policy(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 PARLEY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PARLEY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PARLEY")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
