//! 视觉效果工具：highlight（高亮图片区域）、emoji（飘出表情）
//!
//! 工具本身不做渲染，只把 VisualEffect 发到渲染层订阅的通道上。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::tools::{Tool, ToolParameters};

/// 发往渲染层的视觉效果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VisualEffect {
    Highlight {
        x: f64,
        y: f64,
        radius: f64,
        label: Option<String>,
    },
    Emoji {
        emoji: String,
    },
}

/// highlight 参数：坐标为相对图片宽高的比例
#[derive(Debug, Deserialize, JsonSchema)]
pub struct HighlightArgs {
    /// 横坐标，0.0 ~ 1.0
    pub x: f64,
    /// 纵坐标，0.0 ~ 1.0
    pub y: f64,
    /// 高亮半径（比例），默认 0.1
    pub radius: Option<f64>,
    /// 区域说明
    pub label: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmojiArgs {
    /// 单个 emoji 字符
    pub emoji: String,
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid {tool} args: {e}"))
}

async fn publish(tx: &mpsc::Sender<VisualEffect>, effect: VisualEffect) -> Result<(), String> {
    tx.send(effect)
        .await
        .map_err(|_| "effect channel closed".to_string())
}

/// 高亮图片上的某个区域
pub struct HighlightTool {
    tx: mpsc::Sender<VisualEffect>,
}

impl HighlightTool {
    pub fn new(tx: mpsc::Sender<VisualEffect>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Tool for HighlightTool {
    fn name(&self) -> &str {
        "highlight"
    }

    fn description(&self) -> &str {
        "Highlight a region of the image the child is looking at. Coordinates are fractions of width/height."
    }

    fn parameters(&self) -> ToolParameters {
        ToolParameters::from_type::<HighlightArgs>()
    }

    async fn execute(&self, args: Value) -> Result<(), String> {
        let args: HighlightArgs = parse_args("highlight", args)?;
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(args.x) || !in_range(args.y) {
            return Err(format!(
                "coordinates out of range: ({}, {})",
                args.x, args.y
            ));
        }
        let radius = args.radius.unwrap_or(0.1).clamp(0.01, 1.0);
        publish(
            &self.tx,
            VisualEffect::Highlight {
                x: args.x,
                y: args.y,
                radius,
                label: args.label,
            },
        )
        .await
    }
}

/// 在画面上显示一个表情
pub struct EmojiTool {
    tx: mpsc::Sender<VisualEffect>,
}

impl EmojiTool {
    pub fn new(tx: mpsc::Sender<VisualEffect>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Tool for EmojiTool {
    fn name(&self) -> &str {
        "emoji"
    }

    fn description(&self) -> &str {
        "Show a fun emoji reaction on screen."
    }

    fn parameters(&self) -> ToolParameters {
        ToolParameters::from_type::<EmojiArgs>()
    }

    async fn execute(&self, args: Value) -> Result<(), String> {
        let args: EmojiArgs = parse_args("emoji", args)?;
        let emoji = args.emoji.trim();
        if emoji.is_empty() {
            return Err("emoji must not be empty".to_string());
        }
        publish(
            &self.tx,
            VisualEffect::Emoji {
                emoji: emoji.to_string(),
            },
        )
        .await
    }
}
