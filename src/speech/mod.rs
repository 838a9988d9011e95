//! 语音协作方抽象：语音输入（STT）与语音输出（TTS）
//!
//! 每个协作方拥有自己的事件广播通道，编排器在构造时订阅；
//! 订阅任务的生命周期与编排器绑定，destroy 之后不会再有回调。

pub mod console;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::SpeechError;

pub use console::{ConsoleSpeechOutput, StdinSpeechInput};

/// 语音输入事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeechInputEvent {
    /// 识别结果；is_final 为 false 时是中间结果
    Transcript { text: String, is_final: bool },
    Error { message: String },
}

/// 语音输出事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeechOutputEvent {
    Started,
    Ended,
    Error { message: String },
    /// 播报失败后改为文字展示
    Fallback { text: String },
}

/// 语音输入：开始/停止监听；识别结果通过 subscribe 的通道送出
#[async_trait]
pub trait SpeechInput: Send + Sync {
    /// 设备未就绪时返回 NotInitialized
    async fn start_listening(&self) -> Result<(), SpeechError>;

    /// 未在监听时为无操作
    async fn stop_listening(&self);

    fn is_listening(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<SpeechInputEvent>;
}

/// 语音输出：speak 在播报结束（或被 stop 打断）后返回
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// 播报失败时实现方应自行走 Fallback（文字展示），并返回错误供调用方记录
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;

    async fn stop(&self);

    fn is_speaking(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<SpeechOutputEvent>;
}
