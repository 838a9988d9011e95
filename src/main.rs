//! Parley - 终端演示
//!
//! 入口：初始化日志、加载配置、组装工具 / 模型 / 语音适配器，围绕命令行给出的图片引用进行一次限时对话。
//! stdin 每行即一次发言；会话到时或 Ctrl+C 时结束。

use std::sync::Arc;

use anyhow::Context;
use parley::config::{load_config, AppConfig};
use parley::core::{ConversationOrchestrator, OrchestratorEvent, SessionStatus};
use parley::llm::{LanguageModel, MockLanguageModel};
use parley::observability::{self, default_sink};
use parley::speech::{ConsoleSpeechOutput, StdinSpeechInput};
use parley::tools::{EmojiTool, HighlightTool, ToolRegistry, VisualEffect};
use tokio::sync::mpsc;

fn create_model(cfg: &AppConfig) -> Arc<dyn LanguageModel> {
    if cfg.llm.provider.to_lowercase() != "mock" {
        tracing::warn!(provider = %cfg.llm.provider, "Provider not available in this build, using Mock LLM");
    }
    Arc::new(MockLanguageModel)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut args = std::env::args().skip(1);
    let subject = args.next().unwrap_or_else(|| "image://demo".to_string());
    let context = args.next();

    // 视觉效果由渲染层消费；终端里直接打印
    let (effect_tx, mut effect_rx) = mpsc::channel::<VisualEffect>(16);
    tokio::spawn(async move {
        while let Some(effect) = effect_rx.recv().await {
            match effect {
                VisualEffect::Highlight { x, y, label, .. } => {
                    println!("✨ highlight ({x:.2}, {y:.2}) {}", label.unwrap_or_default())
                }
                VisualEffect::Emoji { emoji } => println!("   {emoji}"),
            }
        }
    });

    let sink = default_sink();
    let mut tools = ToolRegistry::with_sink(sink.clone());
    tools
        .register(HighlightTool::new(effect_tx.clone()))
        .context("Failed to register highlight tool")?;
    tools
        .register(EmojiTool::new(effect_tx))
        .context("Failed to register emoji tool")?;

    let orchestrator = ConversationOrchestrator::builder(
        create_model(&cfg),
        Arc::new(StdinSpeechInput::new()),
        Arc::new(ConsoleSpeechOutput::default()),
    )
    .tools(Arc::new(tools))
    .config(cfg.orchestrator_config())
    .sink(sink)
    .build();

    let mut events = orchestrator.subscribe();
    orchestrator
        .start_conversation(&subject, context.as_deref(), None)
        .await
        .context("Failed to start conversation")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, ending conversation");
                orchestrator.end_conversation().await;
                break;
            }
            event = events.recv() => match event {
                Ok(OrchestratorEvent::StateChange { session }) => {
                    tracing::info!(status = %session.status, remaining_ms = session.time_remaining_ms, "Session state");
                    if session.status == SessionStatus::Completed {
                        break;
                    }
                }
                Ok(OrchestratorEvent::Error { message }) => eprintln!("⚠️  {message}"),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
    }

    let summary = orchestrator.get_session_state();
    println!(
        "Conversation finished: {} messages, {} tool calls, {:.1}s",
        summary.message_count,
        summary.tool_call_count,
        summary.elapsed_ms as f64 / 1000.0
    );
    orchestrator.destroy().await;
    Ok(())
}
