//! 对话编排器：单会话的端到端驱动
//!
//! 负责：轮次处理流水线（同一时刻至多一个轮次在处理中，并发请求直接丢弃）、
//! 经退避重试调用模型、逐个限时执行工具调用（失败隔离）、播报回复、会话结束定时器。
//! 语音协作方的事件在构造时订阅，订阅任务只持有弱引用，destroy 或编排器被丢弃后即退出。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{
    OrchestratorError, OrchestratorEvent, SessionConfig, SessionManager, SessionSnapshot,
    SessionStatus, ToolCallOutcome, ToolError,
};
use crate::llm::{LanguageModel, LlmError, ModelResponse, RetryPolicy, RetryingLanguageModel, ToolCall};
use crate::memory::{ConversationLog, Message};
use crate::observability::{default_sink, ErrorRecord, LogSink};
use crate::speech::{SpeechInput, SpeechInputEvent, SpeechOutput, SpeechOutputEvent};
use crate::tools::{ToolExecutor, ToolRegistry, DEFAULT_TOOL_TIMEOUT};

const EVENT_CAPACITY: usize = 64;

const WRAP_UP_HINT: &str =
    "Time is almost up: wrap up the conversation in your next reply and say a warm goodbye.";

/// 编排器运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub session: SessionConfig,
    /// start_conversation 未指定时长时使用
    pub default_duration: Duration,
    /// 单次工具调用超时
    pub tool_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            default_duration: Duration::from_millis(60_000),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// 轮次被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 上一轮仍在处理中
    Busy,
    SessionNotActive(SessionStatus),
}

/// process_user_speech 的结果；错误已在内部记录并通知观察者
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Responded,
    /// 剩余时间为 0，会话已结束，未调用模型
    SessionEnded,
    Dropped(DropReason),
    Failed(OrchestratorError),
}

/// isProcessing 标志的 RAII 守卫：获取时置位，任何路径退出时清除
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn opening_prompt(subject_ref: &str, context: Option<&str>) -> String {
    let mut prompt = format!(
        "You are a friendly voice companion chatting with a child about an image ({subject_ref}). \
         Reply in one or two short spoken sentences and ask one simple question at a time. \
         You may call tools to highlight part of the image or show an emoji."
    );
    if let Some(ctx) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\nWhat we know about the image: ");
        prompt.push_str(ctx);
    }
    prompt
}

struct Inner {
    config: OrchestratorConfig,
    speech_in: Arc<dyn SpeechInput>,
    speech_out: Arc<dyn SpeechOutput>,
    model: RetryingLanguageModel,
    tools: ToolExecutor,
    session: SessionManager,
    log: Mutex<ConversationLog>,
    opening: Mutex<Option<String>>,
    processing: AtomicBool,
    end_timer: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<OrchestratorEvent>,
    sink: Arc<dyn LogSink>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.end_timer).take() {
            timer.cancel();
        }
        self.shutdown.cancel();
    }
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    model: Arc<dyn LanguageModel>,
    speech_in: Arc<dyn SpeechInput>,
    speech_out: Arc<dyn SpeechOutput>,
    tools: Option<Arc<ToolRegistry>>,
    config: OrchestratorConfig,
    sink: Option<Arc<dyn LogSink>>,
    retry_predicate: Option<Box<dyn Fn(&LlmError) -> bool + Send + Sync>>,
}

impl OrchestratorBuilder {
    pub fn tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tools = Some(registry);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 替换模型调用的重试判定（默认 LlmError::is_retryable）
    pub fn retry_predicate(
        mut self,
        predicate: impl Fn(&LlmError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_predicate = Some(Box::new(predicate));
        self
    }

    /// 构建并订阅协作方事件；需在 tokio 运行时内调用
    pub fn build(self) -> ConversationOrchestrator {
        let sink = self.sink.unwrap_or_else(default_sink);
        let registry = self
            .tools
            .unwrap_or_else(|| Arc::new(ToolRegistry::with_sink(sink.clone())));

        let mut model = RetryingLanguageModel::new(self.model, self.config.retry.clone());
        if let Some(predicate) = self.retry_predicate {
            model = model.with_predicate(predicate);
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            session: SessionManager::new(self.config.session.clone()),
            tools: ToolExecutor::new(registry, self.config.tool_timeout),
            config: self.config,
            speech_in: self.speech_in,
            speech_out: self.speech_out,
            model,
            log: Mutex::new(ConversationLog::new()),
            opening: Mutex::new(None),
            processing: AtomicBool::new(false),
            end_timer: Mutex::new(None),
            events,
            sink,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_event_loop(
            Arc::downgrade(&inner),
            inner.speech_in.subscribe(),
            inner.speech_out.subscribe(),
            inner.session.subscribe(),
            inner.shutdown.clone(),
        ));

        ConversationOrchestrator { inner }
    }
}

/// 协作方事件循环：只持有弱引用，编排器销毁后退出
async fn run_event_loop(
    weak: Weak<Inner>,
    mut input_rx: broadcast::Receiver<SpeechInputEvent>,
    mut output_rx: broadcast::Receiver<SpeechOutputEvent>,
    mut status_rx: watch::Receiver<SessionStatus>,
    shutdown: CancellationToken,
) {
    let upgrade = || weak.upgrade().map(|inner| ConversationOrchestrator { inner });
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = input_rx.recv() => match event {
                Ok(event) => match upgrade() {
                    Some(orchestrator) => orchestrator.on_speech_input(event),
                    None => break,
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Speech input events lagged");
                }
                Err(RecvError::Closed) => break,
            },
            event = output_rx.recv() => match event {
                Ok(event) => on_speech_output(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Speech output events lagged");
                }
                Err(RecvError::Closed) => break,
            },
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                match upgrade() {
                    Some(orchestrator) => orchestrator.emit(OrchestratorEvent::StateChange {
                        session: orchestrator.get_session_state(),
                    }),
                    None => break,
                }
            }
        }
    }
    tracing::debug!("Orchestrator event loop stopped");
}

/// 播报失败由语音输出方自己回退为文字展示，这里只记录
fn on_speech_output(event: SpeechOutputEvent) {
    match event {
        SpeechOutputEvent::Started => tracing::debug!("Speech started"),
        SpeechOutputEvent::Ended => tracing::debug!("Speech ended"),
        SpeechOutputEvent::Error { message } => {
            tracing::warn!(error = %message, "Speech output error")
        }
        SpeechOutputEvent::Fallback { text } => {
            tracing::info!(chars = text.chars().count(), "Speech fell back to text display")
        }
    }
}

/// 对话编排器（可廉价克隆，克隆共享同一会话）
#[derive(Clone)]
pub struct ConversationOrchestrator {
    inner: Arc<Inner>,
}

impl ConversationOrchestrator {
    pub fn builder(
        model: Arc<dyn LanguageModel>,
        speech_in: Arc<dyn SpeechInput>,
        speech_out: Arc<dyn SpeechOutput>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            model,
            speech_in,
            speech_out,
            tools: None,
            config: OrchestratorConfig::default(),
            sink: None,
            retry_predicate: None,
        }
    }

    /// 订阅编排器事件（状态变化、错误、转写、AI 回复、工具调用）
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// 开始新会话：生成开场白、进入 active、启动结束定时器、播报开场白并开始监听。
    /// 开场阶段的失败会返回给调用方（本次启动失败）。
    pub async fn start_conversation(
        &self,
        subject_ref: &str,
        context: Option<&str>,
        duration: Option<Duration>,
    ) -> Result<SessionSnapshot, OrchestratorError> {
        self.cancel_end_timer();
        lock(&self.inner.log).clear();
        *lock(&self.inner.opening) = Some(opening_prompt(subject_ref, context));

        let duration = duration.unwrap_or(self.inner.config.default_duration);
        let created = self.inner.session.create_session(duration, subject_ref);
        tracing::info!(
            session_id = created.session_id.as_deref().unwrap_or_default(),
            subject = %subject_ref,
            "Starting conversation"
        );

        let response = match self.call_model().await {
            Ok(response) => response,
            Err(e) => {
                // 启动失败：会话停在 initializing，但时钟不再空转
                self.inner.session.destroy();
                let err = OrchestratorError::Model(e);
                self.report_error("start_conversation", &err);
                return Err(err);
            }
        };

        if let Err(err) = self.inner.session.set_status(SessionStatus::Active) {
            self.inner.session.destroy();
            self.report_error("start_conversation", &err);
            return Err(err);
        }
        // 时长从创建会话起算，开场白耗时计入
        self.arm_end_timer(self.inner.session.time_remaining());
        self.handle_ai_response(response).await;

        if let Err(e) = self.inner.speech_in.start_listening().await {
            let err = OrchestratorError::Speech(e);
            self.report_error("start_conversation", &err);
            return Err(err);
        }
        Ok(self.get_session_state())
    }

    /// 处理一次用户发言。正在处理上一轮、或会话不在 active / wrapping_up 时直接丢弃。
    pub async fn process_user_speech(&self, transcript: &str) -> TurnOutcome {
        let Some(_guard) = ProcessingGuard::acquire(&self.inner.processing) else {
            tracing::debug!("Turn already in flight, dropping transcript");
            return TurnOutcome::Dropped(DropReason::Busy);
        };
        let status = self.inner.session.status();
        if !status.accepts_turns() {
            tracing::debug!(status = %status, "Session not accepting turns, dropping transcript");
            return TurnOutcome::Dropped(DropReason::SessionNotActive(status));
        }

        self.push_message(Message::user(transcript));
        self.inner.session.increment_message_count();

        if self.inner.session.should_wrap_up()
            && self.inner.session.status() == SessionStatus::Active
        {
            if let Err(err) = self.inner.session.set_status(SessionStatus::WrappingUp) {
                tracing::warn!(error = %err, "Failed to enter wrap-up");
            }
        }

        if self.inner.session.time_remaining().is_zero() {
            tracing::info!("No time remaining, ending conversation without model call");
            self.end_conversation().await;
            return TurnOutcome::SessionEnded;
        }

        match self.call_model().await {
            Ok(response) => {
                if self.deliver_response(response).await {
                    TurnOutcome::Responded
                } else {
                    TurnOutcome::SessionEnded
                }
            }
            Err(e) => {
                let err = OrchestratorError::Model(e);
                self.report_error("process_user_speech", &err);
                TurnOutcome::Failed(err)
            }
        }
    }

    /// 记录 assistant 消息、执行工具调用、播报非空文本
    pub async fn handle_ai_response(&self, response: ModelResponse) {
        self.deliver_response(response).await;
    }

    /// 返回 false 表示会话已结束，回复（或其剩余步骤）被丢弃
    async fn deliver_response(&self, response: ModelResponse) -> bool {
        if self.is_winding_down() {
            tracing::info!("Session ended while waiting on the model, dropping response");
            return false;
        }
        let ModelResponse {
            content,
            tool_calls,
            finish_reason,
        } = response;
        tracing::debug!(?finish_reason, tool_calls = tool_calls.len(), "Handling model response");

        self.push_message(Message::assistant(content.clone()).with_tool_calls(tool_calls.clone()));
        self.inner.session.increment_message_count();

        if !tool_calls.is_empty() {
            self.execute_tool_calls(&tool_calls).await;
        }

        let text = content.trim();
        if text.is_empty() {
            return true;
        }
        if self.is_winding_down() {
            tracing::info!("Session ended during tool calls, not speaking response");
            return false;
        }
        self.emit(OrchestratorEvent::AiResponse {
            content: text.to_string(),
        });
        if let Err(e) = self.inner.speech_out.speak(text).await {
            tracing::warn!(error = %e, "Speech output failed");
        }
        true
    }

    /// 结束会话：取消定时器、停止监听与播报、标记完成；可重复调用
    pub async fn end_conversation(&self) {
        self.cancel_end_timer();
        self.stop_speech().await;
        self.inner.session.complete_session();
    }

    /// 剩余时间
    pub fn check_time_remaining(&self) -> Duration {
        self.inner.session.time_remaining()
    }

    /// 对话历史的有序副本
    pub fn get_messages(&self) -> Vec<Message> {
        lock(&self.inner.log).messages().to_vec()
    }

    pub fn get_session_state(&self) -> SessionSnapshot {
        self.inner.session.snapshot()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// 停止一切后台活动：定时器、语音、会话时钟、事件订阅；不修改会话状态
    pub async fn destroy(&self) {
        self.cancel_end_timer();
        self.stop_speech().await;
        self.inner.session.destroy();
        self.inner.shutdown.cancel();
        tracing::info!("Orchestrator destroyed");
    }

    fn on_speech_input(&self, event: SpeechInputEvent) {
        match event {
            SpeechInputEvent::Transcript { text, is_final } => {
                self.emit(OrchestratorEvent::Transcript {
                    text: text.clone(),
                    is_final,
                });
                if is_final && !text.trim().is_empty() {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        orchestrator.process_user_speech(&text).await;
                    });
                }
            }
            SpeechInputEvent::Error { message } => {
                self.inner
                    .sink
                    .record(ErrorRecord::new("speech_input", message.clone()));
                self.emit(OrchestratorEvent::Error { message });
            }
        }
    }

    /// 逐个执行工具调用；单个失败或超时只记录，继续后续调用。超时不计入 tool_call_count。
    async fn execute_tool_calls(&self, calls: &[ToolCall]) {
        for call in calls {
            if self.is_winding_down() {
                tracing::debug!(tool = %call.name, "Session ended, skipping remaining tool calls");
                break;
            }
            let start = Instant::now();
            let result = self
                .inner
                .tools
                .execute(&call.name, call.arguments.clone())
                .await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(()) => {
                    self.inner.session.increment_tool_call_count();
                    ToolCallOutcome::Succeeded
                }
                Err(ToolError::Timeout { elapsed_ms, .. }) => {
                    self.inner.sink.record(
                        ErrorRecord::new(
                            "tool_call",
                            format!("Tool '{}' timed out after {elapsed_ms}ms", call.name),
                        )
                        .with_details(json!({
                            "tool": call.name,
                            "elapsed_ms": elapsed_ms,
                        })),
                    );
                    ToolCallOutcome::TimedOut { elapsed_ms }
                }
                Err(err) => {
                    self.inner.sink.record(
                        ErrorRecord::new("tool_call", err.to_string()).with_details(json!({
                            "tool": call.name,
                            "args": call.arguments,
                            "elapsed_ms": elapsed_ms,
                        })),
                    );
                    ToolCallOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            self.emit(OrchestratorEvent::ToolCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                outcome,
            });
        }
    }

    /// 发给模型的消息：开场指令 + 对话历史 (+ 收尾提示)
    fn request_history(&self) -> Vec<Message> {
        let mut history = Vec::new();
        if let Some(opening) = lock(&self.inner.opening).clone() {
            history.push(Message::system(opening));
        }
        history.extend_from_slice(lock(&self.inner.log).messages());
        if self.inner.session.status() == SessionStatus::WrappingUp {
            history.push(Message::system(WRAP_UP_HINT));
        }
        history
    }

    async fn call_model(&self) -> Result<ModelResponse, LlmError> {
        let history = self.request_history();
        let tools = self.inner.tools.list_for_model();
        self.inner.model.send_message(&history, &tools).await
    }

    fn push_message(&self, message: Message) {
        lock(&self.inner.log).push(message);
    }

    async fn stop_speech(&self) {
        if self.inner.speech_in.is_listening() {
            self.inner.speech_in.stop_listening().await;
        }
        if self.inner.speech_out.is_speaking() {
            self.inner.speech_out.stop().await;
        }
    }

    /// 启动会话结束定时器；已有的定时器先取消，至多一个待触发
    fn arm_end_timer(&self, duration: Duration) {
        let token = self.inner.shutdown.child_token();
        if let Some(previous) = lock(&self.inner.end_timer).replace(token.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    let Some(inner) = weak.upgrade() else { return };
                    let orchestrator = ConversationOrchestrator { inner };
                    if orchestrator.inner.session.status().accepts_turns() {
                        tracing::info!(
                            duration_ms = duration.as_millis() as u64,
                            "Session duration elapsed, ending conversation"
                        );
                        orchestrator.end_conversation().await;
                    }
                }
            }
        });
    }

    /// 会话已完成或编排器已销毁
    fn is_winding_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
            || self.inner.session.status() == SessionStatus::Completed
    }

    fn cancel_end_timer(&self) {
        if let Some(timer) = lock(&self.inner.end_timer).take() {
            timer.cancel();
        }
    }

    fn report_error(&self, context: &str, err: &OrchestratorError) {
        self.inner
            .sink
            .record(ErrorRecord::new(context, err.to_string()));
        self.emit(OrchestratorEvent::Error {
            message: err.to_string(),
        });
    }

    fn emit(&self, event: OrchestratorEvent) {
        // 无订阅者时发送失败，忽略
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::CapturingSink;
    use crate::speech::{ConsoleSpeechOutput, StdinSpeechInput};

    #[test]
    fn test_processing_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        {
            let first = ProcessingGuard::acquire(&flag);
            assert!(first.is_some());
            assert!(ProcessingGuard::acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::SeqCst));
        assert!(ProcessingGuard::acquire(&flag).is_some());
    }

    struct UnauthorizedModel;

    #[async_trait::async_trait]
    impl LanguageModel for UnauthorizedModel {
        async fn send_message(
            &self,
            _history: &[Message],
            _tools: &[crate::tools::ToolSpec],
        ) -> Result<ModelResponse, LlmError> {
            Err(LlmError::Unauthorized("invalid api key".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_opening_stops_session_clock() {
        let orchestrator = ConversationOrchestrator::builder(
            Arc::new(UnauthorizedModel),
            Arc::new(StdinSpeechInput::new()),
            Arc::new(ConsoleSpeechOutput::default()),
        )
        .sink(CapturingSink::new())
        .build();

        let err = orchestrator
            .start_conversation("image://x", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Model(LlmError::Unauthorized(_))));
        assert_eq!(orchestrator.get_session_state().status, SessionStatus::Initializing);
        assert!(!orchestrator.inner.session.is_clock_running());
    }

    #[test]
    fn test_opening_prompt_includes_context() {
        let prompt = opening_prompt("img-42", Some("  a cat on a sofa "));
        assert!(prompt.contains("img-42"));
        assert!(prompt.ends_with("a cat on a sofa"));

        let bare = opening_prompt("img-42", Some("   "));
        assert!(!bare.contains("What we know"));
    }
}
