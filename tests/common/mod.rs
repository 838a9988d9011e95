//! 集成测试共用的协作方替身：脚本化模型、可记录的语音输入 / 输出

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley::core::{
    ConversationOrchestrator, OrchestratorConfig, SessionConfig, SpeechError,
};
use parley::llm::{LanguageModel, LlmError, ModelResponse, RetryPolicy};
use parley::memory::Message;
use parley::observability::CapturingSink;
use parley::speech::{SpeechInput, SpeechInputEvent, SpeechOutput, SpeechOutputEvent};
use parley::tools::{ToolRegistry, ToolSpec};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 按脚本依次返回结果；脚本耗尽后返回固定文本
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    delay: Duration,
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<Message>>>,
    catalogs: Mutex<Vec<Vec<ToolSpec>>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            delay,
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
            catalogs: Mutex::new(Vec::new()),
        })
    }

    pub fn push_ok(&self, response: ModelResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_err(&self, err: LlmError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_history(&self) -> Vec<Message> {
        self.histories.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn last_catalog(&self) -> Vec<ToolSpec> {
        self.catalogs.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn send_message(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().unwrap().push(history.to_vec());
        self.catalogs.lock().unwrap().push(tools.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ModelResponse::text("Mm-hmm, tell me more.")))
    }
}

/// 可记录的语音输入；transcript() 模拟识别结果
pub struct FakeSpeechInput {
    listening: AtomicBool,
    fail_start: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    events: broadcast::Sender<SpeechInputEvent>,
}

impl FakeSpeechInput {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            listening: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            events,
        })
    }

    pub fn fail_on_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn transcript(&self, text: &str, is_final: bool) {
        let _ = self.events.send(SpeechInputEvent::Transcript {
            text: text.to_string(),
            is_final,
        });
    }

    pub fn error(&self, message: &str) {
        let _ = self.events.send(SpeechInputEvent::Error {
            message: message.to_string(),
        });
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_listening_now(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechInput for FakeSpeechInput {
    async fn start_listening(&self) -> Result<(), SpeechError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SpeechError::NotInitialized("speech input"));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_listening(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<SpeechInputEvent> {
        self.events.subscribe()
    }
}

/// 记录所有播报文本；设置 speak_delay 后 speak 会持续一段时间，期间可被 stop 打断
pub struct FakeSpeechOutput {
    spoken: Mutex<Vec<String>>,
    speaking: AtomicBool,
    speak_delay: Mutex<Duration>,
    current: Mutex<CancellationToken>,
    pub stops: AtomicUsize,
    events: broadcast::Sender<SpeechOutputEvent>,
}

impl FakeSpeechOutput {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            speaking: AtomicBool::new(false),
            speak_delay: Mutex::new(Duration::ZERO),
            current: Mutex::new(CancellationToken::new()),
            stops: AtomicUsize::new(0),
            events,
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn set_speak_delay(&self, delay: Duration) {
        *self.speak_delay.lock().unwrap() = delay;
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechOutput for FakeSpeechOutput {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        self.spoken.lock().unwrap().push(text.to_string());
        let token = CancellationToken::new();
        *self.current.lock().unwrap() = token.clone();
        let delay = *self.speak_delay.lock().unwrap();

        self.speaking.store(true, Ordering::SeqCst);
        let _ = self.events.send(SpeechOutputEvent::Started);
        if !delay.is_zero() {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.speaking.store(false, Ordering::SeqCst);
        let _ = self.events.send(SpeechOutputEvent::Ended);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.current.lock().unwrap().cancel();
        self.speaking.store(false, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<SpeechOutputEvent> {
        self.events.subscribe()
    }
}

/// 测试用配置：重试延迟缩短到毫秒级
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        session: SessionConfig::default(),
        default_duration: Duration::from_millis(60_000),
        tool_timeout: Duration::from_millis(500),
        retry: RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        },
    }
}

pub struct Harness {
    pub orchestrator: ConversationOrchestrator,
    pub model: Arc<ScriptedModel>,
    pub input: Arc<FakeSpeechInput>,
    pub output: Arc<FakeSpeechOutput>,
    pub sink: Arc<CapturingSink>,
}

pub fn harness(model: Arc<ScriptedModel>, registry: ToolRegistry, config: OrchestratorConfig) -> Harness {
    let input = FakeSpeechInput::new();
    let output = FakeSpeechOutput::new();
    let sink = CapturingSink::new();
    let orchestrator = ConversationOrchestrator::builder(model.clone(), input.clone(), output.clone())
        .tools(Arc::new(registry))
        .config(config)
        .sink(sink.clone())
        .build();
    Harness {
        orchestrator,
        model,
        input,
        output,
        sink,
    }
}
