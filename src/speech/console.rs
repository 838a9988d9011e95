//! 终端语音适配器（演示用）：stdin 每行作为一次最终识别结果，播报即打印到 stdout

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::SpeechError;
use crate::speech::{SpeechInput, SpeechInputEvent, SpeechOutput, SpeechOutputEvent};

const EVENT_CAPACITY: usize = 32;

/// 从 stdin 读取发言
pub struct StdinSpeechInput {
    listening: Arc<AtomicBool>,
    events: broadcast::Sender<SpeechInputEvent>,
    reader: Mutex<Option<CancellationToken>>,
}

impl StdinSpeechInput {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            listening: Arc::new(AtomicBool::new(false)),
            events,
            reader: Mutex::new(None),
        }
    }
}

impl Default for StdinSpeechInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechInput for StdinSpeechInput {
    async fn start_listening(&self) -> Result<(), SpeechError> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = self.events.clone();
        let listening = self.listening.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(text)) => {
                            let text = text.trim().to_string();
                            if !text.is_empty() {
                                let _ = events.send(SpeechInputEvent::Transcript { text, is_final: true });
                            }
                        }
                        Ok(None) => {
                            tracing::info!("stdin closed, speech input stopped");
                            break;
                        }
                        Err(e) => {
                            let _ = events.send(SpeechInputEvent::Error { message: e.to_string() });
                            break;
                        }
                    }
                }
            }
            listening.store(false, Ordering::SeqCst);
        });
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel);
        Ok(())
    }

    async fn stop_listening(&self) {
        if let Some(token) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
        self.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<SpeechInputEvent> {
        self.events.subscribe()
    }
}

/// 打印播报内容，并按字数模拟播报时长
pub struct ConsoleSpeechOutput {
    speaking: AtomicBool,
    per_word: Duration,
    events: broadcast::Sender<SpeechOutputEvent>,
    current: Mutex<CancellationToken>,
}

impl ConsoleSpeechOutput {
    pub fn new(per_word: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            speaking: AtomicBool::new(false),
            per_word,
            events,
            current: Mutex::new(CancellationToken::new()),
        }
    }
}

impl Default for ConsoleSpeechOutput {
    fn default() -> Self {
        Self::new(Duration::from_millis(60))
    }
}

#[async_trait]
impl SpeechOutput for ConsoleSpeechOutput {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();

        self.speaking.store(true, Ordering::SeqCst);
        let _ = self.events.send(SpeechOutputEvent::Started);
        println!("🔊 {text}");

        let words = text.split_whitespace().count() as u32;
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(self.per_word * words) => {}
        }

        self.speaking.store(false, Ordering::SeqCst);
        let _ = self.events.send(SpeechOutputEvent::Ended);
        Ok(())
    }

    async fn stop(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<SpeechOutputEvent> {
        self.events.subscribe()
    }
}
