//! 会话管理：创建 / 状态流转 / 计数 / 周期时钟
//!
//! 时钟是 create_session 时启动的定时任务，由 CancellationToken 控制；
//! complete_session、destroy 以及管理器被丢弃时都会停止它。
//! 状态变化（包括时钟自动进入 wrapping_up）通过 watch 通道广播。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::{OrchestratorError, Session, SessionSnapshot, SessionStatus};

/// 时钟与收尾阈值配置
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// elapsed 达到该值时 active 自动进入 wrapping_up（与 target_duration 无关）
    pub wrap_up_threshold: Duration,
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wrap_up_threshold: Duration::from_millis(50_000),
            tick_interval: Duration::from_millis(100),
        }
    }
}

struct ClockHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ClockHandle {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

type SharedSession = Arc<Mutex<Option<Session>>>;

fn lock_session(shared: &SharedSession) -> MutexGuard<'_, Option<Session>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 单个时钟周期：刷新 elapsed，并在阈值到达时把 active 推进到 wrapping_up；返回变化后的状态
fn tick(session: &mut Session, now: Instant, wrap_up_threshold: Duration) -> Option<SessionStatus> {
    if !session.status.is_running() {
        return None;
    }
    session.refresh(now);
    if session.status == SessionStatus::Active && session.elapsed >= wrap_up_threshold {
        session.status = SessionStatus::WrappingUp;
        return Some(SessionStatus::WrappingUp);
    }
    None
}

async fn run_clock(
    shared: SharedSession,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    config: SessionConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.tick_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let changed = {
                    let mut guard = lock_session(&shared);
                    guard
                        .as_mut()
                        .and_then(|s| tick(s, Instant::now(), config.wrap_up_threshold).map(|st| (s.id.clone(), st)))
                };
                if let Some((session_id, status)) = changed {
                    tracing::info!(session_id = %session_id, "Wrap-up threshold reached, entering wrapping_up");
                    status_tx.send_replace(status);
                }
            }
        }
    }
}

/// 单会话管理器：同一时刻至多一个会话
pub struct SessionManager {
    config: SessionConfig,
    session: SharedSession,
    clock: Mutex<Option<ClockHandle>>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
            clock: Mutex::new(None),
            status_tx: Arc::new(status_tx),
        }
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// 创建新会话（替换旧会话），进入 initializing 并启动时钟；需在 tokio 运行时内调用
    pub fn create_session(
        &self,
        target_duration: Duration,
        image_context: impl Into<String>,
    ) -> SessionSnapshot {
        self.stop_clock();

        let session = Session::new(target_duration, image_context);
        let snapshot = session.snapshot();
        tracing::info!(
            session_id = %session.id,
            target_duration_ms = target_duration.as_millis() as u64,
            "Session created"
        );
        *lock_session(&self.session) = Some(session);
        self.status_tx.send_replace(SessionStatus::Initializing);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_clock(
            self.session.clone(),
            self.status_tx.clone(),
            self.config.clone(),
            cancel.clone(),
        ));
        *self.lock_clock() = Some(ClockHandle { cancel, task });

        snapshot
    }

    /// 当前会话的副本（已刷新 elapsed）
    pub fn current(&self) -> Option<Session> {
        let mut guard = lock_session(&self.session);
        guard.as_mut().map(|s| {
            s.refresh(Instant::now());
            s.clone()
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.current()
            .map(|s| s.snapshot())
            .unwrap_or_else(SessionSnapshot::idle)
    }

    pub fn status(&self) -> SessionStatus {
        lock_session(&self.session)
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(SessionStatus::Idle)
    }

    /// 设置状态；只允许向前流转，completed 等价于 complete_session
    pub fn set_status(&self, status: SessionStatus) -> Result<(), OrchestratorError> {
        if status == SessionStatus::Completed {
            return if self.complete_session() || self.status() == SessionStatus::Completed {
                Ok(())
            } else {
                Err(OrchestratorError::NoSession)
            };
        }

        {
            let mut guard = lock_session(&self.session);
            let session = guard.as_mut().ok_or(OrchestratorError::NoSession)?;
            let from = session.status;
            if !from.can_transition_to(status) {
                return Err(OrchestratorError::InvalidTransition { from, to: status });
            }
            if from == status {
                return Ok(());
            }
            session.refresh(Instant::now());
            session.status = status;
            tracing::info!(session_id = %session.id, from = %from, to = %status, "Session status changed");
        }
        self.status_tx.send_replace(status);
        Ok(())
    }

    /// 计数只在未完成的会话上递增；返回当前值，无会话时为 0
    pub fn increment_message_count(&self) -> u64 {
        let mut guard = lock_session(&self.session);
        match guard.as_mut() {
            Some(s) if s.status != SessionStatus::Completed => {
                s.message_count += 1;
                s.message_count
            }
            Some(s) => s.message_count,
            None => 0,
        }
    }

    pub fn increment_tool_call_count(&self) -> u64 {
        let mut guard = lock_session(&self.session);
        match guard.as_mut() {
            Some(s) if s.status != SessionStatus::Completed => {
                s.tool_call_count += 1;
                s.tool_call_count
            }
            Some(s) => s.tool_call_count,
            None => 0,
        }
    }

    /// 是否应收尾：已在 wrapping_up，或运行中的会话 elapsed 已达阈值
    pub fn should_wrap_up(&self) -> bool {
        let mut guard = lock_session(&self.session);
        match guard.as_mut() {
            Some(s) if s.status.is_running() => {
                s.refresh(Instant::now());
                s.status == SessionStatus::WrappingUp || s.elapsed >= self.config.wrap_up_threshold
            }
            _ => false,
        }
    }

    /// max(0, target - elapsed)；无会话时为 0
    pub fn time_remaining(&self) -> Duration {
        self.current()
            .map(|s| s.time_remaining())
            .unwrap_or(Duration::ZERO)
    }

    /// 标记完成并停止时钟；幂等，返回本次调用是否真正发生了状态变化
    pub fn complete_session(&self) -> bool {
        let completed = {
            let mut guard = lock_session(&self.session);
            match guard.as_mut() {
                Some(s) if s.status != SessionStatus::Completed => {
                    s.refresh(Instant::now());
                    s.status = SessionStatus::Completed;
                    tracing::info!(
                        session_id = %s.id,
                        elapsed_ms = s.elapsed.as_millis() as u64,
                        messages = s.message_count,
                        tool_calls = s.tool_call_count,
                        "Session completed"
                    );
                    true
                }
                _ => false,
            }
        };
        self.stop_clock();
        if completed {
            self.status_tx.send_replace(SessionStatus::Completed);
        }
        completed
    }

    /// 无条件停止时钟，不改变状态
    pub fn destroy(&self) {
        self.stop_clock();
    }

    /// 时钟任务是否仍在运行
    pub fn is_clock_running(&self) -> bool {
        self.lock_clock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    fn lock_clock(&self) -> MutexGuard<'_, Option<ClockHandle>> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_clock(&self) {
        if let Some(handle) = self.lock_clock().take() {
            handle.stop();
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_clock();
    }
}
