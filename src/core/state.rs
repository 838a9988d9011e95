//! 会话值类型：状态枚举、Session 与可序列化快照
//!
//! 状态单向流转 idle → initializing → active → wrapping_up → completed，
//! 同状态重复设置视为无操作（completed 的重复设置即幂等）。

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// 尚无会话
    Idle,
    /// 正在生成开场白
    Initializing,
    Active,
    /// 仍接受发言，但回复应趋向收尾
    WrappingUp,
    /// 终态
    Completed,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Idle => 0,
            SessionStatus::Initializing => 1,
            SessionStatus::Active => 2,
            SessionStatus::WrappingUp => 3,
            SessionStatus::Completed => 4,
        }
    }

    /// 只允许向前流转（或保持不变）；任何状态都不能回到 idle
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        next == self || (next != SessionStatus::Idle && next.rank() > self.rank())
    }

    /// 是否接受用户发言
    pub fn accepts_turns(self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::WrappingUp)
    }

    /// 时钟是否在走
    pub fn is_running(self) -> bool {
        !matches!(self, SessionStatus::Idle | SessionStatus::Completed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Active => "active",
            SessionStatus::WrappingUp => "wrapping_up",
            SessionStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// max(0, target - elapsed)
pub fn time_remaining(elapsed: Duration, target: Duration) -> Duration {
    target.saturating_sub(elapsed)
}

/// 一次限时对话
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub start: Instant,
    pub elapsed: Duration,
    pub target_duration: Duration,
    pub message_count: u64,
    pub tool_call_count: u64,
    /// 对话主题（图片）的引用
    pub image_context: String,
}

impl Session {
    pub fn new(target_duration: Duration, image_context: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Initializing,
            started_at: Utc::now(),
            start: Instant::now(),
            elapsed: Duration::ZERO,
            target_duration,
            message_count: 0,
            tool_call_count: 0,
            image_context: image_context.into(),
        }
    }

    /// 按当前时间刷新 elapsed；已完成的会话不再走时，elapsed 不回退
    pub fn refresh(&mut self, now: Instant) {
        if self.status.is_running() {
            let measured = now.saturating_duration_since(self.start);
            self.elapsed = self.elapsed.max(measured);
        }
    }

    pub fn time_remaining(&self) -> Duration {
        time_remaining(self.elapsed, self.target_duration)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: Some(self.id.clone()),
            status: self.status,
            started_at: Some(self.started_at),
            elapsed_ms: self.elapsed.as_millis() as u64,
            target_duration_ms: self.target_duration.as_millis() as u64,
            time_remaining_ms: self.time_remaining().as_millis() as u64,
            message_count: self.message_count,
            tool_call_count: self.tool_call_count,
            image_context: self.image_context.clone(),
        }
    }
}

/// 会话状态快照（供观察者与宿主读取）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub target_duration_ms: u64,
    pub time_remaining_ms: u64,
    pub message_count: u64,
    pub tool_call_count: u64,
    pub image_context: String,
}

impl SessionSnapshot {
    /// 无会话时的快照
    pub fn idle() -> Self {
        Self {
            session_id: None,
            status: SessionStatus::Idle,
            started_at: None,
            elapsed_ms: 0,
            target_duration_ms: 0,
            time_remaining_ms: 0,
            message_count: 0,
            tool_call_count: 0,
            image_context: String::new(),
        }
    }
}
