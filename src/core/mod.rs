//! 核心编排层：错误类型、会话状态机、编排器事件、对话编排器

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod session;
pub mod state;

pub use error::{OrchestratorError, SpeechError, ToolError};
pub use events::{OrchestratorEvent, ToolCallOutcome};
pub use orchestrator::{
    ConversationOrchestrator, DropReason, OrchestratorBuilder, OrchestratorConfig, TurnOutcome,
};
pub use session::{SessionConfig, SessionManager};
pub use state::{time_remaining, Session, SessionSnapshot, SessionStatus};
