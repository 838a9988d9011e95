//! 记忆层：会话内对话历史（仅进程内存，不做持久化）

pub mod conversation;

pub use conversation::{ConversationLog, Message, Role};
