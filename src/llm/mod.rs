//! LLM 层：模型协作方抽象、响应类型、退避重试、Mock 实现

pub mod mock;
pub mod retry;
pub mod traits;
pub mod types;

pub use mock::MockLanguageModel;
pub use retry::{retry_with_backoff, RetryPolicy, RetryPredicate, RetryingLanguageModel};
pub use traits::{LanguageModel, LlmError, ResponseStream};
pub use types::{FinishReason, ModelResponse, ToolCall};
