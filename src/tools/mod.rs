pub mod effects;
pub mod executor;
pub mod registry;
pub mod schema;

pub use effects::{EmojiTool, HighlightTool, VisualEffect};
pub use executor::{ToolExecutor, DEFAULT_TOOL_TIMEOUT};
pub use registry::{Tool, ToolDefinition, ToolRegistry};
pub use schema::{ToolParameters, ToolSpec};
