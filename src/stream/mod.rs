pub mod decoder;
pub mod session;
pub mod tool_calls;

pub use decoder::{SseDecoder, StreamEvent};
pub use session::{StreamHandler, StreamingSession};
pub use tool_calls::ToolCallAccumulator;
