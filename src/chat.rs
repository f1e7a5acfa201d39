use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::api::TravelApi;
use crate::conversation::ConversationState;
use crate::errors::Result;
use crate::models::{Message, MessagePatch, MessageStatus, ToolCallChunk};
use crate::stream::{StreamHandler, StreamingSession, ToolCallAccumulator};

/// Free-form chat over the streaming endpoint.
#[derive(Clone)]
pub struct ChatSession {
    api: Arc<dyn TravelApi>,
    session: StreamingSession,
    conversation: ConversationState,
}

/// Writes one streamed reply into its assistant message.
struct ReplyWriter {
    conversation: ConversationState,
    message_id: String,
    activity: Vec<String>,
    tool_calls: ToolCallAccumulator,
}

impl ReplyWriter {
    fn log_activity(&mut self, line: String) {
        self.activity.push(line);
        self.conversation
            .update_message(&self.message_id, MessagePatch::default().with_collapsible(self.activity.join("\n")));
    }
}

impl StreamHandler for ReplyWriter {
    fn on_token(&mut self, content: &str) {
        self.conversation.append_content(&self.message_id, content);
    }

    fn on_tool_call_chunk(&mut self, chunk: &ToolCallChunk) {
        self.tool_calls.push(chunk);
    }

    fn on_tool_start(&mut self, name: &str, input: &Value) {
        debug!(tool = name, input = %input, "Tool started");
        self.log_activity(format!("Using {name}…"));
    }

    fn on_tool_end(&mut self, name: &str) {
        debug!(tool = name, "Tool finished");
    }

    fn on_error(&mut self, message: &str) {
        error!("Chat stream error: {message}");
        self.log_activity(format!("Error: {message}"));
        self.conversation
            .update_message(&self.message_id, MessagePatch::status(MessageStatus::Error));
    }

    fn on_end(&mut self) {
        let tool_calls = std::mem::take(&mut self.tool_calls).finish();
        let patch = MessagePatch {
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            ..MessagePatch::status(MessageStatus::Success)
        };
        self.conversation.update_message(&self.message_id, patch);
        self.conversation.set_loading(false);
    }
}

impl ChatSession {
    pub fn new(api: Arc<dyn TravelApi>, conversation: ConversationState) -> Self {
        let session = StreamingSession::new(Arc::clone(&api));
        Self { api, session, conversation }
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Sends `text` and streams the reply into a new assistant message,
    /// returning that message's id. Blank input, or input while a reply is
    /// still streaming, is ignored.
    pub async fn send(&self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        if self.conversation.is_loading() {
            debug!("Reply still streaming, ignoring input");
            return None;
        }

        self.conversation.add_message(Message::user(text));
        let history = self.conversation.history();

        let reply = Message::assistant("").with_status(MessageStatus::Loading);
        let message_id = self.conversation.add_message(reply);
        self.conversation.set_loading(true);

        let mut writer = ReplyWriter {
            conversation: self.conversation.clone(),
            message_id: message_id.clone(),
            activity: Vec::new(),
            tool_calls: ToolCallAccumulator::default(),
        };
        self.session.stream(history, &mut writer).await;
        info!(message_id = %message_id, "Chat reply finished");
        Some(message_id)
    }

    /// Asks the backend to summarize the conversation so far.
    pub async fn summarize(&self) -> Result<String> {
        self.api.chat_summary(&self.conversation.history()).await
    }
}
