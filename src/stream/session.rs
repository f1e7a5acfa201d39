use std::sync::Arc;

use async_stream::stream;
use futures_util::{pin_mut, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::api::TravelApi;
use crate::models::{ChatTurn, ToolCallChunk};
use crate::stream::decoder::{SseDecoder, StreamEvent};

/// Consumer side of a streaming exchange. Every method defaults to a no-op.
pub trait StreamHandler {
    fn on_token(&mut self, _content: &str) {}
    fn on_tool_call_chunk(&mut self, _chunk: &ToolCallChunk) {}
    fn on_tool_start(&mut self, _name: &str, _input: &Value) {}
    fn on_tool_end(&mut self, _name: &str) {}
    fn on_error(&mut self, _message: &str) {}
    /// Fires exactly once per [`StreamingSession::stream`] call.
    fn on_end(&mut self) {}
}

/// Calls `on_end` when dropped, so it also runs if the stream future is
/// cancelled part-way.
struct EndOnDrop<'a, H: StreamHandler + ?Sized>(&'a mut H);

impl<H: StreamHandler + ?Sized> Drop for EndOnDrop<'_, H> {
    fn drop(&mut self) {
        self.0.on_end();
    }
}

/// Drives request/response exchanges against the chat stream endpoint.
#[derive(Clone)]
pub struct StreamingSession {
    api: Arc<dyn TravelApi>,
}

impl StreamingSession {
    pub fn new(api: Arc<dyn TravelApi>) -> Self {
        Self { api }
    }

    /// Lazily opens one exchange and yields its events.
    ///
    /// The sequence is finite: it stops after the backend's `end` event or the
    /// first transport failure, and its last item is always exactly one
    /// [`StreamEvent::End`]. Transport failures (including a non-OK status) are
    /// yielded as a single [`StreamEvent::Error`] before that `End`; decode
    /// failures are yielded in place and the stream keeps going.
    pub fn events(&self, history: Vec<ChatTurn>) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let api = Arc::clone(&self.api);
        stream! {
            let mut body = match api.chat_stream(&history).await {
                Ok(body) => body,
                Err(e) => {
                    error!("Failed to open chat stream: {e}");
                    yield StreamEvent::Error { message: e.to_string() };
                    yield StreamEvent::End;
                    return;
                }
            };

            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Error in chat stream: {e}");
                        yield StreamEvent::Error { message: e.to_string() };
                        yield StreamEvent::End;
                        return;
                    }
                };
                for event in decoder.push(&bytes) {
                    if event.is_terminal() {
                        info!("Received end event, closing stream.");
                        yield StreamEvent::End;
                        return;
                    }
                    yield event;
                }
            }

            decoder.finish();
            debug!("Chat stream closed without an end event");
            yield StreamEvent::End;
        }
    }

    /// Runs one exchange, dispatching each event to `handler`.
    pub async fn stream<H: StreamHandler + Send + ?Sized>(&self, history: Vec<ChatTurn>, handler: &mut H) {
        let mut guard = EndOnDrop(handler);
        let events = self.events(history);
        pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Token { content } => guard.0.on_token(&content),
                StreamEvent::ToolCallChunk { chunk } => guard.0.on_tool_call_chunk(&chunk),
                StreamEvent::ToolStart { name, input } => guard.0.on_tool_start(&name, &input),
                StreamEvent::ToolEnd { name } => guard.0.on_tool_end(&name),
                StreamEvent::Error { message } => guard.0.on_error(&message),
                StreamEvent::End => break,
            }
        }
    }
}
