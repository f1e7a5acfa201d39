use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::lock;
use crate::models::{ChatTurn, Message, MessagePatch, MessageStatus};

#[derive(Default)]
struct Inner {
    messages: Vec<Message>,
    loading: bool,
}

/// The message list and global loading flag of one conversation.
///
/// Clones share the same state. Every mutation bumps a revision counter that
/// an external renderer can watch via [`ConversationState::subscribe`].
#[derive(Clone)]
pub struct ConversationState {
    inner: Arc<Mutex<Inner>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self { inner: Arc::new(Mutex::new(Inner::default())), revision: Arc::new(revision) }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let result = f(&mut lock(&self.inner));
        self.revision.send_modify(|rev| *rev += 1);
        result
    }

    /// Appends `message` and returns its id.
    pub fn add_message(&self, message: Message) -> String {
        let id = message.id.clone();
        self.mutate(|inner| inner.messages.push(message));
        id
    }

    /// Shallow-merges `patch` into the message with `id`. Returns `false` when
    /// no such message exists.
    ///
    /// An `Error` status is sticky: a later `Success` leaves it in place unless
    /// the patch sets `reset_status`.
    pub fn update_message(&self, id: &str, patch: MessagePatch) -> bool {
        self.mutate(|inner| {
            let Some(message) = inner.messages.iter_mut().find(|m| m.id == id) else {
                return false;
            };
            apply_patch(message, patch);
            true
        })
    }

    /// Appends text to a message's content.
    pub fn append_content(&self, id: &str, text: &str) -> bool {
        self.mutate(|inner| match inner.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.content.push_str(text);
                true
            }
            None => false,
        })
    }

    pub fn remove_message(&self, id: &str) -> Option<Message> {
        self.mutate(|inner| {
            let index = inner.messages.iter().position(|m| m.id == id)?;
            Some(inner.messages.remove(index))
        })
    }

    pub fn clear_messages(&self) {
        self.mutate(|inner| inner.messages.clear());
    }

    pub fn set_loading(&self, loading: bool) {
        self.mutate(|inner| inner.loading = loading);
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner).loading
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner).messages.clone()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        lock(&self.inner).messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.inner).messages.iter().any(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prior turns to send to the backend: user and assistant messages that
    /// are not still loading.
    pub fn history(&self) -> Vec<ChatTurn> {
        lock(&self.inner)
            .messages
            .iter()
            .filter(|m| m.role.is_conversational() && !m.is_loading())
            .map(ChatTurn::from)
            .collect()
    }

    /// Receiver that changes on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

fn apply_patch(message: &mut Message, patch: MessagePatch) {
    if let Some(content) = patch.content {
        message.content = content;
    }
    if let Some(collapsible) = patch.collapsible_content {
        message.collapsible_content = Some(collapsible);
    }
    if let Some(task_type) = patch.task_type {
        message.task_type = Some(task_type);
    }
    if let Some(tool_calls) = patch.tool_calls {
        message.tool_calls = tool_calls;
    }
    if patch.reset_status {
        message.status = patch.status;
    } else if let Some(status) = patch.status {
        let sticky = message.status == Some(MessageStatus::Error) && status == MessageStatus::Success;
        if !sticky {
            message.status = Some(status);
        }
    }
}
