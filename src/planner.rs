use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::api::TravelApi;
use crate::config::ClientConfig;
use crate::conversation::ConversationState;
use crate::errors::{ClientError, PollError, Result};
use crate::lock;
use crate::markdown;
use crate::models::{Message, MessageStatus, PlanRequest, PlanStatusResponse};
use crate::polling::{PollHandler, Poller};

const THINKING: &str = "Thinking...";
const NO_PLAN: &str =
    "I've finished processing, but couldn't generate a final plan. Please check the details provided.";
const UNKNOWN_ERROR: &str = "An unknown error occurred during planning.";

/// Conversational trip planning: each user turn becomes a recommendation job
/// on the backend, polled until it answers.
#[derive(Clone)]
pub struct TravelPlanner {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn TravelApi>,
    conversation: ConversationState,
    optional_details_asked: AtomicBool,
    placeholder_id: Mutex<Option<String>>,
    poller: Poller<PlanStatusResponse>,
}

struct PlanPollHandler {
    planner: Weak<Inner>,
}

#[async_trait]
impl PollHandler<PlanStatusResponse> for PlanPollHandler {
    async fn on_success(&self, response: PlanStatusResponse) {
        if let Some(inner) = self.planner.upgrade() {
            inner.on_answer(response);
        }
    }

    async fn on_processing(&self, _response: &PlanStatusResponse) {
        if let Some(inner) = self.planner.upgrade() {
            inner.keep_thinking();
        }
    }

    async fn on_error(&self, error: PollError) {
        if let Some(inner) = self.planner.upgrade() {
            let message = match error {
                PollError::Probe(e) => {
                    error!("Error polling travel recommendation: {e}");
                    UNKNOWN_ERROR.to_string()
                }
                other => other.to_string(),
            };
            inner.fail(&format!("Sorry, I encountered an error: {message}"));
        }
    }
}

impl TravelPlanner {
    pub fn new(api: Arc<dyn TravelApi>, conversation: ConversationState, config: &ClientConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let probe_api = Arc::clone(&api);
            let probe = move |task_id: String| {
                let api = Arc::clone(&probe_api);
                async move { api.plan_status(&task_id).await }
            };
            let handler: Arc<dyn PollHandler<PlanStatusResponse>> =
                Arc::new(PlanPollHandler { planner: weak.clone() });

            Inner {
                api,
                conversation,
                optional_details_asked: AtomicBool::new(false),
                placeholder_id: Mutex::new(None),
                poller: Poller::new(probe, config.plan_status_vocabulary, config.plan_poll_interval, handler),
            }
        });
        Self { inner }
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.inner.conversation
    }

    /// Sends one user turn to the planner. Blank input, and input arriving
    /// while a previous turn is still being answered, is ignored.
    pub async fn handle_input(&self, text: &str) -> Result<()> {
        let inner = &self.inner;
        if text.trim().is_empty() {
            return Ok(());
        }
        if self.is_busy() {
            debug!("Planner is busy, ignoring input");
            return Ok(());
        }

        inner.conversation.add_message(Message::user(text));
        let placeholder = Message::assistant(THINKING).with_status(MessageStatus::Loading);
        *lock(&inner.placeholder_id) = Some(placeholder.id.clone());
        inner.conversation.add_message(placeholder);
        inner.conversation.set_loading(true);

        let request = PlanRequest {
            user_input: text.to_string(),
            conversation_history: inner.conversation.history(),
            optional_details_asked: inner.optional_details_asked.load(Ordering::SeqCst),
        };

        match inner.api.plan_travel(&request).await {
            Ok(accepted) => match accepted.task_id.filter(|id| !id.trim().is_empty()) {
                Some(task_id) => {
                    info!(task_id = %task_id, "Travel recommendation started");
                    inner.poller.start(task_id);
                    Ok(())
                }
                None => {
                    error!("No task_id received from backend");
                    inner.fail("Sorry, I couldn't initiate the planning process.");
                    Err(ClientError::MissingTaskId)
                }
            },
            Err(e) => {
                error!("Error initiating travel planning: {e}");
                inner.poller.stop();
                inner.fail("Sorry, I encountered an error starting the planning process. Please try again.");
                Err(e)
            }
        }
    }

    /// Whether the backend has asked for optional details already.
    pub fn optional_details_asked(&self) -> bool {
        self.inner.optional_details_asked.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.inner.conversation.is_loading() || self.inner.poller.is_polling()
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.inner.poller.current_id()
    }

    pub fn shutdown(&self) {
        self.inner.poller.stop();
    }
}

impl Inner {
    fn take_placeholder(&self) {
        if let Some(id) = lock(&self.placeholder_id).take() {
            self.conversation.remove_message(&id);
        }
    }

    fn on_answer(&self, response: PlanStatusResponse) {
        self.take_placeholder();

        let data = response.data.unwrap_or_default();
        self.optional_details_asked
            .store(data.optional_details_asked.unwrap_or(false), Ordering::SeqCst);

        let content = data
            .assistant_message
            .or(data.final_summary)
            .filter(|text| !text.trim().is_empty())
            .map(|text| markdown::render(&text))
            .unwrap_or_else(|| NO_PLAN.to_string());
        self.conversation
            .add_message(Message::assistant(content).with_status(MessageStatus::Success));
        self.conversation.set_loading(false);
    }

    /// Keeps the loading state and restores the placeholder if something removed it.
    fn keep_thinking(&self) {
        self.conversation.set_loading(true);
        let id = lock(&self.placeholder_id).clone();
        if let Some(id) = id {
            if !self.conversation.contains(&id) {
                let mut placeholder = Message::assistant(THINKING).with_status(MessageStatus::Loading);
                placeholder.id = id;
                self.conversation.add_message(placeholder);
            }
        }
    }

    fn fail(&self, content: &str) {
        self.take_placeholder();
        self.conversation
            .add_message(Message::assistant(content).with_status(MessageStatus::Error));
        self.conversation.set_loading(false);
    }
}
