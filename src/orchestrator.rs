use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::api::TravelApi;
use crate::config::ClientConfig;
use crate::conversation::ConversationState;
use crate::errors::{ClientError, PollError, Result};
use crate::markdown;
use crate::models::{
    Message, MessagePatch, MessageStatus, SearchResults, Task, TaskAccepted, TaskStatus,
    TaskStatusResponse, TaskType, TravelDetailsRequest,
};
use crate::polling::{PollHandler, Poller};
use crate::stores::{TaskPatch, TaskStore, TravelStore};

const STATUS_CHECK_FAILED: &str = "Task status check failed. Please try again.";
const SUMMARY_PLACEHOLDER: &str = "Preparing your travel summary…";

fn search_placeholder(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::FlightSearch => "Searching for flights...",
        TaskType::HotelSearch => "Searching for hotels...",
        TaskType::TravelSummary => SUMMARY_PLACEHOLDER,
        TaskType::TravelDetails => "Reading your trip details...",
    }
}

/// Bridges flight/hotel searches to poll loops and chains them:
/// flight search → hotel search → travel summary.
///
/// Cloning shares the same orchestrator. Its poll loops stop on
/// [`TaskOrchestrator::shutdown`] or when the last clone is dropped.
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn TravelApi>,
    conversation: ConversationState,
    tasks: TaskStore,
    travel: TravelStore,
    config: ClientConfig,
    pollers: HashMap<TaskType, Poller<TaskStatusResponse>>,
}

/// Routes one task type's poll outcomes back into the orchestrator.
struct TaskPollHandler {
    task_type: TaskType,
    orchestrator: Weak<Inner>,
}

#[async_trait]
impl PollHandler<TaskStatusResponse> for TaskPollHandler {
    async fn on_success(&self, response: TaskStatusResponse) {
        if let Some(inner) = self.orchestrator.upgrade() {
            inner.on_task_completed(self.task_type, response.data).await;
        }
    }

    async fn on_processing(&self, response: &TaskStatusResponse) {
        if let Some(inner) = self.orchestrator.upgrade() {
            let status = inner
                .config
                .task_status_vocabulary
                .classify(&response.status)
                .unwrap_or(TaskStatus::Processing);
            inner.record_status(self.task_type, status);
        }
    }

    async fn on_error(&self, error: PollError) {
        if let Some(inner) = self.orchestrator.upgrade() {
            inner.on_task_failed(self.task_type, error).await;
        }
    }
}

impl TaskOrchestrator {
    pub fn new(
        api: Arc<dyn TravelApi>,
        conversation: ConversationState,
        tasks: TaskStore,
        travel: TravelStore,
        config: ClientConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let pollers = [TaskType::FlightSearch, TaskType::HotelSearch]
                .into_iter()
                .map(|task_type| {
                    let api = Arc::clone(&api);
                    let probe = move |task_id: String| {
                        let api = Arc::clone(&api);
                        async move { api.task_status(&task_id).await }
                    };
                    let handler = Arc::new(TaskPollHandler { task_type, orchestrator: weak.clone() });
                    let poller = Poller::new(
                        probe,
                        config.task_status_vocabulary,
                        config.poll_interval,
                        handler as Arc<dyn PollHandler<TaskStatusResponse>>,
                    );
                    (task_type, poller)
                })
                .collect();

            Inner { api, conversation, tasks, travel, config, pollers }
        });
        Self { inner }
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.inner.conversation
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.inner.tasks
    }

    pub fn travel(&self) -> &TravelStore {
        &self.inner.travel
    }

    /// Registers a processing task of `task_type` linked to `message`, and
    /// appends the message as its loading placeholder.
    pub fn initialize_task(&self, task_type: TaskType, message: Message, regenerate: bool) -> String {
        self.inner.initialize_task(task_type, message, regenerate)
    }

    /// Attaches the backend id to the task and starts polling it.
    pub fn set_task_processing(&self, task_type: TaskType, backend_id: &str) {
        self.inner.set_task_processing(task_type, backend_id);
    }

    pub async fn start_flight_search(&self, regenerate: bool) -> Result<String> {
        self.inner.start_search(TaskType::FlightSearch, regenerate).await
    }

    pub async fn start_hotel_search(&self, regenerate: bool) -> Result<String> {
        self.inner.start_search(TaskType::HotelSearch, regenerate).await
    }

    /// Requests the travel summary for everything gathered so far.
    pub async fn generate_summary(&self) -> Result<String> {
        self.inner.generate_summary().await
    }

    /// Redoes a single step without triggering the steps after it.
    pub async fn regenerate(&self, task_type: TaskType) -> Result<()> {
        match task_type {
            TaskType::FlightSearch | TaskType::HotelSearch => {
                self.inner.start_search(task_type, true).await.map(|_| ())
            }
            TaskType::TravelSummary => {
                self.inner.conversation.set_loading(true);
                self.inner.generate_summary().await.map(|_| ())
            }
            TaskType::TravelDetails => Err(ClientError::Unexpected(format!("{task_type} cannot be regenerated"))),
        }
    }

    /// Extracts trip parameters from `input` (plus the conversation so far)
    /// and merges them into the travel store. Returns whether a search can start.
    pub async fn extract_preferences(&self, input: &str) -> Result<bool> {
        self.inner.extract_preferences(input).await
    }

    /// Handles a free-text trip request: extracts its details, then starts the
    /// flight → hotel → summary chain or asks for what is missing.
    /// Blank input, or input while the conversation is loading, is ignored.
    pub async fn plan_trip(&self, input: &str) -> Result<()> {
        let inner = &self.inner;
        if input.trim().is_empty() || inner.conversation.is_loading() {
            return Ok(());
        }

        inner.conversation.add_message(Message::user(input));
        inner.conversation.set_loading(true);

        match inner.extract_preferences(input).await {
            Ok(true) => {
                // failures are already reported in the conversation
                if let Err(e) = inner.start_search(TaskType::FlightSearch, false).await {
                    warn!("Flight search did not start: {e}");
                }
                Ok(())
            }
            Ok(false) => {
                let missing = inner
                    .travel
                    .preferences()
                    .unwrap_or_default()
                    .missing_fields()
                    .iter()
                    .map(|field| field.replace('_', " "))
                    .collect::<Vec<_>>()
                    .join(", ");
                inner.conversation.add_message(Message::assistant(format!(
                    "Please provide the following information: {missing}."
                )));
                inner.conversation.set_loading(false);
                Ok(())
            }
            Err(e) => {
                error!("Failed to extract travel details: {e}");
                inner.conversation.add_message(Message::assistant(
                    "Sorry, I couldn't understand the trip details. Please try again.",
                ));
                inner.conversation.set_loading(false);
                Err(e)
            }
        }
    }

    /// Whether any search is still being polled.
    pub fn is_busy(&self) -> bool {
        self.inner.pollers.values().any(Poller::is_polling)
    }

    /// Stops every poll loop. Call when the owning scope ends.
    pub fn shutdown(&self) {
        for poller in self.inner.pollers.values() {
            poller.stop();
        }
        info!("Task orchestrator shut down");
    }

    /// Starts over: stops polling, forgets tasks and travel data, and clears
    /// the loading flag. Messages are left to the caller.
    pub fn reset(&self) {
        for poller in self.inner.pollers.values() {
            poller.stop();
        }
        self.inner.tasks.reset();
        self.inner.travel.clear();
        self.inner.conversation.set_loading(false);
        info!("Task orchestrator reset");
    }
}

impl Inner {
    fn initialize_task(&self, task_type: TaskType, message: Message, regenerate: bool) -> String {
        let message = message.with_task_type(task_type).with_status(MessageStatus::Loading);
        self.tasks.add_task(Task {
            task_type,
            id: None,
            status: TaskStatus::Processing,
            message_id: Some(message.id.clone()),
            regenerate,
        });
        self.conversation.add_message(message)
    }

    fn set_task_processing(&self, task_type: TaskType, backend_id: &str) {
        self.tasks.update_task(
            task_type,
            TaskPatch {
                id: Some(backend_id.to_string()),
                status: Some(TaskStatus::Processing),
                ..TaskPatch::default()
            },
        );
        self.update_task_message(task_type, TaskStatus::Processing);

        match self.pollers.get(&task_type) {
            Some(poller) => poller.start(backend_id),
            None => warn!(task_type = %task_type, "No poll loop for this task type"),
        }
    }

    fn stop_polling(&self, task_type: TaskType) {
        if let Some(poller) = self.pollers.get(&task_type) {
            poller.stop();
        }
    }

    fn update_task_message(&self, task_type: TaskType, status: TaskStatus) {
        if let Some(message_id) = self.tasks.get(task_type).and_then(|task| task.message_id) {
            self.conversation
                .update_message(&message_id, MessagePatch::status(status.message_status()));
        }
    }

    /// Records a status surfaced by a poll; returns whether it changed.
    /// A settled task is never moved back to a waiting status.
    fn record_status(&self, task_type: TaskType, status: TaskStatus) -> bool {
        match self.tasks.status(task_type) {
            Some(current) if current == status => return false,
            Some(current) if current.is_terminal() && !status.is_terminal() => return false,
            _ => {}
        }
        self.tasks.update_task(task_type, TaskPatch::status(status));
        self.update_task_message(task_type, status);
        true
    }

    async fn start_search(self: &Arc<Self>, task_type: TaskType, regenerate: bool) -> Result<String> {
        let Some(preferences) = self.travel.preferences().filter(|p| p.is_searchable()) else {
            error!("Cannot start {}: Travel details are missing", task_type.label().to_lowercase());
            return Err(ClientError::MissingPreferences { task_type });
        };

        self.initialize_task(task_type, Message::task(search_placeholder(task_type)), regenerate);
        self.conversation.set_loading(true);

        let accepted = match task_type {
            TaskType::FlightSearch => self.api.search_flights(&preferences).await,
            TaskType::HotelSearch => self.api.search_hotels(&preferences).await,
            TaskType::TravelSummary | TaskType::TravelDetails => {
                Err(ClientError::Unexpected(format!("{task_type} is not a search")))
            }
        };

        match accepted.and_then(accepted_task_id) {
            Ok(task_id) => {
                info!(task_type = %task_type, task_id = %task_id, "Search accepted");
                self.set_task_processing(task_type, &task_id);
                Ok(task_id)
            }
            Err(e) => {
                error!("Error starting {}: {e}", task_type.label().to_lowercase());
                self.record_status(task_type, TaskStatus::Failed);
                self.conversation.add_message(Message::assistant(format!(
                    "Failed to start {}. Please try again.",
                    task_type.label().to_lowercase()
                )));
                self.conversation.set_loading(false);
                Err(e)
            }
        }
    }

    async fn on_task_completed(self: &Arc<Self>, task_type: TaskType, data: Option<Value>) {
        self.record_status(task_type, TaskStatus::Completed);
        self.stop_polling(task_type);

        let regenerate = self.tasks.get(task_type).is_some_and(|task| task.regenerate);
        info!(task_type = %task_type, regenerate, "Task completed");

        match task_type {
            TaskType::FlightSearch => {
                let results = SearchResults::from_payload(data);
                self.post_results(task_type, &results);
                self.travel.set_flight_results(results);

                if regenerate {
                    self.conversation.set_loading(false);
                } else if let Err(e) = self.start_search(TaskType::HotelSearch, false).await {
                    warn!("Hotel search did not start after flights: {e}");
                    if matches!(e, ClientError::MissingPreferences { .. }) {
                        self.conversation.add_message(Message::assistant(format!("{e}. Please try again.")));
                    }
                    self.conversation.set_loading(false);
                }
            }
            TaskType::HotelSearch => {
                let results = SearchResults::from_payload(data);
                self.post_results(task_type, &results);
                self.travel.set_hotel_results(results);

                if regenerate {
                    self.conversation.set_loading(false);
                } else if let Err(e) = self.generate_summary().await {
                    warn!("Travel summary was not generated: {e}");
                    self.conversation.set_loading(false);
                }
            }
            TaskType::TravelSummary | TaskType::TravelDetails => {
                self.conversation.set_loading(false);
            }
        }
    }

    fn post_results(&self, task_type: TaskType, results: &SearchResults) {
        let content = if results.raw_data.trim().is_empty() {
            format!("{} completed!", task_type.label())
        } else {
            markdown::render(&results.raw_data)
        };
        let mut message = Message::task(content)
            .with_task_type(task_type)
            .with_status(MessageStatus::Success);
        if !results.raw_data.is_empty() {
            message = message.with_collapsible(results.raw_data.clone());
        }
        self.conversation.add_message(message);
    }

    async fn on_task_failed(&self, task_type: TaskType, error: PollError) {
        self.record_status(task_type, TaskStatus::Failed);
        self.stop_polling(task_type);

        match error {
            PollError::Probe(e) => {
                error!(task_type = %task_type, "Error checking task status: {e}");
                self.conversation.add_message(Message::info(STATUS_CHECK_FAILED));
            }
            PollError::Failed(message) => {
                warn!(task_type = %task_type, "Task failed: {message}");
                let failure = ClientError::TaskFailed { task: task_type.label().to_string(), message };
                self.post_failure(task_type, &failure.to_string());
            }
            PollError::UnexpectedStatus(status) => {
                let failure = ClientError::TaskFailed {
                    task: task_type.label().to_string(),
                    message: format!("unexpected status {status}"),
                };
                self.post_failure(task_type, &failure.to_string());
            }
        }
        self.conversation.set_loading(false);
    }

    fn post_failure(&self, task_type: TaskType, description: &str) {
        self.conversation.add_message(
            Message::task(format!("{description}. Please try again."))
                .with_task_type(task_type)
                .with_status(MessageStatus::Error),
        );
    }

    async fn generate_summary(&self) -> Result<String> {
        let placeholder = Message::info(SUMMARY_PLACEHOLDER)
            .with_task_type(TaskType::TravelSummary)
            .with_status(MessageStatus::Loading);
        let placeholder_id = placeholder.id.clone();
        self.tasks.add_task(Task {
            status: TaskStatus::Processing,
            message_id: Some(placeholder_id.clone()),
            ..Task::new(TaskType::TravelSummary)
        });
        self.conversation.add_message(placeholder);

        let context = self.travel.context();
        let summary = self.api.travel_summary(&context).await.and_then(|summary| {
            if summary.trim().is_empty() {
                Err(ClientError::Summary { message: "backend returned an empty summary".into() })
            } else {
                Ok(summary)
            }
        });
        self.conversation.remove_message(&placeholder_id);

        match summary {
            Ok(summary) => {
                self.tasks.update_task(TaskType::TravelSummary, TaskPatch::status(TaskStatus::Completed));
                let message = Message::assistant(markdown::render(&summary))
                    .with_task_type(TaskType::TravelSummary)
                    .with_status(MessageStatus::Success);
                let id = self.conversation.add_message(message);
                self.conversation.set_loading(false);
                info!("Travel summary generated");
                Ok(id)
            }
            Err(e) => {
                error!("Error generating travel summary: {e}");
                self.tasks.update_task(TaskType::TravelSummary, TaskPatch::status(TaskStatus::Failed));
                self.post_failure(TaskType::TravelSummary, &format!("{} failed", TaskType::TravelSummary.label()));
                self.conversation.set_loading(false);
                Err(e)
            }
        }
    }

    async fn extract_preferences(&self, input: &str) -> Result<bool> {
        let request = TravelDetailsRequest {
            user_input: input.to_string(),
            conversation_history: self.conversation.history(),
        };
        let preferences = self.api.travel_details(&request).await?;
        self.travel.set_preferences(preferences);
        Ok(self.travel.preferences().is_some_and(|p| p.is_searchable()))
    }
}

fn accepted_task_id(accepted: TaskAccepted) -> Result<String> {
    accepted
        .task_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ClientError::MissingTaskId)
}
