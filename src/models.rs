use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Task,
    Info,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Task => "task",
            MessageRole::Info => "info",
        }
    }

    /// Whether turns with this role are part of the history sent to the backend.
    pub fn is_conversational(&self) -> bool {
        matches!(self, MessageRole::User | MessageRole::Assistant)
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsible_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            collapsible_content: None,
            task_type: None,
            status: None,
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn task(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Task, content)
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Info, content)
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_collapsible(mut self, content: impl Into<String>) -> Self {
        self.collapsible_content = Some(content.into());
        self
    }

    pub fn is_loading(&self) -> bool {
        self.status == Some(MessageStatus::Loading)
    }
}

/// Partial update applied by [`crate::conversation::ConversationState::update_message`].
/// There is deliberately no `id` field: a message id never changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub collapsible_content: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<MessageStatus>,
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Lets a new content flow clear a sticky `Error` status.
    pub reset_status: bool,
}

impl MessagePatch {
    pub fn status(status: MessageStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ..Self::default() }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_collapsible(mut self, content: impl Into<String>) -> Self {
        self.collapsible_content = Some(content.into());
        self
    }
}

// ── Tasks ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FlightSearch,
    HotelSearch,
    TravelSummary,
    TravelDetails,
}

impl TaskType {
    pub fn label(&self) -> &'static str {
        match self {
            TaskType::FlightSearch => "Flight search",
            TaskType::HotelSearch => "Hotel search",
            TaskType::TravelSummary => "Travel summary",
            TaskType::TravelDetails => "Travel details",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical task lifecycle. Backend casings are mapped onto this enum by
/// [`crate::polling::StatusVocabulary`] and never leak further in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Idle,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Loading indicator shown on the message linked to a task in this state.
    pub fn message_status(&self) -> MessageStatus {
        match self {
            TaskStatus::Completed => MessageStatus::Success,
            TaskStatus::Failed => MessageStatus::Error,
            TaskStatus::Idle | TaskStatus::Pending | TaskStatus::Processing => MessageStatus::Loading,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub task_type: TaskType,
    pub id: Option<String>,
    pub status: TaskStatus,
    pub message_id: Option<String>,
    /// Suppresses automatic downstream sequencing once this task completes.
    pub regenerate: bool,
}

impl Task {
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type, id: None, status: TaskStatus::Idle, message_id: None, regenerate: false }
    }
}

// ── Travel preferences & context ─────────────────────────────────────────────

macro_rules! merge_fields {
    ($target:ident, $source:ident; $($field:ident),+ $(,)?) => {
        $(
            if $source.$field.is_some() {
                $target.$field = $source.$field;
            }
        )+
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccommodationPreferences {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price_per_night: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amenities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightPreferences {
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub cabin_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<bool>,
}

/// Trip parameters accumulated from free-text extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TravelPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_airport_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_airport_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_city_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_city_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_guests: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accommodation: Option<AccommodationPreferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight: Option<FlightPreferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_preferences: Option<Vec<String>>,
}

impl TravelPreferences {
    /// Shallow merge: every field present in `other` replaces ours.
    pub fn merge(&mut self, other: TravelPreferences) {
        merge_fields!(self, other;
            origin_airport_code,
            destination_airport_code,
            origin_city_name,
            destination_city_name,
            start_date,
            end_date,
            num_guests,
            budget,
            accommodation,
            flight,
            activities,
            food_preferences,
        );
    }

    /// Required fields the search endpoints cannot do without.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if blank(&self.origin_city_name) {
            missing.push("origin_city_name");
        }
        if blank(&self.destination_city_name) {
            missing.push("destination_city_name");
        }
        if blank(&self.start_date) {
            missing.push("start_date");
        }
        if blank(&self.end_date) {
            missing.push("end_date");
        }
        if self.num_guests.unwrap_or(0) == 0 {
            missing.push("num_guests");
        }
        missing
    }

    pub fn is_searchable(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub raw_data: String,
    #[serde(default)]
    pub json_data: Value,
}

impl SearchResults {
    /// Accepts the shapes observed in task payloads: a bare string, an object
    /// with `raw_data`/`json_data`, or any other JSON value.
    pub fn from_payload(payload: Option<Value>) -> Self {
        match payload {
            None | Some(Value::Null) => Self::default(),
            Some(Value::String(raw)) => Self { raw_data: raw, json_data: Value::Null },
            Some(value) => match serde_json::from_value::<SearchResults>(value.clone()) {
                Ok(results) => results,
                Err(_) => Self {
                    raw_data: serde_json::to_string_pretty(&value).unwrap_or_default(),
                    json_data: value,
                },
            },
        }
    }
}

/// Everything the summary endpoint needs; preferences are sent flattened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TravelContext {
    #[serde(flatten)]
    pub preferences: TravelPreferences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_results: Option<SearchResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotel_results: Option<SearchResults>,
}

impl TravelContext {
    pub fn merge(&mut self, other: TravelContext) {
        self.preferences.merge(other.preferences);
        merge_fields!(self, other; flight_results, hotel_results);
    }
}

// ── Chat wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
}

/// One prior turn of the conversation as sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&Message> for ChatTurn {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
            tool_calls: (!m.tool_calls.is_empty()).then(|| m.tool_calls.clone()),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatStreamRequest {
    pub messages: Vec<ChatTurn>,
}

// ── Backend DTOs ─────────────────────────────────────────────────────────────

/// Response of every endpoint that enqueues a backend job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskAccepted {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `GET /api/task-status/{task_id}`
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub user_input: String,
    pub conversation_history: Vec<ChatTurn>,
    pub optional_details_asked: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanStatusData {
    #[serde(default)]
    pub assistant_message: Option<String>,
    #[serde(default)]
    pub final_summary: Option<String>,
    #[serde(default)]
    pub optional_details_asked: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// `GET /api/travel-recommendation/status/{task_id}`
#[derive(Debug, Clone, Deserialize)]
pub struct PlanStatusResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<PlanStatusData>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TravelDetailsRequest {
    pub user_input: String,
    pub conversation_history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlightSearchRequest {
    pub origin_city_name: Option<String>,
    pub destination_city_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub num_guests: Option<u32>,
}

impl From<&TravelPreferences> for FlightSearchRequest {
    fn from(p: &TravelPreferences) -> Self {
        Self {
            origin_city_name: p.origin_city_name.clone(),
            destination_city_name: p.destination_city_name.clone(),
            start_date: p.start_date.clone(),
            end_date: p.end_date.clone(),
            num_guests: p.num_guests,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HotelSearchRequest {
    pub destination_city_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub num_guests: Option<u32>,
}

impl From<&TravelPreferences> for HotelSearchRequest {
    fn from(p: &TravelPreferences) -> Self {
        Self {
            destination_city_name: p.destination_city_name.clone(),
            start_date: p.start_date.clone(),
            end_date: p.end_date.clone(),
            num_guests: p.num_guests,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}
