use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};
use crate::models::{
    AdminCredentials, ChatStreamRequest, ChatTurn, FlightSearchRequest, HotelSearchRequest,
    PlanRequest, PlanStatusResponse, TaskAccepted, TaskStatusResponse, TravelContext,
    TravelDetailsRequest, TravelPreferences,
};

/// Raw body of the chat stream, chunk by chunk as it arrives.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Everything the core needs from the travel backend.
#[async_trait]
pub trait TravelApi: Send + Sync {
    /// `POST /api/chat/stream`; fails on a non-2xx status or an empty body.
    async fn chat_stream(&self, turns: &[ChatTurn]) -> Result<ByteStream>;

    /// `POST /api/travel-recommendation`
    async fn plan_travel(&self, request: &PlanRequest) -> Result<TaskAccepted>;

    /// `GET /api/travel-recommendation/status/{task_id}`
    async fn plan_status(&self, task_id: &str) -> Result<PlanStatusResponse>;

    /// `POST /api/travel-details`: structured trip parameters extracted from free text.
    async fn travel_details(&self, request: &TravelDetailsRequest) -> Result<TravelPreferences>;

    /// `POST /api/search-flights`
    async fn search_flights(&self, preferences: &TravelPreferences) -> Result<TaskAccepted>;

    /// `POST /api/search-hotels`
    async fn search_hotels(&self, preferences: &TravelPreferences) -> Result<TaskAccepted>;

    /// `GET /api/task-status/{task_id}`
    async fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse>;

    /// `POST /api/travel-summary`, returns markdown.
    async fn travel_summary(&self, context: &TravelContext) -> Result<String>;

    /// `POST /api/chat/summary`
    async fn chat_summary(&self, turns: &[ChatTurn]) -> Result<String>;

    /// `POST /api/verify-admin`
    async fn verify_admin(&self, credentials: &AdminCredentials) -> Result<bool>;

    /// `GET /api/check-admin`
    async fn check_admin(&self) -> Result<bool>;
}

/// [`TravelApi`] over HTTP.
#[derive(Clone)]
pub struct HttpTravelApi {
    client: Client,
    config: ClientConfig,
}

impl HttpTravelApi {
    pub fn new(config: ClientConfig) -> Self {
        Self { client: Client::new(), config }
    }

    pub fn with_client(client: Client, config: ClientConfig) -> Self {
        Self { client, config }
    }

    fn timeout(&self) -> Duration {
        self.config.request_timeout
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let resp = request.send().await.map_err(|e| {
            error!("Request to {url} failed: {e}");
            ClientError::network(url, e)
        })?;

        let status = resp.status();
        if !status.is_success() {
            error!("Server returned {status} for {url}");
            return Err(ClientError::HttpStatus { status: status.as_u16(), url: url.to_string() });
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder, url: &str) -> Result<T> {
        self.send(request.timeout(self.timeout()), url)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ClientError::invalid_payload(url, e))
    }

    async fn text(&self, request: RequestBuilder, url: &str) -> Result<String> {
        let body = self
            .send(request.timeout(self.timeout()), url)
            .await?
            .text()
            .await
            .map_err(|e| ClientError::network(url, e))?;
        Ok(unwrap_text_body(body))
    }
}

/// Summary endpoints answer either with a JSON string, a `{"summary": ..}`
/// object, or plain text.
fn unwrap_text_body(body: String) -> String {
    match serde_json::from_str::<Value>(&body) {
        Ok(Value::String(text)) => text,
        Ok(Value::Object(map)) => match map.get("summary") {
            Some(Value::String(text)) => text.clone(),
            _ => body,
        },
        _ => body,
    }
}

fn admin_flag(value: Value) -> bool {
    match value {
        Value::Bool(flag) => flag,
        Value::Object(map) => map
            .get("is_admin")
            .or_else(|| map.get("valid"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        _ => false,
    }
}

#[async_trait]
impl TravelApi for HttpTravelApi {
    async fn chat_stream(&self, turns: &[ChatTurn]) -> Result<ByteStream> {
        let url = self.config.endpoint("/api/chat/stream");
        debug!("Opening chat stream with {} turns", turns.len());

        let request = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&ChatStreamRequest { messages: turns.to_vec() });
        let resp = self.send(request, &url).await?;

        if resp.status() == StatusCode::NO_CONTENT || resp.content_length() == Some(0) {
            return Err(ClientError::EmptyBody { url });
        }

        let body = resp
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| ClientError::network(url.clone(), e)));
        Ok(Box::pin(body))
    }

    async fn plan_travel(&self, request: &PlanRequest) -> Result<TaskAccepted> {
        let url = self.config.endpoint("/api/travel-recommendation");
        self.json(self.client.post(&url).json(request), &url).await
    }

    async fn plan_status(&self, task_id: &str) -> Result<PlanStatusResponse> {
        let url = self.config.endpoint(&format!("/api/travel-recommendation/status/{task_id}"));
        self.json(self.client.get(&url), &url).await
    }

    async fn travel_details(&self, request: &TravelDetailsRequest) -> Result<TravelPreferences> {
        let url = self.config.endpoint("/api/travel-details");
        self.json(self.client.post(&url).json(request), &url).await
    }

    async fn search_flights(&self, preferences: &TravelPreferences) -> Result<TaskAccepted> {
        let url = self.config.endpoint("/api/search-flights");
        let body = FlightSearchRequest::from(preferences);
        self.json(self.client.post(&url).json(&body), &url).await
    }

    async fn search_hotels(&self, preferences: &TravelPreferences) -> Result<TaskAccepted> {
        let url = self.config.endpoint("/api/search-hotels");
        let body = HotelSearchRequest::from(preferences);
        self.json(self.client.post(&url).json(&body), &url).await
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse> {
        let url = self.config.endpoint(&format!("/api/task-status/{task_id}"));
        self.json(self.client.get(&url), &url).await
    }

    async fn travel_summary(&self, context: &TravelContext) -> Result<String> {
        let url = self.config.endpoint("/api/travel-summary");
        self.text(self.client.post(&url).json(context), &url).await
    }

    async fn chat_summary(&self, turns: &[ChatTurn]) -> Result<String> {
        let url = self.config.endpoint("/api/chat/summary");
        let body = ChatStreamRequest { messages: turns.to_vec() };
        self.text(self.client.post(&url).json(&body), &url).await
    }

    async fn verify_admin(&self, credentials: &AdminCredentials) -> Result<bool> {
        let url = self.config.endpoint("/api/verify-admin");
        let value: Value = self.json(self.client.post(&url).json(credentials), &url).await?;
        Ok(admin_flag(value))
    }

    async fn check_admin(&self) -> Result<bool> {
        let url = self.config.endpoint("/api/check-admin");
        let value: Value = self.json(self.client.get(&url), &url).await?;
        Ok(admin_flag(value))
    }
}
