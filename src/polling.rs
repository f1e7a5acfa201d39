use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{PollError, Result};
use crate::lock;
use crate::models::{PlanStatusResponse, TaskStatus, TaskStatusResponse};

const DEFAULT_FAILURE_MESSAGE: &str = "Polling task failed";

/// Status strings one backend contract uses. Comparison is exact: the upper-
/// and lower-case contracts are configured, never folded into each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusVocabulary {
    pub pending: &'static str,
    pub processing: &'static str,
    pub completed: &'static str,
    pub failed: &'static str,
}

impl StatusVocabulary {
    pub const fn upper() -> Self {
        Self { pending: "PENDING", processing: "PROCESSING", completed: "COMPLETED", failed: "FAILED" }
    }

    pub const fn lower() -> Self {
        Self { pending: "pending", processing: "processing", completed: "completed", failed: "failed" }
    }

    /// Maps a raw backend status onto the canonical enum; `None` for anything
    /// outside this vocabulary.
    pub fn classify(&self, raw: &str) -> Option<TaskStatus> {
        if raw == self.completed {
            Some(TaskStatus::Completed)
        } else if raw == self.processing {
            Some(TaskStatus::Processing)
        } else if raw == self.pending {
            Some(TaskStatus::Pending)
        } else if raw == self.failed {
            Some(TaskStatus::Failed)
        } else {
            None
        }
    }
}

/// A status probe response the poll loop can classify.
pub trait PollResponse: Send + Sync + 'static {
    fn status(&self) -> &str;

    /// Most specific failure description the response carries.
    fn error_message(&self) -> Option<String>;
}

impl PollResponse for TaskStatusResponse {
    fn status(&self) -> &str {
        &self.status
    }

    fn error_message(&self) -> Option<String> {
        self.error.clone().or_else(|| {
            self.data
                .as_ref()
                .and_then(|data| data.get("error_message"))
                .and_then(|message| message.as_str())
                .map(str::to_string)
        })
    }
}

impl PollResponse for PlanStatusResponse {
    fn status(&self) -> &str {
        &self.status
    }

    fn error_message(&self) -> Option<String> {
        self.error
            .clone()
            .or_else(|| self.data.as_ref().and_then(|data| data.error_message.clone()))
    }
}

/// Outcome callbacks of a poll run.
#[async_trait]
pub trait PollHandler<T: PollResponse>: Send + Sync {
    async fn on_success(&self, response: T);

    async fn on_processing(&self, _response: &T) {}

    async fn on_error(&self, error: PollError);
}

type Probe<T> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<T>> + Send + Sync>;

#[derive(Default)]
struct PollState {
    generation: u64,
    current_id: Option<String>,
    cancel: Option<CancellationToken>,
}

impl PollState {
    fn retire(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.current_id = None;
        self.generation += 1;
    }
}

/// Everything a spawned run needs, detached from the [`Poller`] itself.
struct Run<T: PollResponse> {
    probe: Probe<T>,
    vocabulary: StatusVocabulary,
    interval: Duration,
    handler: Arc<dyn PollHandler<T>>,
    state: Arc<Mutex<PollState>>,
    id: String,
    generation: u64,
    cancel: CancellationToken,
}

impl<T: PollResponse> Run<T> {
    fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && lock(&self.state).generation == self.generation
    }

    /// Retires this run if it is still the poller's current one, checking and
    /// retiring under one lock. Only the caller that gets `true` may report a
    /// terminal outcome.
    fn claim(&self) -> bool {
        let mut state = lock(&self.state);
        if self.cancel.is_cancelled() || state.generation != self.generation {
            return false;
        }
        state.retire();
        debug!(task_id = %self.id, "Polling finished.");
        true
    }

    fn discard_stale(&self) {
        debug!(task_id = %self.id, "Ignoring stale poll response as polling has stopped or task ID changed.");
    }

    async fn execute(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // The first tick completes immediately, so the first probe is not delayed.
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(task_id = %self.id, "Dropping in-flight probe for stopped poll.");
                    break;
                }
                result = (self.probe)(self.id.clone()) => result,
            };

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    if !self.claim() {
                        self.discard_stale();
                        break;
                    }
                    error!(task_id = %self.id, "Error during polling: {e}");
                    self.handler.on_error(PollError::Probe(e)).await;
                    break;
                }
            };

            // A terminal run is retired before its handler runs, so the handler
            // may restart this poller with a new id.
            match self.vocabulary.classify(response.status()) {
                Some(TaskStatus::Idle | TaskStatus::Pending | TaskStatus::Processing) => {
                    if !self.is_current() {
                        self.discard_stale();
                        break;
                    }
                    self.handler.on_processing(&response).await;
                }
                Some(TaskStatus::Completed) => {
                    if self.claim() {
                        self.handler.on_success(response).await;
                    } else {
                        self.discard_stale();
                    }
                    break;
                }
                Some(TaskStatus::Failed) => {
                    if self.claim() {
                        let message = response
                            .error_message()
                            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                        self.handler.on_error(PollError::Failed(message)).await;
                    } else {
                        self.discard_stale();
                    }
                    break;
                }
                None => {
                    if self.claim() {
                        let raw = response.status().to_string();
                        warn!(task_id = %self.id, status = %raw, "Unexpected poll response status");
                        self.handler.on_error(PollError::UnexpectedStatus(raw)).await;
                    } else {
                        self.discard_stale();
                    }
                    break;
                }
            }
        }
    }
}

/// Cancellable fixed-interval poll loop for one backend job at a time.
///
/// `start` probes immediately and then once per interval until the job reaches
/// a terminal status, the probe fails, or `stop` is called. Probes of one
/// poller never overlap, and a response that arrives after `stop` or after a
/// newer `start` is discarded without reaching the handler. Dropping the poller
/// stops it.
pub struct Poller<T: PollResponse> {
    probe: Probe<T>,
    vocabulary: StatusVocabulary,
    interval: Duration,
    handler: Arc<dyn PollHandler<T>>,
    state: Arc<Mutex<PollState>>,
}

impl<T: PollResponse> Poller<T> {
    pub fn new<F, Fut>(
        probe: F,
        vocabulary: StatusVocabulary,
        interval: Duration,
        handler: Arc<dyn PollHandler<T>>,
    ) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let probe: Probe<T> = Arc::new(move |id| Box::pin(probe(id)));
        Self {
            probe,
            vocabulary,
            interval,
            handler,
            state: Arc::new(Mutex::new(PollState::default())),
        }
    }

    /// Starts polling `id`, superseding any run already in progress.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, id: impl Into<String>) {
        let id = id.into();
        let run = {
            let mut state = lock(&self.state);
            state.retire();
            let cancel = CancellationToken::new();
            state.current_id = Some(id.clone());
            state.cancel = Some(cancel.clone());
            Run {
                probe: Arc::clone(&self.probe),
                vocabulary: self.vocabulary,
                interval: self.interval,
                handler: Arc::clone(&self.handler),
                state: Arc::clone(&self.state),
                id: id.clone(),
                generation: state.generation,
                cancel,
            }
        };

        info!(task_id = %id, "Polling started");
        tokio::spawn(run.execute());
    }

    /// Stops the current run, if any. Idempotent; safe to call from a handler.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if state.cancel.is_some() {
            info!(task_id = state.current_id.as_deref().unwrap_or_default(), "Polling stopped.");
        }
        state.retire();
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.state).cancel.is_some()
    }

    pub fn current_id(&self) -> Option<String> {
        lock(&self.state).current_id.clone()
    }
}

impl<T: PollResponse> Drop for Poller<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Notify};

    const INTERVAL: Duration = Duration::from_millis(2000);

    fn response(status: &str, data: Option<Value>, error: Option<&str>) -> TaskStatusResponse {
        TaskStatusResponse { status: status.into(), data, error: error.map(str::to_string) }
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Success(Option<Value>),
        Processing(String),
        Error(String),
    }

    struct Recorder(mpsc::UnboundedSender<Seen>);

    #[async_trait]
    impl PollHandler<TaskStatusResponse> for Recorder {
        async fn on_success(&self, response: TaskStatusResponse) {
            let _ = self.0.send(Seen::Success(response.data));
        }
        async fn on_processing(&self, response: &TaskStatusResponse) {
            let _ = self.0.send(Seen::Processing(response.status.clone()));
        }
        async fn on_error(&self, error: PollError) {
            let _ = self.0.send(Seen::Error(error.to_string()));
        }
    }

    fn recorder() -> (Arc<dyn PollHandler<TaskStatusResponse>>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder(tx)), rx)
    }

    /// Probe answering from a script, counting calls.
    fn scripted(
        script: Vec<Result<TaskStatusResponse>>,
    ) -> (impl Fn(String) -> BoxFuture<'static, Result<TaskStatusResponse>> + Send + Sync, Arc<AtomicUsize>) {
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let probe = move |_id: String| -> BoxFuture<'static, Result<TaskStatusResponse>> {
            counter.fetch_add(1, Ordering::SeqCst);
            let next = lock(&script)
                .pop_front()
                .unwrap_or_else(|| Ok(response("processing", None, None)));
            Box::pin(async move { next })
        };
        (probe, calls)
    }

    #[test]
    fn vocabulary_comparison_is_exact() {
        let upper = StatusVocabulary::upper();
        assert_eq!(upper.classify("COMPLETED"), Some(TaskStatus::Completed));
        assert_eq!(upper.classify("PENDING"), Some(TaskStatus::Pending));
        assert_eq!(upper.classify("completed"), None);

        let lower = StatusVocabulary::lower();
        assert_eq!(lower.classify("failed"), Some(TaskStatus::Failed));
        assert_eq!(lower.classify("FAILED"), None);
    }

    #[test]
    fn error_message_prefers_top_level_error() {
        let both = response("failed", Some(json!({"error_message": "inner"})), Some("outer"));
        assert_eq!(both.error_message().as_deref(), Some("outer"));
        let inner = response("failed", Some(json!({"error_message": "inner"})), None);
        assert_eq!(inner.error_message().as_deref(), Some("inner"));
        assert_eq!(response("failed", None, None).error_message(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_completed_then_stops() {
        let (probe, calls) = scripted(vec![
            Ok(response("processing", None, None)),
            Ok(response("pending", None, None)),
            Ok(response("completed", Some(json!("flight-data")), None)),
        ]);
        let (handler, mut rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.start("task-1");
        assert_eq!(poller.current_id().as_deref(), Some("task-1"));

        assert_eq!(rx.recv().await, Some(Seen::Processing("processing".into())));
        assert_eq!(rx.recv().await, Some(Seen::Processing("pending".into())));
        assert_eq!(rx.recv().await, Some(Seen::Success(Some(json!("flight-data")))));

        assert!(!poller.is_polling());
        assert_eq!(poller.current_id(), None);
        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn first_probe_runs_immediately() {
        let (probe, calls) = scripted(vec![]);
        let (handler, _rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.start("task-1");
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_reports_most_specific_message() {
        let (probe, _calls) = scripted(vec![Ok(response(
            "failed",
            Some(json!({"error_message": "Scraper timed out"})),
            None,
        ))]);
        let (handler, mut rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.start("task-1");
        assert_eq!(rx.recv().await, Some(Seen::Error("Scraper timed out".into())));
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_without_details_uses_default_message() {
        let (probe, _calls) = scripted(vec![Ok(response("FAILED", None, None))]);
        let (handler, mut rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::upper(), INTERVAL, handler);

        poller.start("task-1");
        assert_eq!(rx.recv().await, Some(Seen::Error("Polling task failed".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_status_is_an_error_and_stops() {
        let (probe, calls) = scripted(vec![Ok(response("COMPLETED", None, None))]);
        let (handler, mut rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.start("task-1");
        assert_eq!(
            rx.recv().await,
            Some(Seen::Error("Unexpected poll response status: COMPLETED".into()))
        );
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_error_is_routed_to_handler_and_stops() {
        let (probe, calls) = scripted(vec![Err(ClientError::HttpStatus { status: 503, url: "/api/task-status/t".into() })]);
        let (handler, mut rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.start("t");
        assert_eq!(rx.recv().await, Some(Seen::Error("Server returned 503 for /api/task-status/t".into())));
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn response_arriving_after_stop_is_discarded() {
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        let probe = move |_id: String| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(response("completed", None, None))
            }
        };
        let (handler, mut rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.start("slow");
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.stop();
        release.notify_waiters();

        tokio::time::sleep(INTERVAL * 3).await;
        assert!(rx.try_recv().is_err());
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_supersedes_previous_id() {
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        let probe = move |id: String| {
            let gate = Arc::clone(&gate);
            async move {
                if id == "id1" {
                    gate.notified().await;
                }
                Ok(response("completed", Some(json!(id)), None))
            }
        };
        let (handler, mut rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.start("id1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.start("id2");
        assert_eq!(rx.recv().await, Some(Seen::Success(Some(json!("id2")))));

        release.notify_waiters();
        tokio::time::sleep(INTERVAL * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_safe_when_idle() {
        let (probe, calls) = scripted(vec![]);
        let (handler, _rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.stop();
        poller.stop();
        assert!(!poller.is_polling());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_poller_releases_its_timer() {
        let (probe, calls) = scripted(vec![]);
        let (handler, mut rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        poller.start("task-1");
        assert!(matches!(rx.recv().await, Some(Seen::Processing(_))));
        drop(poller);

        let before = calls.load(Ordering::SeqCst);
        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    fn idle_run(poller: &Poller<TaskStatusResponse>, id: &str) -> Run<TaskStatusResponse> {
        let mut state = lock(&poller.state);
        let cancel = CancellationToken::new();
        state.current_id = Some(id.to_string());
        state.cancel = Some(cancel.clone());
        Run {
            probe: Arc::clone(&poller.probe),
            vocabulary: poller.vocabulary,
            interval: poller.interval,
            handler: Arc::clone(&poller.handler),
            state: Arc::clone(&poller.state),
            id: id.to_string(),
            generation: state.generation,
            cancel,
        }
    }

    #[test]
    fn terminal_outcome_is_claimed_at_most_once() {
        let (probe, _calls) = scripted(vec![]);
        let (handler, _rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        let run = idle_run(&poller, "task-1");
        assert!(run.claim());
        assert!(!run.claim());
        assert!(!poller.is_polling());
    }

    #[test]
    fn stopped_or_superseded_run_cannot_claim() {
        let (probe, _calls) = scripted(vec![]);
        let (handler, _rx) = recorder();
        let poller = Poller::new(probe, StatusVocabulary::lower(), INTERVAL, handler);

        let stopped = idle_run(&poller, "task-1");
        poller.stop();
        assert!(!stopped.claim());

        let superseded = idle_run(&poller, "id1");
        lock(&poller.state).retire();
        let current = idle_run(&poller, "id2");
        assert!(!superseded.claim());
        assert!(current.claim());
    }

    struct StopsItself {
        poller: Mutex<Option<Arc<Poller<TaskStatusResponse>>>>,
        seen: mpsc::UnboundedSender<Seen>,
    }

    #[async_trait]
    impl PollHandler<TaskStatusResponse> for StopsItself {
        async fn on_success(&self, _response: TaskStatusResponse) {}
        async fn on_processing(&self, response: &TaskStatusResponse) {
            let poller = lock(&self.poller).clone();
            if let Some(poller) = poller {
                poller.stop();
                poller.stop();
            }
            let _ = self.seen.send(Seen::Processing(response.status.clone()));
        }
        async fn on_error(&self, error: PollError) {
            let _ = self.seen.send(Seen::Error(error.to_string()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handler_may_stop_its_own_poller() {
        let (probe, calls) = scripted(vec![]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = Arc::new(StopsItself { poller: Mutex::new(None), seen: tx });
        let poller = Arc::new(Poller::new(
            probe,
            StatusVocabulary::lower(),
            INTERVAL,
            Arc::clone(&handler) as Arc<dyn PollHandler<TaskStatusResponse>>,
        ));
        *lock(&handler.poller) = Some(Arc::clone(&poller));

        poller.start("task-1");
        assert_eq!(rx.recv().await, Some(Seen::Processing("processing".into())));
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!poller.is_polling());

        lock(&handler.poller).take();
    }
}
