pub mod api;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod markdown;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod polling;
pub mod stores;
pub mod stream;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use api::{HttpTravelApi, TravelApi};
pub use chat::ChatSession;
pub use config::ClientConfig;
pub use conversation::ConversationState;
pub use errors::{ClientError, PollError, Result};
pub use orchestrator::TaskOrchestrator;
pub use planner::TravelPlanner;
pub use polling::{PollHandler, PollResponse, Poller, StatusVocabulary};
pub use stores::{TaskStore, TravelStore};
pub use stream::{StreamEvent, StreamHandler, StreamingSession};

/// Locks shared state, recovering it if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
