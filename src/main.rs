use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use travel_chat::models::{Message, MessageStatus, TaskType};
use travel_chat::{
    ChatSession, ClientConfig, ConversationState, HttpTravelApi, TaskOrchestrator, TaskStore, TravelApi,
    TravelPlanner, TravelStore,
};

#[derive(Debug, Clone, Copy)]
enum Mode {
    Chat,
    Plan,
    Trip,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "chat" => Ok(Mode::Chat),
            "plan" => Ok(Mode::Plan),
            "trip" => Ok(Mode::Trip),
            other => bail!("unknown mode '{other}', expected chat, plan or trip"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "travel_chat=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mode = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<Mode>()?,
        None => Mode::Chat,
    };

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let config = ClientConfig::from_env();
    info!(api_url = %config.api_url, ?mode, "Starting travel chat");

    let api: Arc<dyn TravelApi> = Arc::new(HttpTravelApi::new(config.clone()));
    let conversation = ConversationState::new();
    let printer = tokio::spawn(print_updates(conversation.clone()));

    let chat = ChatSession::new(Arc::clone(&api), conversation.clone());
    let planner = TravelPlanner::new(Arc::clone(&api), conversation.clone(), &config);
    let orchestrator = TaskOrchestrator::new(
        Arc::clone(&api),
        conversation.clone(),
        TaskStore::new(),
        TravelStore::new(),
        config,
    );

    // ── Input loop ────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if let Some(command) = line.strip_prefix('/') {
            run_command(command.trim(), &chat, &planner, &orchestrator).await;
            continue;
        }

        match mode {
            Mode::Chat => {
                chat.send(&line).await;
            }
            Mode::Plan => {
                if let Err(e) = planner.handle_input(&line).await {
                    warn!("Planning request failed: {e}");
                }
            }
            Mode::Trip => {
                if let Err(e) = orchestrator.plan_trip(&line).await {
                    if e.is_transport() {
                        warn!("Travel backend unreachable: {e}");
                    } else {
                        warn!("Trip request failed: {e}");
                    }
                }
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    planner.shutdown();
    orchestrator.shutdown();
    printer.abort();
    info!("Input closed, shutting down");
    Ok(())
}

async fn run_command(command: &str, chat: &ChatSession, planner: &TravelPlanner, orchestrator: &TaskOrchestrator) {
    let result = match command {
        "summary" => match chat.summarize().await {
            Ok(summary) => {
                println!("{summary}");
                Ok(())
            }
            Err(e) => Err(e),
        },
        "regenerate flights" => orchestrator.regenerate(TaskType::FlightSearch).await,
        "regenerate hotels" => orchestrator.regenerate(TaskType::HotelSearch).await,
        "regenerate summary" => orchestrator.regenerate(TaskType::TravelSummary).await,
        "clear" => {
            planner.shutdown();
            orchestrator.reset();
            chat.conversation().clear_messages();
            chat.conversation().set_loading(false);
            Ok(())
        }
        other => {
            println!("Unknown command /{other}. Try /summary, /regenerate flights|hotels|summary or /clear");
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!("/{command} failed: {e}");
    }
}

/// Prints every message that settled (stopped loading) or changed after settling.
async fn print_updates(conversation: ConversationState) {
    let mut revisions = conversation.subscribe();
    let mut printed: HashMap<String, (String, Option<MessageStatus>)> = HashMap::new();

    while revisions.changed().await.is_ok() {
        for message in conversation.messages() {
            if message.is_loading() {
                continue;
            }
            let seen = (message.content.clone(), message.status);
            if printed.get(&message.id) == Some(&seen) {
                continue;
            }
            print_message(&message);
            printed.insert(message.id.clone(), seen);
        }
    }
}

fn print_message(message: &Message) {
    let marker = match message.status {
        Some(MessageStatus::Error) => " (error)",
        _ => "",
    };
    println!("[{}{marker}] {}", message.role.as_str(), message.content);
    if let Some(details) = &message.collapsible_content {
        for line in details.lines() {
            println!("    | {line}");
        }
    }
}
