#![allow(dead_code)]

use std::time::Duration;

use axum::Router;
use travel_chat::ClientConfig;

pub const FAST_POLL: Duration = Duration::from_millis(20);

/// Serves `router` on an ephemeral local port and returns a config pointing at it.
pub async fn serve(router: Router) -> ClientConfig {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    ClientConfig {
        api_url: format!("http://{addr}"),
        poll_interval: FAST_POLL,
        plan_poll_interval: FAST_POLL,
        request_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

/// Waits until `condition` holds, panicking after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Frames each JSON payload as `data: ..\n\n`.
pub fn sse(events: &[&str]) -> String {
    events.iter().map(|event| format!("data: {event}\n\n")).collect()
}
