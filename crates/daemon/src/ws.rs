//! WebSocket live-update transport.
//!
//! Outbound: one `update_data` event per acquisition cycle and an
//! `analysis_stopped` event on stop, as JSON text frames. Inbound: a one-shot
//! experiment file payload, written to the configured temp location and
//! signaled to whoever awaits the handoff.

use std::path::{Path, PathBuf};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::AppState;

/// Messages a live-view client may push over the socket.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    SetFilePath { content: String },
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.shared.subscribe();

    // Forward live events until the client goes away.
    let forward = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    warn!("live-update subscriber lagged by {n} events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("failed to serialize live event: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(payload)).await.is_err() {
                // Client disconnected
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::SetFilePath { content }) => {
                    let path = experiment_file_path(&state.config.experiment_file);
                    match store_experiment_file(&path, &content) {
                        Ok(()) => {
                            info!("experiment file stored at {}", path.display());
                            state.experiment_ready.notify_waiters();
                        }
                        Err(e) => warn!("failed to store experiment file: {e}"),
                    }
                }
                Err(e) => debug!("ignoring unparseable client message: {e}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    forward.abort();
}

pub(crate) fn experiment_file_path(file_name: &str) -> PathBuf {
    std::env::temp_dir().join(file_name)
}

pub(crate) fn store_experiment_file(path: &Path, content: &str) -> std::io::Result<()> {
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment_data.csv");
        store_experiment_file(&path, "t,ch1\n0,1.5\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "t,ch1\n0,1.5\n");
    }

    #[test]
    fn handoff_path_lives_under_the_temp_dir() {
        let path = experiment_file_path("experiment_data.csv");
        assert!(path.starts_with(std::env::temp_dir()));
    }
}
