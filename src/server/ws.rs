use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::editor::{ApplyEvent, EditorController, EditorEvent, EditorSnapshot};
use crate::server::AppState;
use crate::translate::{Backend, DialectCatalog, ServiceStatus, TranslationService};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Snapshot(EditorSnapshot),
    Status {
        status: ServiceStatus,
        dialects: DialectCatalog,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// The catalog is populated before `Ready` is published, so reading it
    /// after the status keeps the pair consistent.
    fn status<B: Backend>(status: ServiceStatus, service: &TranslationService<B>) -> Self {
        ServerMessage::Status {
            status,
            dialects: service.catalog(),
        }
    }
}

pub async fn ws_handler<B: Backend>(
    ws: WebSocketUpgrade,
    State(app): State<AppState<B>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

/// One editor session per socket; it lives exactly as long as the connection.
async fn handle_socket<B: Backend>(socket: WebSocket, app: AppState<B>) {
    let (mut sender, mut receiver) = socket.split();
    let controller = EditorController::new(app.service.clone(), app.debounce);
    info!("editor session opened");

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(err) => {
                    error!(error = %err, "failed to serialize server message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut snapshots = controller.subscribe();
    let mut status = app.service.subscribe();
    let service = app.service.clone();
    let updates = tx.clone();
    let forward_task = tokio::spawn(async move {
        let current = status.borrow_and_update().clone();
        let initial = [
            ServerMessage::status(current, &service),
            ServerMessage::Snapshot(snapshots.borrow_and_update().clone()),
        ];
        for msg in initial {
            if updates.send(msg).await.is_err() {
                return;
            }
        }
        loop {
            let msg = tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ServerMessage::Snapshot(snapshots.borrow_and_update().clone())
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    ServerMessage::status(current, &service)
                }
            };
            if updates.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let outcome = match serde_json::from_str::<EditorEvent>(&text) {
                    Ok(event) => event.apply(&controller).map_err(|err| err.to_string()),
                    Err(err) => Err(format!("invalid message: {err}")),
                };
                if let Err(message) = outcome {
                    debug!(%message, "rejected client message");
                    if tx.send(ServerMessage::Error { message }).await.is_err() {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    forward_task.abort();
    send_task.abort();
    info!("editor session closed");
}
