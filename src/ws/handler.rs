//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::broadcast::OUTBOUND_BUFFER;
use crate::game::{SessionCommand, SessionError, SessionHandle};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ConnectionId, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.session))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, session: SessionHandle) {
    let id = ConnectionId::new();
    info!(connection_id = %id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Send welcome message
    let welcome = ServerMsg::Welcome {
        connection_id: id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(connection_id = %id, error = %e, "Failed to send welcome");
        return;
    }

    // Register with the session to get pushed messages
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    if !session
        .send(SessionCommand::Connect {
            id,
            outbound: outbound_tx,
        })
        .await
    {
        error!(connection_id = %id, "Session is not running");
        return;
    }

    // Run the session with split read/write
    run_connection(id, ws_sink, ws_stream, &session, outbound_rx).await;

    // Cleanup on disconnect
    let _ = session.send(SessionCommand::Disconnect { id }).await;

    info!(connection_id = %id, "WebSocket connection closed");
}

/// Run the WebSocket connection with read/write split
async fn run_connection(
    id: ConnectionId,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    session: &SessionHandle,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Spawn writer task: session pushes -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection_id = %id, error = %e, "WebSocket send failed");
                break;
            }
        }
        debug!(connection_id = %id, "Outbound channel closed");
    });

    // Reader loop: WebSocket -> session
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(connection_id = %id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if !session.send(SessionCommand::Client { id, msg }).await {
                            debug!(connection_id = %id, "Session channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        let err = SessionError::InvalidPayload(e.to_string());
                        warn!(connection_id = %id, error = %err, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(connection_id = %id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(connection_id = %id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = %id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Abort writer task
    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
