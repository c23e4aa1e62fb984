//! Live push channel

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::ApiError;
use crate::controller::{AppState, Broadcaster, SessionId};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws?token=<optional>
///
/// An absent token opens an anonymous session. A supplied token that fails
/// validation is refused before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(st): State<AppState>,
) -> Result<Response, ApiError> {
    let identity = match params.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Some(st.auth.validate(token).map_err(|e| {
            debug!(error = %e, "live session token rejected");
            ApiError::Unauthorized
        })?),
        None => None,
    };

    let (id, rx) = st.broadcaster.register(identity)?;
    let broadcaster = st.broadcaster.clone();
    let send_timeout = st.cfg.broadcast.send_timeout();

    Ok(ws.on_upgrade(move |socket| handle_session(socket, id, rx, broadcaster, send_timeout)))
}

/// Drain the session queue into the socket until either side goes away
pub async fn handle_session(
    socket: WebSocket,
    id: SessionId,
    rx: mpsc::Receiver<Arc<str>>,
    broadcaster: Arc<Broadcaster>,
    send_timeout: Duration,
) {
    let (sender, receiver) = socket.split();
    run_session(sender, receiver, id, rx, broadcaster, send_timeout).await;
}

/// Session loop over any message sink and inbound stream.
///
/// The session is unregistered as soon as a write fails, a write exceeds
/// `send_timeout`, or the peer closes.
pub async fn run_session<S, R, E>(
    mut sender: S,
    mut receiver: R,
    id: SessionId,
    mut rx: mpsc::Receiver<Arc<str>>,
    broadcaster: Arc<Broadcaster>,
    send_timeout: Duration,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    info!(session = %id, "live session connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            match timeout(send_timeout, sender.send(Message::Text(payload.to_string()))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(session = %id, error = %e, "live send failed");
                    break;
                }
                Err(_) => {
                    warn!(session = %id, timeout_ms = send_timeout.as_millis() as u64, "live send timed out");
                    break;
                }
            }
        }
        match timeout(send_timeout, sender.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = %id, error = %e, "live close failed"),
            Err(_) => debug!(session = %id, "live close timed out"),
        }
    });

    // push-only channel: inbound frames are read only to notice the close
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    broadcaster.unregister(id);
    info!(session = %id, "live session closed");
}
