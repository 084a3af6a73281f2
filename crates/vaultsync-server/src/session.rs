//! One WebSocket connection driving one sync session.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use vaultsync_core::{ClientMessage, ServerMessage, Session, SyncEngine};

/// Bound on delivering a final notice or draining the outbox once the session ends
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters identifying the session
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    pub vault: String,
    pub user: String,
    #[serde(default)]
    pub client: Option<String>,
}

impl ConnectParams {
    pub fn client_name(&self) -> &str {
        self.client
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
    }
}

/// Serve a client until it disconnects, misbehaves, is evicted or the server shuts down.
pub async fn run_session(
    socket: WebSocket,
    engine: SyncEngine,
    params: ConnectParams,
    shutdown: CancellationToken,
) {
    let (session, mut inbox, evicted) = match engine
        .connect(&params.user, &params.vault, params.client_name())
        .await
    {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!(vault = %params.vault, error = %e, "Session rejected");
            let mut socket = socket;
            socket.send(WsMessage::Close(None)).await.ok();
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let session_id = session.id;
    let writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(session = session_id, error = %e, "Dropping unencodable message");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        sink.send(WsMessage::Close(None)).await.ok();
    });

    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break "server shutdown",
            () = evicted.cancelled() => break "evicted",
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(message) => {
                            if let Err(e) = engine.handle(&session, message).await {
                                tracing::warn!(session = session.id, error = %e, "Session failed");
                                farewell(&session, e.to_string()).await;
                                break "request failed";
                            }
                        }
                        Err(e) => {
                            tracing::warn!(session = session.id, error = %e, "Malformed frame");
                            farewell(&session, format!("malformed frame: {e}")).await;
                            break "malformed frame";
                        }
                    }
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    farewell(&session, "binary frames are not supported".to_string()).await;
                    break "binary frame";
                }
                Some(Ok(WsMessage::Close(_))) | None => break "closed by client",
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session = session.id, error = %e, "Transport error");
                    break "transport error";
                }
            }
        }
    };

    engine.disconnect(&session).await;
    drop(session);
    let abort = writer.abort_handle();
    if tokio::time::timeout(FAREWELL_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
    tracing::info!(session = session_id, reason, "Session closed");
}

/// Best-effort error notice before the session is torn down.
async fn farewell(session: &Session, message: String) {
    let notice = ServerMessage::error(message, None);
    tokio::time::timeout(FAREWELL_TIMEOUT, session.send(notice))
        .await
        .ok();
}
