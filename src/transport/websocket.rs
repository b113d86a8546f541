//! WebSocket transport
//!
//! Binds a TCP listener, performs the WebSocket handshake and hands each
//! socket to the [`ConnectionManager`] as a stream of text frames. No origin
//! checks, TLS or authentication happen here.

use std::future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tungstenite::Error as WsError;
use tungstenite::protocol::Message as WsMessage;

use crate::connection::ConnectionId;
use crate::transport::manager::ConnectionManager;
use crate::utils::{RelayError, Result};

/// Binds `addr` and serves until the listener fails.
pub async fn start_websocket_server(addr: &str, manager: Arc<ConnectionManager>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("WebSocket relay listening on ws://{}", listener.local_addr()?);
    serve(listener, manager).await
}

/// Accept loop over an already bound listener.
pub async fn serve(listener: TcpListener, manager: Arc<ConnectionManager>) -> Result<()> {
    let listener = &listener;
    loop {
        let (stream, peer) = next_connection(move || listener.accept()).await;
        let manager = Arc::clone(&manager);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::warn!(%peer, "WebSocket handshake error: {e}");
                    return;
                }
            };

            let id = ConnectionId::generate();
            tracing::debug!(%peer, connection = %id, "handshake complete");
            if let Err(e) = manager.on_accept(id, text_frames(ws_stream)) {
                tracing::warn!(%peer, "refused connection: {e}");
            }
        });
    }
}

/// Pause after a failed accept. Errors such as EMFILE persist until some
/// descriptor is released, so retrying at once would spin.
pub(crate) const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retries `accept` until it yields a connection, sleeping
/// [`ACCEPT_RETRY_DELAY`] after each failure.
pub(crate) async fn next_connection<A, F, T>(mut accept: A) -> T
where
    A: FnMut() -> F,
    F: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Adapts a WebSocket into the duplex frame stream the manager consumes:
/// outgoing `String`s become text frames, incoming text (or UTF-8 binary)
/// frames become `String`s, control frames are swallowed.
pub fn text_frames<T>(
    ws: WebSocketStream<T>,
) -> impl Stream<Item = Result<String>> + Sink<String, Error = RelayError> + Send + 'static
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    ws.with(|text: String| future::ready(Ok::<_, WsError>(WsMessage::text(text))))
        .sink_map_err(|e: WsError| RelayError::Transport(e.to_string()))
        .filter_map(|frame| future::ready(decode_frame(frame)))
}

fn decode_frame(frame: std::result::Result<WsMessage, WsError>) -> Option<Result<String>> {
    match frame {
        Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(WsMessage::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) | WsMessage::Close(_)) => {
            None
        }
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => None,
        Err(e @ (WsError::Protocol(_) | WsError::Capacity(_))) => {
            Some(Err(RelayError::Protocol(e.to_string())))
        }
        Err(e) => Some(Err(RelayError::Transport(e.to_string()))),
    }
}
