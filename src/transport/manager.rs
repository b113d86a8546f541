//! Connection manager
//!
//! Owns connection lifecycle: it is the only place connections are created
//! and torn down. For each accepted stream it spawns a read task, which feeds
//! frames through the dispatch table, and a flush task, which drains the
//! connection's outbound queue into the stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;

use crate::broker::{PublishReport, Router, TopicRegistry};
use crate::config::RelaySettings;
use crate::connection::{CloseReason, Connection, ConnectionId, Outbound};
use crate::transport::dispatch::DispatchTable;
use crate::transport::message::{Envelope, encode};
use crate::utils::{RelayError, Result};

/// Diagnostic counters, readable through [`ConnectionManager::stats`].
#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    closed: AtomicU64,
    malformed: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub accepted: u64,
    pub closed: u64,
    pub malformed: u64,
    pub published: u64,
    /// Deliveries discarded by subscriber backpressure.
    pub dropped: u64,
}

#[derive(Debug)]
pub struct ConnectionManager {
    registry: Arc<TopicRegistry>,
    router: Router,
    dispatch: DispatchTable,
    settings: RelaySettings,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    counters: Counters,
}

impl ConnectionManager {
    pub fn new(registry: Arc<TopicRegistry>, settings: RelaySettings) -> Arc<Self> {
        let router = Router::new(Arc::clone(&registry), settings.echo_to_sender);
        Arc::new(Self {
            registry,
            router,
            dispatch: DispatchTable::new(),
            settings,
            connections: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        })
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    pub fn stats(&self) -> RelayStats {
        let c = &self.counters;
        RelayStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            closed: c.closed.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            published: c.published.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_publish(&self, report: PublishReport) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if report.dropped > 0 {
            self.counters
                .dropped
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
    }

    /// Takes ownership of an accepted duplex stream of text frames, opens a
    /// connection for it and starts its read and flush tasks.
    pub fn on_accept<S>(self: &Arc<Self>, id: ConnectionId, stream: S) -> Result<Arc<Connection>>
    where
        S: Stream<Item = Result<String>> + Sink<String, Error = RelayError> + Send + 'static,
    {
        let connection = Arc::new(Connection::new(id.clone(), self.settings.queue_config()));
        {
            let mut connections = self.connections.write();
            if connections.len() >= self.settings.max_connections {
                return Err(RelayError::ConnectionLimit(self.settings.max_connections));
            }
            if connections.contains_key(&id) {
                return Err(RelayError::DuplicateConnection(id));
            }
            connections.insert(id.clone(), Arc::clone(&connection));
        }

        connection.mark_open();
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(connection = %id, "connection opened");

        let (sink, inbound) = stream.split();
        tokio::spawn(Arc::clone(self).read_loop(Arc::clone(&connection), inbound));
        tokio::spawn(Arc::clone(self).flush_loop(Arc::clone(&connection), sink));
        Ok(connection)
    }

    /// Handles one raw inbound frame. Never fails: problems are reported to
    /// the sender as an error frame and the frame is dropped.
    pub async fn on_inbound_message(&self, connection: &Arc<Connection>, raw: &str) {
        let envelope = match Envelope::parse(raw, self.settings.max_frame_bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    connection = %connection.id(),
                    "Invalid client message: {err} | {}",
                    raw.chars().take(100).collect::<String>()
                );
                connection.send(Outbound::Error(err.to_string())).await;
                return;
            }
        };

        match self.dispatch.dispatch(self, connection, envelope).await {
            Ok(Some(reply)) => {
                connection.send(reply).await;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(connection = %connection.id(), "request failed: {err}");
                connection.send(Outbound::Error(err.to_string())).await;
            }
        }
    }

    /// Deregisters and closes `connection`. Only the first call for a given
    /// connection does anything; it returns `true`.
    pub fn on_close(&self, connection: &Connection, reason: CloseReason) -> bool {
        if !connection.begin_close(reason.clone()) {
            return false;
        }
        let topics = self.registry.unsubscribe_all(connection);
        connection.finish_close();
        self.connections.write().remove(connection.id());
        self.counters.closed.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            connection = %connection.id(),
            %reason,
            topics,
            dropped = connection.dropped(),
            "connection closed"
        );
        true
    }

    /// Closes every live connection. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let live: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        let mut closed = 0;
        for connection in &live {
            if self.on_close(connection, CloseReason::Shutdown) {
                closed += 1;
            }
        }
        closed
    }

    async fn read_loop<St>(self: Arc<Self>, connection: Arc<Connection>, inbound: St)
    where
        St: Stream<Item = Result<String>> + Send + 'static,
    {
        let mut frames = Box::pin(connection.receive(inbound));
        let mut reason = CloseReason::ClientClosed;

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(text) => self.on_inbound_message(&connection, &text).await,
                Err(err) => {
                    reason = close_reason(&err);
                    break;
                }
            }
        }

        self.on_close(&connection, reason);
        tracing::debug!(connection = %connection.id(), "read loop finished");
    }

    async fn flush_loop<Si>(self: Arc<Self>, connection: Arc<Connection>, sink: Si)
    where
        Si: Sink<String, Error = RelayError> + Send + 'static,
    {
        tokio::pin!(sink);

        while let Some(item) = connection.next_outbound().await {
            let frame = match encode(&item) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(connection = %connection.id(), "Failed to serialize frame: {e}");
                    continue;
                }
            };
            if let Err(err) = sink.send(frame).await {
                tracing::warn!(connection = %connection.id(), "Failed to send frame: {err}");
                self.on_close(&connection, close_reason(&err));
                break;
            }
        }

        let _ = sink.close().await;
        tracing::debug!(connection = %connection.id(), "flush loop finished");
    }
}

fn close_reason(err: &RelayError) -> CloseReason {
    match err {
        RelayError::Protocol(detail) => CloseReason::Protocol(detail.clone()),
        other => CloseReason::Transport(other.to_string()),
    }
}
