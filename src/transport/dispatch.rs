//! Envelope dispatch table.
//!
//! Built once when the connection manager is constructed: every [`Action`]
//! maps to a plain handler function. A handler may return a reply that is
//! queued back to the sender.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::connection::{Connection, Outbound};
use crate::transport::manager::ConnectionManager;
use crate::transport::message::{Action, Envelope};
use crate::utils::{RelayError, Result};

pub type HandlerFuture<'a> = BoxFuture<'a, Result<Option<Outbound>>>;

pub type Handler =
    for<'a> fn(&'a ConnectionManager, &'a Arc<Connection>, Envelope) -> HandlerFuture<'a>;

pub struct DispatchTable {
    handlers: HashMap<Action, Handler>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        let mut handlers: HashMap<Action, Handler> = HashMap::new();
        handlers.insert(Action::Publish, handle_publish);
        handlers.insert(Action::Subscribe, handle_subscribe);
        handlers.insert(Action::Unsubscribe, handle_unsubscribe);
        Self { handlers }
    }

    pub fn handler(&self, action: Action) -> Option<Handler> {
        self.handlers.get(&action).copied()
    }

    pub async fn dispatch(
        &self,
        manager: &ConnectionManager,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<Option<Outbound>> {
        let handler = self.handler(envelope.action).ok_or_else(|| {
            RelayError::malformed(format!("no handler for {:?}", envelope.action))
        })?;
        handler(manager, connection, envelope).await
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn handle_publish<'a>(
    manager: &'a ConnectionManager,
    connection: &'a Arc<Connection>,
    envelope: Envelope,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let payload = envelope
            .payload
            .ok_or_else(|| RelayError::malformed("publish requires a payload"))?;
        let report = manager
            .router()
            .publish(&envelope.topic, payload, connection.id())
            .await;
        manager.record_publish(report);
        tracing::debug!(
            connection = %connection.id(),
            topic = %envelope.topic,
            recipients = report.recipients,
            "published"
        );
        Ok(None)
    })
}

fn handle_subscribe<'a>(
    manager: &'a ConnectionManager,
    connection: &'a Arc<Connection>,
    envelope: Envelope,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        if manager.registry().subscribe(&envelope.topic, connection)? {
            tracing::debug!(connection = %connection.id(), topic = %envelope.topic, "subscribed");
        }
        Ok(Some(Outbound::Subscribed(envelope.topic)))
    })
}

fn handle_unsubscribe<'a>(
    manager: &'a ConnectionManager,
    connection: &'a Arc<Connection>,
    envelope: Envelope,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        if manager.registry().unsubscribe(&envelope.topic, connection) {
            tracing::debug!(connection = %connection.id(), topic = %envelope.topic, "unsubscribed");
        }
        Ok(Some(Outbound::Unsubscribed(envelope.topic)))
    })
}
