use std::time::Duration;

use serde::Deserialize;

use crate::connection::{BackpressurePolicy, QueueConfig};

/// Top-level configuration settings for the application.
///
/// Includes settings for the listener, the relay engine and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub relay: RelaySettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the WebSocket listener.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration consumed by the relay engine itself.
#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    /// Per-connection outbound queue bound.
    pub outbound_queue_capacity: usize,
    pub backpressure_policy: BackpressurePolicy,
    /// How long `block-brief` waits for queue space before dropping.
    pub block_brief_ms: u64,
    /// Whether a publisher receives its own messages.
    pub echo_to_sender: bool,
    pub max_connections: usize,
    /// Inbound frames larger than this are rejected as malformed.
    pub max_frame_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRelaySettings {
    pub outbound_queue_capacity: Option<usize>,
    pub backpressure_policy: Option<BackpressurePolicy>,
    pub block_brief_ms: Option<u64>,
    pub echo_to_sender: Option<bool>,
    pub max_connections: Option<usize>,
    pub max_frame_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            relay: RelaySettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            backpressure_policy: BackpressurePolicy::DropOldest,
            block_brief_ms: 50,
            echo_to_sender: true,
            max_connections: 1000,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl RelaySettings {
    /// Queue parameters handed to every new connection.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.outbound_queue_capacity,
            policy: self.backpressure_policy,
            block_brief: Duration::from_millis(self.block_brief_ms),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server;
        let relay = self.relay;
        let logging = self.logging;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(defaults.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(defaults.server.port),
            },
            relay: RelaySettings {
                outbound_queue_capacity: relay
                    .as_ref()
                    .and_then(|r| r.outbound_queue_capacity)
                    .unwrap_or(defaults.relay.outbound_queue_capacity),
                backpressure_policy: relay
                    .as_ref()
                    .and_then(|r| r.backpressure_policy)
                    .unwrap_or(defaults.relay.backpressure_policy),
                block_brief_ms: relay
                    .as_ref()
                    .and_then(|r| r.block_brief_ms)
                    .unwrap_or(defaults.relay.block_brief_ms),
                echo_to_sender: relay
                    .as_ref()
                    .and_then(|r| r.echo_to_sender)
                    .unwrap_or(defaults.relay.echo_to_sender),
                max_connections: relay
                    .as_ref()
                    .and_then(|r| r.max_connections)
                    .unwrap_or(defaults.relay.max_connections),
                max_frame_bytes: relay
                    .as_ref()
                    .and_then(|r| r.max_frame_bytes)
                    .unwrap_or(defaults.relay.max_frame_bytes),
            },
            logging: LoggingSettings {
                level: logging
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(defaults.logging.level),
            },
        }
    }
}
