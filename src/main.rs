//! CLI for topic-relay
//!
//! Subcommands:
//! - `server`: run the WebSocket relay
//! - `client`: subscribe, publish once and print what arrives (smoke test)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

use topic_relay::config::{Settings, load_config_from};
use topic_relay::transport::start_websocket_server;
use topic_relay::utils::logging;
use topic_relay::{ConnectionManager, TopicRegistry};

#[derive(Parser)]
#[command(name = "topic-relay", version)]
enum Command {
    /// Start the WebSocket relay
    Server {
        /// Configuration file (defaults to config/default.*)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Subscribe to a topic, publish one message to it and print the replies
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long, default_value = "chat")]
        topic: String,
        #[arg(long, default_value = "Hello from topic-relay")]
        payload: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    match cmd {
        Command::Server { config } => {
            let settings = match load_config_from(config.as_deref()) {
                Ok(settings) => settings,
                Err(e) => {
                    logging::init("info");
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            };
            logging::init(&settings.logging.level);
            if let Err(e) = run_server(settings).await {
                error!("Server failed: {e}");
                std::process::exit(1);
            }
        }
        Command::Client {
            url,
            topic,
            payload,
        } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &topic, &payload).await {
                error!("Client failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let registry = Arc::new(TopicRegistry::new());
    let manager = ConnectionManager::new(registry, settings.relay.clone());
    info!(
        capacity = settings.relay.outbound_queue_capacity,
        policy = ?settings.relay.backpressure_policy,
        echo = settings.relay.echo_to_sender,
        "relay configured"
    );

    tokio::select! {
        result = start_websocket_server(&addr, manager.clone()) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    let closed = manager.shutdown();
    let stats = manager.stats();
    info!(
        closed,
        accepted = stats.accepted,
        published = stats.published,
        dropped = stats.dropped,
        malformed = stats.malformed,
        "relay stopped"
    );
    Ok(())
}

async fn run_client(url: &str, topic: &str, payload: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    let subscribe = json!({ "action": "subscribe", "topic": topic });
    ws_stream
        .send(WsMessage::Text(subscribe.to_string().into()))
        .await?;

    let publish = json!({ "action": "publish", "topic": topic, "payload": payload });
    ws_stream
        .send(WsMessage::Text(publish.to_string().into()))
        .await?;

    // Print whatever arrives until the relay goes quiet.
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_secs(2), ws_stream.next()).await
    {
        if let WsMessage::Text(text) = frame? {
            println!("{}", text.as_str());
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
