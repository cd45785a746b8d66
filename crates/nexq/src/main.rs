//! CLI for nexq
//!
//! Subcommands:
//! - `server`: run the broker
//! - `client`: run a simple example client (useful for smoke tests)

use clap::Parser;
use nexq_broker::Broker;
use nexq_client::{Client, ClientOptions, EventHandlers};
use nexq_config::load_config;
use nexq_transport::start_server;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "nexq")]
enum Command {
    /// Start the broker server
    Server,
    /// Run the example client (connects, subscribes, publishes, queries)
    Client {
        /// Broker address to connect to
        #[arg(long, default_value = "127.0.0.1:45784")]
        addr: String,
    },
}

#[tokio::main]
async fn main() {
    nexq_utils::logging::init("info");

    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                error!("Server failed: {}", e);
            }
        }
        Command::Client { addr } => {
            if let Err(e) = run_client(&addr).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Arc::new(Mutex::new(Broker::with_ack_timeout(
        config.broker.ack_timeout_ms,
    )));

    tokio::spawn(Broker::start_sweep_loop(
        broker.clone(),
        config.broker.sweep_interval_ms,
    ));

    tokio::select! {
        result = start_server(addr, broker, config.broker.max_frame_bytes) => {
            if let Err(e) = result {
                error!("Server exited unexpectedly: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_client(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let options = ClientOptions {
        ack_timeout_ms: config.client.ack_timeout_ms,
        query_timeout_ms: config.client.query_timeout_ms,
        reconnect_interval_ms: config.client.reconnect_interval_ms,
        max_frame_bytes: config.broker.max_frame_bytes,
    };
    let events = EventHandlers::new()
        .on_message_received(|message| {
            println!("received on '{}': {}", message.queue, message.body);
        })
        .on_query_received(|query| {
            println!("query on '{}': {}", query.queue, query.body);
            let body = query.body.clone();
            Some(nexq_client::Message::reply_to(&query, "echo", body, 0))
        })
        .on_connected(|| println!("connected"))
        .on_disconnected(|| println!("disconnected"));

    let client = Client::connect_with(addr, options, events).await?;

    // 1. Subscribe
    client.subscribe("chat").await?;

    // 2. Publish a notification back to ourselves
    client.enqueue("chat", "greeting", "Hello from example", 0).await?;

    // 3. Issue a query against our own echo handler
    if let Some(reply) = client
        .query_with_timeout("chat", "ping", "anyone there?", 0, 5_000)
        .await?
    {
        println!("query answered: {}", reply.body);
    } else {
        println!("query timed out");
    }

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    client.disconnect();
    Ok(())
}
