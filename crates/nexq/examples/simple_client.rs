//! Minimal client: connect, subscribe, publish, read one message.
//!
//! Run the broker first (`cargo run -- server`), then:
//! `cargo run --example simple_client`

use nexq_client::{Client, ClientOptions, EventHandlers};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let events = EventHandlers::new()
        .on_message_received(|message| {
            println!("received: [{}] {}", message.label, message.body);
        })
        .on_connected(|| println!("connected"));

    let client = Client::connect_with("127.0.0.1:45784", ClientOptions::default(), events).await?;

    client.subscribe("chat").await?;
    client.enqueue("chat", "greeting", "Hello from example", 0).await?;

    // Give the broker a moment to fan the message back to us.
    tokio::time::sleep(Duration::from_millis(500)).await;

    client.disconnect();
    Ok(())
}
