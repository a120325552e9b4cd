//! Subscribes to a price feed and prints the first ten updates.
//!
//! The server is pinged every 30 seconds while the feed is quiet.

use std::time::Duration;

use bytes::Bytes;
use tether::{Client, Event, Options};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Info).expect("log");

    let mut client = Client::new("wss://feed.example.com/ticker".parse()?, Options::default())?
        .with_observer(|event: Event<'_>| log::debug!("event: {}", event.name()));

    client
        .send(r#"{"op": "subscribe", "channel": "BTC-USD"}"#, None)
        .await?;

    let mut updates = 0;
    client
        .subscribe(
            |payload: Bytes, _: &mut Client| {
                updates += 1;
                log::info!("#{updates}: {}", String::from_utf8_lossy(&payload));
                updates < 10
            },
            Duration::from_secs(30),
        )
        .await?;

    Ok(())
}
