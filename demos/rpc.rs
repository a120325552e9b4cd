//! Request/reply calls against a JSON-RPC style endpoint.
//!
//! Each call sends one message and waits for the next one. A dropped connection is retried
//! once on a fresh connection before the error is returned.

use std::time::Duration;

use serde::Deserialize;
use tether::{Client, Options};

#[derive(Deserialize)]
struct Reply {
    id: u64,
    result: serde_json::Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let options = Options::default()
        .with_timeout(Duration::from_secs(5))
        .with_protocol("jsonrpc");
    let mut client = Client::new("wss://rpc.example.com/ws".parse()?, options)?;

    for id in 1..=3 {
        let request = serde_json::json!({ "id": id, "method": "time" });
        let message = client.request(request.to_string(), None).await?;

        let reply: Reply = message.json()?;
        log::info!("reply {} in {:?}: {}", reply.id, message.elapsed, reply.result);
    }

    client.close();
    Ok(())
}
