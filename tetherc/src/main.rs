use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tether::{Client, Event, Options};
use url::Url;

mod request;
mod subscribe;

/// WebSocket client CLI for request/reply calls and long running subscriptions.
///
/// Examples:
///   tetherc request wss://echo.example.com '{"type": "ping"}'
///   tetherc subscribe wss://feed.example.com --send '{"subscribe": "trades"}'
///
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    /// Logs connection and frame activity to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Request(request::Cmd),
    Subscribe(subscribe::Cmd),
}

/// Connection settings shared by every command.
#[derive(Args)]
struct ConnectArgs {
    /// The WebSocket URL to connect to (ws:// or wss://)
    url: Url,

    /// Timeout of each operation.
    /// Accepts human-readable formats like "5s", "1m", "500ms".
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "3s")]
    timeout: Duration,

    /// HTTP proxy to send the upgrade request through (http:// or https://).
    #[arg(long)]
    proxy: Option<Url>,

    /// Value of the Origin header.
    #[arg(long)]
    origin: Option<String>,

    /// Subprotocol requested with Sec-WebSocket-Protocol.
    #[arg(long)]
    protocol: Option<String>,
}

impl ConnectArgs {
    fn client(&self) -> anyhow::Result<Client> {
        let mut options = Options::default().with_timeout(self.timeout);
        if let Some(proxy) = &self.proxy {
            options = options.with_proxy(proxy.clone());
        }
        if let Some(origin) = &self.origin {
            options = options.with_origin(origin.as_str());
        }
        if let Some(protocol) = &self.protocol {
            options = options.with_protocol(protocol.as_str());
        }

        let client = Client::new(self.url.clone(), options)?.with_observer(|event: Event<'_>| {
            match event {
                Event::Open | Event::Close => log::info!("<{}>", event.name()),
                Event::Recv(message) => log::debug!(
                    "recv {:?} ({} bytes, {:?})",
                    message.opcode,
                    message.payload.len(),
                    message.elapsed
                ),
                Event::Send(payload) => log::debug!("send {} bytes", payload.len()),
                Event::Message(_) => {}
            }
        });

        Ok(client)
    }
}

/// Prints a received payload, pretty-printed when `json` is set.
fn print_payload(payload: &[u8], json: bool) {
    match std::str::from_utf8(payload) {
        Ok(text) if json => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => println!("{value:#}"),
            Err(err) => eprintln!("parsing json: {err}"),
        },
        Ok(text) => println!("{text}"),
        Err(_) => println!("<{} bytes of binary data>", payload.len()),
    }
}

fn main() {
    let args = Cli::parse();
    if args.verbose {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Debug)
            .init();
    }

    let res = match args.command {
        Commands::Request(cmd) => request::run(cmd),
        Commands::Subscribe(cmd) => subscribe::run(cmd),
    };
    if let Err(err) = res {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}
