use std::time::Duration;

use bytes::Bytes;
use clap::Args;
use tether::Client;
use tokio::runtime;

use crate::{print_payload, ConnectArgs};

/// Connects, sends the initial messages and prints everything the server pushes.
///
/// Runs until the server closes the connection, `--count` messages were printed or
/// ctrl-c is pressed.
#[derive(Args)]
#[command(alias = "s")]
pub struct Cmd {
    #[command(flatten)]
    connect: ConnectArgs,

    /// Interval of the keepalive pings sent while the connection is idle; 0 disables them.
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "60s")]
    keepalive: Duration,

    /// Message to send once connected. Can be repeated, messages are sent in order.
    #[arg(short, long = "send")]
    send: Vec<String>,

    /// Stops after this many messages.
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Validates and pretty-prints received messages as JSON.
    #[arg(long)]
    json: bool,
}

pub fn run(cmd: Cmd) -> anyhow::Result<()> {
    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut client = cmd.connect.client()?;
    runtime.block_on(async {
        for message in &cmd.send {
            client.send(message, None).await?;
        }

        let mut received = 0;
        let printer = |payload: Bytes, _: &mut Client| {
            print_payload(&payload, cmd.json);
            received += 1;
            cmd.count.map_or(true, |count| received < count)
        };

        tokio::select! {
            res = client.subscribe(printer, cmd.keepalive) => res?,
            _ = tokio::signal::ctrl_c() => log::info!("interrupted"),
        }

        anyhow::Ok(())
    })?;
    client.close();

    Ok(())
}
