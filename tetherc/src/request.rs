use clap::Args;
use tether::OpCode;
use tokio::runtime;

use crate::{print_payload, ConnectArgs};

/// Sends one message and prints the reply.
///
/// The round trip is retried once on a new connection if the first attempt fails.
#[derive(Args)]
#[command(alias = "r")]
pub struct Cmd {
    #[command(flatten)]
    connect: ConnectArgs,

    /// The message to send as text.
    message: String,

    /// Validates and pretty-prints the reply as JSON.
    #[arg(long)]
    json: bool,
}

pub fn run(cmd: Cmd) -> anyhow::Result<()> {
    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut client = cmd.connect.client()?;
    let reply = runtime.block_on(client.request(&cmd.message, None))?;
    client.close();

    match reply.opcode {
        OpCode::Text | OpCode::Binary => print_payload(&reply.payload, cmd.json),
        opcode => println!("<{opcode:?}>"),
    }
    log::info!("reply received in {:?}", reply.elapsed);

    Ok(())
}
