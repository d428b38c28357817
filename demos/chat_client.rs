//! Chat room client. Logs in under a random name, then sends every stdin
//! line as a chat message and prints what the room relays back.
//!
//! ```text
//! cargo run --example chat_client [host:port]
//! ```

use futures::StreamExt;
use packet_socket::utils::logging::init_logging;
use packet_socket::{
    connect, ClientConfig, ConnectionEvent, LoggingConfig, PacketReader, PacketWriter, Result,
};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const LOGIN: u8 = 0;
const CHAT: u8 = 2;

fn print_message(payload: &[u8]) -> Result<()> {
    let mut reader = PacketReader::new(payload);
    match reader.read_u8()? {
        LOGIN => {
            let id = reader.read_i32()?;
            let name = reader.read_string()?;
            println!("* {name} logged in as {id}");
        }
        CHAT => {
            let id = reader.read_i32()?;
            let text = reader.read_string()?;
            println!("<{id}> {text}");
        }
        other => warn!(tag = other, "Ignoring unknown message"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LoggingConfig::default())?;

    let mut config = ClientConfig::default();
    if let Some(address) = std::env::args().nth(1) {
        config.address = address;
    }
    config.connection.max_packet_size = 64 * 1024;

    let (connection, mut events) = connect::<()>(&config).await?;

    let name = format!("TestUser{}", rand::rng().random_range(0..100_000));
    let mut login = PacketWriter::new();
    login.write_u8(LOGIN).write_string(&name);
    connection.send(login.into_bytes())?;
    info!(%name, "Logged in, type to chat");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let mut chat = PacketWriter::new();
                chat.write_u8(CHAT).write_string(&line);
                connection.send(chat.into_bytes())?;
            }
            event = events.next() => match event {
                Some(ConnectionEvent::FrameReceived { payload, .. }) => {
                    if let Err(e) = print_message(&payload) {
                        warn!(error = %e, "Malformed message from server");
                    }
                }
                Some(ConnectionEvent::Disconnected { reason, .. }) => {
                    info!(%reason, "Disconnected");
                    return Ok(());
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    connection.disconnect();
    Ok(())
}
