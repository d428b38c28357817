//! Outbound connections.

use tokio::net::TcpStream;
use tracing::{info, instrument};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::transport::connection::{event_channel, Connection, EventStream};

/// Connect to `config.address` and start the connection.
///
/// The returned stream already holds the `Connected` event.
pub async fn connect<C: Default + Send + 'static>(
    config: &ClientConfig,
) -> Result<(Connection<C>, EventStream<C>)> {
    connect_with_context(config, C::default()).await
}

#[instrument(skip(config, context), fields(address = %config.address))]
pub async fn connect_with_context<C: Send + 'static>(
    config: &ClientConfig,
    context: C,
) -> Result<(Connection<C>, EventStream<C>)> {
    let stream = TcpStream::connect(config.address.as_str()).await?;
    let (events, event_stream) = event_channel();
    let connection = Connection::from_tcp(stream, config.connection.clone(), context, events)?;
    connection.start()?;

    info!(id = %connection.id(), peer = ?connection.remote_addr(), "Connected");
    Ok((connection, event_stream))
}
