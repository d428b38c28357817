//! # packet-socket
//!
//! Length-prefixed framed messaging over TCP.
//!
//! Every payload travels as a 4-byte little-endian length followed by the
//! payload bytes. A [`Connection`] runs the receive state machine and an
//! ordered writer for one stream; a [`Listener`] accepts streams, keeps a
//! registry of live connections and can broadcast to them. An optional
//! [`FloodDetector`] reports peers that send faster than allowed.
//!
//! ```no_run
//! use futures::StreamExt;
//! use packet_socket::{ConnectionEvent, Listener, ListenerConfig};
//!
//! # async fn run() -> packet_socket::Result<()> {
//! let (listener, mut events) = Listener::<()>::new(ListenerConfig::new("127.0.0.1:9090"));
//! listener.start(25)?;
//!
//! while let Some(event) = events.next().await {
//!     if let ConnectionEvent::FrameReceived { connection, payload } = event {
//!         listener.broadcast(payload, Some(&connection));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::{
    ClientConfig, ConnectionConfig, FloodConfig, ListenerConfig, LoggingConfig, NetworkConfig,
};
pub use crate::core::codec::FrameCodec;
pub use crate::core::packet::Frame;
pub use crate::core::serialization::{PacketReader, PacketWriter};
pub use crate::error::{DisconnectReason, ProtocolError, Result};
pub use crate::protocol::Dispatcher;
pub use crate::transport::{
    connect, connect_with_context, Connection, ConnectionEvent, ConnectionId, ConnectionState,
    EventStream, Listener,
};
pub use crate::utils::{FloodDetector, FloodSignal};
