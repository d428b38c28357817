//! Byte-stream transport: connections, the listener and its registry, and
//! outbound connect.

pub mod client;
pub mod connection;
pub mod listener;
pub mod registry;

pub use client::{connect, connect_with_context};
pub use connection::{
    event_channel, Connection, ConnectionEvent, ConnectionId, ConnectionState, EventSender,
    EventStream,
};
pub use listener::Listener;
pub use registry::Registry;
