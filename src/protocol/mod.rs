//! Application-level helpers layered over raw frame payloads.
//!
//! The transport never looks inside a payload. Applications that follow the
//! tag-byte convention (one leading message tag, then fields written with
//! [`PacketWriter`](crate::core::serialization::PacketWriter)) can route
//! frames with a [`Dispatcher`].

pub mod dispatcher;

pub use dispatcher::Dispatcher;
