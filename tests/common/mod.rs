//! Shared helpers for the integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use packet_socket::{
    ConnectionConfig, ConnectionEvent, DisconnectReason, EventStream, Listener, ListenerConfig,
};
use tokio::time::timeout;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Next event, failing the test if none arrives in time
pub async fn next_event<C>(events: &mut EventStream<C>) -> ConnectionEvent<C> {
    timeout(EVENT_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// True if no event arrives within `wait`
pub async fn quiet_for<C>(events: &mut EventStream<C>, wait: Duration) -> bool {
    timeout(wait, events.next()).await.is_err()
}

/// Skip progress events and return the next frame payload
pub async fn next_frame<C>(events: &mut EventStream<C>) -> Bytes {
    loop {
        match next_event(events).await {
            ConnectionEvent::FrameReceived { payload, .. } => return payload,
            ConnectionEvent::ReceiveProgress { .. } | ConnectionEvent::SendProgress { .. } => {}
            other => panic!("expected a frame, got {other:?}"),
        }
    }
}

pub async fn expect_connected<C>(events: &mut EventStream<C>) {
    match next_event(events).await {
        ConnectionEvent::Connected { .. } => {}
        other => panic!("expected Connected, got {other:?}"),
    }
}

pub async fn expect_disconnected<C>(events: &mut EventStream<C>) -> DisconnectReason {
    loop {
        match next_event(events).await {
            ConnectionEvent::Disconnected { reason, .. } => return reason,
            ConnectionEvent::FrameReceived { .. }
            | ConnectionEvent::ReceiveProgress { .. }
            | ConnectionEvent::SendProgress { .. } => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }
}

/// Listener on an ephemeral loopback port, already started
pub fn start_listener<C: Default + Send + 'static>(
    connection: ConnectionConfig,
) -> (Listener<C>, EventStream<C>, String) {
    let mut config = ListenerConfig::new("127.0.0.1:0");
    config.connection = connection;
    let (listener, events) = Listener::new(config);
    let addr = listener.start(16).expect("listener should start");
    (listener, events, addr.to_string())
}
