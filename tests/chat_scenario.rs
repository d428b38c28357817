//! A small chat room built on the public API: login and chat messages are
//! rebroadcast to every other participant.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use futures::StreamExt;
use packet_socket::{
    connect, ClientConfig, Connection, ConnectionConfig, ConnectionEvent, Dispatcher, Listener,
    PacketReader, PacketWriter, ProtocolError,
};

const LOGIN: u8 = 0;
const CHAT: u8 = 2;

#[derive(Default)]
struct Session {
    id: Option<i32>,
}

struct Room {
    listener: Listener<Session>,
    next_id: AtomicI32,
}

struct Request {
    room: Arc<Room>,
    connection: Connection<Session>,
}

fn dispatcher() -> Dispatcher<Request> {
    let dispatcher = Dispatcher::new();

    dispatcher
        .register(LOGIN, |req: &Request, reader: &mut PacketReader<'_>| {
            let name = reader.read_string()?;
            let id = req.room.next_id.fetch_add(1, Ordering::SeqCst);
            req.connection.with_context(|s| s.id = Some(id));

            let mut out = PacketWriter::new();
            out.write_u8(LOGIN).write_i32(id).write_string(&name);
            req.room
                .listener
                .broadcast(out.into_bytes(), Some(&req.connection));
            Ok(())
        })
        .unwrap();

    dispatcher
        .register(CHAT, |req: &Request, reader: &mut PacketReader<'_>| {
            let text = reader.read_string()?;
            let id = req
                .connection
                .with_context(|s| s.id)
                .ok_or_else(|| ProtocolError::Custom("chat before login".into()))?;

            let mut out = PacketWriter::new();
            out.write_u8(CHAT).write_i32(id).write_string(&text);
            req.room
                .listener
                .broadcast(out.into_bytes(), Some(&req.connection));
            Ok(())
        })
        .unwrap();

    dispatcher
}

fn message(tag: u8, text: &str) -> Vec<u8> {
    let mut out = PacketWriter::new();
    out.write_u8(tag).write_string(text);
    out.as_slice().to_vec()
}

fn parse(frame: &[u8]) -> (u8, i32, String) {
    let mut reader = PacketReader::new(frame);
    let tag = reader.read_u8().unwrap();
    let id = reader.read_i32().unwrap();
    let text = reader.read_string().unwrap();
    assert!(reader.is_empty());
    (tag, id, text)
}

#[tokio::test]
async fn login_and_chat_are_relayed_to_other_participants() {
    let mut config = packet_socket::ListenerConfig::new("127.0.0.1:0");
    config.connection = ConnectionConfig::default();
    let (listener, mut server_events) = Listener::<Session>::new(config);
    let addr = listener.start(16).unwrap().to_string();

    let room = Arc::new(Room {
        listener,
        next_id: AtomicI32::new(7),
    });

    let server_room = Arc::clone(&room);
    let server = tokio::spawn(async move {
        let dispatcher = dispatcher();
        while let Some(event) = server_events.next().await {
            if let ConnectionEvent::FrameReceived {
                connection,
                payload,
            } = event
            {
                let req = Request {
                    room: Arc::clone(&server_room),
                    connection,
                };
                if let Err(e) = dispatcher.dispatch(&req, &payload) {
                    tracing::warn!(error = %e, "Rejected message");
                }
            }
        }
    });

    let (alice, mut alice_events) = connect::<()>(&ClientConfig::new(addr.clone())).await.unwrap();
    let (bob, mut bob_events) = connect::<()>(&ClientConfig::new(addr)).await.unwrap();
    expect_connected(&mut alice_events).await;
    expect_connected(&mut bob_events).await;

    // both must be registered before anything is broadcast
    for _ in 0..50 {
        if room.listener.connection_count() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(room.listener.connection_count(), 2);

    alice.send(message(LOGIN, "alice")).unwrap();
    assert_eq!(
        parse(&next_frame(&mut bob_events).await),
        (LOGIN, 7, "alice".to_string())
    );

    bob.send(message(LOGIN, "bob")).unwrap();
    assert_eq!(
        parse(&next_frame(&mut alice_events).await),
        (LOGIN, 8, "bob".to_string())
    );

    bob.send(message(CHAT, "hi")).unwrap();
    assert_eq!(
        parse(&next_frame(&mut alice_events).await),
        (CHAT, 8, "hi".to_string())
    );
    assert!(quiet_for(&mut bob_events, Duration::from_millis(200)).await);

    room.listener.stop().await.unwrap();
    server.abort();
}
