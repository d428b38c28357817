//! Chat room server.
//!
//! Clients log in with `[Login, name]`; the server assigns a random id and
//! tells everyone else `[Login, id, name]`. Authorized clients send
//! `[Chat, text]`, relayed to the others as `[Chat, id, text]`.
//!
//! ```text
//! cargo run --example chat_server [config.toml]
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use packet_socket::utils::logging::init_logging;
use packet_socket::utils::metrics::{global_metrics, init_metrics};
use packet_socket::{
    Connection, ConnectionEvent, Dispatcher, Listener, NetworkConfig, PacketReader, PacketWriter,
    ProtocolError, Result,
};
use rand::Rng;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum Header {
    Login = 0,
    Register = 1,
    Chat = 2,
}

impl From<Header> for u8 {
    fn from(header: Header) -> u8 {
        header as u8
    }
}

#[derive(Debug, Default)]
struct User {
    id: i32,
    name: String,
    authorized: bool,
}

struct Room {
    listener: Listener<User>,
    ids: Mutex<HashSet<i32>>,
}

impl Room {
    /// Draw an id no logged-in user holds
    fn assign_id(&self) -> i32 {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        let mut rng = rand::rng();
        loop {
            let id = rng.random_range(1..i32::MAX);
            if ids.insert(id) {
                return id;
            }
        }
    }

    fn release_id(&self, id: i32) {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    /// Authorize `user` under a fresh id. A second login replaces the
    /// identity, so the id held before goes back to the pool.
    fn login(&self, user: &mut User, name: String) -> i32 {
        let id = self.assign_id();
        if user.authorized {
            self.release_id(user.id);
        }
        user.id = id;
        user.name = name;
        user.authorized = true;
        id
    }
}

struct Request {
    room: Arc<Room>,
    connection: Connection<User>,
}

fn handlers() -> Result<Dispatcher<Request>> {
    let dispatcher = Dispatcher::new();

    dispatcher.register(Header::Login, |req: &Request, reader: &mut PacketReader<'_>| {
        let name = reader.read_string()?;
        let id = req
            .connection
            .with_context(|user| req.room.login(user, name.clone()));
        info!(%name, id, "Authorized user");

        let mut out = PacketWriter::new();
        out.write_u8(Header::Login.into())
            .write_i32(id)
            .write_string(&name);
        req.room
            .listener
            .broadcast(out.into_bytes(), Some(&req.connection));
        Ok(())
    })?;

    // accounts are not persisted; registration is accepted and ignored
    dispatcher.register(Header::Register, |_: &Request, _: &mut PacketReader<'_>| Ok(()))?;

    dispatcher.register(Header::Chat, |req: &Request, reader: &mut PacketReader<'_>| {
        let (authorized, id) = req.connection.with_context(|u| (u.authorized, u.id));
        if !authorized {
            return Err(ProtocolError::Custom("User is not authorized to chat".into()));
        }

        let text = reader.read_string()?;
        let mut out = PacketWriter::new();
        out.write_u8(Header::Chat.into()).write_i32(id).write_string(&text);
        req.room
            .listener
            .broadcast(out.into_bytes(), Some(&req.connection));
        Ok(())
    })?;

    Ok(dispatcher)
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate_strict()?;

    init_logging(&config.logging)?;
    init_metrics();

    let backlog = config.listener.backlog;
    let (listener, mut events) = Listener::<User>::new(config.listener);
    let addr = listener.start(backlog)?;
    info!(%addr, "Chat server listening, Ctrl+C to stop");

    let room = Arc::new(Room {
        listener,
        ids: Mutex::new(HashSet::new()),
    });
    let dispatcher = handlers()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received CTRL+C signal, shutting down");
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    ConnectionEvent::Connected { connection } => {
                        info!(id = %connection.id(), peer = ?connection.remote_addr(), "Client connected");
                    }
                    ConnectionEvent::Disconnected { connection, reason } => {
                        let (authorized, id) = connection.with_context(|u| (u.authorized, u.id));
                        if authorized {
                            room.release_id(id);
                        }
                        info!(id = %connection.id(), %reason, "Client disconnected");
                    }
                    ConnectionEvent::FrameReceived { connection, payload } => {
                        let req = Request { room: Arc::clone(&room), connection };
                        if let Err(e) = dispatcher.dispatch(&req, &payload) {
                            warn!(id = %req.connection.id(), error = %e, "Rejected message");
                        }
                    }
                    ConnectionEvent::FloodDetected { connection, signal } => {
                        warn!(id = %connection.id(), receives = signal.receives, "Dropping flooding client");
                        connection.disconnect();
                    }
                    ConnectionEvent::ReceiveProgress { .. } | ConnectionEvent::SendProgress { .. } => {}
                }
            }
        }
    }

    room.listener.stop().await?;
    global_metrics().log_metrics();
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use packet_socket::ListenerConfig;

    fn room() -> Room {
        let (listener, _events) = Listener::new(ListenerConfig::default());
        Room {
            listener,
            ids: Mutex::new(HashSet::new()),
        }
    }

    #[test]
    fn test_second_login_releases_previous_id() {
        let room = room();
        let mut user = User::default();

        let first = room.login(&mut user, "alice".into());
        let second = room.login(&mut user, "alice2".into());

        assert_ne!(first, second);
        assert_eq!(user.id, second);
        assert_eq!(user.name, "alice2");
        assert_eq!(*room.ids.lock().unwrap(), HashSet::from([second]));
    }

    #[test]
    fn test_release_on_disconnect_empties_pool() {
        let room = room();
        let mut user = User::default();
        let id = room.login(&mut user, "bob".into());
        room.release_id(id);
        assert!(room.ids.lock().unwrap().is_empty());
    }
}
