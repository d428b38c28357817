//! TCP listener with a connection registry and broadcast.
//!
//! Every accepted stream becomes a [`Connection`] that reports into the
//! listener's single event stream. The registry tracks membership only:
//! a connection is inserted before it starts and removed by its own close
//! hook, before its `Disconnected` event is delivered.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ListenerConfig;
use crate::error::{DisconnectReason, ProtocolError, Result};
use crate::transport::connection::{
    event_channel, CloseHook, Connection, ConnectionId, EventSender, EventStream,
};
use crate::transport::registry::Registry;
use crate::utils::metrics::global_metrics;

type ContextFactory<C> = dyn Fn(Option<SocketAddr>) -> C + Send + Sync;

struct Running {
    local_addr: SocketAddr,
    backlog: u32,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

pub struct Listener<C = ()> {
    config: ListenerConfig,
    registry: Arc<Registry<C>>,
    events: EventSender<C>,
    factory: Arc<ContextFactory<C>>,
    running: Mutex<Option<Running>>,
}

impl<C: Default + Send + 'static> Listener<C> {
    /// Create a stopped listener whose connections start with `C::default()`.
    pub fn new(config: ListenerConfig) -> (Self, EventStream<C>) {
        Self::with_context_factory(config, |_| C::default())
    }
}

impl<C: Send + 'static> Listener<C> {
    /// Create a stopped listener that builds each connection's context
    /// from its peer address.
    pub fn with_context_factory<F>(config: ListenerConfig, factory: F) -> (Self, EventStream<C>)
    where
        F: Fn(Option<SocketAddr>) -> C + Send + Sync + 'static,
    {
        let (events, stream) = event_channel();
        let listener = Self {
            config,
            registry: Arc::new(Registry::new()),
            events,
            factory: Arc::new(factory),
            running: Mutex::new(None),
        };
        (listener, stream)
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind, listen with `backlog`, and spawn the accept loop.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    #[instrument(skip(self), fields(address = %self.config.address))]
    pub fn start(&self, backlog: u32) -> Result<SocketAddr> {
        let mut running = self.running();
        if running.is_some() {
            return Err(ProtocolError::AlreadyRunning);
        }

        let addr: SocketAddr = self.config.address.parse().map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Invalid listen address {}: {e}",
                self.config.address
            ))
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            Arc::clone(&self.registry),
            self.events.clone(),
            Arc::clone(&self.factory),
            shutdown.clone(),
        ));

        info!(%local_addr, backlog, "Listener started");
        *running = Some(Running {
            local_addr,
            backlog,
            shutdown,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting, then disconnect and forget every registered connection.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running().take() else {
            return Err(ProtocolError::NotRunning);
        };

        running.shutdown.cancel();
        if let Err(e) = running.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }

        let connections = self.registry.drain();
        let count = connections.len();
        for connection in connections {
            connection.close(DisconnectReason::ListenerStopped);
        }

        info!(local_addr = %running.local_addr, disconnected = count, "Listener stopped");
        Ok(())
    }

    /// Send `payload` to every registered connection except `exclude`.
    ///
    /// Returns how many connections accepted the frame. A failure on one
    /// peer is logged and does not stop delivery to the rest.
    pub fn broadcast(&self, payload: impl Into<Bytes>, exclude: Option<&Connection<C>>) -> usize {
        let payload = payload.into();
        let excluded = exclude.map(Connection::id);
        global_metrics().broadcast();

        let mut delivered = 0;
        for connection in self.registry.snapshot() {
            if Some(connection.id()) == excluded {
                continue;
            }
            match connection.send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(id = %connection.id(), error = %e, "Broadcast skipped peer"),
            }
        }
        delivered
    }

    pub fn connections(&self) -> Vec<Connection<C>> {
        self.registry.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection<C>> {
        self.registry.get(id)
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|r| r.local_addr)
    }

    pub fn backlog(&self) -> Option<u32> {
        self.running().as_ref().map(|r| r.backlog)
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}

async fn accept_loop<C: Send + 'static>(
    listener: TcpListener,
    config: ListenerConfig,
    registry: Arc<Registry<C>>,
    events: EventSender<C>,
    factory: Arc<ContextFactory<C>>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                global_metrics().connection_error();
                error!(error = %e, "Accept failed");
                continue;
            }
        };

        let weak: Weak<Registry<C>> = Arc::downgrade(&registry);
        let hook: CloseHook = Box::new(move |id| {
            if let Some(registry) = weak.upgrade() {
                registry.remove(id);
            }
        });

        let connection = match Connection::from_tcp_with_hook(
            stream,
            config.connection.clone(),
            factory(Some(peer)),
            events.clone(),
            Some(hook),
        ) {
            Ok(connection) => connection,
            Err(e) => {
                global_metrics().connection_error();
                error!(%peer, error = %e, "Failed to set up accepted connection");
                continue;
            }
        };

        registry.insert(connection.clone());
        if let Err(e) = connection.start() {
            registry.remove(connection.id());
            error!(%peer, error = %e, "Failed to start accepted connection");
            continue;
        }
        debug!(%peer, id = %connection.id(), "Connection accepted");
    }

    debug!("Accept loop exited");
}
