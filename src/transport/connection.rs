//! # Connection
//!
//! One live byte stream running the framing state machine.
//!
//! ```text
//! Idle --start()--> ReadingLength <--> ReadingPayload
//!   \                    |                  |
//!    `---------------> Disconnected <-------'
//! ```
//!
//! ## Tasks
//! `start()` spawns two tasks:
//! - the **receive loop** owns the read half, feeds a [`FrameCodec`] and pushes
//!   every completed frame onto the event channel before issuing the next read
//! - the **writer** owns the write half and drains the outbound queue; `send`
//!   encodes a whole frame and enqueues it, so frames from concurrent
//!   producers are written one after the other and never interleave
//!
//! The outbound queue holds at most `send_queue_capacity` frames. A peer
//! that stops reading until the queue is full is disconnected.
//!
//! ## Teardown
//! Every fault in either task becomes exactly one `Disconnected` event.
//! `disconnect()` cancels both tasks; a read that completes afterwards is a
//! late completion and is dropped without reaching the consumer. Events are
//! checked against the state and emitted under the state lock, which is also
//! where teardown marks the connection `Disconnected`, so nothing is
//! delivered after `Disconnected`.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ConnectionConfig;
use crate::core::codec::{DecodePhase, FrameCodec};
use crate::core::packet::{encode_frame, LENGTH_PREFIX_SIZE};
use crate::error::{constants, DisconnectReason, ProtocolError, Result};
use crate::utils::flood::FloodSignal;
use crate::utils::metrics::{global_metrics, ConnectionStats, ConnectionStatsSnapshot};

/// Read granularity of the receive loop
pub const READ_CHUNK_SIZE: usize = 8192;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub(crate) type CloseHook = Box<dyn Fn(ConnectionId) + Send + Sync>;

/// Sending side of a connection event channel
pub type EventSender<C> = mpsc::UnboundedSender<ConnectionEvent<C>>;

/// Receiving side of a connection event channel
pub type EventStream<C> = UnboundedReceiverStream<ConnectionEvent<C>>;

/// Create a connected event sender / stream pair
pub fn event_channel<C>() -> (EventSender<C>, EventStream<C>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, UnboundedReceiverStream::new(rx))
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    ReadingLength,
    ReadingPayload,
    Disconnected,
}

impl From<DecodePhase> for ConnectionState {
    fn from(phase: DecodePhase) -> Self {
        match phase {
            DecodePhase::ReadingLength => ConnectionState::ReadingLength,
            DecodePhase::ReadingPayload { .. } => ConnectionState::ReadingPayload,
        }
    }
}

/// Everything a connection reports to its consumer, in the order it happened
pub enum ConnectionEvent<C = ()> {
    Connected {
        connection: Connection<C>,
    },
    Disconnected {
        connection: Connection<C>,
        reason: DisconnectReason,
    },
    FrameReceived {
        connection: Connection<C>,
        payload: Bytes,
    },
    FloodDetected {
        connection: Connection<C>,
        signal: FloodSignal,
    },
    /// Payload bytes of the current frame received so far
    ReceiveProgress {
        connection: Connection<C>,
        received: usize,
        total: usize,
    },
    /// One frame of `sent` bytes (prefix included) was written
    SendProgress {
        connection: Connection<C>,
        sent: usize,
    },
}

impl<C> ConnectionEvent<C> {
    pub fn connection(&self) -> &Connection<C> {
        match self {
            ConnectionEvent::Connected { connection }
            | ConnectionEvent::Disconnected { connection, .. }
            | ConnectionEvent::FrameReceived { connection, .. }
            | ConnectionEvent::FloodDetected { connection, .. }
            | ConnectionEvent::ReceiveProgress { connection, .. }
            | ConnectionEvent::SendProgress { connection, .. } => connection,
        }
    }
}

impl<C> fmt::Debug for ConnectionEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connected { connection } => f
                .debug_struct("Connected")
                .field("connection", connection)
                .finish(),
            ConnectionEvent::Disconnected { connection, reason } => f
                .debug_struct("Disconnected")
                .field("connection", connection)
                .field("reason", reason)
                .finish(),
            ConnectionEvent::FrameReceived {
                connection,
                payload,
            } => f
                .debug_struct("FrameReceived")
                .field("connection", connection)
                .field("len", &payload.len())
                .finish(),
            ConnectionEvent::FloodDetected { connection, signal } => f
                .debug_struct("FloodDetected")
                .field("connection", connection)
                .field("signal", signal)
                .finish(),
            ConnectionEvent::ReceiveProgress {
                connection,
                received,
                total,
            } => f
                .debug_struct("ReceiveProgress")
                .field("connection", connection)
                .field("received", received)
                .field("total", total)
                .finish(),
            ConnectionEvent::SendProgress { connection, sent } => f
                .debug_struct("SendProgress")
                .field("connection", connection)
                .field("sent", sent)
                .finish(),
        }
    }
}

struct Inner<C> {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    running: AtomicBool,
    disconnected: AtomicBool,
    halves: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    outbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    events: EventSender<C>,
    on_close: Option<CloseHook>,
    shutdown: CancellationToken,
    context: Mutex<C>,
    stats: ConnectionStats,
}

/// Handle to a framed connection. Clones share the same connection.
pub struct Connection<C = ()> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> PartialEq for Connection<C> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<C> Eq for Connection<C> {}

impl<C> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C> Connection<C> {
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Peer address; `None` for in-memory streams
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn max_packet_size(&self) -> usize {
        self.inner.config.max_packet_size
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && !self.is_disconnected()
    }

    pub fn is_connected(&self) -> bool {
        !self.is_disconnected()
    }

    fn is_disconnected(&self) -> bool {
        self.inner.disconnected.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Run `f` against the application context slot.
    ///
    /// The slot is locked for the duration of `f`; do not call back into
    /// `with_context` on the same connection from inside it.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut lock(&self.inner.context))
    }

    /// Replace the context, returning the previous value
    pub fn set_context(&self, context: C) -> C {
        std::mem::replace(&mut *lock(&self.inner.context), context)
    }

    /// Queue one frame for sending.
    ///
    /// The frame is encoded here and written whole by the connection's
    /// writer. Frames queued before `start()` go out once it runs.
    ///
    /// When the outbound queue is full the peer is not keeping up: the
    /// connection is closed with an I/O reason and the error is returned.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        if self.is_disconnected() {
            return Err(ProtocolError::NotConnected);
        }

        let payload = payload.into();
        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        encode_frame(&payload, &mut frame)?;

        match self.inner.outbound_tx.try_send(frame.freeze()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let err = ProtocolError::Io(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    constants::ERR_SEND_QUEUE_FULL,
                ));
                global_metrics().connection_error();
                warn!(
                    id = %self.inner.id,
                    capacity = self.inner.config.send_queue_capacity,
                    "Send queue full"
                );
                self.close(DisconnectReason::from(&err));
                Err(err)
            }
            Err(TrySendError::Closed(_)) => Err(ProtocolError::NotConnected),
        }
    }

    /// Close the connection. Idempotent; only the first call emits `Disconnected`.
    pub fn disconnect(&self) {
        self.close(DisconnectReason::Requested);
    }

    /// Tear down with `reason`. Returns false if already disconnected.
    pub(crate) fn close(&self, reason: DisconnectReason) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if self.inner.disconnected.swap(true, Ordering::AcqRel) {
                return false;
            }
            *state = ConnectionState::Disconnected;
        }
        self.inner.shutdown.cancel();
        // never started: dropping the halves closes the endpoint
        drop(lock(&self.inner.halves).take());

        if let Some(hook) = &self.inner.on_close {
            hook(self.inner.id);
        }
        if self.inner.running.load(Ordering::Acquire) {
            global_metrics().connection_closed();
        }

        info!(
            id = %self.inner.id,
            peer = ?self.inner.remote_addr,
            reason = %reason,
            "Connection closed"
        );
        self.emit(ConnectionEvent::Disconnected {
            connection: self.clone(),
            reason,
        });
        true
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.inner.state);
        if *state != ConnectionState::Disconnected {
            *state = next;
        }
    }

    fn emit(&self, event: ConnectionEvent<C>) {
        if self.inner.events.send(event).is_err() {
            trace!(id = %self.inner.id, "Event dropped, no consumer");
        }
    }

    /// Emit `event` unless the connection is already torn down.
    ///
    /// Returns false, without emitting, once `close` has run.
    fn emit_live(&self, event: ConnectionEvent<C>) -> bool {
        let state = lock(&self.inner.state);
        if *state == ConnectionState::Disconnected {
            return false;
        }
        self.emit(event);
        true
    }
}

impl<C: Send + 'static> Connection<C> {
    /// Wrap an arbitrary byte stream.
    pub fn from_stream<S>(
        stream: S,
        remote_addr: Option<SocketAddr>,
        config: ConnectionConfig,
        context: C,
        events: EventSender<C>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(
            Box::new(reader),
            Box::new(writer),
            remote_addr,
            config,
            context,
            events,
            None,
        )
    }

    /// Wrap a TCP stream, applying the socket options from `config`.
    pub fn from_tcp(
        stream: TcpStream,
        config: ConnectionConfig,
        context: C,
        events: EventSender<C>,
    ) -> Result<Self> {
        Self::from_tcp_with_hook(stream, config, context, events, None)
    }

    pub(crate) fn from_tcp_with_hook(
        stream: TcpStream,
        config: ConnectionConfig,
        context: C,
        events: EventSender<C>,
        on_close: Option<CloseHook>,
    ) -> Result<Self> {
        stream.set_nodelay(config.nodelay)?;
        let remote_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Ok(Self::from_parts(
            Box::new(reader),
            Box::new(writer),
            remote_addr,
            config,
            context,
            events,
            on_close,
        ))
    }

    fn from_parts(
        reader: BoxedReader,
        writer: BoxedWriter,
        remote_addr: Option<SocketAddr>,
        config: ConnectionConfig,
        context: C,
        events: EventSender<C>,
        on_close: Option<CloseHook>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                remote_addr,
                config,
                state: Mutex::new(ConnectionState::Idle),
                running: AtomicBool::new(false),
                disconnected: AtomicBool::new(false),
                halves: Mutex::new(Some((reader, writer))),
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                events,
                on_close,
                shutdown: CancellationToken::new(),
                context: Mutex::new(context),
                stats: ConnectionStats::default(),
            }),
        }
    }

    /// Begin receiving and sending. Valid once, from `Idle`.
    #[instrument(skip(self), fields(id = %self.inner.id))]
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::AlreadyRunning);
        }

        let halves = lock(&self.inner.halves).take();
        let outbound = lock(&self.inner.outbound_rx).take();
        let (Some((reader, writer)), Some(outbound)) = (halves, outbound) else {
            return Err(ProtocolError::NotConnected);
        };

        global_metrics().connection_established();
        {
            let mut state = lock(&self.inner.state);
            if *state == ConnectionState::Disconnected {
                return Err(ProtocolError::NotConnected);
            }
            *state = ConnectionState::ReadingLength;
            self.emit(ConnectionEvent::Connected {
                connection: self.clone(),
            });
        }
        debug!(peer = ?self.inner.remote_addr, "Connection started");

        tokio::spawn(receive_loop(self.clone(), reader));
        tokio::spawn(write_loop(self.clone(), writer, outbound));
        Ok(())
    }

    async fn read_frames(&self, reader: &mut BoxedReader) -> Result<()> {
        let config = &self.inner.config;
        let mut codec = FrameCodec::new(config.max_packet_size, config.allow_zero_length);
        let mut flood = config.flood.detector();
        let mut buffer = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let mut fresh = false;

        loop {
            while let Some(payload) = codec.decode(&mut buffer)? {
                let len = payload.len();
                let delivered = self.emit_live(ConnectionEvent::FrameReceived {
                    connection: self.clone(),
                    payload,
                });
                if !delivered {
                    return Err(ProtocolError::LateCompletion);
                }

                self.inner.stats.record_received(LENGTH_PREFIX_SIZE + len);
                trace!(id = %self.inner.id, bytes = len, "Frame received");

                if let Some(signal) = flood.as_mut().and_then(|d| d.record()) {
                    global_metrics().flood_detected();
                    warn!(
                        id = %self.inner.id,
                        receives = signal.receives,
                        max_receives = signal.max_receives,
                        "Flood detected"
                    );
                    self.emit_live(ConnectionEvent::FloodDetected {
                        connection: self.clone(),
                        signal,
                    });
                }
            }
            self.set_state(codec.phase().into());

            if fresh && config.report_progress {
                if let DecodePhase::ReadingPayload { length } = codec.phase() {
                    self.emit_live(ConnectionEvent::ReceiveProgress {
                        connection: self.clone(),
                        received: buffer.len().min(length),
                        total: length,
                    });
                }
            }

            if buffer.capacity() - buffer.len() < READ_CHUNK_SIZE {
                buffer.reserve(READ_CHUNK_SIZE);
            }

            let read = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => return Ok(()),
                read = reader.read_buf(&mut buffer) => read?,
            };

            if self.is_disconnected() {
                return Err(ProtocolError::LateCompletion);
            }
            if read == 0 {
                return Err(ProtocolError::ConnectionReset);
            }
            fresh = true;
        }
    }
}

async fn receive_loop<C: Send + 'static>(connection: Connection<C>, mut reader: BoxedReader) {
    let err = match connection.read_frames(&mut reader).await {
        Ok(()) => return,
        Err(err) => err,
    };

    match &err {
        ProtocolError::LateCompletion => {
            trace!(id = %connection.id(), "Read completed after teardown, dropped");
            return;
        }
        ProtocolError::ProtocolViolation(msg) => {
            global_metrics().protocol_error();
            warn!(id = %connection.id(), error = %msg, "Protocol violation");
        }
        ProtocolError::ConnectionReset => {
            debug!(id = %connection.id(), "Peer closed the stream");
        }
        other => {
            global_metrics().connection_error();
            warn!(id = %connection.id(), error = %other, "Receive failed");
        }
    }
    connection.close(DisconnectReason::from(&err));
}

async fn write_loop<C: Send + 'static>(
    connection: Connection<C>,
    mut writer: BoxedWriter,
    mut outbound: mpsc::Receiver<Bytes>,
) {
    let shutdown = connection.inner.shutdown.clone();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = outbound.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            written = writer.write_all(&frame) => written,
        };

        if let Err(e) = written {
            global_metrics().connection_error();
            warn!(id = %connection.id(), error = %e, "Send failed");
            connection.close(DisconnectReason::from(&ProtocolError::Io(e)));
            break;
        }

        connection.inner.stats.record_sent(frame.len());
        if connection.inner.config.report_progress {
            connection.emit_live(ConnectionEvent::SendProgress {
                connection: connection.clone(),
                sent: frame.len(),
            });
        }
    }

    let _ = writer.shutdown().await;
}
