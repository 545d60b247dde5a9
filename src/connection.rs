//! Connection management for ESL

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace, warn};

use crate::{
    broadcast::{Broadcast, Subscription},
    command::{to_wire_format, EslResponse},
    constants::SOCKET_BUF_SIZE,
    error::{EslError, EslResult, FramingError},
    event::EslEvent,
    protocol::{EslMessage, EslParser, MessageType},
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of an [`EslConnection`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Receive loop running, commands accepted.
    Open = 0,
    /// Teardown in progress.
    Closing = 1,
    /// Socket released, streams completed.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Connection status for an ESL session
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// ESL session is active.
    Connected,
    /// ESL session ended.
    Disconnected(DisconnectReason),
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Switch sent a text/disconnect-notice
    ServerNotice,
    /// TCP I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// The byte stream could not be framed
    ProtocolError(String),
    /// Clean EOF on the TCP connection
    ConnectionClosed,
    /// Application called close()
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerNotice => write!(f, "server sent disconnect notice"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Options applied when a connection is opened.
///
/// Use [`Default::default()`] for standard settings.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Size of each socket read. Default: 64 KiB.
    pub read_buffer_size: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: SOCKET_BUF_SIZE,
        }
    }
}

/// State shared between connection handles and the receive task
struct Inner {
    id: u64,
    peer_addr: Option<SocketAddr>,
    state: AtomicU8,
    writer: Mutex<Option<OwnedWriteHalf>>,
    messages: Broadcast<EslMessage>,
    events: Broadcast<EslEvent>,
    shutdown_tx: watch::Sender<bool>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(
            self.state
                .load(Ordering::Acquire),
        )
    }

    /// Single exit path for EOF, disconnect notices, local close, read
    /// errors and framing errors. Only the first caller does any work.
    fn teardown(&self, reason: DisconnectReason, error: Option<FramingError>) -> bool {
        if self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        debug!("Connection {} closing: {}", self.id, reason);

        self.shutdown_tx
            .send_replace(true);
        self.messages
            .complete(error.clone());
        self.events
            .complete(error);

        // A writer busy with a command drops its half when it sees the state.
        if let Ok(mut writer) = self
            .writer
            .try_lock()
        {
            writer.take();
        }

        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        info!("Connection {} closed: {}", self.id, reason);
        self.status_tx
            .send_replace(ConnectionStatus::Disconnected(reason));
        true
    }

    /// Publish one framed message. Returns `false` when the receive loop
    /// must stop.
    fn dispatch(&self, message: EslMessage) -> bool {
        trace!(
            "[RECV] Connection {} parsed message: {:?}",
            self.id,
            message.message_type()
        );

        let message_type = message
            .message_type()
            .clone();
        match message_type {
            MessageType::Event => match EslEvent::try_from(message.clone()) {
                Ok(event) => {
                    self.messages
                        .publish(message);
                    self.events
                        .publish(event);
                    true
                }
                Err(e) => {
                    warn!("[RECV] Connection {} sent an unparseable event: {}", self.id, e);
                    self.teardown(
                        DisconnectReason::ProtocolError(e.to_string()),
                        Some(FramingError::from(&e)),
                    );
                    false
                }
            },
            MessageType::Disconnect => {
                info!(
                    "[RECV] Connection {} received disconnect notice ({})",
                    self.id,
                    message
                        .content_disposition()
                        .unwrap_or("disconnect")
                );
                self.messages
                    .publish(message);
                self.teardown(DisconnectReason::ServerNotice, None);
                false
            }
            _ => {
                self.messages
                    .publish(message);
                true
            }
        }
    }
}

/// Background receive loop
async fn receive_loop(
    inner: Arc<Inner>,
    reader: OwnedReadHalf,
    shutdown_rx: watch::Receiver<bool>,
    read_buffer_size: usize,
) {
    let result = std::panic::AssertUnwindSafe(receive_loop_inner(
        inner.clone(),
        reader,
        shutdown_rx,
        read_buffer_size,
    ));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        tracing::error!("receive task panicked");
        inner.teardown(
            DisconnectReason::IoError("receive task panicked".to_string()),
            None,
        );
    }
}

async fn receive_loop_inner(
    inner: Arc<Inner>,
    mut reader: OwnedReadHalf,
    mut shutdown_rx: watch::Receiver<bool>,
    read_buffer_size: usize,
) {
    let mut parser = EslParser::new();
    let mut read_buffer = vec![0u8; read_buffer_size.max(1)];

    loop {
        // Drain every complete message before reading again
        loop {
            match parser.parse_message() {
                Ok(Some(message)) => {
                    if !inner.dispatch(message) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("[RECV] Connection {} framing error: {}", inner.id, e);
                    inner.teardown(
                        DisconnectReason::ProtocolError(e.to_string()),
                        Some(FramingError::from(&e)),
                    );
                    return;
                }
            }
        }

        if inner.state() != ConnectionState::Open {
            return;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("[RECV] Connection {} receive loop stopped", inner.id);
                return;
            }
            read = reader.read(&mut read_buffer) => match read {
                Ok(0) => {
                    if parser.has_partial_message() {
                        let e = EslError::protocol_error(format!(
                            "truncated message: stream ended with {} bytes pending",
                            parser.buffered_len()
                        ));
                        warn!("[RECV] Connection {} {}", inner.id, e);
                        inner.teardown(
                            DisconnectReason::ProtocolError(e.to_string()),
                            Some(FramingError::from(&e)),
                        );
                    } else {
                        debug!("[RECV] Connection {} closed by peer (EOF)", inner.id);
                        inner.teardown(DisconnectReason::ConnectionClosed, None);
                    }
                    return;
                }
                Ok(n) => {
                    trace!("[RECV] Connection {} read {} bytes from socket", inner.id, n);
                    parser.add_data(&read_buffer[..n]);
                }
                Err(e) => {
                    warn!("[RECV] Connection {} read error: {}", inner.id, e);
                    inner.teardown(DisconnectReason::IoError(e.to_string()), None);
                    return;
                }
            }
        }
    }
}

/// One event-socket connection (Clone + Send)
///
/// A background task owns the read half of the socket: it frames the byte
/// stream, publishes every message on [`messages()`](Self::messages) and
/// every event on [`events()`](Self::events). Commands are serialized
/// through the writer mutex.
#[derive(Clone)]
pub struct EslConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EslConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslConnection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl EslConnection {
    /// Start the receive loop over `stream` with default options.
    ///
    /// Returns immediately; must be called within a tokio runtime.
    pub fn open(stream: TcpStream) -> Self {
        Self::open_with_options(stream, ConnectionOptions::default())
    }

    /// Start the receive loop over `stream` with custom options.
    pub fn open_with_options(stream: TcpStream, options: ConnectionOptions) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let peer_addr = stream
            .peer_addr()
            .ok();
        let (read_half, write_half) = stream.into_split();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, _) = watch::channel(ConnectionStatus::Connected);

        let inner = Arc::new(Inner {
            id,
            peer_addr,
            state: AtomicU8::new(ConnectionState::Open as u8),
            writer: Mutex::new(Some(write_half)),
            messages: Broadcast::new(),
            events: Broadcast::new(),
            shutdown_tx,
            status_tx,
        });

        debug!("Opened connection {} from {:?}", id, peer_addr);
        tokio::spawn(receive_loop(
            inner.clone(),
            read_half,
            shutdown_rx,
            options.read_buffer_size,
        ));

        Self { inner }
    }

    /// Process-unique identifier of this connection.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Remote address, if the socket still knew it when opened.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Current status, including the disconnect reason once closed.
    pub fn status(&self) -> ConnectionStatus {
        self.inner
            .status_tx
            .borrow()
            .clone()
    }

    /// Subscribe to every message received from now on.
    ///
    /// Completes once the connection closes, preceded by a
    /// [`FramingError`] if it closed because of malformed input.
    pub fn messages(&self) -> Subscription<EslMessage> {
        self.inner
            .messages
            .subscribe()
    }

    /// Subscribe to the event messages received from now on, parsed.
    ///
    /// Same ordering and completion rules as [`messages()`](Self::messages).
    /// Any disconnect notice closes the connection, including one with
    /// `Content-Disposition: linger`, so no events follow it.
    pub fn events(&self) -> Subscription<EslEvent> {
        self.inner
            .events
            .subscribe()
    }

    /// Write a command followed by the blank-line terminator.
    ///
    /// Does not wait for a reply; use [`send_command()`](Self::send_command)
    /// for that.
    pub async fn send(&self, raw: &str) -> EslResult<()> {
        if !self.is_open() {
            return Err(EslError::NotConnected);
        }
        let wire = to_wire_format(raw)?;

        let mut writer = self
            .inner
            .writer
            .lock()
            .await;
        self.write_locked(&mut writer, &wire)
            .await
    }

    /// Send a command and wait for its `command/reply`.
    ///
    /// The writer lock is held through the entire send-and-receive cycle so
    /// replies pair up with commands (ESL is a sequential request/response
    /// protocol). There is no built-in timeout; wrap the call in
    /// `tokio::time::timeout` if needed.
    pub async fn send_command(&self, raw: &str) -> EslResult<EslResponse> {
        let reply = self
            .request(raw, MessageType::CommandReply)
            .await?;
        let response = reply.into_response();
        debug!("Received response: success={}", response.is_success());
        Ok(response)
    }

    /// Execute an API command and wait for its `api/response`.
    ///
    /// ```rust,no_run
    /// # async fn example(conn: &freeswitch_esl_outbound::EslConnection) -> Result<(), freeswitch_esl_outbound::EslError> {
    /// let response = conn.api("status").await?;
    /// println!("{}", response.body().unwrap_or(""));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn api(&self, command: &str) -> EslResult<EslResponse> {
        let reply = self
            .request(&format!("api {}", command), MessageType::ApiResponse)
            .await?;
        Ok(reply.into_response())
    }

    /// Send `raw` and return the first subsequent message of `expected` type.
    pub(crate) async fn request(&self, raw: &str, expected: MessageType) -> EslResult<EslMessage> {
        if !self.is_open() {
            return Err(EslError::NotConnected);
        }
        let wire = to_wire_format(raw)?;

        let mut writer = self
            .inner
            .writer
            .lock()
            .await;
        // Subscribe before writing so the reply cannot slip past.
        let mut replies = self.messages();
        self.write_locked(&mut writer, &wire)
            .await?;

        let reply = loop {
            match replies
                .recv()
                .await
            {
                Some(Ok(message)) if *message.message_type() == expected => break Ok(message),
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(EslError::protocol_error(e.message)),
                None => break Err(EslError::ConnectionClosed),
            }
        };

        // Teardown could not take the write half while we held it.
        if !self.is_open() {
            writer.take();
        }
        reply
    }

    async fn write_locked(&self, writer: &mut Option<OwnedWriteHalf>, wire: &str) -> EslResult<()> {
        if !self.is_open() {
            writer.take();
            return Err(EslError::NotConnected);
        }
        let half = writer
            .as_mut()
            .ok_or(EslError::NotConnected)?;

        debug!(
            "Connection {} sending command: {}",
            self.inner.id,
            wire.trim_end()
        );
        // A peer that stops reading must not pin the socket past close().
        let mut shutdown_rx = self
            .inner
            .shutdown_tx
            .subscribe();
        let written = tokio::select! {
            written = half.write_all(wire.as_bytes()) => written.map_err(EslError::from),
            _ = shutdown_rx.wait_for(|stop| *stop) => Err(EslError::ConnectionClosed),
        };

        if !self.is_open() {
            writer.take();
        }
        written
    }

    /// Close the connection. Idempotent and safe to call concurrently.
    ///
    /// On return the connection is `Closed`, every `messages()` and
    /// `events()` subscriber has been sent its completion and the write half
    /// of the socket has been released. A `send()` still in flight fails with
    /// [`EslError::ConnectionClosed`].
    pub async fn close(&self) {
        self.inner
            .teardown(DisconnectReason::ClientRequested, None);
        self.wait_closed()
            .await;
        // Teardown skips the half while a writer holds the lock; that writer
        // gives it up as soon as it sees the shutdown signal.
        self.inner
            .writer
            .lock()
            .await
            .take();
    }

    /// Wait until the connection is closed and report why.
    pub async fn wait_closed(&self) -> DisconnectReason {
        let mut status_rx = self
            .inner
            .status_tx
            .subscribe();
        let status = status_rx
            .wait_for(|s| matches!(s, ConnectionStatus::Disconnected(_)))
            .await;
        let reason = match status.as_deref() {
            Ok(ConnectionStatus::Disconnected(reason)) => reason.clone(),
            _ => DisconnectReason::ConnectionClosed,
        };
        reason
    }
}
