//! TCP listener accepting outbound connections from the switch.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    broadcast::{Broadcast, Subscription},
    connection::ConnectionOptions,
    constants::DEFAULT_OUTBOUND_PORT,
    error::{EslError, EslResult},
    outbound::OutboundSocket,
};

/// Pause before accepting again after the process ran out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Options for an [`OutboundListener`].
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Address to bind. Default: `0.0.0.0`.
    pub bind_addr: IpAddr,
    /// Port to bind; `0` picks an ephemeral port. Default: 8084.
    pub port: u16,
    /// Applied to every accepted connection.
    pub connection: ConnectionOptions,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_OUTBOUND_PORT,
            connection: ConnectionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Running(SocketAddr),
    /// The listening socket failed; accepted sockets are left alone.
    Stopped(SocketAddr),
    Disposed,
}

#[derive(Default)]
struct Registry {
    sockets: HashMap<u64, OutboundSocket>,
    closed: bool,
}

struct ListenerInner {
    options: ListenerOptions,
    lifecycle: Mutex<Lifecycle>,
    registry: Mutex<Registry>,
    connections: Broadcast<OutboundSocket>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerInner {
    /// Wrap an accepted stream, track it and announce it.
    fn register(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let socket = OutboundSocket::with_options(
            stream,
            self.options
                .connection
                .clone(),
        );
        let id = socket.id();

        {
            let mut registry = self
                .registry
                .lock();
            if registry.closed {
                debug!("[ACCEPT] Dropping connection {} from {}: disposed", id, addr);
                drop(registry);
                tokio::spawn(async move {
                    socket
                        .close()
                        .await
                });
                return;
            }
            registry
                .sockets
                .insert(id, socket.clone());
        }
        info!("[ACCEPT] Accepted outbound connection {} from {}", id, addr);

        let weak: Weak<Self> = Arc::downgrade(self);
        let watched = socket.clone();
        tokio::spawn(async move {
            let reason = watched
                .wait_closed()
                .await;
            debug!("[ACCEPT] Connection {} left the registry: {}", id, reason);
            if let Some(inner) = weak.upgrade() {
                inner
                    .registry
                    .lock()
                    .sockets
                    .remove(&id);
            }
        });

        self.connections
            .publish(socket);
    }
}

/// Errors after which accepting again can succeed.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) || is_resource_exhaustion(e)
}

/// EMFILE / ENFILE / ENOBUFS: the listener is fine, the process is full.
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(23) | Some(24) | Some(105))
}

async fn accept_loop(
    inner: Arc<ListenerInner>,
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => {
                debug!("[ACCEPT] Accept loop stopped");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => inner.register(stream, addr),
                Err(e) if is_transient_accept_error(&e) => {
                    warn!("[ACCEPT] Accept failed: {}", e);
                    if is_resource_exhaustion(&e) {
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
                Err(e) => {
                    warn!("[ACCEPT] Listening socket unusable, stopping: {}", e);
                    {
                        let mut lifecycle = inner
                            .lifecycle
                            .lock();
                        if let Lifecycle::Running(addr) = *lifecycle {
                            *lifecycle = Lifecycle::Stopped(addr);
                        }
                    }
                    inner
                        .connections
                        .complete(None);
                    return;
                }
            }
        }
    }
}

/// Accepts connections from FreeSWITCH's `socket` dialplan application and
/// wraps each one in an [`OutboundSocket`].
///
/// ```rust,no_run
/// use freeswitch_esl_outbound::{EslError, OutboundListener};
///
/// # async fn example() -> Result<(), EslError> {
/// let listener = OutboundListener::new(8084);
/// listener.start().await?;
///
/// let mut connections = listener.connections();
/// while let Some(Ok(socket)) = connections.recv().await {
///     tokio::spawn(async move {
///         if let Ok(channel) = socket.connect().await {
///             println!("new call {:?}", channel.unique_id());
///         }
///     });
/// }
/// # Ok(())
/// # }
/// ```
pub struct OutboundListener {
    inner: Arc<ListenerInner>,
}

impl std::fmt::Debug for OutboundListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundListener")
            .field("lifecycle", &*self.inner.lifecycle.lock())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

impl OutboundListener {
    /// Listener on `0.0.0.0:port`. Nothing is bound until [`start()`](Self::start).
    pub fn new(port: u16) -> Self {
        Self::with_options(ListenerOptions {
            port,
            ..Default::default()
        })
    }

    pub fn with_options(options: ListenerOptions) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ListenerInner {
                options,
                lifecycle: Mutex::new(Lifecycle::Idle),
                registry: Mutex::new(Registry::default()),
                connections: Broadcast::new(),
                shutdown_tx,
                accept_task: Mutex::new(None),
            }),
        }
    }

    /// Bind and start accepting. Returns the bound address.
    ///
    /// Fails with [`EslError::AlreadyStarted`] on a second call and
    /// [`EslError::Disposed`] after [`dispose()`](Self::dispose).
    pub async fn start(&self) -> EslResult<SocketAddr> {
        {
            let mut lifecycle = self
                .inner
                .lifecycle
                .lock();
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Starting,
                Lifecycle::Disposed => return Err(EslError::Disposed),
                _ => return Err(EslError::AlreadyStarted),
            }
        }

        let bind_addr = SocketAddr::new(
            self.inner
                .options
                .bind_addr,
            self.inner
                .options
                .port,
        );
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                let mut lifecycle = self
                    .inner
                    .lifecycle
                    .lock();
                if *lifecycle == Lifecycle::Starting {
                    *lifecycle = Lifecycle::Idle;
                }
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;

        let shutdown_rx = self
            .inner
            .shutdown_tx
            .subscribe();

        {
            // dispose() either sees the stored task or makes us bail out here.
            let mut lifecycle = self
                .inner
                .lifecycle
                .lock();
            if *lifecycle == Lifecycle::Disposed {
                return Err(EslError::Disposed);
            }
            *lifecycle = Lifecycle::Running(local_addr);
            let task = tokio::spawn(accept_loop(self.inner.clone(), listener, shutdown_rx));
            *self
                .inner
                .accept_task
                .lock() = Some(task);
        }

        info!("[ACCEPT] Listening for outbound connections on {}", local_addr);
        Ok(local_addr)
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self
            .inner
            .lifecycle
            .lock()
        {
            Lifecycle::Running(addr) | Lifecycle::Stopped(addr) => Some(addr),
            _ => None,
        }
    }

    /// Bound port, once started. Reveals the ephemeral port when bound to 0.
    pub fn port(&self) -> Option<u16> {
        self.local_addr()
            .map(|addr| addr.port())
    }

    /// Subscribe to newly accepted sockets.
    ///
    /// Completes when the listener is disposed or its socket fails.
    pub fn connections(&self) -> Subscription<OutboundSocket> {
        self.inner
            .connections
            .subscribe()
    }

    /// Accepted sockets that have not closed yet.
    pub fn active_connections(&self) -> usize {
        self.inner
            .registry
            .lock()
            .sockets
            .len()
    }

    /// Stop accepting, close every tracked socket and complete
    /// [`connections()`](Self::connections). Idempotent.
    pub async fn dispose(&self) {
        {
            let mut lifecycle = self
                .inner
                .lifecycle
                .lock();
            if *lifecycle == Lifecycle::Disposed {
                return;
            }
            *lifecycle = Lifecycle::Disposed;
        }
        debug!("[ACCEPT] Disposing listener");

        self.inner
            .shutdown_tx
            .send_replace(true);
        let accept_task = self
            .inner
            .accept_task
            .lock()
            .take();
        if let Some(task) = accept_task {
            let _ = task.await;
        }

        let sockets: Vec<OutboundSocket> = {
            let mut registry = self
                .inner
                .registry
                .lock();
            registry.closed = true;
            registry
                .sockets
                .drain()
                .map(|(_, socket)| socket)
                .collect()
        };
        info!("[ACCEPT] Closing {} active connections", sockets.len());
        futures_util::future::join_all(
            sockets
                .iter()
                .map(|socket| socket.close()),
        )
        .await;

        self.inner
            .connections
            .complete(None);
    }
}

impl Drop for OutboundListener {
    fn drop(&mut self) {
        // Stop the accept loop; accepted sockets stay with their owners.
        self.inner
            .shutdown_tx
            .send_replace(true);
        self.inner
            .connections
            .complete(None);
    }
}
