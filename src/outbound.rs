//! Outbound mode: the switch connects to us and we issue `connect`.

use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex as SyncMutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionOptions, EslConnection},
    constants::CONNECT_COMMAND,
    error::{EslError, EslResult},
    event::EslEvent,
    protocol::{self, MessageType},
};

/// Progress of the `connect` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// `connect()` has not been called yet.
    NotConnected,
    /// `connect` sent, waiting for the reply.
    Connecting,
    /// Channel data received.
    Connected,
    /// Last attempt failed; `connect()` may be retried.
    Failed,
}

struct Handshake {
    /// Serialises concurrent `connect()` calls.
    lock: Mutex<()>,
    state: SyncMutex<HandshakeState>,
    channel_data: OnceLock<EslEvent>,
}

/// A connection accepted from the switch's `socket` application.
///
/// Derefs to [`EslConnection`] for `send`, `messages`, `events` and `close`.
///
/// ```rust,no_run
/// # async fn example(socket: freeswitch_esl_outbound::OutboundSocket) -> Result<(), freeswitch_esl_outbound::EslError> {
/// let channel = socket.connect().await?;
/// println!("call {:?} in {:?}", channel.unique_id(), channel.channel_state());
/// socket.send_command("myevents").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OutboundSocket {
    connection: EslConnection,
    handshake: Arc<Handshake>,
}

impl std::fmt::Debug for OutboundSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSocket")
            .field("connection", &self.connection)
            .field("handshake", &self.handshake_state())
            .finish()
    }
}

impl OutboundSocket {
    /// Wrap an accepted stream, starting its receive loop.
    pub fn new(stream: TcpStream) -> Self {
        Self::with_options(stream, ConnectionOptions::default())
    }

    pub fn with_options(stream: TcpStream, options: ConnectionOptions) -> Self {
        Self::from_connection(EslConnection::open_with_options(stream, options))
    }

    /// Wrap an already opened connection.
    pub fn from_connection(connection: EslConnection) -> Self {
        Self {
            connection,
            handshake: Arc::new(Handshake {
                lock: Mutex::new(()),
                state: SyncMutex::new(HandshakeState::NotConnected),
                channel_data: OnceLock::new(),
            }),
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &EslConnection {
        &self.connection
    }

    pub fn handshake_state(&self) -> HandshakeState {
        *self
            .handshake
            .state
            .lock()
    }

    /// Channel data from a successful handshake.
    pub fn channel_data(&self) -> Option<&EslEvent> {
        self.handshake
            .channel_data
            .get()
    }

    /// Send `connect` and return the channel data from its reply.
    ///
    /// After a success the cached channel data is returned without sending
    /// anything. After a failure the next call tries again. Fails with
    /// [`EslError::HandshakeFailed`] if the connection closes before the
    /// reply arrives or the reply cannot be read as channel data. There is no
    /// built-in timeout.
    pub async fn connect(&self) -> EslResult<EslEvent> {
        let _guard = self
            .handshake
            .lock
            .lock()
            .await;

        if let Some(channel_data) = self.channel_data() {
            return Ok(channel_data.clone());
        }

        self.set_state(HandshakeState::Connecting);
        debug!(
            "[CONNECT] Connection {} sending connect",
            self.connection
                .id()
        );

        match self
            .exchange_connect()
            .await
        {
            Ok(channel_data) => {
                let channel_data = self
                    .handshake
                    .channel_data
                    .get_or_init(|| channel_data)
                    .clone();
                self.set_state(HandshakeState::Connected);
                info!(
                    "[CONNECT] Connection {} established for channel {}",
                    self.connection
                        .id(),
                    channel_data
                        .unique_id()
                        .unwrap_or("<unknown>")
                );
                Ok(channel_data)
            }
            Err(e) => {
                self.set_state(HandshakeState::Failed);
                warn!(
                    "[CONNECT] Connection {} handshake failed: {}",
                    self.connection
                        .id(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn exchange_connect(&self) -> EslResult<EslEvent> {
        let reply = self
            .connection
            .request(CONNECT_COMMAND, MessageType::CommandReply)
            .await
            .map_err(|e| match e {
                EslError::NotConnected | EslError::ConnectionClosed => {
                    EslError::handshake_failed("connection closed before connect reply")
                }
                other => EslError::handshake_failed(other.to_string()),
            })?;

        if let Some(reply_text) = reply
            .reply_text()
            .map(protocol::decode_value)
            .filter(|t| t.starts_with("-ERR"))
        {
            return Err(EslError::handshake_failed(format!(
                "connect rejected: {}",
                reply_text
            )));
        }

        protocol::parse_channel_data(reply)
            .map_err(|e| EslError::handshake_failed(format!("unreadable connect reply: {}", e)))
    }

    fn set_state(&self, state: HandshakeState) {
        *self
            .handshake
            .state
            .lock() = state;
    }
}

impl Deref for OutboundSocket {
    type Target = EslConnection;

    fn deref(&self) -> &EslConnection {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn accepted_socket() -> (OutboundSocket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener
            .local_addr()
            .unwrap();
        let peer = TcpStream::connect(addr)
            .await
            .unwrap();
        let (stream, _) = listener
            .accept()
            .await
            .unwrap();
        (OutboundSocket::new(stream), peer)
    }

    async fn read_command(peer: &mut TcpStream) -> String {
        let mut received = Vec::new();
        let mut byte = [0u8; 1];
        while !received.ends_with(b"\n\n") {
            peer.read_exact(&mut byte)
                .await
                .unwrap();
            received.push(byte[0]);
        }
        String::from_utf8(received).unwrap()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (socket, _peer) = accepted_socket().await;
        assert_eq!(socket.handshake_state(), HandshakeState::NotConnected);
        assert!(socket
            .channel_data()
            .is_none());
        assert!(socket.is_open());
    }

    #[tokio::test]
    async fn test_rejected_connect_fails_handshake() {
        let (socket, mut peer) = accepted_socket().await;

        let handshake = tokio::spawn({
            let socket = socket.clone();
            async move {
                socket
                    .connect()
                    .await
            }
        });

        assert_eq!(read_command(&mut peer).await, "connect\n\n");
        peer.write_all(b"Content-Type: command/reply\nReply-Text: -ERR not allowed\n\n")
            .await
            .unwrap();

        let result = timeout(Duration::from_secs(5), handshake)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(EslError::HandshakeFailed { .. })));
        assert_eq!(socket.handshake_state(), HandshakeState::Failed);
        assert!(socket
            .channel_data()
            .is_none());
    }

    #[tokio::test]
    async fn test_connect_on_closed_socket_fails() {
        let (socket, _peer) = accepted_socket().await;
        socket
            .close()
            .await;

        let err = socket
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, EslError::HandshakeFailed { .. }));
        assert_eq!(socket.handshake_state(), HandshakeState::Failed);
    }
}
