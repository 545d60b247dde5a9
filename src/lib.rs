//! FreeSWITCH Event Socket (ESL) outbound mode for Rust
//!
//! In outbound mode FreeSWITCH connects to *your* application via the
//! [`socket`](https://developer.signalwire.com/freeswitch/FreeSWITCH-Explained/Modules/mod_event_socket_1048924/)
//! dialplan application. This crate provides the listening side: it accepts
//! those connections, frames the byte stream into messages, fans messages and
//! events out to any number of subscribers and performs the `connect`
//! handshake that yields the channel data.
//!
//! # Architecture
//!
//! - [`OutboundListener`] binds a port and publishes each accepted
//!   [`OutboundSocket`] on [`connections()`](OutboundListener::connections).
//! - [`OutboundSocket`] adds the `connect` handshake on top of an
//!   [`EslConnection`].
//! - [`EslConnection`] (Clone + Send) owns the socket. A background task
//!   feeds the [`EslParser`] and publishes on
//!   [`messages()`](EslConnection::messages) and
//!   [`events()`](EslConnection::events).
//!
//! Every subscription sees items in wire order and ends exactly once when
//! the connection closes. A clean hang-up ends it quietly; malformed input
//! ends it with a [`FramingError`].
//!
//! # Example
//!
//! ```rust,no_run
//! use freeswitch_esl_outbound::{EslError, OutboundListener};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let listener = OutboundListener::new(8040);
//!     listener.start().await?;
//!
//!     let mut connections = listener.connections();
//!     while let Some(Ok(socket)) = connections.recv().await {
//!         tokio::spawn(async move {
//!             let mut events = socket.events();
//!
//!             // First command must be connect: it returns the channel data.
//!             let channel = socket.connect().await?;
//!             println!(
//!                 "Channel {} is {:?}",
//!                 channel.channel_name().unwrap_or("?"),
//!                 channel.channel_state()
//!             );
//!
//!             socket.send_command("myevents").await?;
//!
//!             // Ends when the call hangs up and the switch closes the socket.
//!             while let Some(Ok(event)) = events.recv().await {
//!                 println!("{:?}", event.event_type());
//!             }
//!             Ok::<(), EslError>(())
//!         });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Configure FreeSWITCH to connect to your app:
//! ```xml
//! <action application="socket" data="127.0.0.1:8040 async full"/>
//! ```

#[macro_use]
mod macros;

pub mod channel;
pub mod connection;
pub mod error;
pub mod event;
pub mod headers;
pub mod listener;
pub mod outbound;

pub(crate) mod broadcast;
pub(crate) mod buffer;
pub(crate) mod command;
pub mod constants;
pub(crate) mod protocol;

pub use broadcast::Subscription;
pub use channel::{
    AnswerState, CallDirection, CallState, ChannelState, ParseAnswerStateError,
    ParseCallDirectionError, ParseCallStateError, ParseChannelStateError,
};
pub use command::{EslResponse, ReplyStatus};
pub use connection::{
    ConnectionOptions, ConnectionState, ConnectionStatus, DisconnectReason, EslConnection,
};
pub use constants::DEFAULT_OUTBOUND_PORT;
pub use error::{EslError, EslResult, FramingError};
pub use event::{EslEvent, EslEventType, EventFormat, ParseEventFormatError, ParseEventTypeError};
pub use headers::{EventHeader, ParseEventHeaderError};
pub use listener::{ListenerOptions, OutboundListener};
pub use outbound::{HandshakeState, OutboundSocket};
pub use protocol::{EslMessage, EslParser, Headers, MessageType};
