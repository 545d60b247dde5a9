//! Protocol constants and configuration defaults

/// Default port FreeSWITCH's `socket` dialplan application is usually pointed at
pub const DEFAULT_OUTBOUND_PORT: u16 = 8084;

/// Socket read chunk size (64KB) - standard TCP receive window
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Initial receive buffer allocation (64KB).
/// The buffer grows past this as needed; there is no upper bound.
pub const BUF_CHUNK: usize = 64 * 1024;

/// Protocol message terminators
pub const HEADER_TERMINATOR: &str = "\n\n";
pub const LINE_TERMINATOR: &str = "\n";

/// Content-Type header values
pub const CONTENT_TYPE_AUTH_REQUEST: &str = "auth/request";
pub const CONTENT_TYPE_COMMAND_REPLY: &str = "command/reply";
pub const CONTENT_TYPE_API_RESPONSE: &str = "api/response";
pub const CONTENT_TYPE_TEXT_EVENT_PLAIN: &str = "text/event-plain";
pub const CONTENT_TYPE_TEXT_EVENT_JSON: &str = "text/event-json";
pub const CONTENT_TYPE_DISCONNECT_NOTICE: &str = "text/disconnect-notice";

/// Protocol framing header names (envelope, not event payload).
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
/// Protocol framing header: body length.
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
/// Protocol framing header: command reply status.
pub const HEADER_REPLY_TEXT: &str = "Reply-Text";
/// Protocol framing header: disposition of a disconnect notice.
pub const HEADER_CONTENT_DISPOSITION: &str = "Content-Disposition";

/// Outbound handshake command
pub const CONNECT_COMMAND: &str = "connect";
