//! ESL framing and message parsing
//!
//! [`EslParser`] turns an append-only byte stream into [`EslMessage`]s. It
//! does no I/O: the connection's receive loop feeds it with
//! [`add_data`](EslParser::add_data) and drains it with
//! [`parse_message`](EslParser::parse_message).

use crate::{
    buffer::EslBuffer,
    command::EslResponse,
    constants::{
        CONTENT_TYPE_API_RESPONSE, CONTENT_TYPE_AUTH_REQUEST, CONTENT_TYPE_COMMAND_REPLY,
        CONTENT_TYPE_DISCONNECT_NOTICE, CONTENT_TYPE_TEXT_EVENT_JSON,
        CONTENT_TYPE_TEXT_EVENT_PLAIN, HEADER_CONTENT_DISPOSITION, HEADER_CONTENT_LENGTH,
        HEADER_CONTENT_TYPE, HEADER_REPLY_TEXT, HEADER_TERMINATOR,
    },
    error::{EslError, EslResult},
    event::{EslEvent, EslEventType, EventFormat},
    headers::EventHeader,
};
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

/// Header name to value, in wire order.
pub type Headers = IndexMap<String, String>;

/// ESL message types, classified from the `Content-Type` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Authentication request from server
    AuthRequest,
    /// Command reply
    CommandReply,
    /// API response
    ApiResponse,
    /// Event notification
    Event,
    /// Disconnect notice
    Disconnect,
    /// Unknown message type
    Unknown(String),
}

impl MessageType {
    /// Parse message type from a Content-Type header value
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type {
            CONTENT_TYPE_AUTH_REQUEST => MessageType::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => MessageType::CommandReply,
            CONTENT_TYPE_API_RESPONSE => MessageType::ApiResponse,
            CONTENT_TYPE_TEXT_EVENT_PLAIN | CONTENT_TYPE_TEXT_EVENT_JSON => MessageType::Event,
            CONTENT_TYPE_DISCONNECT_NOTICE => MessageType::Disconnect,
            _ => MessageType::Unknown(content_type.to_string()),
        }
    }
}

/// One framed protocol unit: a header block plus an optional body.
///
/// Immutable once built. Header values are kept exactly as they were on the
/// wire; decoding is the job of [`EslEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EslMessage {
    message_type: MessageType,
    headers: Headers,
    body: Option<String>,
}

impl EslMessage {
    /// Create new message
    pub fn new(message_type: MessageType, headers: Headers, body: Option<String>) -> Self {
        Self {
            message_type,
            headers,
            body,
        }
    }

    /// Classification derived from `Content-Type`.
    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    /// Raw `Content-Type` header value.
    pub fn content_type(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_TYPE)
    }

    /// Look up a header by name (case-sensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(|s| s.as_str())
    }

    /// All headers, in the order they were received.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Body, present only when a non-zero `Content-Length` was sent.
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// `Reply-Text` header of command replies.
    pub fn reply_text(&self) -> Option<&str> {
        self.header(HEADER_REPLY_TEXT)
    }

    /// Whether this is a `text/disconnect-notice`.
    pub fn is_disconnect_notice(&self) -> bool {
        self.message_type == MessageType::Disconnect
    }

    /// `Content-Disposition` of a disconnect notice (`disconnect` or `linger`).
    pub fn content_disposition(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_DISPOSITION)
    }

    /// Convert to EslResponse
    pub fn into_response(self) -> EslResponse {
        let headers = self
            .headers
            .into_iter()
            .map(|(k, v)| (k, decode_value(&v)))
            .collect();
        EslResponse::new(headers, self.body)
    }
}

/// Parser state for handling incomplete messages
#[derive(Debug)]
enum ParseState {
    WaitingForHeaders,
    WaitingForBody {
        message_type: MessageType,
        headers: Headers,
        body_length: usize,
    },
}

/// ESL protocol parser
#[derive(Debug)]
pub struct EslParser {
    buffer: EslBuffer,
    state: ParseState,
}

impl EslParser {
    /// Create new parser
    pub fn new() -> Self {
        Self {
            buffer: EslBuffer::new(),
            state: ParseState::WaitingForHeaders,
        }
    }

    /// Add data to the parser buffer. Empty slices are a no-op.
    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer
            .extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed by a complete message.
    pub fn buffered_len(&self) -> usize {
        self.buffer
            .len()
    }

    /// Whether a message has started arriving but is not complete yet.
    ///
    /// Stray blank lines between messages do not count.
    pub fn has_partial_message(&self) -> bool {
        matches!(self.state, ParseState::WaitingForBody { .. }) || !self.buffer.is_blank()
    }

    /// Try to parse a complete message from the buffer
    pub fn parse_message(&mut self) -> EslResult<Option<EslMessage>> {
        loop {
            match &self.state {
                ParseState::WaitingForHeaders => {
                    let terminator = HEADER_TERMINATOR.as_bytes();

                    let Some(headers_data) = self
                        .buffer
                        .extract_until_pattern(terminator)
                    else {
                        return Ok(None);
                    };

                    let headers_str = String::from_utf8(headers_data)
                        .map_err(|_| EslError::protocol_error("Invalid UTF-8 in headers"))?;

                    // Blank lines between messages are keep-alive noise.
                    if headers_str
                        .trim()
                        .is_empty()
                    {
                        continue;
                    }

                    let headers = parse_header_block(&headers_str)?;

                    // Every ESL message carries Content-Type. Missing means
                    // protocol desync (e.g. from a corrupted Content-Length).
                    let content_type = headers
                        .get(HEADER_CONTENT_TYPE)
                        .ok_or_else(|| {
                            EslError::protocol_error(
                                "Missing Content-Type header, likely protocol desync",
                            )
                        })?;
                    let message_type = MessageType::from_content_type(&decode_value(content_type));

                    let body_length = match headers.get(HEADER_CONTENT_LENGTH) {
                        Some(length_str) => length_str
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| EslError::InvalidHeader {
                                header: format!("{}: {}", HEADER_CONTENT_LENGTH, length_str),
                            })?,
                        None => 0,
                    };

                    if body_length == 0 {
                        return Ok(Some(EslMessage::new(message_type, headers, None)));
                    }

                    self.state = ParseState::WaitingForBody {
                        message_type,
                        headers,
                        body_length,
                    };
                }
                ParseState::WaitingForBody { body_length, .. } => {
                    let Some(body_data) = self
                        .buffer
                        .extract_bytes(*body_length)
                    else {
                        return Ok(None);
                    };

                    let ParseState::WaitingForBody {
                        message_type,
                        headers,
                        ..
                    } = std::mem::replace(&mut self.state, ParseState::WaitingForHeaders)
                    else {
                        unreachable!("state checked above");
                    };

                    let body = String::from_utf8(body_data)
                        .map_err(|_| EslError::protocol_error("Invalid UTF-8 in body"))?;

                    return Ok(Some(EslMessage::new(message_type, headers, Some(body))));
                }
            }
        }
    }
}

impl Default for EslParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Percent-decode a header value, falling back to the raw text when the
/// escape sequences do not decode to UTF-8.
pub(crate) fn decode_value(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Parse `Name: value` lines. Lines may end in `\r\n`; blank lines are skipped.
pub(crate) fn parse_header_block(block: &str) -> EslResult<Headers> {
    let mut headers = Headers::new();

    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            return Err(EslError::InvalidHeader {
                header: line.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(EslError::InvalidHeader {
                header: line.to_string(),
            });
        }
        headers.insert(key.to_string(), value.trim().to_string());
    }

    Ok(headers)
}

/// Parse an event message into an [`EslEvent`], by its content type.
pub(crate) fn parse_event(message: EslMessage) -> EslResult<EslEvent> {
    if *message.message_type() != MessageType::Event {
        return Err(EslError::protocol_error(format!(
            "Not an event message: {:?}",
            message.message_type()
        )));
    }

    let format = message
        .content_type()
        .map(EventFormat::from_content_type)
        .unwrap_or(EventFormat::Plain);

    match format {
        EventFormat::Plain => parse_plain_event(message),
        EventFormat::Json => parse_json_event(message),
    }
}

/// Parse the reply to the outbound `connect` command into channel data.
///
/// When the reply carries a body, the body is the event header block. A
/// bodiless reply carries the channel variables in its own (percent-encoded)
/// headers, which is what FreeSWITCH's `switch_event_serialize()` produces.
pub(crate) fn parse_channel_data(message: EslMessage) -> EslResult<EslEvent> {
    if *message.message_type() != MessageType::CommandReply {
        return Err(EslError::protocol_error(format!(
            "Expected command/reply, got {:?}",
            message.message_type()
        )));
    }

    let (headers, body) = match message.body() {
        Some(body) => split_event_body(body)?,
        None => {
            let headers: Headers = message
                .headers()
                .iter()
                .map(|(k, v)| (k.clone(), decode_value(v)))
                .collect();
            (headers, None)
        }
    };

    build_event(message, headers, body)
}

/// Plain events are two-part: the outer envelope (Content-Length +
/// Content-Type) and a body of URL-encoded `key: value` lines. If the event
/// headers carry their own Content-Length, an inner body follows them.
fn parse_plain_event(message: EslMessage) -> EslResult<EslEvent> {
    let body = message
        .body()
        .ok_or_else(|| EslError::protocol_error("Plain event missing body"))?;
    let (headers, inner_body) = split_event_body(body)?;
    build_event(message, headers, inner_body)
}

fn split_event_body(body: &str) -> EslResult<(Headers, Option<String>)> {
    let (header_section, rest) = match body.find(HEADER_TERMINATOR) {
        Some(pos) => (&body[..pos], Some(&body[pos + HEADER_TERMINATOR.len()..])),
        None => (body, None),
    };

    let headers: Headers = parse_header_block(header_section)?
        .into_iter()
        .map(|(k, v)| {
            let decoded = decode_value(&v);
            (k, decoded)
        })
        .collect();

    let inner_body = rest
        .filter(|r| !r.is_empty())
        .map(|r| {
            let declared = headers
                .get(HEADER_CONTENT_LENGTH)
                .and_then(|n| {
                    n.trim()
                        .parse::<usize>()
                        .ok()
                });
            match declared.and_then(|n| r.get(..n)) {
                Some(exact) => exact.to_string(),
                None => r.to_string(),
            }
        });

    Ok((headers, inner_body))
}

/// JSON events are a flat object; `_body` holds the inner body.
fn parse_json_event(message: EslMessage) -> EslResult<EslEvent> {
    let body = message
        .body()
        .ok_or_else(|| EslError::protocol_error("JSON event missing body"))?;

    let json_value: serde_json::Value = serde_json::from_str(body)?;
    let obj = json_value
        .as_object()
        .ok_or_else(|| EslError::protocol_error("JSON event body is not an object"))?;

    let mut headers = Headers::new();
    let mut inner_body = None;
    for (key, value) in obj {
        let value_str = match value {
            serde_json::Value::String(s) => s.clone(),
            _ => value.to_string(),
        };
        if key == "_body" {
            inner_body = Some(value_str);
        } else {
            headers.insert(key.clone(), value_str);
        }
    }

    build_event(message, headers, inner_body)
}

fn build_event(
    message: EslMessage,
    headers: Headers,
    body: Option<String>,
) -> EslResult<EslEvent> {
    if headers.is_empty() {
        return Err(EslError::protocol_error("Event carries no headers"));
    }
    let event_type = headers
        .get(EventHeader::EventName.as_str())
        .and_then(|name| EslEventType::parse_event_type(name));
    Ok(EslEvent::from_parts(message, event_type, headers, body))
}
