//! Command framing and reply handling

use crate::{
    constants::{HEADER_REPLY_TEXT, HEADER_TERMINATOR, LINE_TERMINATOR},
    error::{EslError, EslResult},
    protocol::Headers,
};

/// Frame raw command text for the wire.
///
/// Trailing line breaks are normalised to the single blank-line terminator.
/// A blank line inside the text would end the command early and smuggle the
/// remainder in as a second command, so it is rejected.
pub(crate) fn to_wire_format(raw: &str) -> EslResult<String> {
    let command = raw.trim_end_matches(|c| c == '\n' || c == '\r');

    if command
        .trim()
        .is_empty()
    {
        return Err(EslError::protocol_error("Command must not be empty"));
    }

    let blank_line = command
        .split(LINE_TERMINATOR)
        .any(|line| {
            line.trim_end_matches('\r')
                .is_empty()
        });
    if blank_line {
        return Err(EslError::protocol_error(
            "Command must not contain blank lines",
        ));
    }

    let mut wire = String::with_capacity(command.len() + HEADER_TERMINATOR.len());
    wire.push_str(command);
    wire.push_str(HEADER_TERMINATOR);
    Ok(wire)
}

/// Reply-Text classification per the ESL wire protocol.
///
/// FreeSWITCH commands return `+OK …` on success and `-ERR …` on failure.
/// A handful of commands (`getvar`) return the raw value with no prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplyStatus {
    /// Reply-Text starts with `+OK` or is absent/empty.
    Ok,
    /// Reply-Text starts with `-ERR`.
    Err,
    /// Reply-Text present but matches neither `+OK` nor `-ERR`.
    Other,
}

/// Reply to a command sent with
/// [`EslConnection::send_command`](crate::EslConnection::send_command) or
/// [`EslConnection::api`](crate::EslConnection::api).
///
/// Header values are percent-decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct EslResponse {
    headers: Headers,
    body: Option<String>,
    status: ReplyStatus,
}

impl EslResponse {
    /// `ReplyStatus` is derived from the `Reply-Text` header.
    pub fn new(headers: Headers, body: Option<String>) -> Self {
        let status = match headers
            .get(HEADER_REPLY_TEXT)
            .map(|s| s.as_str())
        {
            None | Some("") => ReplyStatus::Ok,
            Some(t) if t.starts_with("+OK") => ReplyStatus::Ok,
            Some(t) if t.starts_with("-ERR") => ReplyStatus::Err,
            Some(_) => ReplyStatus::Other,
        };

        Self {
            headers,
            body,
            status,
        }
    }

    /// `true` if Reply-Text is `+OK` or absent.
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Classification of the `Reply-Text` header.
    pub fn reply_status(&self) -> ReplyStatus {
        self.status
    }

    /// Response body (the `api/response` payload).
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Look up a response header by name.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .map(|s| s.as_str())
    }

    /// All response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Raw `Reply-Text` header value (e.g. `+OK`, `-ERR invalid command`).
    pub fn reply_text(&self) -> Option<&str> {
        self.header(HEADER_REPLY_TEXT)
    }

    /// Convert to result based on success status.
    pub fn into_result(self) -> EslResult<Self> {
        match self.status {
            ReplyStatus::Ok => Ok(self),
            ReplyStatus::Err => {
                let reply_text = self
                    .reply_text()
                    .unwrap_or("-ERR")
                    .to_string();
                Err(EslError::CommandFailed { reply_text })
            }
            ReplyStatus::Other => {
                let reply_text = self
                    .reply_text()
                    .unwrap_or("")
                    .to_string();
                Err(EslError::UnexpectedReply { reply_text })
            }
        }
    }
}
