use std::fmt;

use bytes::{Bytes, BytesMut};

use super::frame::CloseFrame;
use crate::error::{CapacityError, Error, ProtocolError, Result};

/// A complete WebSocket message as seen by the application.
///
/// Ping and pong frames never show up here; the session answers and
/// absorbs them on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message.
    Text(String),
    /// A binary message.
    Binary(Bytes),
    /// The close command received from the peer, surfaced once before the
    /// stream ends.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Indicates whether the message is text.
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Indicates whether the message is binary.
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Indicates whether the message is a close notification.
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(string) => string.len(),
            Message::Binary(data) => data.len(),
            Message::Close(frame) => frame.as_ref().map_or(0, |f| 2 + f.reason.len()),
        }
    }

    /// Whether the message carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the message into its raw bytes.
    pub fn into_data(self) -> Bytes {
        match self {
            Message::Text(string) => string.into(),
            Message::Binary(data) => data,
            Message::Close(None) => Bytes::new(),
            Message::Close(Some(frame)) => frame.reason.into(),
        }
    }
}

impl From<String> for Message {
    fn from(string: String) -> Self {
        Message::Text(string)
    }
}

impl<'a> From<&'a str> for Message {
    fn from(string: &'a str) -> Self {
        Message::Text(string.into())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data.into())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Text(string) => write!(f, "{string}"),
            Message::Binary(data) => write!(f, "Binary Data<length={}>", data.len()),
            Message::Close(Some(frame)) => write!(f, "Close<{frame}>"),
            Message::Close(None) => write!(f, "Close"),
        }
    }
}

/// The kind of message a fragment sequence started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageKind {
    Text,
    Binary,
}

/// Receive-side fragment buffer.
///
/// Text is validated incrementally: a watermark tracks how far the
/// accumulated bytes are known-good UTF-8, so a multibyte codepoint may
/// legally straddle fragment boundaries while a hard error fails at the
/// earliest fragment that carries it.
#[derive(Debug)]
pub(crate) enum Reassembly {
    /// Between messages.
    Idle,
    /// Mid-message; the initial opcode never changes within this state.
    Collecting { kind: MessageKind, buf: BytesMut, utf8_valid_to: usize },
}

impl Reassembly {
    /// Begin collecting a fragmented message of the given kind.
    ///
    /// Starting a new message while one is in progress is the peer
    /// interleaving data frames, which the protocol forbids.
    pub(crate) fn start(
        &mut self,
        kind: MessageKind,
        first: Bytes,
        limit: Option<usize>,
    ) -> Result<()> {
        match self {
            Reassembly::Idle => {
                let mut buf = BytesMut::new();
                let mut utf8_valid_to = 0;
                append_checked(&mut buf, &first, limit)?;
                if kind == MessageKind::Text {
                    advance_watermark(&buf, &mut utf8_valid_to, false)?;
                }
                *self = Reassembly::Collecting { kind, buf, utf8_valid_to };
                Ok(())
            }
            Reassembly::Collecting { .. } => {
                Err(Error::Protocol(ProtocolError::ExpectedContinuation))
            }
        }
    }

    /// Append a continuation fragment; on `fin` the assembled message is
    /// returned and the buffer goes back to `Idle`.
    pub(crate) fn extend(
        &mut self,
        chunk: Bytes,
        fin: bool,
        limit: Option<usize>,
    ) -> Result<Option<Message>> {
        match self {
            Reassembly::Idle => Err(Error::Protocol(ProtocolError::UnexpectedContinuation)),
            Reassembly::Collecting { kind, buf, utf8_valid_to } => {
                append_checked(buf, &chunk, limit)?;
                if *kind == MessageKind::Text {
                    advance_watermark(buf, utf8_valid_to, fin)?;
                }
                if !fin {
                    return Ok(None);
                }

                let kind = *kind;
                let data = std::mem::take(buf);
                debug_assert!(kind != MessageKind::Text || *utf8_valid_to == data.len());
                *self = Reassembly::Idle;

                Ok(Some(match kind {
                    // SAFETY: the watermark covered the whole buffer above.
                    MessageKind::Text => Message::Text(unsafe {
                        String::from_utf8_unchecked(data.to_vec())
                    }),
                    MessageKind::Binary => Message::Binary(data.freeze()),
                }))
            }
        }
    }

    /// Whether no message is in progress.
    pub(crate) fn is_idle(&self) -> bool {
        matches!(self, Reassembly::Idle)
    }
}

/// Grow the buffer, refusing to exceed `limit` without overflowing.
fn append_checked(buf: &mut BytesMut, chunk: &[u8], limit: Option<usize>) -> Result<()> {
    let max_size = limit.unwrap_or(usize::MAX);
    if buf.len() > max_size || chunk.len() > max_size - buf.len() {
        return Err(Error::Capacity(CapacityError::MessageTooLong {
            size: buf.len().saturating_add(chunk.len()),
            max_size,
        }));
    }
    buf.extend_from_slice(chunk);
    Ok(())
}

/// Validate the unvalidated suffix of `buf`.
///
/// A trailing partial codepoint is fine mid-message and fatal on the
/// final fragment; anything `error_len` pins down is fatal right away.
fn advance_watermark(buf: &BytesMut, valid_to: &mut usize, fin: bool) -> Result<()> {
    match std::str::from_utf8(&buf[*valid_to..]) {
        Ok(_) => {
            *valid_to = buf.len();
            Ok(())
        }
        Err(e) if e.error_len().is_none() && !fin => {
            *valid_to += e.valid_up_to();
            Ok(())
        }
        Err(e) => Err(Error::Utf8(e)),
    }
}
