//! Error handling.

mod capacity;
mod protocol;
mod url;

pub use self::{capacity::CapacityError, protocol::ProtocolError, url::UrlError};

use std::{io, str};

use thiserror::Error;

/// Result type of all WebSocket library calls.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible WebSocket errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// WebSocket connection closed normally. This informs you of the
    /// lifecycle termination; it is not a failure.
    #[error("connection closed normally")]
    ConnectionClosed,
    /// Trying to read or write after the connection was finalized. This
    /// is a program error on the caller's side.
    #[error("trying to work with closed connection")]
    AlreadyClosed,
    /// Input-output error from the transport. Apart from `WouldBlock`,
    /// these are terminal.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// A size limit was exceeded.
    #[error("space limit exceeded: {0}")]
    Capacity(#[from] CapacityError),
    /// Peer violated the WebSocket protocol.
    #[error("websocket protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Payload advertised as text is not valid UTF-8.
    #[error("utf-8 encoding error: {0}")]
    Utf8(#[from] str::Utf8Error),
    /// Invalid URL.
    #[error("url error: {0}")]
    Url(#[from] UrlError),
    /// The server answered the upgrade request with something other than
    /// `101 Switching Protocols`.
    #[error("http error: the server responded with status code {0}")]
    Http(u16),
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Self {
        match err {
            httparse::Error::TooManyHeaders => Error::Capacity(CapacityError::TooManyHeaders),
            e => Error::Protocol(ProtocolError::Httparse(e)),
        }
    }
}
