use thiserror::Error;

/// Indicates the specific type/cause of a protocol error.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Encountered an opcode from one of the reserved ranges.
    #[error("encountered invalid opcode: {0}")]
    InvalidOpcode(u8),
    /// Control frames must have a payload of 125 bytes or less.
    #[error("control frame too big (payload must be 125 bytes or less)")]
    ControlFrameTooBig,
    /// Control frames must not be fragmented.
    #[error("fragmented control frame")]
    FragmentedControlFrame,
    /// Reserved bits in the frame header are non-zero while no extension
    /// was negotiated.
    #[error("reserved bits are non-zero")]
    NonZeroReservedBits,
    /// The client must close the connection when it receives a masked
    /// frame.
    #[error("received a masked frame from the server")]
    MaskedFrameFromServer,
    /// Received a continuation frame with no message in progress.
    #[error("continuation frame but nothing to continue")]
    UnexpectedContinuation,
    /// Received a new data frame while a fragmented message was still in
    /// progress.
    #[error("received a data frame while waiting for more fragments")]
    ExpectedContinuation,
    /// The close frame carried a status code outside the allowed set.
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),
    /// The close frame payload was a single byte, which cannot hold a
    /// status code.
    #[error("invalid close sequence")]
    InvalidClosePayload,
    /// Not allowed to send after having started the closing handshake.
    #[error("sending after closing is not allowed")]
    SendAfterClosing,
    /// Connection closed without performing the closing handshake.
    #[error("connection reset without closing handshake")]
    ResetWithoutClosingHandshake,
    /// No more data while the opening handshake was still in progress.
    #[error("handshake not finished")]
    HandshakeIncomplete,
    /// The server's response lacks an acceptable `Upgrade: websocket`
    /// header.
    #[error("no \"Upgrade: websocket\" in server reply")]
    MissingUpgradeHeader,
    /// The server's response lacks a `Connection` header containing the
    /// `upgrade` token.
    #[error("no \"Connection: upgrade\" in server reply")]
    MissingConnectionHeader,
    /// The `Sec-WebSocket-Accept` header is absent or does not match the
    /// key sent in the request.
    #[error("key mismatch in \"Sec-WebSocket-Accept\" header")]
    AcceptKeyMismatch,
    /// Wrong HTTP version used (the WebSocket protocol requires 1.1 or
    /// higher).
    #[error("http version must be 1.1 or higher")]
    WrongHttpVersion,
    /// Wrapper around a [`httparse::Error`] value.
    #[error("httparse error: {0}")]
    Httparse(httparse::Error),
}
