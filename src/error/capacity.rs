use thiserror::Error;

/// Indicates the specific type/cause of a capacity error.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum CapacityError {
    /// A single frame payload is bigger than the configured cap.
    #[error("frame too large: {size} > {max_size}")]
    FrameTooLarge {
        /// The payload size announced by the frame.
        size: usize,
        /// The configured maximum frame size.
        max_size: usize,
    },
    /// A reassembled message grew past the configured cap.
    #[error("message too long: {size} > {max_size}")]
    MessageTooLong {
        /// The size the message would have reached.
        size: usize,
        /// The configured maximum message size.
        max_size: usize,
    },
    /// The handshake response headers exceed the read cap.
    #[error("http header too long")]
    HeaderTooLong,
    /// Too many headers in the handshake response (see
    /// [`httparse::Error::TooManyHeaders`]).
    #[error("too many headers")]
    TooManyHeaders,
}
