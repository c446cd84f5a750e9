//! Generic WebSocket message stream.

pub mod frame;

mod keepalive;
mod message;

pub use self::{
    frame::{CloseFrame, FrameCodec},
    message::Message,
};

use std::{
    io::{self, Read, Write},
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use log::*;

use self::{
    frame::{
        coding::{CloseCode, Control as OpCtl, Data as OpData, OpCode},
        Frame,
    },
    keepalive::{Keepalive, TickAction},
    message::{MessageKind, Reassembly},
};
use crate::error::{CapacityError, Error, ProtocolError, Result};

/// The configuration for a WebSocket connection.
///
/// # Example
/// ```
/// # use grommet::protocol::SessionConfig;
/// use std::time::Duration;
/// let config = SessionConfig::default()
///     .max_frame_size(16 << 20)
///     .ping_interval(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct SessionConfig {
    /// Upper bound on any single data frame payload. The default is
    /// 100 MiB.
    pub max_frame_size: usize,
    /// Upper bound on control frame payloads. Must not exceed 125, the
    /// RFC 6455 limit, which is also the default.
    pub max_control_frame_size: usize,
    /// How often to send a keepalive ping. The default is 30 seconds.
    pub ping_interval: Duration,
    /// How long the peer may stay silent before the connection is closed
    /// with status 1001. The default is 60 seconds.
    pub idle_timeout: Duration,
    /// Optional cap on a reassembled message. `None`, the default, means
    /// no limit beyond the per-frame cap.
    pub max_message_size: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_control_frame_size: frame::MAX_CONTROL_PAYLOAD,
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            max_message_size: None,
        }
    }
}

impl SessionConfig {
    /// Set [`Self::max_frame_size`].
    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set [`Self::max_control_frame_size`].
    pub fn max_control_frame_size(mut self, max_control_frame_size: usize) -> Self {
        self.max_control_frame_size = max_control_frame_size;
        self
    }

    /// Set [`Self::ping_interval`].
    pub fn ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    /// Set [`Self::idle_timeout`].
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set [`Self::max_message_size`].
    pub fn max_message_size(mut self, max_message_size: Option<usize>) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport exists. Nothing of a failed or not-yet-attempted
    /// connection survives.
    Disconnected,
    /// The transport is open and the opening handshake is in flight.
    Connecting,
    /// Data flows in both directions.
    Open,
    /// One side has initiated the closing handshake; only the reciprocal
    /// close and a best-effort drain remain.
    Closing,
    /// The session is finished. Terminal.
    Closed,
}

/// Internal close bookkeeping. The public view collapses the two closing
/// flavors into [`ConnectionState::Closing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    /// We sent the first close frame and wait for the peer's echo.
    ClosingByUs,
    /// The peer sent the first close frame; ours is queued as the reply.
    ClosingByPeer,
    Closed,
}

/// WebSocket connection over a byte stream.
///
/// This pairs the transport handle with the protocol [`Session`]. Use
/// [`read`](Self::read) and [`send_text`](Self::send_text)/
/// [`send_binary`](Self::send_binary) to exchange messages, or pull from
/// [`messages`](Self::messages).
#[derive(Debug)]
pub struct Connection<Stream> {
    /// The underlying socket.
    socket: Stream,
    /// The protocol state machine.
    session: Session,
}

impl<Stream> Connection<Stream> {
    /// Wrap an already upgraded socket without performing a handshake.
    pub fn from_raw_socket(socket: Stream, config: Option<SessionConfig>) -> Self {
        Connection { socket, session: Session::new(config) }
    }

    /// Like [`from_raw_socket`](Self::from_raw_socket), for a socket some
    /// frame bytes were already read from (e.g. the tail of the handshake
    /// response).
    pub fn from_partially_read(
        socket: Stream,
        part: Vec<u8>,
        config: Option<SessionConfig>,
    ) -> Self {
        Connection { socket, session: Session::from_partially_read(part, config) }
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &Stream {
        &self.socket
    }

    /// Returns a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut Stream {
        &mut self.socket
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Read the configuration.
    pub fn config(&self) -> &SessionConfig {
        self.session.config()
    }
}

impl<Stream: Read + Write> Connection<Stream> {
    /// Read the next complete message.
    ///
    /// Control frames are answered and absorbed along the way. When the
    /// transport signals `WouldBlock`/`TimedOut` — e.g. a socket with a
    /// read timeout, which is how keepalive is driven without a timer
    /// thread — a timer tick runs before the error is handed back, and
    /// the caller simply retries.
    pub fn read(&mut self) -> Result<Message> {
        match self.session.read_message(&mut self.socket) {
            Err(Error::Io(e)) if is_transient(&e) => {
                self.session.tick(&mut self.socket, Instant::now())?;
                Err(Error::Io(e))
            }
            other => other,
        }
    }

    /// Send a text message as a single masked frame.
    pub fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into()))
    }

    /// Send a binary message as a single masked frame.
    pub fn send_binary(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Message::Binary(data.into()))
    }

    /// Send a message.
    pub fn send(&mut self, message: Message) -> Result<()> {
        self.session.send_message(&mut self.socket, message)
    }

    /// Initiate the closing handshake. Repeated calls are no-ops.
    pub fn close(&mut self, close: Option<CloseFrame>) -> Result<()> {
        self.session.close(&mut self.socket, close)
    }

    /// Run keepalive against the given clock reading: ping when the ping
    /// interval elapsed, close 1001 when the peer has been silent past the
    /// idle timeout.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        self.session.tick(&mut self.socket, now)
    }

    /// Write out anything queued (close replies, pongs, partial frames).
    pub fn flush(&mut self) -> Result<()> {
        self.session.write_pending(&mut self.socket)
    }

    /// The message stream surface: an iterator over incoming messages.
    pub fn messages(&mut self) -> Messages<'_, Stream> {
        Messages { connection: self, done: false }
    }
}

/// Iterator over the messages of a connection.
///
/// Yields completed messages in arrival order, ending with either `None`
/// right after the peer's close was surfaced (clean shutdown) or exactly
/// one `Err` item (terminal failure). After that the iterator is fused.
#[derive(Debug)]
pub struct Messages<'a, Stream> {
    connection: &'a mut Connection<Stream>,
    done: bool,
}

impl<Stream: Read + Write> Iterator for Messages<'_, Stream> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.connection.read() {
                Ok(message) => return Some(Ok(message)),
                Err(Error::Io(e)) if is_transient(&e) => continue,
                Err(Error::ConnectionClosed) | Err(Error::AlreadyClosed) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// The protocol state machine of one connection.
///
/// Owns everything but the transport handle, which each call borrows:
/// the receive buffer, the fragment buffer, the pending-control slot and
/// the outgoing byte queue.
#[derive(Debug)]
pub struct Session {
    /// Frame-level limits.
    codec: FrameCodec,
    /// Bytes read off the transport, not yet decoded.
    in_buffer: BytesMut,
    /// Wire bytes queued for the transport.
    out_buffer: Vec<u8>,
    /// Close choreography state.
    state: SessionState,
    /// Receive-side fragment buffer.
    reassembly: Reassembly,
    /// One queued control reply (pong or close). A close outranks a
    /// queued pong; a newer pong replaces an older one.
    pending_control: Option<Frame>,
    /// Liveness clocks.
    keepalive: Keepalive,
    config: SessionConfig,
}

/// Read buffer chunk size.
const READ_CHUNK: usize = 4096;

impl Session {
    /// Create a session in the `Open` state.
    ///
    /// # Panics
    /// Panics if `max_control_frame_size` exceeds 125.
    pub fn new(config: Option<SessionConfig>) -> Self {
        Self::from_partially_read(Vec::new(), config)
    }

    /// Create a session whose receive buffer starts with `part`.
    pub fn from_partially_read(part: Vec<u8>, config: Option<SessionConfig>) -> Self {
        let config = config.unwrap_or_default();
        Session {
            codec: FrameCodec::new(config.max_frame_size, config.max_control_frame_size),
            in_buffer: BytesMut::from(&part[..]),
            out_buffer: Vec::new(),
            state: SessionState::Open,
            reassembly: Reassembly::Idle,
            pending_control: None,
            keepalive: Keepalive::new(config.ping_interval, config.idle_timeout, Instant::now()),
            config,
        }
    }

    /// Read the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The public view of the lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match self.state {
            SessionState::Open => ConnectionState::Open,
            SessionState::ClosingByUs | SessionState::ClosingByPeer => ConnectionState::Closing,
            SessionState::Closed => ConnectionState::Closed,
        }
    }

    /// Read the next message from the provided stream.
    ///
    /// Queued pong and close replies are written along the way. Protocol
    /// failures queue the matching outbound close (1002/1007/1009/1011)
    /// before the error surfaces.
    pub fn read_message<Stream>(&mut self, stream: &mut Stream) -> Result<Message>
    where
        Stream: Read + Write,
    {
        match self.read_message_impl(stream) {
            Err(e) => Err(self.on_read_error(stream, e)),
            ok => ok,
        }
    }

    fn read_message_impl<Stream>(&mut self, stream: &mut Stream) -> Result<Message>
    where
        Stream: Read + Write,
    {
        loop {
            match self.state {
                SessionState::Closed => return Err(Error::AlreadyClosed),
                SessionState::ClosingByPeer => {
                    // Our reply close is the last thing on the wire.
                    self.write_pending(stream)?;
                    self.state = SessionState::Closed;
                    debug!("close handshake finished, connection closed");
                    return Err(Error::ConnectionClosed);
                }
                SessionState::Open | SessionState::ClosingByUs => {}
            }

            // Since we may have just queued a pong or close, reply even
            // during read. A blocked write is retried on the next call.
            match self.write_pending(stream) {
                Err(Error::Io(e)) if is_transient(&e) => {}
                Err(e) => return Err(e),
                Ok(()) => {}
            }

            let frame = self.next_frame(stream)?;
            if let Some(message) = self.handle_frame(frame)? {
                trace!("received message {message}");
                return Ok(message);
            }
        }
    }

    /// Pull bytes until the receive buffer holds one whole frame.
    fn next_frame<Stream: Read>(&mut self, stream: &mut Stream) -> Result<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.in_buffer)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let count = stream.read(&mut chunk)?;
            if count == 0 {
                return Err(self.on_eof());
            }
            self.in_buffer.extend_from_slice(&chunk[..count]);
        }
    }

    /// The transport hit end-of-file.
    fn on_eof(&mut self) -> Error {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        match previous {
            // EOF after the close handshake started is the server
            // releasing the connection.
            SessionState::ClosingByUs | SessionState::ClosingByPeer => Error::ConnectionClosed,
            _ => Error::Protocol(ProtocolError::ResetWithoutClosingHandshake),
        }
    }

    /// Advance the state machine by one received frame.
    fn handle_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        self.keepalive.record_rx(Instant::now());

        let header = *frame.header();
        if header.rsv1 || header.rsv2 || header.rsv3 {
            // No extension was negotiated that could give these meaning.
            return Err(Error::Protocol(ProtocolError::NonZeroReservedBits));
        }
        if frame.is_masked() {
            return Err(Error::Protocol(ProtocolError::MaskedFrameFromServer));
        }

        match header.opcode {
            OpCode::Control(ctl) => {
                if !header.is_final {
                    return Err(Error::Protocol(ProtocolError::FragmentedControlFrame));
                }
                match ctl {
                    OpCtl::Close => self.handle_close(frame),
                    OpCtl::Ping => {
                        if self.state == SessionState::Open {
                            self.queue_control(Frame::pong(frame.into_payload()));
                        }
                        Ok(None)
                    }
                    OpCtl::Pong => Ok(None),
                    OpCtl::Reserved(i) => Err(Error::Protocol(ProtocolError::InvalidOpcode(i))),
                }
            }
            OpCode::Data(data) => {
                let fin = header.is_final;
                let limit = self.config.max_message_size;
                match data {
                    OpData::Continue => self.reassembly.extend(frame.into_payload(), fin, limit),
                    OpData::Text | OpData::Binary => {
                        let kind = if data == OpData::Text {
                            MessageKind::Text
                        } else {
                            MessageKind::Binary
                        };
                        if !self.reassembly.is_idle() {
                            Err(Error::Protocol(ProtocolError::ExpectedContinuation))
                        } else if fin {
                            Ok(Some(single_frame_message(kind, frame.into_payload(), limit)?))
                        } else {
                            self.reassembly.start(kind, frame.into_payload(), limit)?;
                            Ok(None)
                        }
                    }
                    OpData::Reserved(i) => Err(Error::Protocol(ProtocolError::InvalidOpcode(i))),
                }
            }
        }
    }

    /// Received a close frame.
    fn handle_close(&mut self, frame: Frame) -> Result<Option<Message>> {
        let close = frame.into_close()?;
        debug!("received close frame: {close:?}");
        match self.state {
            SessionState::Open => {
                // Echo the peer's code back and stop sending data.
                self.queue_control(Frame::close(close.clone()));
                self.state = SessionState::ClosingByPeer;
                Ok(Some(Message::Close(close)))
            }
            SessionState::ClosingByUs => {
                // The peer acknowledged our close.
                self.state = SessionState::Closed;
                Ok(Some(Message::Close(close)))
            }
            SessionState::ClosingByPeer | SessionState::Closed => Ok(None),
        }
    }

    /// Send a message as a single masked frame.
    pub fn send_message<Stream>(&mut self, stream: &mut Stream, message: Message) -> Result<()>
    where
        Stream: Read + Write,
    {
        match self.state {
            SessionState::Closed => return Err(Error::AlreadyClosed),
            SessionState::ClosingByUs | SessionState::ClosingByPeer => {
                return Err(Error::Protocol(ProtocolError::SendAfterClosing))
            }
            SessionState::Open => {}
        }

        let frame = match message {
            Message::Text(text) => Frame::message(Bytes::from(text), OpCode::Data(OpData::Text), true),
            Message::Binary(data) => Frame::message(data, OpCode::Data(OpData::Binary), true),
            Message::Close(close) => return self.close(stream, close),
        };
        self.buffer_frame(frame)?;
        self.write_pending(stream)
    }

    /// Initiate or complete our side of the closing handshake.
    ///
    /// Out-of-range codes are replaced with 1000 and the reason is cut on
    /// a character boundary to fit the control frame cap. Calling this in
    /// any closing or closed state is a no-op.
    pub fn close<Stream>(&mut self, stream: &mut Stream, close: Option<CloseFrame>) -> Result<()>
    where
        Stream: Read + Write,
    {
        match self.state {
            SessionState::Open => {
                let close = close.and_then(|frame| self.sanitize_close(frame));
                debug!("sending close frame: {close:?}");
                self.state = SessionState::ClosingByUs;
                self.buffer_frame(Frame::close(close))?;
                self.write_pending(stream)
            }
            _ => Ok(()),
        }
    }

    /// Clamp a caller-supplied close command to what may go on the wire.
    fn sanitize_close(&self, mut frame: CloseFrame) -> Option<CloseFrame> {
        if !frame.code.is_allowed() {
            frame.code = CloseCode::Normal;
        }
        let max_payload = self.codec.max_control_frame_size();
        if max_payload < 2 {
            return None;
        }
        frame.truncate_reason(max_payload);
        Some(frame)
    }

    /// Keepalive: answer the timer's demand for this instant.
    pub fn tick<Stream>(&mut self, stream: &mut Stream, now: Instant) -> Result<()>
    where
        Stream: Read + Write,
    {
        match self.state {
            SessionState::Open => match self.keepalive.tick(now) {
                TickAction::Wait => Ok(()),
                TickAction::Ping => {
                    trace!("keepalive ping");
                    self.queue_control(Frame::ping(Bytes::new()));
                    self.write_pending(stream)
                }
                TickAction::CloseIdle => {
                    debug!("idle timeout, closing");
                    self.close(
                        stream,
                        Some(CloseFrame { code: CloseCode::Away, reason: "timeout".into() }),
                    )
                }
            },
            SessionState::ClosingByUs | SessionState::ClosingByPeer => {
                // A peer that stays silent through a whole idle window
                // after the close started is not going to answer.
                if self.keepalive.tick(now) == TickAction::CloseIdle {
                    self.state = SessionState::Closed;
                }
                Ok(())
            }
            SessionState::Closed => Ok(()),
        }
    }

    /// Queue a control reply. A queued close is never displaced; a queued
    /// pong yields to anything newer.
    fn queue_control(&mut self, frame: Frame) {
        let replaceable = self
            .pending_control
            .as_ref()
            .map_or(true, |f| f.header().opcode == OpCode::Control(OpCtl::Pong));
        if replaceable {
            self.pending_control = Some(frame);
        }
    }

    /// Mask and encode a frame onto the outgoing byte queue, preceded by
    /// any queued control reply so queue order equals wire order.
    fn buffer_frame(&mut self, mut frame: Frame) -> Result<()> {
        if let Some(mut control) = self.pending_control.take() {
            control.set_random_mask();
            self.codec.encode(control, &mut self.out_buffer)?;
        }
        frame.set_random_mask();
        self.codec.encode(frame, &mut self.out_buffer)
    }

    /// Write queued control replies and buffered bytes out, then flush.
    ///
    /// A short write keeps the rest queued so a frame is never torn on
    /// the wire; `WouldBlock` surfaces to the caller for retry.
    pub fn write_pending<Stream: Write>(&mut self, stream: &mut Stream) -> Result<()> {
        if let Some(mut control) = self.pending_control.take() {
            control.set_random_mask();
            self.codec.encode(control, &mut self.out_buffer)?;
        }
        while !self.out_buffer.is_empty() {
            let count = stream.write(&self.out_buffer)?;
            if count == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset while sending",
                )
                .into());
            }
            self.out_buffer.drain(..count);
        }
        stream.flush()?;
        Ok(())
    }

    /// Record the consequences of a failed read.
    fn on_read_error<Stream>(&mut self, stream: &mut Stream, error: Error) -> Error
    where
        Stream: Read + Write,
    {
        match &error {
            Error::Io(e) if is_transient(e) => {}
            Error::Io(_) => self.state = SessionState::Closed,
            Error::ConnectionClosed | Error::AlreadyClosed => {}
            _ => {
                if self.state == SessionState::Open {
                    let code = failure_close_code(&error);
                    debug!("failing connection with {code}: {error}");
                    let _ = self.close(
                        stream,
                        Some(CloseFrame { code, reason: failure_reason(code).into() }),
                    );
                } else if self.state == SessionState::ClosingByUs {
                    self.state = SessionState::Closed;
                }
            }
        }
        error
    }
}

/// Build the deliverable for an unfragmented data frame.
fn single_frame_message(kind: MessageKind, payload: Bytes, limit: Option<usize>) -> Result<Message> {
    if let Some(max_size) = limit {
        if payload.len() > max_size {
            return Err(Error::Capacity(CapacityError::MessageTooLong {
                size: payload.len(),
                max_size,
            }));
        }
    }
    Ok(match kind {
        MessageKind::Text => {
            Message::Text(std::str::from_utf8(&payload)?.to_owned())
        }
        MessageKind::Binary => Message::Binary(payload),
    })
}

/// The close status that a failed read maps to.
fn failure_close_code(error: &Error) -> CloseCode {
    match error {
        Error::Utf8(_) => CloseCode::Invalid,
        Error::Capacity(_) => CloseCode::Size,
        Error::Protocol(_) => CloseCode::Protocol,
        _ => CloseCode::Error,
    }
}

fn failure_reason(code: CloseCode) -> &'static str {
    match code {
        CloseCode::Invalid => "invalid frame payload data",
        CloseCode::Size => "message too big",
        CloseCode::Protocol => "protocol error",
        _ => "internal error",
    }
}
