//! WebSocket handshake machine.

use std::io::{self, Read, Write};

use bytes::Buf;
use log::*;

use crate::{
    buffer::ReadBuffer,
    error::{CapacityError, Error, ProtocolError, Result},
};

/// Upper bound on the buffered server response.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// A generic handshake state machine.
///
/// Runs one stage — writing a prepared request, then reading until a
/// parseable response — in resumable rounds so non-blocking transports
/// can drive it too.
#[derive(Debug)]
pub struct HandshakeMachine<Stream> {
    stream: Stream,
    state: HandshakeState,
}

impl<Stream> HandshakeMachine<Stream> {
    /// Start reading data from the peer.
    pub fn start_read(stream: Stream) -> Self {
        Self { stream, state: HandshakeState::Reading(ReadBuffer::new()) }
    }

    /// Start writing data to the peer.
    pub fn start_write<D: Into<Vec<u8>>>(stream: Stream, data: D) -> Self {
        Self { stream, state: HandshakeState::Writing { data: data.into(), written: 0 } }
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &Stream {
        &self.stream
    }

    /// Returns a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }
}

impl<Stream: Read + Write> HandshakeMachine<Stream> {
    /// Perform a single handshake round.
    pub fn single_round<Obj: TryParse>(mut self) -> Result<RoundResult<Obj, Stream>> {
        trace!("doing handshake round");
        match self.state {
            HandshakeState::Writing { data, mut written } => {
                match no_block(self.stream.write(&data[written..]))? {
                    Some(0) => Err(Error::Protocol(ProtocolError::HandshakeIncomplete)),
                    Some(count) => {
                        written += count;
                        Ok(RoundResult::Incomplete(HandshakeMachine {
                            state: if written == data.len() {
                                HandshakeState::Flushing
                            } else {
                                HandshakeState::Writing { data, written }
                            },
                            ..self
                        }))
                    }
                    None => Ok(RoundResult::WouldBlock(HandshakeMachine {
                        state: HandshakeState::Writing { data, written },
                        ..self
                    })),
                }
            }
            HandshakeState::Flushing => match no_block(self.stream.flush())? {
                Some(()) => Ok(RoundResult::StageFinished(StageResult::DoneWriting(self.stream))),
                None => Ok(RoundResult::WouldBlock(HandshakeMachine {
                    state: HandshakeState::Flushing,
                    ..self
                })),
            },
            HandshakeState::Reading(mut buf) => {
                match no_block(buf.read_from(&mut self.stream))? {
                    Some(0) => Err(Error::Protocol(ProtocolError::HandshakeIncomplete)),
                    Some(_) => {
                        if buf.len() > MAX_RESPONSE_BYTES {
                            return Err(Error::Capacity(CapacityError::HeaderTooLong));
                        }
                        Ok(if let Some((size, obj)) = Obj::try_parse(buf.chunk())? {
                            buf.advance(size);
                            RoundResult::StageFinished(StageResult::DoneReading {
                                result: obj,
                                stream: self.stream,
                                tail: buf.into_vec(),
                            })
                        } else {
                            RoundResult::Incomplete(HandshakeMachine {
                                state: HandshakeState::Reading(buf),
                                ..self
                            })
                        })
                    }
                    None => Ok(RoundResult::WouldBlock(HandshakeMachine {
                        state: HandshakeState::Reading(buf),
                        ..self
                    })),
                }
            }
        }
    }
}

/// The result of one round.
#[derive(Debug)]
pub enum RoundResult<Obj, Stream> {
    /// Round not done, I/O would block.
    WouldBlock(HandshakeMachine<Stream>),
    /// Round done, stage not finished yet.
    Incomplete(HandshakeMachine<Stream>),
    /// Stage complete.
    StageFinished(StageResult<Obj, Stream>),
}

/// The result of a finished stage.
#[derive(Debug)]
pub enum StageResult<Obj, Stream> {
    /// The response was read and parsed.
    #[allow(missing_docs)]
    DoneReading { result: Obj, stream: Stream, tail: Vec<u8> },
    /// The request was written out.
    DoneWriting(Stream),
}

/// An object parseable out of a byte prefix.
pub trait TryParse: Sized {
    /// Return `Ok(None)` if incomplete, `Err` on a syntax error.
    fn try_parse(data: &[u8]) -> Result<Option<(usize, Self)>>;
}

/// The handshake state.
#[derive(Debug)]
enum HandshakeState {
    /// Sending the prepared request to the peer.
    Writing { data: Vec<u8>, written: usize },
    /// Making sure the request left the write buffers.
    Flushing,
    /// Accumulating the peer's response.
    Reading(ReadBuffer<4096>),
}

/// Map `WouldBlock` to `None` so the machine can park instead of fail.
fn no_block<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}
