//! Opcodes and close codes as they appear on the wire.

use std::fmt;

/// WebSocket message opcode.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpCode {
    /// Data (text or binary).
    Data(Data),
    /// Control message (close, ping, pong).
    Control(Control),
}

/// Data opcodes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Data {
    /// 0x0 denotes a continuation frame.
    Continue,
    /// 0x1 denotes a text frame.
    Text,
    /// 0x2 denotes a binary frame.
    Binary,
    /// 0x3-0x7 are reserved for further non-control frames.
    Reserved(u8),
}

/// Control opcodes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Control {
    /// 0x8 denotes a connection close.
    Close,
    /// 0x9 denotes a ping.
    Ping,
    /// 0xa denotes a pong.
    Pong,
    /// 0xb-0xf are reserved for further control frames.
    Reserved(u8),
}

impl OpCode {
    /// Whether this opcode names a control frame.
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Control(_))
    }

    /// Whether the opcode value is one of the reserved ranges (0x3-0x7,
    /// 0xb-0xf) that must be rejected on decode.
    pub fn is_reserved(self) -> bool {
        matches!(self, OpCode::Data(Data::Reserved(_)) | OpCode::Control(Control::Reserved(_)))
    }
}

impl From<OpCode> for u8 {
    fn from(code: OpCode) -> Self {
        match code {
            OpCode::Data(Data::Continue) => 0x0,
            OpCode::Data(Data::Text) => 0x1,
            OpCode::Data(Data::Binary) => 0x2,
            OpCode::Data(Data::Reserved(i)) => i,
            OpCode::Control(Control::Close) => 0x8,
            OpCode::Control(Control::Ping) => 0x9,
            OpCode::Control(Control::Pong) => 0xa,
            OpCode::Control(Control::Reserved(i)) => i,
        }
    }
}

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        match byte {
            0x0 => OpCode::Data(Data::Continue),
            0x1 => OpCode::Data(Data::Text),
            0x2 => OpCode::Data(Data::Binary),
            i @ 0x3..=0x7 => OpCode::Data(Data::Reserved(i)),
            0x8 => OpCode::Control(Control::Close),
            0x9 => OpCode::Control(Control::Ping),
            0xa => OpCode::Control(Control::Pong),
            i @ 0xb..=0xf => OpCode::Control(Control::Reserved(i)),
            _ => panic!("Bug: opcode nibble out of range: {byte}"),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Data::Continue => write!(f, "CONTINUE"),
            Data::Text => write!(f, "TEXT"),
            Data::Binary => write!(f, "BINARY"),
            Data::Reserved(i) => write!(f, "RESERVED_DATA_{i}"),
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Control::Close => write!(f, "CLOSE"),
            Control::Ping => write!(f, "PING"),
            Control::Pong => write!(f, "PONG"),
            Control::Reserved(i) => write!(f, "RESERVED_CONTROL_{i}"),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            OpCode::Data(d) => d.fmt(f),
            OpCode::Control(c) => c.fmt(f),
        }
    }
}

/// Status code of a close frame.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CloseCode {
    /// 1000 indicates a normal closure.
    Normal,
    /// 1001 indicates that an endpoint is "going away", such as a server
    /// going down or a browser navigating away from a page.
    Away,
    /// 1002 indicates termination due to a protocol error.
    Protocol,
    /// 1003 indicates termination because a type of data was received that
    /// the endpoint cannot accept.
    Unsupported,
    /// 1005 is a local-only sentinel meaning no status code was present.
    /// It must never appear on the wire.
    Status,
    /// 1006 is a local-only sentinel meaning the connection was closed
    /// abnormally. It must never appear on the wire.
    Abnormal,
    /// 1007 indicates termination because a message carried data
    /// inconsistent with its type (e.g. non-UTF-8 in a text message).
    Invalid,
    /// 1008 indicates termination because a message violated the
    /// endpoint's policy.
    Policy,
    /// 1009 indicates termination because a message was too big to
    /// process.
    Size,
    /// 1010 indicates the client is terminating because the server did not
    /// negotiate a required extension.
    Extension,
    /// 1011 indicates the server encountered an unexpected condition.
    Error,
    /// 1015 is a local-only sentinel for a failed TLS handshake. It must
    /// never appear on the wire.
    Tls,
    /// Reserved status codes 1004 and 1012-2999.
    Reserved(u16),
    /// 3000-3999, registered with IANA by libraries and frameworks.
    Iana(u16),
    /// 4000-4999, reserved for private use between applications.
    Library(u16),
    /// Everything outside the defined numbering space.
    Bad(u16),
}

impl CloseCode {
    /// Whether this code may be sent or received in a close frame.
    ///
    /// The allowed set is 1000-1003, 1007-1011 and 3000-4999. The
    /// sentinels 1005, 1006 and 1015 exist only locally.
    pub fn is_allowed(self) -> bool {
        matches!(u16::from(self), 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code) => code,
            CloseCode::Iana(code) => code,
            CloseCode::Library(code) => code,
            CloseCode::Bad(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1015 => CloseCode::Tls,
            1004 | 1012..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}
