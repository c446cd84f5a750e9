use std::{
    fmt,
    io::{Cursor, Read, Write},
};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use log::*;

use super::{
    coding::{CloseCode, Control, OpCode},
    mask::{apply_mask, generate_mask},
};
use crate::error::{Error, ProtocolError, Result};
#[cfg(test)]
use super::coding::Data;

/// The fixed part of a WebSocket frame: everything except the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Whether this is the last frame of a message.
    pub is_final: bool,
    /// First reserved bit.
    pub rsv1: bool,
    /// Second reserved bit.
    pub rsv2: bool,
    /// Third reserved bit.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present iff the frame is masked.
    pub mask: Option<[u8; 4]>,
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader {
            is_final: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode: OpCode::Control(Control::Close),
            mask: None,
        }
    }
}

impl FrameHeader {
    /// Parse a header from the cursor.
    ///
    /// Returns `Ok(None)` and rewinds the cursor when the input does not
    /// yet contain a whole header, so the caller can retry with more
    /// bytes. Reserved opcode values fail immediately.
    pub fn parse(cursor: &mut Cursor<impl AsRef<[u8]>>) -> Result<Option<(FrameHeader, u64)>> {
        let initial = cursor.position();
        match Self::parse_internal(cursor) {
            ret @ Ok(Some(_)) => ret,
            ret => {
                cursor.set_position(initial);
                ret
            }
        }
    }

    fn parse_internal(cursor: &mut impl Read) -> Result<Option<(FrameHeader, u64)>> {
        let mut head = [0u8; 2];
        if cursor.read(&mut head)? != 2 {
            return Ok(None);
        }
        let (first, second) = (head[0], head[1]);
        trace!("parsed headers {head:?}");

        let opcode = OpCode::from(first & 0x0f);
        if opcode.is_reserved() {
            return Err(Error::Protocol(ProtocolError::InvalidOpcode(first & 0x0f)));
        }

        let length = match second & 0x7f {
            126 => match cursor.read_u16::<NetworkEndian>() {
                Ok(len) => u64::from(len),
                Err(_) => return Ok(None),
            },
            127 => match cursor.read_u64::<NetworkEndian>() {
                Ok(len) => len,
                Err(_) => return Ok(None),
            },
            len => u64::from(len),
        };

        let mask = if second & 0x80 != 0 {
            let mut key = [0u8; 4];
            if cursor.read(&mut key)? != 4 {
                return Ok(None);
            }
            Some(key)
        } else {
            None
        };

        let header = FrameHeader {
            is_final: first & 0x80 != 0,
            rsv1: first & 0x40 != 0,
            rsv2: first & 0x20 != 0,
            rsv3: first & 0x10 != 0,
            opcode,
            mask,
        };
        Ok(Some((header, length)))
    }

    /// Write the header for a payload of `length` bytes.
    ///
    /// The minimal length encoding is always used.
    pub fn format(&self, length: u64, output: &mut impl Write) -> std::io::Result<()> {
        let code: u8 = self.opcode.into();
        let one = code
            | if self.is_final { 0x80 } else { 0 }
            | if self.rsv1 { 0x40 } else { 0 }
            | if self.rsv2 { 0x20 } else { 0 }
            | if self.rsv3 { 0x10 } else { 0 };

        let lenfmt = LengthFormat::for_length(length);
        let two = lenfmt.length_byte() | if self.mask.is_some() { 0x80 } else { 0 };

        output.write_all(&[one, two])?;
        match lenfmt {
            LengthFormat::U8(_) => {}
            LengthFormat::U16 => output.write_u16::<NetworkEndian>(length as u16)?,
            LengthFormat::U64 => output.write_u64::<NetworkEndian>(length)?,
        }
        if let Some(mask) = self.mask {
            output.write_all(&mask)?;
        }
        Ok(())
    }

    /// Wire size of this header for a payload of `length` bytes.
    pub fn len(&self, length: u64) -> usize {
        2 + LengthFormat::for_length(length).extra_bytes()
            + if self.mask.is_some() { 4 } else { 0 }
    }
}

/// Wire representation of a payload length.
#[derive(Debug, Clone, Copy)]
enum LengthFormat {
    U8(u8),
    U16,
    U64,
}

impl LengthFormat {
    fn for_length(length: u64) -> Self {
        match length {
            0..=125 => LengthFormat::U8(length as u8),
            126..=65535 => LengthFormat::U16,
            _ => LengthFormat::U64,
        }
    }

    fn length_byte(self) -> u8 {
        match self {
            LengthFormat::U8(len) => len,
            LengthFormat::U16 => 126,
            LengthFormat::U64 => 127,
        }
    }

    fn extra_bytes(self) -> usize {
        match self {
            LengthFormat::U8(_) => 0,
            LengthFormat::U16 => 2,
            LengthFormat::U64 => 8,
        }
    }
}

/// The close command carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The status code.
    pub code: CloseCode,
    /// A human-readable reason, possibly empty.
    pub reason: String,
}

impl CloseFrame {
    /// Shorten the reason so that code plus reason fit in `max_payload`
    /// bytes, cutting on a character boundary only.
    pub fn truncate_reason(&mut self, max_payload: usize) {
        let budget = max_payload.saturating_sub(2);
        if self.reason.len() > budget {
            let mut end = budget;
            while !self.reason.is_char_boundary(end) {
                end -= 1;
            }
            self.reason.truncate(end);
        }
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.code)
    }
}

/// A single WebSocket frame: header plus (unmasked) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    /// Wire size of the whole frame.
    #[inline]
    pub fn len(&self) -> usize {
        let length = self.payload.len() as u64;
        self.header.len(length) + self.payload.len()
    }

    /// The frame header.
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Mutable access to the header.
    #[inline]
    pub fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    /// A view of the payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether a masking key is set.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.header.mask.is_some()
    }

    /// Set a freshly generated random masking key.
    #[inline]
    pub fn set_random_mask(&mut self) {
        self.header.mask = Some(generate_mask());
    }

    /// Consume the frame into its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Assemble a frame from an already parsed header and an unmasked
    /// payload.
    pub fn from_payload(header: FrameHeader, payload: Bytes) -> Self {
        Frame { header, payload }
    }

    /// Interpret the frame as a close frame.
    ///
    /// An empty payload carries no status code. A one-byte payload and an
    /// out-of-range code are protocol errors, a non-UTF-8 reason is a
    /// payload error.
    pub fn into_close(self) -> Result<Option<CloseFrame>> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(Error::Protocol(ProtocolError::InvalidClosePayload)),
            _ => {
                let raw = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                let code = CloseCode::from(raw);
                if !code.is_allowed() {
                    return Err(Error::Protocol(ProtocolError::InvalidCloseCode(raw)));
                }
                let reason = std::str::from_utf8(&self.payload[2..])?.to_owned();
                Ok(Some(CloseFrame { code, reason }))
            }
        }
    }

    /// Create a data frame.
    #[inline]
    pub fn message(payload: impl Into<Bytes>, opcode: OpCode, is_final: bool) -> Frame {
        debug_assert!(matches!(opcode, OpCode::Data(_)), "invalid opcode for data frame");
        Frame {
            header: FrameHeader { is_final, opcode, ..FrameHeader::default() },
            payload: payload.into(),
        }
    }

    /// Create a ping frame.
    #[inline]
    pub fn ping(payload: impl Into<Bytes>) -> Frame {
        Frame {
            header: FrameHeader { opcode: OpCode::Control(Control::Ping), ..FrameHeader::default() },
            payload: payload.into(),
        }
    }

    /// Create a pong frame.
    #[inline]
    pub fn pong(payload: impl Into<Bytes>) -> Frame {
        Frame {
            header: FrameHeader { opcode: OpCode::Control(Control::Pong), ..FrameHeader::default() },
            payload: payload.into(),
        }
    }

    /// Create a close frame. `None` yields an empty payload (no code).
    pub fn close(msg: Option<CloseFrame>) -> Frame {
        let payload = if let Some(CloseFrame { code, reason }) = msg {
            let mut p = Vec::with_capacity(2 + reason.len());
            p.write_u16::<NetworkEndian>(code.into()).expect("Bug: can't write to vector");
            p.extend_from_slice(reason.as_bytes());
            Bytes::from(p)
        } else {
            Bytes::new()
        };
        Frame { header: FrameHeader::default(), payload }
    }

    /// Write the whole frame out, masking the payload when a key is set.
    pub fn format(self, output: &mut impl Write) -> std::io::Result<()> {
        self.header.format(self.payload.len() as u64, output)?;
        if let Some(mask) = self.header.mask {
            let mut masked = self.payload.to_vec();
            apply_mask(&mut masked, mask);
            output.write_all(&masked)
        } else {
            output.write_all(&self.payload)
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<FRAME fin={} rsv={}{}{} opcode={} masked={} payload_len={}>",
            self.header.is_final,
            u8::from(self.header.rsv1),
            u8::from(self.header.rsv2),
            u8::from(self.header.rsv3),
            self.header.opcode,
            self.is_masked(),
            self.payload.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_short_frame_header() {
        let raw = [0x82, 0x07, 0x01, 0x02, 0x03];
        let mut cursor = Cursor::new(&raw[..]);
        let (header, length) = FrameHeader::parse(&mut cursor).unwrap().unwrap();
        assert!(header.is_final);
        assert_eq!(header.opcode, OpCode::Data(Data::Binary));
        assert_eq!(header.mask, None);
        assert_eq!(length, 7);
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn parse_rewinds_on_incomplete_header() {
        // Extended 16-bit length announced but only one length byte given.
        let raw = [0x82, 0x7e, 0x01];
        let mut cursor = Cursor::new(&raw[..]);
        assert!(FrameHeader::parse(&mut cursor).unwrap().is_none());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn parse_rejects_reserved_opcode() {
        let raw = [0x8f, 0x00];
        let mut cursor = Cursor::new(&raw[..]);
        match FrameHeader::parse(&mut cursor) {
            Err(Error::Protocol(ProtocolError::InvalidOpcode(0xf))) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parse_masked_header() {
        let raw = [0x81, 0x91, 0xaa, 0xbb, 0xcc, 0xdd];
        let mut cursor = Cursor::new(&raw[..]);
        let (header, length) = FrameHeader::parse(&mut cursor).unwrap().unwrap();
        assert_eq!(header.opcode, OpCode::Data(Data::Text));
        assert_eq!(header.mask, Some([0xaa, 0xbb, 0xcc, 0xdd]));
        assert_eq!(length, 17);
    }

    #[test]
    fn format_minimal_length_forms() {
        let header = FrameHeader {
            opcode: OpCode::Data(Data::Binary),
            ..FrameHeader::default()
        };

        let mut out = Vec::new();
        header.format(4, &mut out).unwrap();
        assert_eq!(out, [0x82, 0x04]);

        out.clear();
        header.format(200, &mut out).unwrap();
        assert_eq!(out, [0x82, 0x7e, 0x00, 0xc8]);

        out.clear();
        header.format(65536, &mut out).unwrap();
        assert_eq!(out, [0x82, 0x7f, 0, 0, 0, 0, 0, 0x01, 0, 0]);
    }

    #[test]
    fn format_ping() {
        let frame = Frame::ping(vec![0x01, 0x02]);
        let mut out = Vec::with_capacity(frame.len());
        frame.format(&mut out).unwrap();
        assert_eq!(out, [0x89, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn close_frame_payload() {
        let frame = Frame::close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }));
        assert_eq!(frame.payload(), [0x03, 0xe8, b'b', b'y', b'e']);

        let parsed = frame.into_close().unwrap().unwrap();
        assert_eq!(parsed.code, CloseCode::Normal);
        assert_eq!(parsed.reason, "bye");
    }

    #[test]
    fn close_payload_of_one_byte_is_invalid() {
        let frame = Frame::from_payload(FrameHeader::default(), Bytes::from_static(&[0x03]));
        assert!(matches!(
            frame.into_close(),
            Err(Error::Protocol(ProtocolError::InvalidClosePayload))
        ));
    }

    #[test]
    fn close_code_out_of_range_is_invalid() {
        // 1005 must never appear on the wire.
        let frame = Frame::from_payload(FrameHeader::default(), Bytes::from_static(&[0x03, 0xed]));
        assert!(matches!(
            frame.into_close(),
            Err(Error::Protocol(ProtocolError::InvalidCloseCode(1005)))
        ));
    }

    #[test]
    fn close_reason_must_be_utf8() {
        let frame =
            Frame::from_payload(FrameHeader::default(), Bytes::from_static(&[0x03, 0xe8, 0xff]));
        assert!(matches!(frame.into_close(), Err(Error::Utf8(_))));
    }

    #[test]
    fn reason_truncation_respects_char_boundaries() {
        // "héllo" is six bytes: h, é (two bytes), l, l, o. A 4-byte
        // payload budget leaves two for the reason, which falls in the
        // middle of 'é', so the cut backs off to "h".
        let mut close = CloseFrame { code: CloseCode::Normal, reason: "héllo".into() };
        close.truncate_reason(4);
        assert_eq!(close.reason, "h");

        // A 5-byte budget ends exactly on the boundary after 'é'.
        let mut close = CloseFrame { code: CloseCode::Normal, reason: "héllo".into() };
        close.truncate_reason(5);
        assert_eq!(close.reason, "hé");

        let mut close = CloseFrame { code: CloseCode::Normal, reason: "hi".into() };
        close.truncate_reason(125);
        assert_eq!(close.reason, "hi");

        let mut close = CloseFrame { code: CloseCode::Normal, reason: "é".into() };
        close.truncate_reason(2);
        assert_eq!(close.reason, "");
    }
}
