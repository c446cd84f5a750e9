//! Utilities to work with raw WebSocket frames.

pub mod coding;

#[allow(clippy::module_inception)]
mod frame;
mod mask;

pub use self::frame::{CloseFrame, Frame, FrameHeader};
pub(crate) use self::mask::apply_mask;

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use log::*;

use self::coding::{Data, OpCode};
use crate::error::{CapacityError, Error, ProtocolError, Result};

/// Default cap on a single data frame payload: 100 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 << 20;

/// Control frames may never carry more than 125 payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Encoder/decoder for single WebSocket frames.
///
/// The codec itself is a plain configuration value; the byte buffers it
/// operates on are owned by the caller, so one codec can serve any number
/// of reads against the same connection buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    /// Upper bound on any single frame payload.
    max_frame_size: usize,
    /// Upper bound on control frame payloads, at most [`MAX_CONTROL_PAYLOAD`].
    max_control_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_control_frame_size: MAX_CONTROL_PAYLOAD,
        }
    }
}

impl FrameCodec {
    /// Create a codec with explicit limits.
    ///
    /// # Panics
    /// Panics if `max_control_frame_size` exceeds the RFC 6455 bound of
    /// 125 bytes.
    pub fn new(max_frame_size: usize, max_control_frame_size: usize) -> Self {
        assert!(
            max_control_frame_size <= MAX_CONTROL_PAYLOAD,
            "control frame payloads are capped at 125 bytes by RFC 6455"
        );
        FrameCodec { max_frame_size, max_control_frame_size }
    }

    /// The configured data frame cap.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// The configured control frame cap.
    pub fn max_control_frame_size(&self) -> usize {
        self.max_control_frame_size
    }

    /// Encode `frame` onto the end of `output`.
    ///
    /// Checks the frame against the configured size caps and, for text
    /// frames, UTF-8 validity, then emits the RFC 6455 wire layout with
    /// the minimal length form. The payload is masked iff the frame
    /// carries a masking key.
    pub fn encode(&self, frame: Frame, output: &mut Vec<u8>) -> Result<()> {
        let size = frame.payload().len();
        if size > self.max_frame_size {
            return Err(Error::Capacity(CapacityError::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            }));
        }
        if frame.header().opcode.is_control() && size > self.max_control_frame_size {
            return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
        }
        if frame.header().opcode == OpCode::Data(Data::Text) {
            std::str::from_utf8(frame.payload())?;
        }

        trace!("writing frame {frame}");
        output.reserve(frame.len());
        frame.format(output).expect("Bug: can't write to vector");
        Ok(())
    }

    /// Decode the earliest complete frame out of `buffer`.
    ///
    /// On success the frame's bytes are consumed from the buffer and the
    /// remainder stays in place. `Ok(None)` means more bytes are needed;
    /// decoding is idempotent over prefixes, so the caller can append and
    /// retry. The returned payload is already unmasked.
    pub fn decode(&self, buffer: &mut BytesMut) -> Result<Option<Frame>> {
        let (header, length) = {
            let mut cursor = Cursor::new(&buffer[..]);
            let Some((header, length)) = FrameHeader::parse(&mut cursor)? else {
                return Ok(None);
            };

            // Enforce limits from the header alone, before the payload
            // has necessarily arrived.
            if header.opcode.is_control() && length > self.max_control_frame_size as u64 {
                return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
            }
            if length > self.max_frame_size as u64 {
                return Err(Error::Capacity(CapacityError::FrameTooLarge {
                    size: length as usize,
                    max_size: self.max_frame_size,
                }));
            }

            let header_len = cursor.position() as usize;
            if ((buffer.len() - header_len) as u64) < length {
                return Ok(None);
            }
            buffer.advance(header_len);
            (header, length as usize)
        };

        let mut payload = buffer.split_to(length);
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        if header.is_final && header.opcode == OpCode::Data(Data::Text) {
            std::str::from_utf8(&payload)?;
        }

        let frame = Frame::from_payload(header, payload.freeze());
        trace!("received frame {frame}");
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::coding::{Control, Data, OpCode};
    use super::{CloseFrame, Frame, FrameCodec};
    use crate::error::{CapacityError, Error, ProtocolError};
    use bytes::{BufMut, BytesMut};

    fn decode_all(codec: &FrameCodec, raw: &[u8]) -> (Vec<Frame>, BytesMut) {
        let mut buffer = BytesMut::from(raw);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buffer).unwrap() {
            frames.push(frame);
        }
        (frames, buffer)
    }

    #[test]
    fn encode_masked_text() {
        let mut frame = Frame::message("Hello, WebSocket!", OpCode::Data(Data::Text), true);
        frame.set_random_mask();

        let mut out = Vec::new();
        FrameCodec::default().encode(frame, &mut out).unwrap();

        assert_eq!(out[0], 0x81);
        assert_eq!(out[1] & 0x80, 0x80);
        assert_eq!(out[1] & 0x7f, 17);
        assert_eq!(out.len(), 2 + 4 + 17);
    }

    #[test]
    fn encode_unmasked_binary() {
        let frame = Frame::message(vec![0x01, 0x02, 0x03, 0x04], OpCode::Data(Data::Binary), true);
        let mut out = Vec::new();
        FrameCodec::default().encode(frame, &mut out).unwrap();
        assert_eq!(out, [0x82, 0x04, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn encode_64k_binary_uses_eight_byte_length() {
        let payload = vec![0xabu8; 65536];
        let frame = Frame::message(payload, OpCode::Data(Data::Binary), true);
        let mut out = Vec::new();
        FrameCodec::default().encode(frame, &mut out).unwrap();

        assert_eq!(out[..10], [0x82, 0x7f, 0, 0, 0, 0, 0, 0x01, 0, 0]);
        assert_eq!(out.len(), 10 + 65536);
    }

    #[test]
    fn encode_rejects_oversized_frame() {
        let codec = FrameCodec::new(8, 8);
        let frame = Frame::message(vec![0u8; 9], OpCode::Data(Data::Binary), true);
        assert!(matches!(
            codec.encode(frame, &mut Vec::new()),
            Err(Error::Capacity(CapacityError::FrameTooLarge { size: 9, max_size: 8 }))
        ));
    }

    #[test]
    fn encode_rejects_oversized_control_frame() {
        let frame = Frame::ping(vec![0u8; 126]);
        assert!(matches!(
            FrameCodec::default().encode(frame, &mut Vec::new()),
            Err(Error::Protocol(ProtocolError::ControlFrameTooBig))
        ));
    }

    #[test]
    fn encode_rejects_invalid_text() {
        let frame = Frame::message(vec![0xff, 0xfe], OpCode::Data(Data::Text), true);
        assert!(matches!(
            FrameCodec::default().encode(frame, &mut Vec::new()),
            Err(Error::Utf8(_))
        ));
    }

    #[test]
    fn decode_masked_text() {
        let key = [0xaa, 0xbb, 0xcc, 0xdd];
        let mut raw = vec![0x81, 0x91];
        raw.extend_from_slice(&key);
        let mut masked = b"Hello, WebSocket!".to_vec();
        super::apply_mask(&mut masked, key);
        raw.extend_from_slice(&masked);

        let mut buffer = BytesMut::from(&raw[..]);
        let frame = FrameCodec::default().decode(&mut buffer).unwrap().unwrap();

        assert!(frame.header().is_final);
        assert_eq!(frame.header().opcode, OpCode::Data(Data::Text));
        assert!(frame.is_masked());
        assert_eq!(frame.payload(), b"Hello, WebSocket!");
        assert!(buffer.is_empty());
    }

    #[test]
    fn decode_rejects_reserved_opcode() {
        let mut buffer = BytesMut::from(&[0x8f, 0x00][..]);
        assert!(matches!(
            FrameCodec::default().decode(&mut buffer),
            Err(Error::Protocol(ProtocolError::InvalidOpcode(0xf)))
        ));
    }

    #[test]
    fn decode_rejects_oversized_control_frame() {
        // Ping with a 126-byte payload announced in the extended length.
        let mut buffer = BytesMut::from(&[0x89, 0x7e, 0x00, 0x7e][..]);
        assert!(matches!(
            FrameCodec::default().decode(&mut buffer),
            Err(Error::Protocol(ProtocolError::ControlFrameTooBig))
        ));
    }

    #[test]
    fn decode_enforces_frame_cap_before_payload_arrives() {
        let codec = FrameCodec::new(16, 16);
        // 17-byte binary frame, payload not present yet.
        let mut buffer = BytesMut::from(&[0x82, 0x11][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(Error::Capacity(CapacityError::FrameTooLarge { size: 17, max_size: 16 }))
        ));
    }

    #[test]
    fn decode_rejects_invalid_text() {
        let mut buffer = BytesMut::from(&[0x81, 0x02, 0xc3, 0x28][..]);
        assert!(matches!(FrameCodec::default().decode(&mut buffer), Err(Error::Utf8(_))));
    }

    #[test]
    fn decode_accepts_zero_payload() {
        let (frames, rest) = decode_all(&FrameCodec::default(), &[0x82, 0x00]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload().is_empty());
        assert!(rest.is_empty());
    }

    #[test]
    fn decode_accepts_non_minimal_length() {
        // Five bytes announced through the 16-bit form.
        let mut raw = vec![0x81, 0x7e, 0x00, 0x05];
        raw.extend_from_slice(b"Hello");
        let (frames, _) = decode_all(&FrameCodec::default(), &raw);
        assert_eq!(frames[0].payload(), b"Hello");

        // And through the 64-bit form.
        let mut raw = vec![0x81, 0x7f, 0, 0, 0, 0, 0, 0, 0, 5];
        raw.extend_from_slice(b"Hello");
        let (frames, _) = decode_all(&FrameCodec::default(), &raw);
        assert_eq!(frames[0].payload(), b"Hello");
    }

    #[test]
    fn decode_leaves_remainder_in_buffer() {
        let raw = [0x82, 0x03, 0x01, 0x02, 0x03, 0x99];
        let (frames, rest) = decode_all(&FrameCodec::default(), &raw);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), [0x01, 0x02, 0x03]);
        assert_eq!(&rest[..], [0x99]);
    }

    #[test]
    fn decode_is_prefix_monotone() {
        let key = [0x01, 0x02, 0x03, 0x04];
        let mut raw = vec![0x82, 0x85];
        raw.extend_from_slice(&key);
        let mut masked = vec![0x10, 0x20, 0x30, 0x40, 0x50];
        super::apply_mask(&mut masked, key);
        raw.extend_from_slice(&masked);

        let codec = FrameCodec::default();
        let mut buffer = BytesMut::new();
        for (i, byte) in raw.iter().enumerate() {
            buffer.put_u8(*byte);
            let decoded = codec.decode(&mut buffer).unwrap();
            if i + 1 < raw.len() {
                assert!(decoded.is_none(), "complete frame after {} of {} bytes", i + 1, raw.len());
            } else {
                let frame = decoded.unwrap();
                assert_eq!(frame.payload(), [0x10, 0x20, 0x30, 0x40, 0x50]);
            }
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn round_trip_preserves_rsv_bits() {
        let mut frame = Frame::message("Hello", OpCode::Data(Data::Text), true);
        frame.header_mut().rsv2 = true;
        frame.header_mut().mask = Some([0xaa, 0xbb, 0xcc, 0xdd]);

        let codec = FrameCodec::default();
        let mut wire = Vec::new();
        codec.encode(frame.clone(), &mut wire).unwrap();

        let mut buffer = BytesMut::from(&wire[..]);
        let decoded = codec.decode(&mut buffer).unwrap().unwrap();

        assert_eq!(decoded, frame);
    }

    #[test]
    fn control_frames_encode_and_decode() {
        let codec = FrameCodec::default();
        let mut wire = Vec::new();
        codec.encode(Frame::pong(vec![0x01]), &mut wire).unwrap();
        codec
            .encode(Frame::close(Some(CloseFrame { code: 1000.into(), reason: "ok".into() })), &mut wire)
            .unwrap();

        let (frames, _) = decode_all(&codec, &wire);
        assert_eq!(frames[0].header().opcode, OpCode::Control(Control::Pong));
        assert_eq!(frames[1].header().opcode, OpCode::Control(Control::Close));
        let close = frames[1].clone().into_close().unwrap().unwrap();
        assert_eq!(u16::from(close.code), 1000);
        assert_eq!(close.reason, "ok");
    }

    #[test]
    fn header_only_fragments_do_not_consume() {
        let codec = FrameCodec::default();
        let mut buffer = BytesMut::from(&[0x82][..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], [0x82]);
    }
}
