//! Frame header decoding and frame encoding.
//!
//! The [`Decoder`] validates the header of inbound frames against RFC 6455, including the
//! ordering rules between fragments of a message. The [`Encoder`] serializes an outbound frame,
//! header and payload, into one contiguous buffer.

use bytes::BytesMut;
use tokio_util::codec;

use crate::{
    frame::{FrameHeader, OpCode, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE},
    Result, WebSocketError,
};

/// A decoder for inbound frame headers.
///
/// The decoder remembers whether the last data frame it decoded was final, which is what
/// decides if the next data frame must be a continuation or must start a new message.
#[derive(Debug, Default)]
pub struct Decoder {
    /// A fragmented message is waiting for its final frame.
    message_open: bool,
}

impl Decoder {
    /// Creates a decoder positioned between messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a fragmented message is waiting for more frames.
    pub fn is_message_open(&self) -> bool {
        self.message_open
    }

    /// Decodes the frame header at the start of `src`.
    ///
    /// # Returns
    /// - `Ok(Some((header, size)))` with the header and the number of bytes it takes.
    /// - `Ok(None)` if `src` doesn't hold the whole header yet.
    /// - `Err(WebSocketError)` if the header violates the protocol.
    pub fn decode(&mut self, src: &[u8]) -> Result<Option<(FrameHeader, usize)>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let header_size = FrameHeader::required_len(src[1]);
        if src.len() < header_size {
            return Ok(None);
        }

        let fin = src[0] & 0b10000000 != 0;
        let rsv1 = src[0] & 0b01000000 != 0;

        // Check reserved bits
        if src[0] & 0b00110000 != 0 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }

        let opcode = OpCode::try_from(src[0] & 0b00001111)?;

        // RSV1 flags the first frame of a compressed message only
        if rsv1 && !opcode.is_data() {
            return Err(WebSocketError::ReservedBitsNotZero);
        }

        if src[1] & 0b10000000 == 0 {
            return Err(WebSocketError::UnmaskedFrame);
        }

        let (payload_len, mask_at) = match src[1] & 0x7F {
            126 => (u64::from(u16::from_be_bytes([src[2], src[3]])), 4),
            127 => {
                let mut len = [0; 8];
                len.copy_from_slice(&src[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            code => (u64::from(code), 2),
        };

        if payload_len & (1 << 63) != 0 {
            return Err(WebSocketError::InvalidPayloadLength);
        }

        let mut mask = [0; 4];
        mask.copy_from_slice(&src[mask_at..mask_at + 4]);

        match opcode {
            OpCode::Close | OpCode::Ping | OpCode::Pong => {
                if !fin {
                    return Err(WebSocketError::ControlFrameFragmented);
                }
                if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                    return Err(WebSocketError::ControlFrameTooLarge);
                }
            }
            OpCode::Continuation => {
                if !self.message_open {
                    return Err(WebSocketError::InvalidContinuationFrame);
                }
                self.message_open = !fin;
            }
            OpCode::Text | OpCode::Binary => {
                if self.message_open {
                    return Err(WebSocketError::InvalidFragment);
                }
                self.message_open = !fin;
            }
        }

        let header = FrameHeader {
            fin,
            compressed: rsv1,
            opcode,
            payload_len,
            mask,
        };

        Ok(Some((header, header_size)))
    }
}

/// An outbound frame borrowing its payload.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingFrame<'a> {
    /// Final fragment flag.
    pub fin: bool,
    /// The frame opcode.
    pub opcode: OpCode,
    /// Sets RSV1. Ignored unless the frame starts a data message.
    pub compressed: bool,
    /// Frame payload, sent unmasked.
    pub payload: &'a [u8],
}

impl<'a> OutgoingFrame<'a> {
    /// A single-frame control message.
    pub fn control(opcode: OpCode, payload: &'a [u8]) -> Self {
        Self {
            fin: true,
            opcode,
            compressed: false,
            payload,
        }
    }
}

/// WebSocket frame encoder.
///
/// Formats the header of an [`OutgoingFrame`] and appends its payload to the destination
/// buffer, so that the frame can be written with a single call.
#[derive(Debug, Default)]
pub struct Encoder;

impl<'a> codec::Encoder<OutgoingFrame<'a>> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: OutgoingFrame<'a>, dst: &mut BytesMut) -> Result<()> {
        let compressed = frame.compressed && frame.opcode.is_data();
        let header = FrameHeader::new(frame.fin, frame.opcode, compressed, frame.payload.len());

        let mut head = [0; MAX_HEAD_SIZE];
        let size = header.fmt_head(&mut head[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);
        dst.extend_from_slice(frame.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::codec::Encoder as _;

    use super::*;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn masked(first: u8, len: u8, extra: &[u8]) -> Vec<u8> {
        let mut bytes = vec![first, 0x80 | len];
        bytes.extend_from_slice(extra);
        bytes.extend_from_slice(&MASK);
        bytes
    }

    #[test]
    fn test_decode_needs_more_bytes() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode(&[]).unwrap().is_none());
        assert!(decoder.decode(&[0x81]).unwrap().is_none());
        assert!(decoder.decode(&[0x81, 0x85, 0x37]).unwrap().is_none());
        assert!(decoder.decode(&[0x82, 0xfe, 0x01]).unwrap().is_none());
    }

    #[test]
    fn test_decode_text_frame() {
        let mut decoder = Decoder::new();
        let (header, size) = decoder.decode(&masked(0x81, 5, &[])).unwrap().unwrap();

        assert_eq!(size, 6);
        assert!(header.fin);
        assert!(!header.compressed);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.mask, MASK);
    }

    #[test]
    fn test_decode_extended_lengths() {
        let mut decoder = Decoder::new();
        let (header, size) = decoder
            .decode(&masked(0x82, 126, &[0x01, 0x00]))
            .unwrap()
            .unwrap();
        assert_eq!(size, 8);
        assert_eq!(header.payload_len, 256);

        let (header, size) = decoder
            .decode(&masked(0x82, 127, &[0, 0, 0, 0, 0, 1, 0, 0]))
            .unwrap()
            .unwrap();
        assert_eq!(size, 14);
        assert_eq!(header.payload_len, 65536);
    }

    #[test]
    fn test_decode_rejects_length_msb() {
        let mut decoder = Decoder::new();
        let res = decoder.decode(&masked(0x82, 127, &[0x80, 0, 0, 0, 0, 0, 0, 0]));
        assert!(matches!(res, Err(WebSocketError::InvalidPayloadLength)));
    }

    #[test]
    fn test_decode_reserved_bits() {
        let mut decoder = Decoder::new();
        for first in [0x91u8, 0xa1, 0xb1] {
            let res = decoder.decode(&masked(first, 0, &[]));
            assert!(matches!(res, Err(WebSocketError::ReservedBitsNotZero)));
        }
    }

    #[test]
    fn test_decode_rsv1() {
        let mut decoder = Decoder::new();
        let (header, _) = decoder.decode(&masked(0x41, 1, &[])).unwrap().unwrap();
        assert!(header.compressed);

        // not allowed on a continuation
        let res = decoder.decode(&masked(0xc0, 1, &[]));
        assert!(matches!(res, Err(WebSocketError::ReservedBitsNotZero)));

        // nor on a control frame
        let mut decoder = Decoder::new();
        let res = decoder.decode(&masked(0xc9, 0, &[]));
        assert!(matches!(res, Err(WebSocketError::ReservedBitsNotZero)));
    }

    #[test]
    fn test_decode_unmasked() {
        let mut decoder = Decoder::new();
        let res = decoder.decode(&[0x81, 0x05]);
        assert!(matches!(res, Err(WebSocketError::UnmaskedFrame)));
    }

    #[test]
    fn test_decode_invalid_opcode() {
        let mut decoder = Decoder::new();
        let res = decoder.decode(&masked(0x83, 0, &[]));
        assert!(matches!(res, Err(WebSocketError::InvalidOpCode(3))));
    }

    #[test]
    fn test_decode_control_frames() {
        let mut decoder = Decoder::new();
        let res = decoder.decode(&masked(0x09, 0, &[]));
        assert!(matches!(res, Err(WebSocketError::ControlFrameFragmented)));

        let res = decoder.decode(&masked(0x89, 126, &[0x00, 0x7e]));
        assert!(matches!(res, Err(WebSocketError::ControlFrameTooLarge)));

        let (header, _) = decoder.decode(&masked(0x88, 125, &[])).unwrap().unwrap();
        assert_eq!(header.opcode, OpCode::Close);
    }

    #[test]
    fn test_decode_fragment_ordering() {
        let mut decoder = Decoder::new();

        let res = decoder.decode(&masked(0x80, 0, &[]));
        assert!(matches!(res, Err(WebSocketError::InvalidContinuationFrame)));

        decoder.decode(&masked(0x01, 3, &[])).unwrap().unwrap();
        assert!(decoder.is_message_open());

        let res = decoder.decode(&masked(0x82, 0, &[]));
        assert!(matches!(res, Err(WebSocketError::InvalidFragment)));

        // control frames may be interleaved
        decoder.decode(&masked(0x89, 0, &[])).unwrap().unwrap();
        assert!(decoder.is_message_open());

        decoder.decode(&masked(0x00, 3, &[])).unwrap().unwrap();
        decoder.decode(&masked(0x80, 3, &[])).unwrap().unwrap();
        assert!(!decoder.is_message_open());

        decoder.decode(&masked(0x82, 0, &[])).unwrap().unwrap();
    }

    #[test]
    fn test_encode_frame() {
        let mut encoder = Encoder;
        let mut dst = BytesMut::new();

        encoder
            .encode(
                OutgoingFrame {
                    fin: true,
                    opcode: OpCode::Text,
                    compressed: true,
                    payload: b"abc",
                },
                &mut dst,
            )
            .unwrap();
        assert_eq!(&dst[..], &[0xc1, 0x03, b'a', b'b', b'c']);

        dst.clear();
        encoder
            .encode(
                OutgoingFrame {
                    fin: true,
                    opcode: OpCode::Continuation,
                    compressed: true,
                    payload: b"",
                },
                &mut dst,
            )
            .unwrap();
        assert_eq!(&dst[..], &[0x80, 0x00]);

        dst.clear();
        encoder
            .encode(OutgoingFrame::control(OpCode::Pong, b"hi"), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &[0x8a, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_large_payload() {
        let mut encoder = Encoder;
        let mut dst = BytesMut::new();
        let payload = vec![7u8; 300];

        encoder
            .encode(
                OutgoingFrame {
                    fin: false,
                    opcode: OpCode::Binary,
                    compressed: false,
                    payload: &payload,
                },
                &mut dst,
            )
            .unwrap();
        assert_eq!(&dst[..4], &[0x02, 126, 0x01, 0x2c]);
        assert_eq!(&dst[4..], &payload[..]);
    }
}
