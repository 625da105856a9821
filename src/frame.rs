//! # Frame
//!
//! The `frame` module implements the WebSocket frame header as defined in
//! [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! Frames come in two categories:
//!
//! - **Data Frames**: `OpCode::Text`, `OpCode::Binary` and `OpCode::Continuation`, which
//!   carries the next fragment of a message started by a text or binary frame.
//! - **Control Frames**: `OpCode::Close`, `OpCode::Ping` and `OpCode::Pong`. They may be
//!   interleaved with the fragments of a message but cannot be fragmented themselves.
//!
//! A server receives masked frames only, and never masks the frames it sends. The RSV1 bit
//! flags the first frame of a message compressed with permessage-deflate (RFC 7692).

use crate::WebSocketError;

/// Largest header a frame can have: 2 bytes, 8 bytes of extended length and the mask.
pub const MAX_HEAD_SIZE: usize = 14;

/// Largest payload a control frame can carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// The four-bit opcode of a frame.
///
/// Values follow the registry of [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// `0x0` continuation, `0x1` text, `0x2` binary, `0x8` close, `0x9` ping and `0xA` pong.
/// Every other value is reserved and fails to convert.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`, which are never fragmented.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for the opcodes that start a new message (`Text` or `Binary`).
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    /// Converts the low nibble of the first header byte into an `OpCode`.
    ///
    /// Reserved opcodes result in a `WebSocketError::InvalidOpCode` error.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Kind of message returned by a receive or passed to a send.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageType {
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes.
    Binary,
    /// The peer's close frame.
    Close,
}

impl From<MessageType> for OpCode {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Text => OpCode::Text,
            MessageType::Binary => OpCode::Binary,
            MessageType::Close => OpCode::Close,
        }
    }
}

/// The decoded header of a frame.
///
/// After a header is parsed, `payload_len` counts down the payload bytes that have not been
/// handed to the application yet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// RSV1, the permessage-deflate flag.
    pub compressed: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// Payload length, or what remains of it once reading started.
    pub payload_len: u64,
    /// The masking key of an inbound frame, all zeros for outbound frames.
    pub mask: [u8; 4],
}

impl Default for FrameHeader {
    /// The header state of a connection before any frame arrived: a finished text message.
    fn default() -> Self {
        Self {
            fin: true,
            compressed: false,
            opcode: OpCode::Text,
            payload_len: 0,
            mask: [0; 4],
        }
    }
}

impl FrameHeader {
    /// Creates the header of an outbound frame.
    pub fn new(fin: bool, opcode: OpCode, compressed: bool, payload_len: usize) -> Self {
        Self {
            fin,
            compressed,
            opcode,
            payload_len: payload_len as u64,
            mask: [0; 4],
        }
    }

    /// Number of header bytes announced by the second byte of an inbound frame.
    #[inline]
    pub fn required_len(second_byte: u8) -> usize {
        let extra = match second_byte & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask = if second_byte & 0x80 != 0 { 4 } else { 0 };
        2 + extra + mask
    }

    /// Formats the header of an outbound frame into `head` and returns its size.
    ///
    /// The mask bit is never set and the shortest length encoding is used.
    ///
    /// # Panics
    /// Panics if `head` is shorter than the encoded header, at most [`MAX_HEAD_SIZE`] bytes.
    pub fn fmt_head(&self, head: &mut [u8]) -> usize {
        let compression = u8::from(self.compressed);
        head[0] = (self.fin as u8) << 7 | compression << 6 | u8::from(self.opcode);

        let len = self.payload_len;
        if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&len.to_be_bytes());
            10
        }
    }
}
