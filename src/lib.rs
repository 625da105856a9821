//! # wscompress
//! Server-side implementation of the WebSocket protocol (RFC 6455) with permessage-deflate
//! compression (RFC 7692).
//!
//! The crate picks up where the HTTP upgrade handshake ends: it takes an already upgraded
//! duplex byte stream and runs the WebSocket framing protocol over it, handling fragmentation,
//! control frames, masking, UTF-8 validation of text messages and the closing handshake.
//! On top of the frame engine, a compression provider sends and receives whole messages,
//! applying the permessage-deflate transform when it was negotiated.
//!
//! # Features
//! The crate provides several optional features that can be enabled in your `Cargo.toml`:
//!
//! - `logging`: Enables debug logging for negotiation, the closing handshake and protocol
//!   failures using the `log` crate.
//!
//! - `simd`: Validates UTF-8 text with `simdutf8` instead of the standard library.
//!
//! - `http`: Adds helpers to negotiate compression straight from an [`http::HeaderMap`].
//!
//! # Compression Support
//! The permessage-deflate extension is negotiated from the client's offer:
//!
//! - `client_no_context_takeover` is always enforced, so every inbound message is inflated
//!   with a fresh context
//! - outbound messages are always compressed with a fresh context as well, and
//!   `server_no_context_takeover` is echoed when offered
//! - offers carrying `server_max_window_bits` fall back to uncompressed messages
//!
//! # Server Example
//! ```no_run
//! use wscompress::{negotiate, CompressionProvider, MessageType, Options, Socket, WebSocket};
//!
//! async fn serve(stream: tokio::net::TcpStream, offer: &str) -> wscompress::Result<()> {
//!     let options = Options::default();
//!     // the handshake answers with `negotiation.header()` in Sec-WebSocket-Extensions
//!     let negotiation = negotiate([offer], &options);
//!     let ws = WebSocket::new(stream, None, &options);
//!     let provider = negotiation.provider();
//!
//!     let mut buffer = vec![0; options.receive_buffer_size];
//!     loop {
//!         let first = ws.receive(&mut buffer).await?;
//!         match first.message_type {
//!             MessageType::Text => {
//!                 let text = provider.decompress_text(&ws, &first, &mut buffer).await?;
//!                 provider.compress_text(&ws, &text).await?;
//!             }
//!             MessageType::Binary => {
//!                 let data = provider.decompress_binary(&ws, &first, &mut buffer).await?;
//!                 provider.compress_binary(&ws, &data).await?;
//!             }
//!             MessageType::Close => break,
//!         }
//!     }
//!
//!     ws.close(Some(wscompress::close::CloseCode::Normal), "").await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod close;
pub mod codec;
mod compression;
pub mod frame;
mod mask;
mod native;
mod negotiation;
mod provider;
mod utf8;

use thiserror::Error;

pub use compression::{DeflateOffer, WindowBits};
pub use native::*;
pub use negotiation::{negotiate, Negotiation};
pub use provider::{CompressionProvider, DeflateProvider, IdentityProvider, Provider};
pub use utf8::Utf8Validator;

/// Compression level used by the deflate provider.
pub type CompressionLevel = flate2::Compression;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// The errors are broadly categorized into:
///
/// - Protocol errors, raised while reading a frame that violates RFC 6455. The connection sends
///   a close frame before the error is returned (see [`WebSocketError::is_protocol_error`]).
/// - Lifecycle errors, raised when an operation is not allowed in the current state, when the
///   connection was aborted, or when the underlying stream failed.
/// - Argument errors, raised before anything is written to the wire.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Occurs when receiving a new data frame before completing the previous fragmented message.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// Indicates that a text message or close frame reason contains invalid UTF-8 data.
    /// According to RFC 6455, all text payloads must be valid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// Occurs when receiving a continuation frame without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Indicates that a received close frame carries a 1 byte payload
    /// (close frames must be either empty or ≥2 bytes).
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// Occurs when a received close frame contains a status code that is not valid according to
    /// RFC 6455 (e.g., using reserved codes or codes in invalid ranges).
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Indicates that reserved bits in the frame header are set when they should be 0.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Occurs when a control frame (ping, pong, or close) is received with the FIN bit
    /// not set. RFC 6455 requires that control frames must not be fragmented.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// Indicates that a received control frame exceeds the maximum allowed size of 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// Indicates receipt of a frame with an opcode outside the ones defined by RFC 6455.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Clients must mask every frame they send.
    #[error("Received an unmasked frame")]
    UnmaskedFrame,

    /// The most significant bit of a 64-bit payload length was set.
    #[error("Invalid payload length")]
    InvalidPayloadLength,

    /// The peer ended the stream, or a read or write failed, while the connection
    /// was expecting more bytes.
    #[error("Connection closed prematurely: {0}")]
    ConnectionClosedPrematurely(#[from] std::io::Error),

    /// Returned when a message is read past the peer's close frame.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The operation is not valid in the current connection state.
    #[error("Invalid state for this operation: {0}")]
    InvalidState(WebSocketState),

    /// The connection has been disposed.
    #[error("WebSocket has been disposed")]
    Disposed,

    /// A send or receive was issued while another one of the same kind was still
    /// outstanding. The connection is aborted before this error is returned.
    #[error("Another operation of the same kind is already in progress")]
    OperationInProgress,

    /// The in-flight operation was cancelled because the connection was aborted.
    #[error("Operation cancelled")]
    Cancelled,

    /// The close status is not allowed in an outgoing close frame.
    #[error("Invalid close status: {0}")]
    InvalidCloseStatus(u16),

    /// The close reason is longer than 123 bytes, or a reason was given without a status.
    #[error("Invalid close reason")]
    InvalidCloseReason,

    /// Close frames can only be sent through `close` or `close_output`.
    #[error("Invalid message type")]
    InvalidMessageType,

    /// Compressing or inflating a message failed.
    #[error("Deflate error: {0}")]
    Deflate(#[source] std::io::Error),
}

impl WebSocketError {
    /// Returns `true` for errors raised when the peer violated the framing protocol.
    ///
    /// A connection that hits one of these errors sends a close frame with
    /// [`WebSocketError::close_code`] before the error reaches the caller.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFragment
                | Self::InvalidUTF8
                | Self::InvalidContinuationFrame
                | Self::InvalidCloseFrame
                | Self::InvalidCloseCode(_)
                | Self::ReservedBitsNotZero
                | Self::ControlFrameFragmented
                | Self::ControlFrameTooLarge
                | Self::InvalidOpCode(_)
                | Self::UnmaskedFrame
                | Self::InvalidPayloadLength
        )
    }

    /// The status sent in the close frame when this error terminates the connection.
    pub fn close_code(&self) -> close::CloseCode {
        match self {
            Self::InvalidUTF8 => close::CloseCode::Invalid,
            Self::Deflate(_) => close::CloseCode::Invalid,
            _ => close::CloseCode::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors() {
        assert!(WebSocketError::ReservedBitsNotZero.is_protocol_error());
        assert!(WebSocketError::InvalidCloseCode(1004).is_protocol_error());
        assert!(WebSocketError::InvalidUTF8.is_protocol_error());
        assert!(!WebSocketError::Cancelled.is_protocol_error());
        assert!(!WebSocketError::OperationInProgress.is_protocol_error());
        assert!(!WebSocketError::InvalidState(WebSocketState::Closed).is_protocol_error());
    }

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(
            WebSocketError::InvalidUTF8.close_code(),
            close::CloseCode::Invalid
        );
        assert_eq!(
            WebSocketError::InvalidFragment.close_code(),
            close::CloseCode::Protocol
        );
        assert_eq!(
            WebSocketError::UnmaskedFrame.close_code(),
            close::CloseCode::Protocol
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let err = WebSocketError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(matches!(err, WebSocketError::ConnectionClosedPrematurely(_)));
        assert_eq!(err.close_code(), close::CloseCode::Protocol);
        assert!(!err.is_protocol_error());
    }
}
