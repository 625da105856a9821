//! Message-level compression on top of the frame engine.
//!
//! A [`CompressionProvider`] sends and receives whole messages through a [`Socket`]. The
//! [`IdentityProvider`] passes payloads through untouched, the [`DeflateProvider`] applies the
//! permessage-deflate transform of RFC 7692 to them.

use std::{
    future::Future,
    sync::{Mutex, PoisonError},
};

use crate::{
    compression::{Deflate, DeflateOffer, Inflate},
    MessageType, Options, ReceiveResult, Result, Socket, WebSocketError,
    DEFAULT_RECEIVE_BUFFER_SIZE,
};

/// Sends and receives whole messages over a [`Socket`].
///
/// The decompress methods take the result of the receive that started the message, with its
/// bytes still in `buffer`, and read the rest of the message through the same buffer.
pub trait CompressionProvider: Send + Sync {
    /// Sends a binary message.
    fn compress_binary<W: Socket>(
        &self,
        ws: &W,
        message: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Sends a text message.
    fn compress_text<W: Socket>(
        &self,
        ws: &W,
        message: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Reads the rest of a binary message and returns its payload.
    fn decompress_binary<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Reads the rest of a text message and returns its payload.
    fn decompress_text<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> impl Future<Output = Result<String>> + Send;
}

// ================ Identity ====================

/// Sends messages as they are, optionally split in frames of at most `send_segment_size` bytes.
#[derive(Debug, Clone, Default)]
pub struct IdentityProvider {
    send_segment_size: Option<usize>,
}

impl IdentityProvider {
    /// Creates a provider splitting messages per `options.send_segment_size`.
    pub fn new(options: &Options) -> Self {
        Self {
            send_segment_size: options.send_segment_size,
        }
    }

    async fn send_message<W: Socket>(
        &self,
        ws: &W,
        message: &[u8],
        message_type: MessageType,
        compressed: bool,
    ) -> Result<()> {
        match self.send_segment_size {
            Some(size) if message.len() > size => {
                let mut segments = message.chunks(size).peekable();
                while let Some(segment) = segments.next() {
                    let end_of_message = segments.peek().is_none();
                    ws.send(segment, message_type, compressed, end_of_message)
                        .await?;
                }
                Ok(())
            }
            _ => ws.send(message, message_type, compressed, true).await,
        }
    }

    /// Collects the payload of a message, starting with the bytes of `first` in `buffer`.
    async fn receive_message<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> Result<Vec<u8>> {
        if first.message_type == MessageType::Close {
            return Err(WebSocketError::ConnectionClosed);
        }

        let mut message = buffer[..first.count].to_vec();
        if first.end_of_message {
            return Ok(message);
        }

        let mut scratch = Vec::new();
        let buffer = if buffer.is_empty() {
            scratch.resize(DEFAULT_RECEIVE_BUFFER_SIZE, 0);
            &mut scratch[..]
        } else {
            buffer
        };

        loop {
            let res = ws.receive(buffer).await?;
            if res.message_type == MessageType::Close {
                return Err(WebSocketError::ConnectionClosed);
            }

            message.extend_from_slice(&buffer[..res.count]);
            if res.end_of_message {
                return Ok(message);
            }
        }
    }
}

impl CompressionProvider for IdentityProvider {
    async fn compress_binary<W: Socket>(&self, ws: &W, message: &[u8]) -> Result<()> {
        self.send_message(ws, message, MessageType::Binary, false)
            .await
    }

    async fn compress_text<W: Socket>(&self, ws: &W, message: &str) -> Result<()> {
        self.send_message(ws, message.as_bytes(), MessageType::Text, false)
            .await
    }

    async fn decompress_binary<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> Result<Vec<u8>> {
        self.receive_message(ws, first, buffer).await
    }

    async fn decompress_text<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> Result<String> {
        let message = self.receive_message(ws, first, buffer).await?;
        // text frames were validated as they arrived
        String::from_utf8(message).map_err(|_| WebSocketError::InvalidUTF8)
    }
}

// ================ Deflate ====================

/// Compresses messages with permessage-deflate.
///
/// Inbound messages are inflated only when the peer flagged them with RSV1, the others go through
/// the identity path. Both sides reset their compression context between messages: the client
/// is always asked for `client_no_context_takeover` and the server never takes its context over.
pub struct DeflateProvider {
    identity: IdentityProvider,
    offer: DeflateOffer,
    deflate: Mutex<Deflate>,
    inflate: Mutex<Inflate>,
}

impl DeflateProvider {
    /// Creates a provider for a client offer, or `None` if the offer can't be accepted.
    ///
    /// Offers restricting the server window with `server_max_window_bits` are rejected.
    pub fn new(offer: DeflateOffer, options: &Options) -> Option<Self> {
        if offer.server_max_window_bits.is_some() {
            #[cfg(feature = "logging")]
            log::debug!("rejecting permessage-deflate offer with server_max_window_bits");
            return None;
        }

        let offer = DeflateOffer {
            client_no_context_takeover: true,
            ..offer
        };

        Some(Self {
            identity: IdentityProvider::new(options),
            deflate: Mutex::new(Deflate::new(options.compression_level)),
            inflate: Mutex::new(Inflate::default()),
            offer,
        })
    }

    /// The accepted offer, with `client_no_context_takeover` enforced.
    pub fn offer(&self) -> &DeflateOffer {
        &self.offer
    }

    /// Value of the `Sec-WebSocket-Extensions` response header.
    ///
    /// `client_max_window_bits` is never answered, the server doesn't restrict the client window.
    pub fn response_header(&self) -> String {
        DeflateOffer {
            client_no_context_takeover: true,
            server_no_context_takeover: self.offer.server_no_context_takeover,
            ..Default::default()
        }
        .to_string()
    }

    async fn send_compressed<W: Socket>(
        &self,
        ws: &W,
        message: &[u8],
        message_type: MessageType,
    ) -> Result<()> {
        let payload = self
            .deflate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .compress(message)
            .map_err(WebSocketError::Deflate)?;

        self.identity
            .send_message(ws, &payload, message_type, true)
            .await
    }

    /// Collects a message and inflates it if it was compressed.
    async fn receive_inflated<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> Result<Vec<u8>> {
        let payload = self.identity.receive_message(ws, first, buffer).await?;
        if !first.compressed {
            return Ok(payload);
        }

        let res = self
            .inflate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .decompress(&payload);

        match res {
            Ok(message) => Ok(message),
            Err(err) => Err(fail(ws, WebSocketError::Deflate(err)).await),
        }
    }
}

/// Closes the output with the status matching `err` and returns it.
async fn fail<W: Socket>(ws: &W, err: WebSocketError) -> WebSocketError {
    #[cfg(feature = "logging")]
    log::debug!("unable to decode message: {err}");

    if let Err(_err) = ws.close_output(Some(err.close_code()), "").await {
        #[cfg(feature = "logging")]
        log::debug!("unable to send close frame: {_err}");
    }

    err
}

impl CompressionProvider for DeflateProvider {
    async fn compress_binary<W: Socket>(&self, ws: &W, message: &[u8]) -> Result<()> {
        self.send_compressed(ws, message, MessageType::Binary).await
    }

    async fn compress_text<W: Socket>(&self, ws: &W, message: &str) -> Result<()> {
        self.send_compressed(ws, message.as_bytes(), MessageType::Text)
            .await
    }

    async fn decompress_binary<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> Result<Vec<u8>> {
        self.receive_inflated(ws, first, buffer).await
    }

    async fn decompress_text<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> Result<String> {
        let message = self.receive_inflated(ws, first, buffer).await?;
        match String::from_utf8(message) {
            Ok(text) => Ok(text),
            Err(_) => Err(fail(ws, WebSocketError::InvalidUTF8).await),
        }
    }
}

// ================ Provider ====================

/// The provider picked by negotiation.
pub enum Provider {
    Identity(IdentityProvider),
    Deflate(DeflateProvider),
}

impl Provider {
    /// Returns `true` if permessage-deflate was negotiated.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Deflate(_))
    }

    /// Value of the `Sec-WebSocket-Extensions` response header, if any.
    pub fn response_header(&self) -> Option<String> {
        match self {
            Self::Identity(_) => None,
            Self::Deflate(deflate) => Some(deflate.response_header()),
        }
    }
}

impl CompressionProvider for Provider {
    async fn compress_binary<W: Socket>(&self, ws: &W, message: &[u8]) -> Result<()> {
        match self {
            Self::Identity(identity) => identity.compress_binary(ws, message).await,
            Self::Deflate(deflate) => deflate.compress_binary(ws, message).await,
        }
    }

    async fn compress_text<W: Socket>(&self, ws: &W, message: &str) -> Result<()> {
        match self {
            Self::Identity(identity) => identity.compress_text(ws, message).await,
            Self::Deflate(deflate) => deflate.compress_text(ws, message).await,
        }
    }

    async fn decompress_binary<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> Result<Vec<u8>> {
        match self {
            Self::Identity(identity) => identity.decompress_binary(ws, first, buffer).await,
            Self::Deflate(deflate) => deflate.decompress_binary(ws, first, buffer).await,
        }
    }

    async fn decompress_text<W: Socket>(
        &self,
        ws: &W,
        first: &ReceiveResult,
        buffer: &mut [u8],
    ) -> Result<String> {
        match self {
            Self::Identity(identity) => identity.decompress_text(ws, first, buffer).await,
            Self::Deflate(deflate) => deflate.decompress_text(ws, first, buffer).await,
        }
    }
}
