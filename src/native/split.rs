//! Read and write halves of a WebSocket connection.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder as _;

use crate::{
    close::{close_payload, CloseCode, CloseStatus},
    codec::{Decoder, Encoder, OutgoingFrame},
    frame::{FrameHeader, MessageType, OpCode, MAX_CONTROL_PAYLOAD},
    mask::apply_mask,
    utf8::Utf8Validator,
    Result, WebSocketError,
};

use super::{ReceiveResult, Shared};

// ================ ReadHalf ====================

/// The receiving side of a connection.
///
/// Holds the receive buffer, the header of the frame being read and the UTF-8 state of the
/// text message in progress. It lives behind the receive lock of the connection, so a single
/// receive runs at a time.
pub(super) struct ReadHalf<S> {
    stream: Option<tokio::io::ReadHalf<S>>,
    buffer: ReceiveBuffer,
    decoder: Decoder,
    /// Header of the current data frame, with the payload bytes still to be read.
    header: FrameHeader,
    /// Position in the payload of the current frame, for unmasking.
    mask_offset: usize,
    utf8: Utf8Validator,
}

impl<S> ReadHalf<S> {
    pub(super) fn new(stream: tokio::io::ReadHalf<S>, buffer_size: usize) -> Self {
        Self {
            stream: Some(stream),
            buffer: ReceiveBuffer::new(buffer_size),
            decoder: Decoder::new(),
            header: FrameHeader::default(),
            mask_offset: 0,
            utf8: Utf8Validator::new(),
        }
    }

    /// Drops the stream half once the connection is disposed.
    pub(super) fn release(&mut self) {
        self.stream = None;
    }
}

impl<S> ReadHalf<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Reads the next piece of a message into `buffer`.
    ///
    /// Ping frames are answered and pong frames are skipped without returning to the caller.
    /// A data frame is returned in pieces of at most `buffer.len()` bytes; `end_of_message` is
    /// set on the piece that ends the final frame of the message.
    pub(super) async fn receive(
        &mut self,
        shared: &Shared<S>,
        buffer: &mut [u8],
    ) -> Result<ReceiveResult> {
        loop {
            let mut header = self.header;

            if header.payload_len == 0 {
                self.fill(2).await?;
                let needed = FrameHeader::required_len(self.buffer.unconsumed()[1]);
                self.fill(needed).await?;

                let (next, size) = match self.decoder.decode(self.buffer.unconsumed()) {
                    Ok(Some(decoded)) => decoded,
                    Ok(None) => continue,
                    Err(err) => return self.fail(shared, err).await,
                };
                self.buffer.consume(size);
                self.mask_offset = 0;

                header = next;
                if header.opcode == OpCode::Continuation {
                    header.opcode = self.header.opcode;
                    header.compressed = self.header.compressed;
                }
            }

            match header.opcode {
                OpCode::Ping | OpCode::Pong => {
                    self.on_ping_pong(shared, header).await?;
                    continue;
                }
                OpCode::Close => return self.on_close(shared, header).await,
                _ => {}
            }

            let message_type = if header.opcode == OpCode::Text {
                MessageType::Text
            } else {
                MessageType::Binary
            };
            let validate = message_type == MessageType::Text && !header.compressed;

            let wanted = header.payload_len.min(buffer.len() as u64) as usize;
            let mut count = 0;
            if wanted > 0 {
                if self.buffer.is_empty() {
                    self.fill(1).await?;
                }

                count = wanted.min(self.buffer.len());
                let chunk = &mut self.buffer.unconsumed_mut()[..count];
                self.mask_offset = apply_mask(chunk, header.mask, self.mask_offset);
                buffer[..count].copy_from_slice(chunk);
                self.buffer.consume(count);
                header.payload_len -= count as u64;
            }

            let end_of_message = header.fin && header.payload_len == 0;
            self.header = header;

            if validate && !self.utf8.validate(&buffer[..count], end_of_message) {
                return self.fail(shared, WebSocketError::InvalidUTF8).await;
            }

            return Ok(ReceiveResult {
                count,
                message_type,
                end_of_message,
                compressed: header.compressed,
                close_status: None,
            });
        }
    }

    /// Handles a ping or pong frame. Pings are echoed back as pongs.
    async fn on_ping_pong(&mut self, shared: &Shared<S>, header: FrameHeader) -> Result<()> {
        let mut payload = [0u8; MAX_CONTROL_PAYLOAD];
        let payload = self.read_control_payload(header, &mut payload).await?;

        if header.opcode == OpCode::Ping {
            shared
                .send_frame(OutgoingFrame::control(OpCode::Pong, payload))
                .await?;
        }

        Ok(())
    }

    /// Handles the peer's close frame.
    async fn on_close(&mut self, shared: &Shared<S>, header: FrameHeader) -> Result<ReceiveResult> {
        shared.on_close_received();

        let mut payload = [0u8; MAX_CONTROL_PAYLOAD];
        let payload = self.read_control_payload(header, &mut payload).await?;

        let status = match payload.len() {
            0 => CloseStatus {
                code: CloseCode::Status,
                reason: String::new(),
            },
            1 => return self.fail(shared, WebSocketError::InvalidCloseFrame).await,
            _ => {
                let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_allowed() {
                    let err = WebSocketError::InvalidCloseCode(code.into());
                    return self.fail(shared, err).await;
                }

                let Ok(reason) = std::str::from_utf8(&payload[2..]) else {
                    return self.fail(shared, WebSocketError::InvalidCloseFrame).await;
                };

                CloseStatus {
                    code,
                    reason: reason.to_owned(),
                }
            }
        };

        #[cfg(feature = "logging")]
        log::debug!("received close frame: {} {:?}", status.code, status.reason);

        shared.status().close_status = Some(status.clone());

        Ok(ReceiveResult {
            count: 0,
            message_type: MessageType::Close,
            end_of_message: true,
            compressed: false,
            close_status: Some(status),
        })
    }

    /// Reads and unmasks the payload of a control frame.
    async fn read_control_payload<'a>(
        &mut self,
        header: FrameHeader,
        payload: &'a mut [u8; MAX_CONTROL_PAYLOAD],
    ) -> Result<&'a [u8]> {
        // the decoder rejects control frames over 125 bytes
        let len = header.payload_len as usize;

        self.fill(len).await?;
        let payload = &mut payload[..len];
        payload.copy_from_slice(&self.buffer.unconsumed()[..len]);
        self.buffer.consume(len);
        apply_mask(payload, header.mask, 0);

        Ok(payload)
    }

    /// Closes the output with the status matching `err`, if not already done,
    /// and fails the receive.
    async fn fail<T>(&mut self, shared: &Shared<S>, err: WebSocketError) -> Result<T> {
        #[cfg(feature = "logging")]
        log::debug!("protocol error on receive: {err}");

        let sent_close = shared.status().sent_close;
        if !sent_close {
            let payload = close_payload(Some(err.close_code()), "")?;
            if let Err(_err) = shared.send_close(&payload).await {
                #[cfg(feature = "logging")]
                log::debug!("unable to send close frame: {_err}");
            }
        }

        self.buffer.clear();
        Err(err)
    }

    /// Reads from the stream until at least `min` bytes are buffered.
    ///
    /// The unconsumed bytes are moved to the front of the buffer before reading.
    async fn fill(&mut self, min: usize) -> Result<()> {
        if self.buffer.len() >= min {
            return Ok(());
        }

        self.buffer.compact();

        let stream = self.stream.as_mut().ok_or(WebSocketError::Disposed)?;
        while self.buffer.len() < min {
            let read = stream
                .read(self.buffer.spare_mut())
                .await
                .map_err(WebSocketError::ConnectionClosedPrematurely)?;

            if read == 0 {
                return Err(WebSocketError::ConnectionClosedPrematurely(
                    io::ErrorKind::UnexpectedEof.into(),
                ));
            }

            self.buffer.count += read;
        }

        Ok(())
    }
}

/// Fixed-size buffer whose unconsumed region is `data[offset..offset + count]`.
struct ReceiveBuffer {
    data: Box<[u8]>,
    offset: usize,
    count: usize,
}

impl ReceiveBuffer {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0; size].into_boxed_slice(),
            offset: 0,
            count: 0,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.count
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn unconsumed(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.count]
    }

    fn unconsumed_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.offset..self.offset + self.count]
    }

    /// Free space after the unconsumed region.
    fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.offset + self.count..]
    }

    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.count);
        self.offset += n;
        self.count -= n;
        if self.count == 0 {
            self.offset = 0;
        }
    }

    fn compact(&mut self) {
        if self.offset > 0 {
            self.data
                .copy_within(self.offset..self.offset + self.count, 0);
            self.offset = 0;
        }
    }

    fn clear(&mut self) {
        self.offset = 0;
        self.count = 0;
    }
}

// ================ WriteHalf ====================

/// The sending side of a connection, behind the write lock.
///
/// Every frame is serialized into one buffer and written with a single `write_all`.
pub(super) struct WriteHalf<S> {
    stream: Option<tokio::io::WriteHalf<S>>,
    encoder: Encoder,
    buffer: BytesMut,
    /// The last data frame sent was not final.
    pub(super) message_open: bool,
}

impl<S> WriteHalf<S> {
    pub(super) fn new(stream: tokio::io::WriteHalf<S>) -> Self {
        Self {
            stream: Some(stream),
            encoder: Encoder,
            buffer: BytesMut::with_capacity(1024),
            message_open: false,
        }
    }

    /// Drops the stream half once the connection is disposed.
    pub(super) fn release(&mut self) {
        self.stream = None;
    }
}

impl<S> WriteHalf<S>
where
    S: AsyncWrite,
{
    /// Encodes and writes a single frame.
    pub(super) async fn write_frame(&mut self, frame: OutgoingFrame<'_>) -> Result<()> {
        self.buffer.clear();
        self.encoder.encode(frame, &mut self.buffer)?;

        let stream = self.stream.as_mut().ok_or(WebSocketError::Disposed)?;
        stream
            .write_all(&self.buffer)
            .await
            .map_err(WebSocketError::ConnectionClosedPrematurely)?;
        stream
            .flush()
            .await
            .map_err(WebSocketError::ConnectionClosedPrematurely)?;

        Ok(())
    }
}
