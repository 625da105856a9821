//! The frame engine.
//!
//! [`WebSocket`] runs the server side of RFC 6455 over an upgraded duplex stream. The stream is
//! split in a read half and a write half, each behind its own lock, so that a receive and a send
//! can be outstanding at the same time while frame writes (sends, pong echoes and keep-alive
//! pings) never interleave on the wire.

mod keep_alive;
mod options;
mod split;

use std::{
    fmt,
    future::Future,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    close::{close_payload, CloseCode, CloseStatus},
    codec::OutgoingFrame,
    frame::OpCode,
    Result, WebSocketError,
};

use split::{ReadHalf, WriteHalf};

pub use crate::frame::MessageType;
pub use options::*;

/// The state of a connection.
///
/// States only move forward, from `Open` towards `Closed` or `Aborted`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WebSocketState {
    /// Messages can be sent and received.
    Open,
    /// A close frame was sent. Receiving is still allowed until the peer answers.
    CloseSent,
    /// The peer's close frame was received. Sending is still allowed.
    CloseReceived,
    /// Both close frames were exchanged, or the connection was disposed.
    Closed,
    /// The connection was aborted.
    Aborted,
}

impl fmt::Display for WebSocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "Open",
            Self::CloseSent => "CloseSent",
            Self::CloseReceived => "CloseReceived",
            Self::Closed => "Closed",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Outcome of a single receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveResult {
    /// Number of payload bytes written to the caller's buffer.
    pub count: usize,
    /// Type of the message the bytes belong to.
    pub message_type: MessageType,
    /// The bytes end the message.
    pub end_of_message: bool,
    /// The message was flagged with RSV1 by the peer.
    pub compressed: bool,
    /// Status of the peer's close frame, for [`MessageType::Close`] results.
    pub close_status: Option<CloseStatus>,
}

/// Message-level operations of a WebSocket connection.
///
/// [`WebSocket`] is the implementation over a byte stream. The compression providers are written
/// against this trait and only borrow the connection for the duration of a call.
pub trait Socket: Send + Sync {
    /// Current state of the connection.
    fn state(&self) -> WebSocketState;

    /// The status carried by the peer's close frame, once received.
    fn close_status(&self) -> Option<CloseStatus>;

    /// The sub-protocol agreed on during the handshake.
    fn sub_protocol(&self) -> Option<&str>;

    /// Sends a frame of a message.
    ///
    /// A message is sent in pieces by passing `end_of_message = false` until the last one. Pieces
    /// after the first go out as continuation frames, and `compressed` only matters on the first.
    ///
    /// Valid in the `Open` and `CloseReceived` states. `MessageType::Close` is rejected, close
    /// frames are sent with [`Socket::close_output`] and [`Socket::close`].
    fn send(
        &self,
        payload: &[u8],
        message_type: MessageType,
        compressed: bool,
        end_of_message: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Receives the next piece of a message into `buffer`.
    ///
    /// Control frames are handled internally: pings are answered and pongs are dropped. The
    /// peer's close frame is returned as a [`MessageType::Close`] result.
    ///
    /// Valid in the `Open` and `CloseSent` states.
    fn receive(&self, buffer: &mut [u8]) -> impl Future<Output = Result<ReceiveResult>> + Send;

    /// Sends a close frame without waiting for the peer's answer.
    ///
    /// A send in progress is not interrupted, the close frame follows it on the wire.
    fn close_output(
        &self,
        code: Option<CloseCode>,
        reason: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Runs the closing handshake: sends a close frame if none was sent, reads until the peer's
    /// close frame arrives and disposes the connection.
    ///
    /// A receive already pending keeps running and may itself return the peer's close frame.
    fn close(&self, code: Option<CloseCode>, reason: &str)
        -> impl Future<Output = Result<()>> + Send;

    /// Cancels the in-flight operations and releases the stream. The state becomes `Aborted`
    /// unless the connection was already closed.
    fn abort(&self);

    /// Releases the stream. In-flight operations fail and every later operation returns
    /// [`WebSocketError::Disposed`].
    fn dispose(&self);
}

/// A server-side WebSocket connection over an upgraded stream.
///
/// The connection is shared by reference: a receive and a send may run concurrently from
/// different tasks, but issuing a second receive (or send) while one is still pending aborts the
/// connection. Closing is not counted as either. Dropping a pending operation aborts it as well.
///
/// # Example
/// ```no_run
/// use wscompress::{MessageType, Options, Socket, WebSocket};
///
/// async fn echo(stream: tokio::net::TcpStream) -> wscompress::Result<()> {
///     let ws = WebSocket::new(stream, None, &Options::default());
///     let mut buffer = [0u8; 1024];
///
///     loop {
///         let res = ws.receive(&mut buffer).await?;
///         if res.message_type == MessageType::Close {
///             return ws.close(None, "").await;
///         }
///         ws.send(&buffer[..res.count], res.message_type, false, res.end_of_message)
///             .await?;
///     }
/// }
/// ```
pub struct WebSocket<S> {
    shared: Arc<Shared<S>>,
    keep_alive: Option<JoinHandle<()>>,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Takes over an upgraded stream.
    ///
    /// The keep-alive task is spawned on the current tokio runtime, if any.
    pub fn new(stream: S, sub_protocol: Option<String>, options: &Options) -> Self {
        let (read, write) = tokio::io::split(stream);

        let shared = Arc::new(Shared {
            sub_protocol,
            status: Mutex::new(Status::default()),
            reader: tokio::sync::Mutex::new(ReadHalf::new(
                read,
                options.effective_receive_buffer_size(),
            )),
            writer: tokio::sync::Mutex::new(WriteHalf::new(write)),
            receiving: AtomicBool::new(false),
            sending: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let keep_alive = options
            .keep_alive_interval
            .and_then(|interval| keep_alive::spawn(&shared, interval));

        Self { shared, keep_alive }
    }
}

impl<S> Drop for WebSocket<S> {
    fn drop(&mut self) {
        self.shared.dispose();
        if let Some(task) = self.keep_alive.take() {
            task.abort();
        }
    }
}

impl<S> Socket for WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn state(&self) -> WebSocketState {
        self.shared.state()
    }

    fn close_status(&self) -> Option<CloseStatus> {
        self.shared.status().close_status.clone()
    }

    fn sub_protocol(&self) -> Option<&str> {
        self.shared.sub_protocol.as_deref()
    }

    async fn send(
        &self,
        payload: &[u8],
        message_type: MessageType,
        compressed: bool,
        end_of_message: bool,
    ) -> Result<()> {
        if message_type == MessageType::Close {
            return Err(WebSocketError::InvalidMessageType);
        }
        self.shared
            .ensure_state(&[WebSocketState::Open, WebSocketState::CloseReceived])?;

        let shared = &*self.shared;
        shared
            .run(&shared.sending, async {
                let mut writer = shared.lock_writer().await;

                let opcode = if writer.message_open {
                    OpCode::Continuation
                } else {
                    OpCode::from(message_type)
                };
                writer.message_open = !end_of_message;

                writer
                    .write_frame(OutgoingFrame {
                        fin: end_of_message,
                        opcode,
                        compressed,
                        payload,
                    })
                    .await
            })
            .await
    }

    async fn receive(&self, buffer: &mut [u8]) -> Result<ReceiveResult> {
        self.shared
            .ensure_state(&[WebSocketState::Open, WebSocketState::CloseSent])?;

        let shared = &*self.shared;
        shared
            .run(&shared.receiving, async {
                let mut reader = shared.reader.lock().await;
                reader.receive(shared, buffer).await
            })
            .await
    }

    async fn close_output(&self, code: Option<CloseCode>, reason: &str) -> Result<()> {
        let payload = close_payload(code, reason)?;
        self.shared
            .ensure_state(&[WebSocketState::Open, WebSocketState::CloseReceived])?;

        let shared = &*self.shared;
        shared.run_closing(shared.send_close(&payload)).await
    }

    async fn close(&self, code: Option<CloseCode>, reason: &str) -> Result<()> {
        let payload = close_payload(code, reason)?;
        self.shared.ensure_state(&[
            WebSocketState::Open,
            WebSocketState::CloseSent,
            WebSocketState::CloseReceived,
        ])?;

        let res = self.closing_handshake(&payload).await;
        self.shared.dispose();
        res
    }

    fn abort(&self) {
        self.shared.abort();
    }

    fn dispose(&self) {
        self.shared.dispose();
    }
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Sends the close frame and reads until the peer's close frame.
    ///
    /// Neither step counts as a send or a receive: a pending send finishes before the close
    /// frame is written, and a pending receive is waited for through the read lock.
    async fn closing_handshake(&self, payload: &[u8]) -> Result<()> {
        let shared = &*self.shared;

        if !shared.sent_close() {
            shared.run_closing(shared.send_close(payload)).await?;
        }

        shared.run_closing(shared.drain_until_close()).await
    }
}

// ================ Shared state ====================

#[derive(Debug)]
struct Status {
    state: WebSocketState,
    sent_close: bool,
    received_close: bool,
    close_status: Option<CloseStatus>,
    disposed: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: WebSocketState::Open,
            sent_close: false,
            received_close: false,
            close_status: None,
            disposed: false,
        }
    }
}

/// State shared between the connection, its pending operations and the keep-alive task.
struct Shared<S> {
    sub_protocol: Option<String>,
    /// State-update lock. Never held across an await point.
    status: Mutex<Status>,
    /// Receive-operation lock.
    reader: tokio::sync::Mutex<ReadHalf<S>>,
    /// Write lock, taken for every frame written.
    writer: tokio::sync::Mutex<WriteHalf<S>>,
    receiving: AtomicBool,
    sending: AtomicBool,
    /// Cancelled on abort and dispose.
    shutdown: CancellationToken,
}

impl<S> Shared<S> {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> WebSocketState {
        self.status().state
    }

    fn sent_close(&self) -> bool {
        self.status().sent_close
    }

    fn received_close(&self) -> bool {
        self.status().received_close
    }

    fn ensure_state(&self, valid: &[WebSocketState]) -> Result<()> {
        let status = self.status();
        if status.disposed {
            return Err(WebSocketError::Disposed);
        }
        if !valid.contains(&status.state) {
            return Err(WebSocketError::InvalidState(status.state));
        }
        Ok(())
    }

    /// Records the peer's close frame.
    fn on_close_received(&self) {
        let mut status = self.status();
        status.received_close = true;
        status.state = match status.state {
            WebSocketState::Open => WebSocketState::CloseReceived,
            WebSocketState::CloseSent => WebSocketState::Closed,
            state => state,
        };
    }

    /// Records that a close frame goes out. Returns `false` if one already did.
    fn on_close_sent(&self) -> bool {
        let mut status = self.status();
        if status.sent_close {
            return false;
        }
        status.sent_close = true;
        status.state = match status.state {
            WebSocketState::Open => WebSocketState::CloseSent,
            WebSocketState::CloseReceived => WebSocketState::Closed,
            state => state,
        };
        true
    }

    /// Marks the start of an operation guarded by `flag`.
    ///
    /// A second operation of the same kind aborts the connection.
    fn begin<'a>(&'a self, flag: &'a AtomicBool) -> Result<Operation<'a, S>> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            #[cfg(feature = "logging")]
            log::debug!("concurrent operation of the same kind, aborting");

            self.abort();
            return Err(WebSocketError::OperationInProgress);
        }

        Ok(Operation {
            shared: self,
            flag: Some(flag),
            finished: false,
        })
    }

    fn abort(&self) {
        {
            let mut status = self.status();
            if status.state != WebSocketState::Closed {
                status.state = WebSocketState::Aborted;
            }
        }

        #[cfg(feature = "logging")]
        log::debug!("connection aborted");

        self.dispose();
    }

    fn dispose(&self) {
        {
            let mut status = self.status();
            if status.disposed {
                return;
            }
            status.disposed = true;
            if status.state != WebSocketState::Aborted {
                status.state = WebSocketState::Closed;
            }
        }

        self.shutdown.cancel();
        self.release_if_disposed();
    }

    /// Drops the stream halves that are not in use. The busy ones are released by their
    /// operation when it ends.
    fn release_if_disposed(&self) {
        if !self.status().disposed {
            return;
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.release();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.release();
        }
    }

    /// Maps the error of an interrupted operation.
    fn interrupted(&self, err: WebSocketError) -> WebSocketError {
        match err {
            WebSocketError::Cancelled | WebSocketError::ConnectionClosedPrematurely(_)
                if self.state() == WebSocketState::Aborted =>
            {
                WebSocketError::Cancelled
            }
            WebSocketError::Cancelled => WebSocketError::ConnectionClosedPrematurely(
                io::Error::new(io::ErrorKind::Interrupted, "connection disposed"),
            ),
            err => err,
        }
    }
}

impl<S> Shared<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Runs an operation guarded by `flag`, racing it against the shutdown of the connection.
    async fn run<T>(
        &self,
        flag: &AtomicBool,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let guard = self.begin(flag)?;
        self.complete(guard, operation).await
    }

    /// Runs a step of the closing handshake. It waits on the locks of the pending send and
    /// receive instead of counting as another one.
    async fn run_closing<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let guard = Operation {
            shared: self,
            flag: None,
            finished: false,
        };
        self.complete(guard, operation).await
    }

    async fn complete<T>(
        &self,
        mut guard: Operation<'_, S>,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let res = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(WebSocketError::Cancelled),
            res = operation => res,
        };
        guard.finished = true;
        drop(guard);

        self.release_if_disposed();
        res.map_err(|err| self.interrupted(err))
    }

    /// Takes the write lock, without yielding when it is free.
    async fn lock_writer(&self) -> tokio::sync::MutexGuard<'_, WriteHalf<S>> {
        match self.writer.try_lock() {
            Ok(writer) => writer,
            Err(_) => self.writer.lock().await,
        }
    }

    async fn send_frame(&self, frame: OutgoingFrame<'_>) -> Result<()> {
        let mut writer = self.lock_writer().await;
        writer.write_frame(frame).await
    }

    /// Sends a close frame with the given payload, once.
    async fn send_close(&self, payload: &[u8]) -> Result<()> {
        if !self.on_close_sent() {
            return Ok(());
        }

        #[cfg(feature = "logging")]
        log::debug!("sending close frame ({} bytes)", payload.len());

        self.send_frame(OutgoingFrame::control(OpCode::Close, payload))
            .await
    }

    /// Reads until the peer's close frame, discarding data still in flight.
    ///
    /// A receive pending elsewhere keeps the read lock until it returns, possibly with the close
    /// frame itself.
    async fn drain_until_close(&self) -> Result<()> {
        let mut scratch = [0u8; MIN_RECEIVE_BUFFER_SIZE];
        while !self.received_close() {
            let mut reader = self.reader.lock().await;
            if self.received_close() {
                break;
            }
            reader.receive(self, &mut scratch).await?;
        }
        Ok(())
    }

    /// Sends a keep-alive ping, unless a frame is being written.
    async fn keep_alive(&self) -> Result<()> {
        if !matches!(
            self.state(),
            WebSocketState::Open | WebSocketState::CloseReceived
        ) {
            return Ok(());
        }

        let Ok(mut writer) = self.writer.try_lock() else {
            #[cfg(feature = "logging")]
            log::trace!("write lock busy, skipping keep-alive ping");
            return Ok(());
        };

        writer
            .write_frame(OutgoingFrame::control(OpCode::Ping, &[]))
            .await
    }
}

/// A pending operation. Dropping it before it finished aborts the connection.
struct Operation<'a, S> {
    shared: &'a Shared<S>,
    /// `None` for the closing handshake, which has no slot of its own.
    flag: Option<&'a AtomicBool>,
    finished: bool,
}

impl<S> Drop for Operation<'_, S> {
    fn drop(&mut self) {
        if let Some(flag) = self.flag {
            flag.store(false, Ordering::Release);
        }
        if !self.finished {
            self.shared.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    fn server(options: &Options) -> (WebSocket<DuplexStream>, DuplexStream) {
        server_with_capacity(options, 4096)
    }

    /// A connection whose writes stall once `capacity` bytes are unread.
    fn server_with_capacity(
        options: &Options,
        capacity: usize,
    ) -> (WebSocket<DuplexStream>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(capacity);
        (WebSocket::new(local, None, options), remote)
    }

    fn options() -> Options {
        Options::default().without_keep_alive()
    }

    #[test]
    fn test_state_order() {
        assert!(WebSocketState::Open < WebSocketState::CloseSent);
        assert!(WebSocketState::Closed < WebSocketState::Aborted);
        assert_eq!(WebSocketState::CloseReceived.to_string(), "CloseReceived");
    }

    #[tokio::test]
    async fn test_send_fragments() {
        let (ws, mut remote) = server(&options());

        ws.send(b"ab", MessageType::Text, false, false).await.unwrap();
        ws.send(b"cd", MessageType::Text, false, true).await.unwrap();

        let mut bytes = [0u8; 8];
        remote.read_exact(&mut bytes).await.unwrap();
        assert_eq!(bytes, [0x01, 0x02, b'a', b'b', 0x80, 0x02, b'c', b'd']);
    }

    #[tokio::test]
    async fn test_send_close_type_rejected() {
        let (ws, _remote) = server(&options());
        let res = ws.send(b"", MessageType::Close, false, true).await;
        assert!(matches!(res, Err(WebSocketError::InvalidMessageType)));
        assert_eq!(ws.state(), WebSocketState::Open);
    }

    #[tokio::test]
    async fn test_close_output_transitions() {
        let (ws, mut remote) = server(&options());

        ws.close_output(Some(CloseCode::Normal), "bye").await.unwrap();
        assert_eq!(ws.state(), WebSocketState::CloseSent);

        let mut bytes = [0u8; 7];
        remote.read_exact(&mut bytes).await.unwrap();
        assert_eq!(bytes, [0x88, 0x05, 0x03, 0xe8, b'b', b'y', b'e']);

        let res = ws.send(b"late", MessageType::Text, false, true).await;
        assert!(matches!(
            res,
            Err(WebSocketError::InvalidState(WebSocketState::CloseSent))
        ));
    }

    #[tokio::test]
    async fn test_close_output_validates_arguments() {
        let (ws, _remote) = server(&options());

        let res = ws.close_output(None, "reason").await;
        assert!(matches!(res, Err(WebSocketError::InvalidCloseReason)));

        let res = ws.close_output(Some(CloseCode::Abnormal), "").await;
        assert!(matches!(res, Err(WebSocketError::InvalidCloseStatus(1006))));

        assert_eq!(ws.state(), WebSocketState::Open);
    }

    #[tokio::test]
    async fn test_receive_eof() {
        let (ws, remote) = server(&options());
        drop(remote);

        let mut buffer = [0u8; 16];
        let res = ws.receive(&mut buffer).await;
        assert!(matches!(
            res,
            Err(WebSocketError::ConnectionClosedPrematurely(_))
        ));
    }

    #[tokio::test]
    async fn test_dispose() {
        let (ws, mut remote) = server(&options());

        ws.dispose();
        ws.dispose();
        assert_eq!(ws.state(), WebSocketState::Closed);

        let mut buffer = [0u8; 16];
        let res = ws.receive(&mut buffer).await;
        assert!(matches!(res, Err(WebSocketError::Disposed)));

        // both halves were released
        let mut bytes = Vec::new();
        remote.read_to_end(&mut bytes).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_abort_cancels_pending_receive() {
        let (ws, _remote) = server(&options());
        let mut buffer = [0u8; 16];

        let (res, _) = tokio::join!(ws.receive(&mut buffer), async {
            tokio::task::yield_now().await;
            ws.abort();
        });

        assert!(matches!(res, Err(WebSocketError::Cancelled)));
        assert_eq!(ws.state(), WebSocketState::Aborted);
    }

    #[tokio::test]
    async fn test_dropped_receive_aborts() {
        let (ws, _remote) = server(&options());
        let mut buffer = [0u8; 16];

        {
            let receive = ws.receive(&mut buffer);
            tokio::pin!(receive);
            assert!(futures::poll!(receive.as_mut()).is_pending());
        }

        assert_eq!(ws.state(), WebSocketState::Aborted);
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (ws, mut remote) = server(&options());

        // masked ping "hi" with a zero mask, then a masked binary frame
        remote
            .write_all(&[0x89, 0x82, 0, 0, 0, 0, b'h', b'i'])
            .await
            .unwrap();
        remote
            .write_all(&[0x82, 0x81, 0, 0, 0, 0, 7])
            .await
            .unwrap();

        let mut buffer = [0u8; 16];
        let res = ws.receive(&mut buffer).await.unwrap();
        assert_eq!(res.message_type, MessageType::Binary);
        assert_eq!(&buffer[..res.count], &[7]);

        let mut pong = [0u8; 4];
        remote.read_exact(&mut pong).await.unwrap();
        assert_eq!(pong, [0x8a, 0x02, b'h', b'i']);
    }

    #[tokio::test]
    async fn test_concurrent_send_aborts() {
        let (ws, _remote) = server_with_capacity(&options(), 64);
        let payload = vec![0u8; 1024];

        let first = ws.send(&payload, MessageType::Binary, false, true);
        tokio::pin!(first);
        assert!(futures::poll!(first.as_mut()).is_pending());

        let res = ws.send(b"x", MessageType::Binary, false, true).await;
        assert!(matches!(res, Err(WebSocketError::OperationInProgress)));
        assert_eq!(ws.state(), WebSocketState::Aborted);

        assert!(matches!(first.await, Err(WebSocketError::Cancelled)));
    }

    #[tokio::test]
    async fn test_close_output_waits_for_pending_send() {
        let (ws, mut remote) = server_with_capacity(&options(), 64);
        let payload = vec![7u8; 1024];

        let send = ws.send(&payload, MessageType::Binary, false, true);
        tokio::pin!(send);
        assert!(futures::poll!(send.as_mut()).is_pending());

        let mut bytes = vec![0u8; 4 + 1024 + 4];
        let (sent, closed, read) = tokio::join!(
            send,
            ws.close_output(Some(CloseCode::Normal), ""),
            remote.read_exact(&mut bytes),
        );

        sent.unwrap();
        closed.unwrap();
        read.unwrap();
        assert_eq!(ws.state(), WebSocketState::CloseSent);

        assert_eq!(&bytes[..4], &[0x82, 126, 0x04, 0x00]);
        assert!(bytes[4..1028].iter().all(|&b| b == 7));
        assert_eq!(&bytes[1028..], &[0x88, 0x02, 0x03, 0xe8]);
    }

    #[tokio::test]
    async fn test_close_waits_for_pending_receive() {
        let (ws, mut remote) = server(&options());
        let mut buffer = [0u8; 16];

        let receive = ws.receive(&mut buffer);
        tokio::pin!(receive);
        assert!(futures::poll!(receive.as_mut()).is_pending());

        let peer = async {
            let mut close = [0u8; 4];
            remote.read_exact(&mut close).await.unwrap();
            assert_eq!(close, [0x88, 0x02, 0x03, 0xe8]);
            remote
                .write_all(&[0x88, 0x82, 0, 0, 0, 0, 0x03, 0xe8])
                .await
                .unwrap();
        };

        let (received, closed, _) =
            tokio::join!(receive, ws.close(Some(CloseCode::Normal), ""), peer);

        let received = received.unwrap();
        assert_eq!(received.message_type, MessageType::Close);
        assert_eq!(
            received.close_status.map(|status| status.code),
            Some(CloseCode::Normal)
        );
        closed.unwrap();
        assert_eq!(ws.state(), WebSocketState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_skipped_while_writing() {
        let interval = std::time::Duration::from_secs(1);
        let (ws, mut remote) = server(&Options::default().with_keep_alive_interval(interval));

        {
            let _writer = ws.shared.writer.lock().await;
            tokio::time::sleep(interval * 4 + interval / 2).await;
        }

        // the first frame on the wire is ours, no ping was queued behind the lock
        ws.send(b"x", MessageType::Binary, false, true).await.unwrap();
        let mut frame = [0u8; 3];
        remote.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0x82, 0x01, b'x']);

        let mut ping = [0u8; 2];
        remote.read_exact(&mut ping).await.unwrap();
        assert_eq!(ping, [0x89, 0x00]);
    }
}
