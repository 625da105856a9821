use std::time::Duration;

use crate::{
    frame::{MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE},
    CompressionLevel,
};

/// Default interval between keep-alive pings: 2 minutes.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Default size of the receive buffer: 4 KiB.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4 * 1024;

/// Smallest receive buffer, large enough to hold a complete control frame.
pub const MIN_RECEIVE_BUFFER_SIZE: usize = MAX_HEAD_SIZE + MAX_CONTROL_PAYLOAD;

/// Configuration options for a WebSocket connection.
///
/// `Options` is consumed when the connection is created, and by [`negotiate`](crate::negotiate)
/// when it builds the compression provider.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use wscompress::{Options, CompressionLevel};
///
/// let options = Options::default()
///     .with_keep_alive_interval(Duration::from_secs(30))
///     .with_receive_buffer_size(16 * 1024)
///     .with_compression_level(CompressionLevel::fast());
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between the pings sent to keep the connection alive. `None` disables them.
    ///
    /// Default: 2 minutes.
    pub keep_alive_interval: Option<Duration>,

    /// Size of the buffer frames are read into.
    ///
    /// Values below [`MIN_RECEIVE_BUFFER_SIZE`] are raised to it.
    ///
    /// Default: 4 KiB.
    pub receive_buffer_size: usize,

    /// Largest frame payload the compression providers send; larger messages are fragmented.
    /// `None` sends every message in a single frame.
    ///
    /// Default: `None`.
    pub send_segment_size: Option<usize>,

    /// Compression level of the deflate provider.
    pub compression_level: CompressionLevel,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            keep_alive_interval: Some(DEFAULT_KEEP_ALIVE_INTERVAL),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            send_segment_size: None,
            compression_level: CompressionLevel::default(),
        }
    }
}

impl Options {
    /// Sets the keep-alive interval. A zero interval disables keep-alive pings.
    pub fn with_keep_alive_interval(self, interval: Duration) -> Self {
        Self {
            keep_alive_interval: (!interval.is_zero()).then_some(interval),
            ..self
        }
    }

    /// Disables keep-alive pings.
    pub fn without_keep_alive(self) -> Self {
        Self {
            keep_alive_interval: None,
            ..self
        }
    }

    /// Sets the size of the receive buffer.
    pub fn with_receive_buffer_size(self, size: usize) -> Self {
        Self {
            receive_buffer_size: size,
            ..self
        }
    }

    /// Sets the largest frame payload sent by the compression providers.
    /// A size of zero sends every message in a single frame.
    pub fn with_send_segment_size(self, size: usize) -> Self {
        Self {
            send_segment_size: (size > 0).then_some(size),
            ..self
        }
    }

    /// Sets the compression level used when permessage-deflate is negotiated.
    pub fn with_compression_level(self, level: CompressionLevel) -> Self {
        Self {
            compression_level: level,
            ..self
        }
    }

    /// The receive buffer size actually allocated.
    pub(crate) fn effective_receive_buffer_size(&self) -> usize {
        self.receive_buffer_size.max(MIN_RECEIVE_BUFFER_SIZE)
    }
}
