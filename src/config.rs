use std::time::Duration;

/// Audio accumulation buffer capacity in bytes.
pub const DEFAULT_AUDIO_CAPACITY: usize = 1_000_000;

/// Video accumulation buffer capacity in bytes.
pub const DEFAULT_VIDEO_CAPACITY: usize = 10_000_000;

/// Block size used when pulling from a recording.
pub const DEFAULT_READ_BLOCK: usize = 100_000;

/// How far file replay may run ahead of the presentation clock.
pub const DEFAULT_PACING_THRESHOLD: Duration = Duration::from_secs(1);

/// Accumulation buffer between the UDP receive thread and the demultiplexer.
pub const DEFAULT_NETWORK_CAPACITY: usize = 20_000_000;

/// Scratch buffer for a single datagram receive.
pub const DEFAULT_DATAGRAM_BUFFER: usize = 500_000;

/// Receive buffer size requested from the operating system.
pub const DEFAULT_SOCKET_RECEIVE_BUFFER: usize = 10_000_000;

/// Upper bound for a blocking receive so teardown never hangs.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(250);

/// Tuning knobs for the feeds.
///
/// Nothing here is read from the environment or from disk; the surrounding
/// application owns where these values come from and passes them to the
/// `with_config` constructors.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub audio_capacity: usize,
    pub video_capacity: usize,
    pub read_block: usize,
    pub pacing_threshold: Duration,
    pub network_capacity: usize,
    pub datagram_buffer: usize,
    pub socket_receive_buffer: usize,
    pub receive_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            audio_capacity: DEFAULT_AUDIO_CAPACITY,
            video_capacity: DEFAULT_VIDEO_CAPACITY,
            read_block: DEFAULT_READ_BLOCK,
            pacing_threshold: DEFAULT_PACING_THRESHOLD,
            network_capacity: DEFAULT_NETWORK_CAPACITY,
            datagram_buffer: DEFAULT_DATAGRAM_BUFFER,
            socket_receive_buffer: DEFAULT_SOCKET_RECEIVE_BUFFER,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }
}

impl FeedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audio_capacity(mut self, bytes: usize) -> Self {
        self.audio_capacity = bytes;
        self
    }

    pub fn with_video_capacity(mut self, bytes: usize) -> Self {
        self.video_capacity = bytes;
        self
    }

    pub fn with_read_block(mut self, bytes: usize) -> Self {
        self.read_block = bytes.max(1);
        self
    }

    pub fn with_pacing_threshold(mut self, threshold: Duration) -> Self {
        self.pacing_threshold = threshold;
        self
    }

    pub fn with_network_capacity(mut self, bytes: usize) -> Self {
        self.network_capacity = bytes;
        self
    }

    pub fn with_datagram_buffer(mut self, bytes: usize) -> Self {
        self.datagram_buffer = bytes.clamp(1, 65_535 * 8);
        self
    }

    pub fn with_socket_receive_buffer(mut self, bytes: usize) -> Self {
        self.socket_receive_buffer = bytes;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}
