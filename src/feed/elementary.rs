use super::buffer::ElementaryBuffer;
use super::control::FeedControl;
use crate::config::FeedConfig;
use bytes::Bytes;
use std::sync::Arc;

/// The two channels handed to the decode graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Audio,
    Video,
}

/// Audio and video accumulation buffers plus the feed lifecycle.
///
/// This is the base every feed builds on. Used on its own it is the feed
/// for already separated elementary streams: the producer pushes data with
/// [`add_audio`](Self::add_audio) and [`add_video`](Self::add_video).
#[derive(Debug)]
pub struct BufferedElementaryFeed {
    control: Arc<FeedControl>,
    audio: ElementaryBuffer,
    video: ElementaryBuffer,
}

impl Default for BufferedElementaryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedElementaryFeed {
    /// A pushed feed with default buffer sizes.
    pub fn new() -> Self {
        Self::with_config(&FeedConfig::default())
    }

    pub fn with_config(config: &FeedConfig) -> Self {
        let control = Arc::new(FeedControl::new());
        control.set_external_feed(true);
        Self::with_control(control, config)
    }

    /// Builds the buffers around an existing control, leaving its feed
    /// mode alone.
    pub fn with_control(control: Arc<FeedControl>, config: &FeedConfig) -> Self {
        Self {
            control,
            audio: ElementaryBuffer::new(config.audio_capacity),
            video: ElementaryBuffer::new(config.video_capacity),
        }
    }

    pub fn control(&self) -> &Arc<FeedControl> {
        &self.control
    }

    fn buffer(&self, channel: Channel) -> &ElementaryBuffer {
        match channel {
            Channel::Audio => &self.audio,
            Channel::Video => &self.video,
        }
    }

    /// Copies `data` into the channel buffer.
    ///
    /// Does nothing while the feed is stopped or disposing. Data that does
    /// not fit is dropped; the result then tells whether older data is still
    /// waiting. The consumer is woken whenever the result is `true`.
    pub fn append(&self, channel: Channel, data: &[u8]) -> bool {
        if !self.control.is_running() || self.control.is_disposing() {
            return false;
        }

        let has_data = self
            .buffer(channel)
            .append(data, || self.control.is_disposing())
            .has_data();
        if has_data {
            self.control.report_available(channel);
        }
        has_data
    }

    pub fn add_audio(&self, data: &[u8]) -> bool {
        self.append(Channel::Audio, data)
    }

    pub fn add_video(&self, data: &[u8]) -> bool {
        self.append(Channel::Video, data)
    }

    /// Takes all data buffered for `channel`.
    pub fn drain_next_chunk(&self, channel: Channel) -> Option<Bytes> {
        if self.control.is_disposing() {
            return None;
        }
        self.buffer(channel).drain(|| self.control.is_disposing())
    }

    /// Drops everything buffered here and in the decode graph.
    pub fn clear_buffers(&self) {
        self.audio.clear();
        self.video.clear();
        self.control.clear_graph_buffers();
    }
}

/// A source of audio and video chunks for the decode graph.
///
/// Implementors expose their [`BufferedElementaryFeed`] and override only
/// what they add on top of it; the provided methods carry the shared
/// behaviour.
pub trait FeedSource: Send + Sync {
    fn elementary(&self) -> &BufferedElementaryFeed;

    fn control(&self) -> &FeedControl {
        self.elementary().control()
    }

    /// Next chunk for `channel`, `None` if nothing is ready.
    fn next_chunk(&self, channel: Channel) -> Option<Bytes> {
        self.elementary().drain_next_chunk(channel)
    }

    fn clear_buffers(&self) {
        self.elementary().clear_buffers()
    }

    fn start(&self) {
        self.control().start()
    }

    fn stop(&self) {
        self.control().stop()
    }

    /// Releases resources owned by the feed variant. Called once from
    /// [`dispose`](Self::dispose) after the feed stopped.
    fn on_dispose(&self) {}

    /// Tears the feed down; repeated calls do nothing.
    fn dispose(&self) {
        let control = self.control();
        if !control.begin_dispose() {
            return;
        }
        control.stop_graph();
        self.stop();
        self.on_dispose();
        control.wake_all();
    }
}

impl FeedSource for BufferedElementaryFeed {
    fn elementary(&self) -> &BufferedElementaryFeed {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_feed() -> BufferedElementaryFeed {
        let config = FeedConfig::default()
            .with_audio_capacity(8)
            .with_video_capacity(16);
        BufferedElementaryFeed::with_config(&config)
    }

    #[test]
    fn test_append_requires_running() {
        let feed = small_feed();
        assert!(!feed.add_audio(b"abc"));
        assert!(feed.next_chunk(Channel::Audio).is_none());

        feed.start();
        assert!(feed.add_audio(b"abc"));
        assert_eq!(feed.next_chunk(Channel::Audio).unwrap(), Bytes::from_static(b"abc"));
        assert!(feed.next_chunk(Channel::Audio).is_none());
    }

    #[test]
    fn test_channels_are_independent() {
        let feed = small_feed();
        feed.start();
        feed.add_audio(b"aa");
        feed.add_video(b"vvvv");

        assert_eq!(feed.next_chunk(Channel::Video).unwrap(), Bytes::from_static(b"vvvv"));
        assert_eq!(feed.next_chunk(Channel::Audio).unwrap(), Bytes::from_static(b"aa"));
    }

    #[test]
    fn test_overflow_reports_pending_data() {
        let feed = small_feed();
        feed.start();
        assert!(!feed.add_audio(b"123456789"));
        assert!(feed.add_audio(b"12345"));
        assert!(feed.add_audio(b"6789"));
        assert_eq!(feed.next_chunk(Channel::Audio).unwrap(), Bytes::from_static(b"12345"));
    }

    #[test]
    fn test_clear_and_dispose() {
        let feed = small_feed();
        feed.start();
        feed.add_audio(b"aa");
        feed.add_video(b"vv");
        feed.clear_buffers();
        assert!(feed.next_chunk(Channel::Audio).is_none());
        assert!(feed.next_chunk(Channel::Video).is_none());

        feed.add_video(b"vv");
        feed.dispose();
        assert!(feed.control().is_disposing());
        assert!(!feed.control().is_running());
        assert!(feed.next_chunk(Channel::Video).is_none());
        assert!(!feed.add_video(b"vv"));
        feed.dispose();
    }

    #[test]
    fn test_elementary_feed_is_pushed() {
        assert!(BufferedElementaryFeed::new().control().is_external_feed());
    }
}
