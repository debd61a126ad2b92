use super::elementary::Channel;
use super::pump::DecodeGraph;
use crate::error::{FeedError, Result};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a pull-mode consumer sleeps between polls.
pub const PULL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct Signal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn notify(&self) {
        let mut pending = self.pending.lock();
        if !*pending {
            *pending = true;
            self.cond.notify_one();
        }
    }

    fn wait(&self, timeout: Option<Duration>) {
        let mut pending = self.pending.lock();
        if !*pending {
            match timeout {
                Some(timeout) => {
                    self.cond.wait_for(&mut pending, timeout);
                }
                None => self.cond.wait(&mut pending),
            }
        }
        *pending = false;
    }
}

/// Lifecycle flags and wake-up signals shared by a feed and the threads
/// pulling from it.
///
/// A feed is either pushed (data arrives from outside and reports itself
/// with [`report_available`](Self::report_available)) or pulled, in which
/// case the consumer polls every [`PULL_INTERVAL`].
#[derive(Default)]
pub struct FeedControl {
    running: AtomicBool,
    disposing: AtomicBool,
    external_feed: AtomicBool,
    audio: Signal,
    video: Signal,
    graph: RwLock<Option<Arc<dyn DecodeGraph>>>,
}

impl FeedControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::Acquire)
    }

    pub fn is_external_feed(&self) -> bool {
        self.external_feed.load(Ordering::Acquire)
    }

    /// Switches between push and pull mode. Leaving push mode wakes both
    /// consumers so they start polling.
    pub fn set_external_feed(&self, external: bool) {
        if self.external_feed.swap(external, Ordering::AcqRel) == external {
            return;
        }
        if !external {
            self.wake_all();
        }
    }

    pub fn report_audio_available(&self) {
        self.audio.notify();
    }

    pub fn report_video_available(&self) {
        self.video.notify();
    }

    pub fn report_available(&self, channel: Channel) {
        match channel {
            Channel::Audio => self.report_audio_available(),
            Channel::Video => self.report_video_available(),
        }
    }

    pub fn wake_all(&self) {
        self.report_audio_available();
        self.report_video_available();
    }

    /// Blocks the consumer of `channel` until data is reported, or for one
    /// poll interval in pull mode.
    pub fn wait(&self, channel: Channel) {
        let timeout = if self.is_external_feed() {
            None
        } else {
            Some(PULL_INTERVAL)
        };
        match channel {
            Channel::Audio => self.audio.wait(timeout),
            Channel::Video => self.video.wait(timeout),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.wake_all();
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Marks the feed as disposing. Returns `false` if it already was.
    pub fn begin_dispose(&self) -> bool {
        !self.disposing.swap(true, Ordering::AcqRel)
    }

    /// Connects the decode graph. Only one graph may ever be attached, and
    /// none once the feed is being disposed.
    pub fn attach_graph(&self, graph: Arc<dyn DecodeGraph>) -> Result<()> {
        if self.is_disposing() {
            return Err(FeedError::Disposed);
        }
        let mut slot = self.graph.write();
        if slot.is_some() {
            return Err(FeedError::InvalidArgument("decode graph already attached".into()));
        }
        *slot = Some(graph);
        Ok(())
    }

    pub fn graph(&self) -> Option<Arc<dyn DecodeGraph>> {
        self.graph.read().clone()
    }

    /// Reconfigures the graph for the given codecs and starts the feed.
    pub fn start_graph(&self, alternate_video: bool, alternate_audio: bool) {
        if let Some(graph) = self.graph() {
            graph.show(alternate_video, alternate_audio);
        }
        self.start();
    }

    pub fn stop_graph(&self) {
        if let Some(graph) = self.graph() {
            graph.stop();
        }
    }

    pub fn clear_graph_buffers(&self) {
        if let Some(graph) = self.graph() {
            graph.clear_buffers();
        }
    }

    /// How far the graph's buffered data runs ahead of playback.
    pub fn stream_time_offset(&self) -> Option<Duration> {
        self.graph().and_then(|graph| graph.stream_time_offset())
    }
}

impl std::fmt::Debug for FeedControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedControl")
            .field("running", &self.is_running())
            .field("disposing", &self.is_disposing())
            .field("external_feed", &self.is_external_feed())
            .field("graph", &self.graph.read().is_some())
            .finish()
    }
}
