use super::elementary::{Channel, FeedSource};
use crate::error::Result;
use bytes::Bytes;
use log::{debug, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The downstream decode/render graph fed by a [`FeedPump`].
pub trait DecodeGraph: Send + Sync {
    /// Rebuilds the graph for the given codecs (H.264 video, AC3 audio).
    fn show(&self, alternate_video: bool, alternate_audio: bool);

    fn inject_audio(&self, chunk: Bytes);

    fn inject_video(&self, chunk: Bytes);

    /// Time buffered in the graph ahead of what has been presented.
    fn stream_time_offset(&self) -> Option<Duration>;

    fn clear_buffers(&self);

    fn stop(&self);
}

/// Runs the audio and video consumer threads that move chunks from a
/// [`FeedSource`] into a [`DecodeGraph`].
///
/// Each thread sleeps until its channel reports data (push mode) or for
/// one poll interval (pull mode), then asks the source for the next chunk.
/// Dropping the pump disposes the source and joins both threads.
pub struct FeedPump {
    source: Arc<dyn FeedSource>,
    threads: Vec<JoinHandle<()>>,
}

impl FeedPump {
    pub fn spawn(source: Arc<dyn FeedSource>, graph: Arc<dyn DecodeGraph>) -> Result<Self> {
        source.control().attach_graph(graph.clone())?;

        let mut pump = FeedPump {
            source: source.clone(),
            threads: Vec::with_capacity(2),
        };
        for (channel, name) in [(Channel::Audio, "feed-audio"), (Channel::Video, "feed-video")] {
            let source = source.clone();
            let graph = graph.clone();
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run(source, graph, channel))?;
            pump.threads.push(handle);
        }

        info!("feed pump started");
        Ok(pump)
    }

    pub fn source(&self) -> &Arc<dyn FeedSource> {
        &self.source
    }

    /// Disposes the source and waits for both threads.
    pub fn dispose(&mut self) {
        self.source.dispose();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for FeedPump {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run(source: Arc<dyn FeedSource>, graph: Arc<dyn DecodeGraph>, channel: Channel) {
    let control = source.control();
    loop {
        if !control.is_disposing() {
            control.wait(channel);
        }
        if control.is_disposing() {
            break;
        }
        if !control.is_running() {
            continue;
        }

        let Some(chunk) = source.next_chunk(channel) else {
            continue;
        };
        if control.is_running() {
            match channel {
                Channel::Audio => graph.inject_audio(chunk),
                Channel::Video => graph.inject_video(chunk),
            }
        }
    }
    debug!("{:?} consumer finished", channel);
}
