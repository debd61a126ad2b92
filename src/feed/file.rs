use super::control::FeedControl;
use super::demux::StreamDemultiplexer;
use super::elementary::{BufferedElementaryFeed, Channel, FeedSource};
use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::format::ts::tokenizer::{PacketTokenizer, TsTokenizer};
use crate::source::{MultiFileSource, SingleFileSource, VirtualByteSource};
use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;

/// Replays a recorded transport stream from a [`VirtualByteSource`].
///
/// The feed is pulled: whenever the audio consumer finds its buffer empty
/// it reads the next block from the source and demultiplexes it, unless
/// the decode graph already holds more than the pacing threshold of data.
/// Video is filled as a side effect of the audio reads.
pub struct PacedFileFeed {
    demux: StreamDemultiplexer,
    source: Mutex<Option<Box<dyn VirtualByteSource>>>,
    block: Mutex<Vec<u8>>,
    pacing_threshold: Duration,
}

impl PacedFileFeed {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = SingleFileSource::open(path)?;
        Ok(Self::with_source(Box::new(source), &FeedConfig::default()))
    }

    /// Replays a recording split over several files.
    pub fn open_files<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let source = MultiFileSource::open(paths.into_iter().map(|p| p.as_ref().to_path_buf()))?;
        Ok(Self::with_source(Box::new(source), &FeedConfig::default()))
    }

    pub fn with_source(source: Box<dyn VirtualByteSource>, config: &FeedConfig) -> Self {
        Self::with_tokenizer(source, Box::new(TsTokenizer::new()), config)
    }

    pub fn with_tokenizer(
        source: Box<dyn VirtualByteSource>,
        tokenizer: Box<dyn PacketTokenizer>,
        config: &FeedConfig,
    ) -> Self {
        let demux = StreamDemultiplexer::with_tokenizer(tokenizer, config);
        demux.control().set_external_feed(false);

        Self {
            demux,
            source: Mutex::new(Some(source)),
            block: Mutex::new(vec![0u8; config.read_block.max(1)]),
            pacing_threshold: config.pacing_threshold,
        }
    }

    pub fn demux(&self) -> &StreamDemultiplexer {
        &self.demux
    }

    /// Replaces the source; the old one is closed.
    pub fn change_source(&self, source: Box<dyn VirtualByteSource>) {
        let old = self.source.lock().replace(source);
        if let Some(mut old) = old {
            debug!("replacing source {}", old.name());
            old.close();
        }
    }

    pub fn name(&self) -> String {
        self.source
            .lock()
            .as_ref()
            .map(|source| source.name())
            .unwrap_or_default()
    }

    /// Read position as a fraction of the current length.
    pub fn position(&self) -> f64 {
        let source = self.source.lock();
        let Some(source) = source.as_ref() else {
            return 0.0;
        };
        let (position, len) = (source.position(), source.len());
        if len == 0 {
            0.0
        } else if position > len {
            1.0
        } else {
            position as f64 / len as f64
        }
    }

    /// Jumps to a fraction of the current length, `0.0..=1.0`.
    pub fn set_position(&self, fraction: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(FeedError::OutOfRange(format!("position {}", fraction)));
        }
        let mut source = self.source.lock();
        match source.as_mut() {
            Some(source) => {
                let len = source.len();
                source.set_position(((fraction * len as f64) as u64).min(len))
            }
            None => Ok(()),
        }
    }

    pub fn absolute_position(&self) -> u64 {
        self.source
            .lock()
            .as_ref()
            .map_or(0, |source| source.position())
    }

    pub fn set_absolute_position(&self, position: u64) -> Result<()> {
        match self.source.lock().as_mut() {
            Some(source) => source.set_position(position),
            None => Ok(()),
        }
    }

    /// Reads one block into the demultiplexer. Returns `false` at the end
    /// of the available data.
    fn fill(&self, block: &mut [u8]) -> bool {
        let read = {
            let mut source = self.source.lock();
            let Some(source) = source.as_mut() else {
                return false;
            };
            match source.read(block) {
                Ok(read) => read,
                Err(err) => {
                    warn!("reading {} failed: {}", source.name(), err);
                    0
                }
            }
        };
        read > 0 && self.demux.add_payload(&block[..read])
    }
}

impl FeedSource for PacedFileFeed {
    fn elementary(&self) -> &BufferedElementaryFeed {
        self.demux.elementary()
    }

    fn control(&self) -> &FeedControl {
        self.demux.control()
    }

    fn next_chunk(&self, channel: Channel) -> Option<Bytes> {
        if channel == Channel::Video {
            return self.demux.next_chunk(channel);
        }

        let ahead = self.control().stream_time_offset().unwrap_or_default();
        if ahead >= self.pacing_threshold {
            return None;
        }

        let mut chunk = self.demux.next_chunk(channel);
        if chunk.is_some() {
            return chunk;
        }

        let mut block = self.block.lock();
        while chunk.is_none() && self.control().is_running() {
            if !self.fill(&mut block) {
                break;
            }
            chunk = self.demux.next_chunk(channel);
        }
        chunk
    }

    fn clear_buffers(&self) {
        self.demux.clear_buffers();
    }

    fn stop(&self) {
        self.demux.stop();
    }

    fn on_dispose(&self) {
        self.demux.on_dispose();
        if let Some(mut source) = self.source.lock().take() {
            source.close();
        }
    }
}
