//! # Feeds
//!
//! A feed turns some input into two streams of byte chunks, audio and
//! video, for a downstream decode graph:
//!
//! - [`BufferedElementaryFeed`]: already separated elementary streams
//!   pushed in by the caller
//! - [`StreamDemultiplexer`]: a pushed MPEG transport stream, routed by
//!   its program tables
//! - [`PacedFileFeed`]: a recorded transport stream replayed no faster
//!   than the graph consumes it
//! - [`NetworkFeed`]: a transport stream received over UDP
//!
//! [`FeedPump`] runs the two consumer threads that carry the chunks into a
//! [`DecodeGraph`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsfeed::feed::{DecodeGraph, FeedPump, FeedSource, PacedFileFeed};
//!
//! # fn run(graph: Arc<dyn DecodeGraph>) -> tsfeed::Result<()> {
//! let feed = Arc::new(PacedFileFeed::open("recording.ts")?);
//! let decoder = Arc::downgrade(&feed);
//! feed.demux().set_stream_changed(Some(Arc::new(move |_rebuild: bool| {
//!     if let Some(feed) = decoder.upgrade() {
//!         feed.demux().set_decoder();
//!     }
//! })));
//!
//! let mut pump = FeedPump::spawn(feed.clone(), graph)?;
//! feed.start();
//! // ...
//! pump.dispose();
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod control;
pub mod demux;
pub mod elementary;
pub mod file;
pub mod network;
pub mod pump;

#[cfg(test)]
mod testing;

pub use buffer::{AppendOutcome, ElementaryBuffer};
pub use control::{FeedControl, PULL_INTERVAL};
pub use demux::{
    AudioTrackDescriptor, PidMapping, StreamChangedHandler, StreamDemultiplexer, TeletextHandler,
};
pub use elementary::{BufferedElementaryFeed, Channel, FeedSource};
pub use file::PacedFileFeed;
pub use network::{NetworkFeed, WaitDataHandler};
pub use pump::{DecodeGraph, FeedPump};
