//! # Positionable byte sources
//!
//! A [`VirtualByteSource`] is what [`PacedFileFeed`](crate::feed::PacedFileFeed)
//! replays from: one recording file, or a recording split over several files
//! presented as one timeline.
//!
//! ```rust,no_run
//! use tsfeed::source::{MultiFileSource, VirtualByteSource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut source = MultiFileSource::open(["rec.0.ts", "rec.1.ts"])?;
//! source.set_position(source.len() / 2)?;
//!
//! let mut block = vec![0u8; 100_000];
//! let read = source.read(&mut block)?;
//! println!("{}: {} bytes at {}", source.name(), read, source.position());
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::path::Path;

/// Multi-file timeline
pub mod multi;

/// Single, possibly growing, file
pub mod single;

pub use multi::MultiFileSource;
pub use single::SingleFileSource;

/// A randomly positionable byte source.
///
/// Implementations are driven from behind a lock by the feeds, so every
/// method may assume exclusive access.
pub trait VirtualByteSource: Send {
    /// Display name of the source, empty once closed.
    fn name(&self) -> String;

    /// Current total length in bytes. Grows while a recording is written.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self) -> u64;

    /// Moves the read position; fails with
    /// [`FeedError::OutOfRange`](crate::FeedError::OutOfRange) beyond
    /// [`len`](Self::len).
    fn set_position(&mut self, position: u64) -> Result<()>;

    /// Reads up to `buf.len()` bytes at the current position. Zero means no
    /// data is available right now.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Releases all file handles. Later reads return zero.
    fn close(&mut self);
}

impl<S: VirtualByteSource + ?Sized> VirtualByteSource for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        (**self).set_position(position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
