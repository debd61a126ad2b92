use super::{file_stem, VirtualByteSource};
use crate::error::{FeedError, Result};
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    /// Cleared once the file has vanished; the slot is never reused.
    present: bool,
}

/// An ordered list of recording files replayed as one timeline.
///
/// Files are kept in an append-only arena. All files but the last are
/// opened on demand and closed once the read position leaves them; the
/// last file stays open because it may still be growing. A file that
/// disappears from disk or can no longer be read is marked absent and
/// skipped.
#[derive(Debug)]
pub struct MultiFileSource {
    entries: Vec<Entry>,
    /// Handle of the last entry.
    last: Option<File>,
    /// Open handle of a non-last entry.
    current: Option<(usize, File)>,
    position: u64,
    name: String,
}

impl MultiFileSource {
    /// Opens a timeline over `paths`. The last file is opened immediately.
    pub fn open<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let entries: Vec<Entry> = paths
            .into_iter()
            .map(|path| Entry {
                path: path.into(),
                present: true,
            })
            .collect();

        let (first, last) = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(FeedError::InvalidArgument("no files given".into())),
        };
        let name = file_stem(&first.path);
        let last = File::open(&last.path)?;

        Ok(Self {
            entries,
            last: Some(last),
            current: None,
            position: 0,
            name,
        })
    }

    /// Appends a new trailing file; the previous last file becomes an
    /// ordinary on-demand entry. On failure the list is unchanged.
    pub fn add<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        debug!("appending {} to {}", path.display(), self.name);
        self.entries.push(Entry {
            path,
            present: true,
        });
        self.last = Some(file);
        Ok(())
    }

    /// Paths of the files still part of the timeline.
    pub fn files(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|entry| entry.present)
            .map(|entry| entry.path.clone())
            .collect()
    }

    fn last_index(&self) -> usize {
        self.entries.len() - 1
    }

    /// Length of one entry, `None` when it can no longer be found.
    fn entry_len(&self, index: usize) -> Option<u64> {
        if index == self.last_index() {
            return self.last.as_ref()?.metadata().ok().map(|meta| meta.len());
        }
        if let Some((open, file)) = &self.current {
            if *open == index {
                return file.metadata().ok().map(|meta| meta.len());
            }
        }
        fs::metadata(&self.entries[index].path)
            .ok()
            .map(|meta| meta.len())
    }

    /// Drops a vanished file and re-bases the position to its start.
    fn forget(&mut self, index: usize, start: u64) {
        warn!(
            "dropping {}, continuing at offset {}",
            self.entries[index].path.display(),
            start
        );
        self.entries[index].present = false;
        self.position = start;
        if matches!(self.current, Some((open, _)) if open == index) {
            self.current = None;
        }
    }

    /// Maps the position to `(entry index, offset in entry)`.
    fn resolve(&mut self) -> Option<(usize, u64)> {
        'retry: loop {
            let mut start = 0;
            for index in 0..self.entries.len() {
                if !self.entries[index].present {
                    continue;
                }
                let Some(len) = self.entry_len(index) else {
                    if index == self.last_index() {
                        return None;
                    }
                    self.forget(index, start);
                    continue 'retry;
                };
                if self.position < start + len || index == self.last_index() {
                    return Some((index, self.position - start));
                }
                start += len;
            }
            return None;
        }
    }

    /// Reads from a single entry at `offset`.
    fn read_entry(&mut self, index: usize, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let file = if index == self.last_index() {
            self.current = None;
            match self.last.as_mut() {
                Some(file) => file,
                None => return Ok(0),
            }
        } else {
            if !matches!(self.current, Some((open, _)) if open == index) {
                let file = File::open(&self.entries[index].path)?;
                self.current = Some((index, file));
            }
            match self.current.as_mut() {
                Some((_, file)) => file,
                None => return Ok(0),
            }
        };
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

impl VirtualByteSource for MultiFileSource {
    fn name(&self) -> String {
        if self.last.is_some() {
            self.name.clone()
        } else {
            String::new()
        }
    }

    fn len(&self) -> u64 {
        if self.last.is_none() {
            return 0;
        }
        (0..self.entries.len())
            .filter(|&index| self.entries[index].present)
            .filter_map(|index| self.entry_len(index))
            .sum()
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        let len = self.len();
        if position > len {
            return Err(FeedError::OutOfRange(format!(
                "position {} beyond length {}",
                position, len
            )));
        }
        self.position = position;
        self.current = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() && self.last.is_some() {
            let Some((index, offset)) = self.resolve() else {
                break;
            };
            match self.read_entry(index, offset, &mut buf[filled..]) {
                Ok(0) => {
                    if index == self.last_index() {
                        break;
                    }
                    // shorter than its metadata claimed, move on
                    let remaining = self.entry_len(index).unwrap_or(offset);
                    self.position += remaining.saturating_sub(offset).max(1);
                    if self.position > self.len() {
                        break;
                    }
                }
                Ok(read) => {
                    filled += read;
                    self.position += read as u64;
                }
                Err(err) if index != self.last_index() => {
                    debug!("reading {} failed: {}", self.entries[index].path.display(), err);
                    let start = self.position - offset;
                    self.forget(index, start);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(filled)
    }

    fn close(&mut self) {
        self.current = None;
        self.last = None;
        self.position = 0;
    }
}
