use super::{file_stem, VirtualByteSource};
use crate::error::{FeedError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A single recording file, possibly still being written.
///
/// After [`close`](VirtualByteSource::close) the source reports an empty
/// name, zero length and position, and reads nothing.
#[derive(Debug)]
pub struct SingleFileSource {
    path: PathBuf,
    file: Option<File>,
    position: u64,
}

impl SingleFileSource {
    /// Opens `path` for shared reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VirtualByteSource for SingleFileSource {
    fn name(&self) -> String {
        match self.file {
            Some(_) => file_stem(&self.path),
            None => String::new(),
        }
    }

    fn len(&self) -> u64 {
        self.file
            .as_ref()
            .and_then(|file| file.metadata().ok())
            .map_or(0, |meta| meta.len())
    }

    fn position(&self) -> u64 {
        if self.file.is_some() {
            self.position
        } else {
            0
        }
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        let len = self.len();
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        if position > len {
            return Err(FeedError::OutOfRange(format!(
                "position {} beyond length {}",
                position, len
            )));
        }
        file.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let read = file.read(buf)?;
        self.position += read as u64;
        Ok(read)
    }

    fn close(&mut self) {
        self.file = None;
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn recording(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_and_seek() {
        let file = recording(1000);
        let mut source = SingleFileSource::open(file.path()).unwrap();
        assert_eq!(source.len(), 1000);
        assert!(!source.name().is_empty());

        source.set_position(500).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(source.read(&mut buf).unwrap(), 10);
        assert_eq!(buf[0], (500 % 251) as u8);
        assert_eq!(source.position(), 510);

        assert!(source.set_position(1001).is_err());
        assert_eq!(source.position(), 510);
    }

    #[test]
    fn test_growing_file() {
        let mut file = recording(100);
        let mut source = SingleFileSource::open(file.path()).unwrap();
        let mut buf = vec![0u8; 200];
        assert_eq!(source.read(&mut buf).unwrap(), 100);
        assert_eq!(source.read(&mut buf).unwrap(), 0);

        file.write_all(&[0xAA; 50]).unwrap();
        file.flush().unwrap();
        assert_eq!(source.len(), 150);
        assert_eq!(source.read(&mut buf).unwrap(), 50);
    }

    #[test]
    fn test_closed_source_is_inert() {
        let file = recording(100);
        let mut source = SingleFileSource::open(file.path()).unwrap();
        source.close();

        let mut buf = [0u8; 10];
        assert_eq!(source.name(), "");
        assert_eq!(source.len(), 0);
        assert_eq!(source.position(), 0);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert!(source.set_position(10).is_ok());
    }
}
