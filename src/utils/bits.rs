use crate::error::{FeedError, Result};

/// A bit-level reader over MPEG-2 systems syntax.
///
/// PSI tables and PES headers pack their fields MSB first with arbitrary bit
/// widths (13-bit PIDs, 12-bit lengths, 33-bit timestamps split by marker
/// bits). The reader walks those fields in order and fails with
/// [`FeedError::InvalidData`] instead of panicking when a section is shorter
/// than its declared layout.
///
/// Example:
/// ```
/// use tsfeed::utils::BitReader;
///
/// let data = [0xE1, 0x00];
/// let mut reader = BitReader::new(&data);
///
/// reader.skip_bits(3).unwrap();                 // reserved
/// assert_eq!(reader.read_bits(13).unwrap(), 0x100); // PID
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(FeedError::InvalidData("reached end of data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits (at most 64) as a big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        if n > 64 {
            return Err(FeedError::InvalidData("too many bits requested".into()));
        }
        if (n as usize) > self.available_bits() {
            return Err(FeedError::InvalidData("reached end of data".into()));
        }

        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | u64::from(self.read_bit()?);
        }

        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if (n as usize) > self.available_bits() {
            return Err(FeedError::InvalidData("skip past end of data".into()));
        }
        let total = self.bit_offset as usize + n as usize;
        self.byte_offset += total / 8;
        self.bit_offset = (total % 8) as u8;
        Ok(())
    }

    /// Returns the next `n` whole bytes; the reader must be byte aligned.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bit_offset != 0 {
            return Err(FeedError::InvalidData("unaligned byte read".into()));
        }
        let end = self.byte_offset + n;
        if end > self.data.len() {
            return Err(FeedError::InvalidData(format!(
                "need {} bytes, {} left",
                n,
                self.data.len() - self.byte_offset
            )));
        }
        let bytes = &self.data[self.byte_offset..end];
        self.byte_offset = end;
        Ok(bytes)
    }

    /// Returns number of bits available to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset)) * 8 - self.bit_offset as usize
    }
}
