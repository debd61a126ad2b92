use super::types::time_to_pts;
use crate::error::{FeedError, Result};
use crate::utils::BitReader;
use bytes::{BufMut, BytesMut};
use std::time::Duration;

/// Size of the fixed PES header up to and including the header data length.
pub const PES_FIXED_HEADER_SIZE: usize = 9;

/// Packetized Elementary Stream (PES) header.
///
/// Only the fields the feeds act on are kept: the stream id, the declared
/// packet length and the presentation/decoding timestamps. Everything else in
/// the optional header is skipped using `header_data_length`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PESHeader {
    /// Stream identifier indicating content type (video/audio/etc.)
    pub stream_id: u8,
    /// Bytes following the length field; zero means unbounded (video)
    pub packet_length: u16,
    pub scrambling_control: u8,
    pub data_alignment: bool,
    /// Length of the optional header data following the fixed part
    pub header_data_length: u8,
    /// Presentation Time Stamp (33 bits, 90 kHz)
    pub pts: Option<u64>,
    /// Decoding Time Stamp (33 bits, 90 kHz)
    pub dts: Option<u64>,
}

impl PESHeader {
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            ..Default::default()
        }
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(time_to_pts(pts));
        self
    }

    pub fn with_dts(mut self, dts: Duration) -> Self {
        self.dts = Some(time_to_pts(dts));
        self
    }

    /// Parses the header at the start of a PES packet.
    ///
    /// Returns the header together with the offset of the first payload byte.
    pub fn parse(data: &[u8]) -> Result<(PESHeader, usize)> {
        if data.len() < PES_FIXED_HEADER_SIZE {
            return Err(FeedError::InvalidData("PES header too short".into()));
        }
        if data[..3] != [0x00, 0x00, 0x01] {
            return Err(FeedError::InvalidData("missing PES start code".into()));
        }

        let mut reader = BitReader::new(&data[3..]);
        let stream_id = reader.read_u8()?;
        let packet_length = reader.read_u16()?;
        if reader.read_bits(2)? != 0b10 {
            return Err(FeedError::InvalidData("unexpected PES header marker".into()));
        }
        let scrambling_control = reader.read_bits(2)? as u8;
        reader.skip_bits(1)?; // priority
        let data_alignment = reader.read_bit()?;
        reader.skip_bits(2)?; // copyright, original
        let pts_dts_flags = reader.read_bits(2)? as u8;
        reader.skip_bits(6)?;
        let header_data_length = reader.read_u8()?;

        let payload_offset = PES_FIXED_HEADER_SIZE + header_data_length as usize;
        if payload_offset > data.len() {
            return Err(FeedError::InvalidData(format!(
                "PES header data length {} exceeds packet",
                header_data_length
            )));
        }

        let optional = &data[PES_FIXED_HEADER_SIZE..payload_offset];
        let mut reader = BitReader::new(optional);
        let pts = if pts_dts_flags & 0x02 != 0 {
            Some(read_timestamp(&mut reader)?)
        } else {
            None
        };
        let dts = if pts_dts_flags == 0x03 {
            Some(read_timestamp(&mut reader)?)
        } else {
            None
        };

        Ok((
            PESHeader {
                stream_id,
                packet_length,
                scrambling_control,
                data_alignment,
                header_data_length,
                pts,
                dts,
            },
            payload_offset,
        ))
    }

    fn timestamp_len(&self) -> usize {
        match (self.pts, self.dts) {
            (Some(_), Some(_)) => 10,
            (Some(_), None) => 5,
            _ => 0,
        }
    }

    /// Writes the header; `packet_length` is written as given.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&[0x00, 0x00, 0x01]);
        buf.put_u8(self.stream_id);
        buf.put_u16(self.packet_length);

        let mut flags = 0x80 | (self.scrambling_control & 0x03) << 4;
        if self.data_alignment {
            flags |= 0x04;
        }
        buf.put_u8(flags);

        let pts_dts_flags = match (self.pts, self.dts) {
            (Some(_), Some(_)) => 0xC0,
            (Some(_), None) => 0x80,
            _ => 0x00,
        };
        buf.put_u8(pts_dts_flags);
        buf.put_u8(self.timestamp_len().max(self.header_data_length as usize) as u8);

        if let Some(pts) = self.pts {
            let marker = if self.dts.is_some() { 0x30 } else { 0x20 };
            write_timestamp(buf, marker, pts);
            if let Some(dts) = self.dts {
                write_timestamp(buf, 0x10, dts);
            }
        }
        for _ in self.timestamp_len()..self.header_data_length as usize {
            buf.put_u8(0xFF);
        }

        Ok(())
    }
}

/// A complete PES packet: header plus payload.
#[derive(Debug, Clone)]
pub struct PESPacket {
    pub header: PESHeader,
    pub payload: Vec<u8>,
}

impl PESPacket {
    pub fn new(stream_id: u8, payload: Vec<u8>) -> Self {
        let header = PESHeader::new(stream_id);
        Self { header, payload }
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.header = self.header.with_pts(pts);
        self
    }

    pub fn with_dts(mut self, dts: Duration) -> Self {
        self.header = self.header.with_dts(dts);
        self
    }

    /// Parses a reassembled PES packet.
    pub fn parse(data: &[u8]) -> Result<PESPacket> {
        let (header, offset) = PESHeader::parse(data)?;
        Ok(PESPacket {
            header,
            payload: data[offset..].to_vec(),
        })
    }

    /// Writes header and payload, filling in `packet_length` when it fits
    /// into 16 bits and leaving it unbounded otherwise.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        let mut header = self.header.clone();
        let following = self.len() - 6;
        header.packet_length = u16::try_from(following).unwrap_or(0);
        header.write_to(buf)?;
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Total length of the packet in bytes.
    pub fn len(&self) -> usize {
        PES_FIXED_HEADER_SIZE
            + self
                .header
                .timestamp_len()
                .max(self.header.header_data_length as usize)
            + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

fn read_timestamp(reader: &mut BitReader<'_>) -> Result<u64> {
    reader.skip_bits(4)?;
    let high = reader.read_bits(3)?;
    reader.skip_bits(1)?;
    let mid = reader.read_bits(15)?;
    reader.skip_bits(1)?;
    let low = reader.read_bits(15)?;
    reader.skip_bits(1)?;
    Ok(high << 30 | mid << 15 | low)
}

fn write_timestamp(buf: &mut BytesMut, marker: u8, ts: u64) {
    let ts = ts & 0x1_FFFF_FFFF; // 33 bits

    buf.put_u8(marker | ((ts >> 29) & 0x0E) as u8 | 0x01);
    buf.put_u16((((ts >> 14) & 0xFFFE) | 0x01) as u16);
    buf.put_u16((((ts << 1) & 0xFFFE) | 0x01) as u16);
}
