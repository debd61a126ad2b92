use crate::error::Result;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use std::time::Duration;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_EIT: u16 = 0x0012;
pub const PID_NULL: u16 = 0x1fff;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const TABLE_ID_EIT_PF_ACTUAL: u8 = 0x4e;

// Elementary Stream Types
pub const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
pub const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
pub const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_PRIVATE_DATA: u8 = 0x06;

// Descriptor tags
pub const DESCRIPTOR_ISO639_LANGUAGE: u8 = 0x0a;
pub const DESCRIPTOR_SHORT_EVENT: u8 = 0x4d;
pub const DESCRIPTOR_TELETEXT: u8 = 0x56;
pub const DESCRIPTOR_AC3: u8 = 0x6a;

// Stream IDs
pub const STREAM_ID_PRIVATE_1: u8 = 0xbd;
pub const STREAM_ID_AUDIO: u8 = 0xc0;
pub const STREAM_ID_VIDEO: u8 = 0xe0;

// Constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_SYNC_BYTE: u8 = 0x47;
pub const PTS_HZ: u64 = 90_000;
pub const PTS_MASK: u64 = (1 << 33) - 1;

/// Fixed part of a long-form PSI section header (table id through last
/// section number).
pub const SECTION_HEADER_SIZE: usize = 8;
pub const SECTION_CRC_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PATEntry {
    pub program_number: u16,
    pub program_map_pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PAT {
    pub transport_stream_id: u16,
    pub version: u8,
    pub entries: Vec<PATEntry>,
}

impl PAT {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map PID of the first real program; the network PID entry
    /// (program number zero) is never reported.
    pub fn first_program_map_pid(&self) -> Option<u16> {
        self.entries
            .iter()
            .find(|entry| entry.program_number != 0)
            .map(|entry| entry.program_map_pid)
    }

    pub fn len(&self) -> usize {
        self.entries.len() * 4
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        for entry in &self.entries {
            buf.put_u16(entry.program_number);
            buf.put_u16(entry.program_map_pid & 0x1fff | 7 << 13);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

impl Descriptor {
    pub fn new(tag: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            data: data.into(),
        }
    }

    /// First language code of an ISO 639 language descriptor.
    pub fn language(&self) -> Option<String> {
        if self.tag != DESCRIPTOR_ISO639_LANGUAGE || self.data.len() < 3 {
            return None;
        }
        Some(decode_text(&self.data[..3]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

impl ElementaryStreamInfo {
    pub fn has_descriptor(&self, tag: u8) -> bool {
        self.descriptors.iter().any(|d| d.tag == tag)
    }

    /// Language of the first ISO 639 descriptor carrying one.
    pub fn language(&self) -> Option<String> {
        self.descriptors.iter().find_map(Descriptor::language)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PMT {
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

impl PMT {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let mut n = 4; // PCRPID + program info length

        for desc in &self.program_descriptors {
            n += 2 + desc.data.len();
        }

        for info in &self.elementary_stream_infos {
            n += 5; // stream_type + elementary_pid + ES info length
            for desc in &info.descriptors {
                n += 2 + desc.data.len();
            }
        }

        n
    }

    pub fn is_empty(&self) -> bool {
        self.elementary_stream_infos.is_empty()
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.pcr_pid & 0x1fff | 7 << 13);

        let prog_desc_len = self
            .program_descriptors
            .iter()
            .map(|d| 2 + d.data.len())
            .sum::<usize>();
        buf.put_u16((prog_desc_len as u16) & 0x3ff | 0xf << 12);

        for desc in &self.program_descriptors {
            buf.put_u8(desc.tag);
            buf.put_u8(desc.data.len() as u8);
            buf.put_slice(&desc.data);
        }

        for info in &self.elementary_stream_infos {
            buf.put_u8(info.stream_type);
            buf.put_u16(info.elementary_pid & 0x1fff | 7 << 13);

            let es_desc_len = info
                .descriptors
                .iter()
                .map(|d| 2 + d.data.len())
                .sum::<usize>();
            buf.put_u16((es_desc_len as u16) & 0x3ff | 0xf << 12);

            for desc in &info.descriptors {
                buf.put_u8(desc.tag);
                buf.put_u8(desc.data.len() as u8);
                buf.put_slice(&desc.data);
            }
        }

        Ok(())
    }
}

/// Running status of a program guide event (EN 300 468, table 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningStatus {
    Undefined,
    NotRunning,
    StartsSoon,
    Pausing,
    Running,
    OffAir,
    Reserved(u8),
}

impl From<u8> for RunningStatus {
    fn from(value: u8) -> Self {
        match value & 0x07 {
            0 => RunningStatus::Undefined,
            1 => RunningStatus::NotRunning,
            2 => RunningStatus::StartsSoon,
            3 => RunningStatus::Pausing,
            4 => RunningStatus::Running,
            5 => RunningStatus::OffAir,
            other => RunningStatus::Reserved(other),
        }
    }
}

impl From<RunningStatus> for u8 {
    fn from(status: RunningStatus) -> Self {
        match status {
            RunningStatus::Undefined => 0,
            RunningStatus::NotRunning => 1,
            RunningStatus::StartsSoon => 2,
            RunningStatus::Pausing => 3,
            RunningStatus::Running => 4,
            RunningStatus::OffAir => 5,
            RunningStatus::Reserved(other) => other & 0x07,
        }
    }
}

/// One event of an EIT section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideEvent {
    pub event_id: u16,
    /// `None` when the broadcaster leaves the start time undefined (all ones).
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub running_status: RunningStatus,
    pub scrambled: bool,
    pub descriptors: Vec<Descriptor>,
}

impl GuideEvent {
    /// Event name from the first short event descriptor.
    pub fn title(&self) -> Option<String> {
        let data = &self
            .descriptors
            .iter()
            .find(|d| d.tag == DESCRIPTOR_SHORT_EVENT)?
            .data;
        // ISO 639 language (3) + name length (1) + name
        let name_len = *data.get(3)? as usize;
        let name = data.get(4..4 + name_len)?;
        Some(decode_text(name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EIT {
    pub table_id: u8,
    pub service_id: u16,
    pub version: u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub events: Vec<GuideEvent>,
}

#[derive(Debug)]
pub struct AdaptationField {
    pub length: usize,
    pub discontinuity: bool,
    pub random_access: bool,
}

#[derive(Debug)]
pub struct TSHeader {
    pub sync_byte: u8, // Always 0x47
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            sync_byte: TS_SYNC_BYTE,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.sync_byte);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);

        Ok(())
    }
}

/// Converts to 90 kHz ticks, wrapped to the 33 bits a PES timestamp holds.
pub fn time_to_pts(time: Duration) -> u64 {
    let ticks = time.as_nanos() * PTS_HZ as u128 / 1_000_000_000;
    (ticks & PTS_MASK as u128) as u64
}

/// Decodes DVB text well enough for track and event names.
///
/// A leading character table selector is skipped; 0x15 selects UTF-8, every
/// other table is mapped byte for byte (Latin-1), which is exact for the
/// default table on the ASCII range. Control codes are dropped.
pub fn decode_text(data: &[u8]) -> String {
    let body = match data.first().copied() {
        Some(0x10) => data.get(3..).unwrap_or_default(),
        Some(0x15) => return String::from_utf8_lossy(&data[1..]).trim().to_string(),
        Some(b) if b < 0x20 => &data[1..],
        _ => data,
    };
    body.iter()
        .filter(|&&b| !(b < 0x20 || (0x80..0xa0).contains(&b)))
        .map(|&b| b as char)
        .collect::<String>()
        .trim()
        .to_string()
}
