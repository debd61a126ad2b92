use super::types::*;
use crate::error::{FeedError, Result};
use crate::utils::{BitReader, Crc32Mpeg2};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use std::time::Duration;

/// Long-form PSI section split into its common header and table body.
#[derive(Debug, Clone, Copy)]
pub struct PsiSection<'a> {
    pub table_id: u8,
    /// Transport stream id (PAT), program number (PMT) or service id (EIT).
    pub table_id_extension: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Bytes between the fixed header and the CRC.
    pub body: &'a [u8],
}

/// Stateless parser for transport stream packet headers and the PSI/SI
/// tables the feeds care about (PAT, PMT, EIT present/following).
#[derive(Debug, Default, Clone, Copy)]
pub struct TSPacketParser {
    crc: Crc32Mpeg2,
}

impl TSPacketParser {
    pub fn new() -> Self {
        Self {
            crc: Crc32Mpeg2::new(),
        }
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(FeedError::InvalidData("TS packet too short".into()));
        }

        if data[0] != TS_SYNC_BYTE {
            return Err(FeedError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Parses the adaptation field at `offset`; the returned length excludes
    /// the length byte itself.
    pub fn parse_adaptation_field(
        &self,
        data: &[u8],
        offset: usize,
    ) -> Result<Option<AdaptationField>> {
        if (data[3] & 0x20) == 0 {
            return Ok(None);
        }

        let length = *data
            .get(offset)
            .ok_or_else(|| FeedError::InvalidData("Adaptation field missing".into()))?
            as usize;

        if data.len() < offset + length + 1 {
            return Err(FeedError::InvalidData("Adaptation field too short".into()));
        }

        if length == 0 {
            return Ok(Some(AdaptationField {
                length,
                discontinuity: false,
                random_access: false,
            }));
        }

        let flags = data[offset + 1];
        Ok(Some(AdaptationField {
            length,
            discontinuity: (flags & 0x80) != 0,
            random_access: (flags & 0x40) != 0,
        }))
    }

    /// Validates a complete section (table id through CRC) and splits off
    /// the common header.
    pub fn parse_section<'a>(&self, data: &'a [u8]) -> Result<PsiSection<'a>> {
        if data.len() < SECTION_HEADER_SIZE + SECTION_CRC_SIZE {
            return Err(FeedError::InvalidData("short section".into()));
        }

        let section_length = (((data[1] & 0x0F) as usize) << 8) | data[2] as usize;
        let end = 3 + section_length;
        if section_length < SECTION_HEADER_SIZE - 3 + SECTION_CRC_SIZE || end > data.len() {
            return Err(FeedError::InvalidData(format!(
                "section length {} does not fit {} bytes",
                section_length,
                data.len()
            )));
        }
        if data[1] & 0x80 == 0 {
            return Err(FeedError::InvalidData("not a long-form section".into()));
        }

        let section = &data[..end];
        if !self.crc.verify(section) {
            return Err(FeedError::InvalidData("CRC-32 mismatch".into()));
        }

        Ok(PsiSection {
            table_id: section[0],
            table_id_extension: u16::from_be_bytes([section[3], section[4]]),
            version: (section[5] & 0x3E) >> 1,
            current_next: section[5] & 0x01 != 0,
            section_number: section[6],
            last_section_number: section[7],
            body: &section[SECTION_HEADER_SIZE..end - SECTION_CRC_SIZE],
        })
    }

    pub fn parse_pat(&self, data: &[u8]) -> Result<PAT> {
        let section = self.parse_section(data)?;
        if section.table_id != TABLE_ID_PAT {
            return Err(FeedError::InvalidData("not a PAT".into()));
        }

        let mut reader = BitReader::new(section.body);
        let mut pat = PAT {
            transport_stream_id: section.table_id_extension,
            version: section.version,
            entries: Vec::new(),
        };

        while reader.available_bits() >= 32 {
            let program_number = reader.read_u16()?;
            reader.skip_bits(3)?;
            let pid = reader.read_bits(13)? as u16;
            pat.entries.push(PATEntry {
                program_number,
                program_map_pid: pid,
            });
        }

        Ok(pat)
    }

    pub fn parse_pmt(&self, data: &[u8]) -> Result<PMT> {
        let section = self.parse_section(data)?;
        if section.table_id != TABLE_ID_PMT {
            return Err(FeedError::InvalidData("not a PMT".into()));
        }

        let mut reader = BitReader::new(section.body);
        let mut pmt = PMT {
            program_number: section.table_id_extension,
            version: section.version,
            ..PMT::default()
        };

        reader.skip_bits(3)?;
        pmt.pcr_pid = reader.read_bits(13)? as u16;
        reader.skip_bits(4)?;
        let program_info_length = reader.read_bits(12)? as usize;
        pmt.program_descriptors = self.parse_descriptors(reader.read_bytes(program_info_length)?)?;

        while reader.available_bits() >= 40 {
            let stream_type = reader.read_u8()?;
            reader.skip_bits(3)?;
            let elementary_pid = reader.read_bits(13)? as u16;
            reader.skip_bits(4)?;
            let es_info_length = reader.read_bits(12)? as usize;
            let descriptors = self.parse_descriptors(reader.read_bytes(es_info_length)?)?;

            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid,
                descriptors,
            });
        }

        Ok(pmt)
    }

    pub fn parse_eit(&self, data: &[u8]) -> Result<EIT> {
        let section = self.parse_section(data)?;
        if !(0x4e..=0x6f).contains(&section.table_id) {
            return Err(FeedError::InvalidData("not an EIT".into()));
        }

        let mut reader = BitReader::new(section.body);
        let mut eit = EIT {
            table_id: section.table_id,
            service_id: section.table_id_extension,
            version: section.version,
            transport_stream_id: reader.read_u16()?,
            original_network_id: reader.read_u16()?,
            events: Vec::new(),
        };
        // segment_last_section_number, last_table_id
        reader.skip_bits(16)?;

        while reader.available_bits() >= 96 {
            let event_id = reader.read_u16()?;
            let mjd = reader.read_u16()?;
            let start_bcd = reader.read_bits(24)? as u32;
            let duration_bcd = reader.read_bits(24)? as u32;
            let running_status = RunningStatus::from(reader.read_bits(3)? as u8);
            let scrambled = reader.read_bit()?;
            let descriptors_length = reader.read_bits(12)? as usize;
            let descriptors = self.parse_descriptors(reader.read_bytes(descriptors_length)?)?;

            eit.events.push(GuideEvent {
                event_id,
                start_time: decode_start_time(mjd, start_bcd),
                duration: decode_bcd_duration(duration_bcd).unwrap_or_default(),
                running_status,
                scrambled,
                descriptors,
            });
        }

        Ok(eit)
    }

    fn parse_descriptors(&self, data: &[u8]) -> Result<Vec<Descriptor>> {
        let mut descriptors = Vec::new();
        let mut pos = 0;

        while pos + 2 <= data.len() {
            let tag = data[pos];
            let length = data[pos + 1] as usize;
            pos += 2;

            if pos + length > data.len() {
                return Err(FeedError::InvalidData("Descriptor data too short".into()));
            }

            descriptors.push(Descriptor {
                tag,
                data: data[pos..pos + length].to_vec(),
            });
            pos += length;
        }

        Ok(descriptors)
    }
}

fn bcd(value: u32) -> Option<u32> {
    let (high, low) = (value >> 4, value & 0x0F);
    if high > 9 || low > 9 {
        return None;
    }
    Some(high * 10 + low)
}

fn decode_bcd_duration(value: u32) -> Option<Duration> {
    let hours = bcd((value >> 16) & 0xFF)?;
    let minutes = bcd((value >> 8) & 0xFF)?;
    let seconds = bcd(value & 0xFF)?;
    Some(Duration::from_secs(
        u64::from(hours) * 3600 + u64::from(minutes) * 60 + u64::from(seconds),
    ))
}

/// Start time as Modified Julian Date plus BCD coded UTC time of day.
fn decode_start_time(mjd: u16, time_bcd: u32) -> Option<DateTime<Utc>> {
    if mjd == 0xFFFF && time_bcd == 0x00FF_FFFF {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(1858, 11, 17)?.checked_add_days(Days::new(u64::from(mjd)))?;
    let time = NaiveTime::from_hms_opt(
        bcd((time_bcd >> 16) & 0xFF)?,
        bcd((time_bcd >> 8) & 0xFF)?,
        bcd(time_bcd & 0xFF)?,
    )?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}
