use super::types::*;
use crate::error::Result;
use crate::utils::Crc32Mpeg2;
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

const PAYLOAD_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;

/// Builds a complete long-form section: header, `body` and CRC-32.
pub fn build_section(table_id: u8, table_id_extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(SECTION_HEADER_SIZE + body.len() + SECTION_CRC_SIZE);

    // Extension through last section number (5) + body + CRC
    let section_length = 5 + body.len() + SECTION_CRC_SIZE;
    buf.put_u8(table_id);
    buf.put_u16(0xB000 | (section_length as u16 & 0x0FFF));
    buf.put_u16(table_id_extension);
    buf.put_u8(0xC1 | (version & 0x1F) << 1);
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_slice(body);

    let crc = Crc32Mpeg2::new().calculate(&buf);
    buf.put_u32(crc);
    buf.to_vec()
}

/// Packetizes sections and PES packets into 188-byte transport packets,
/// keeping a continuity counter per PID.
#[derive(Debug, Default)]
pub struct TsPacketWriter {
    continuity_counters: HashMap<u16, u8>,
}

impl TsPacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_continuity_counter(&mut self, pid: u16) -> u8 {
        let counter = self.continuity_counters.entry(pid).or_insert(0x0F);
        *counter = (*counter + 1) & 0x0F;
        *counter
    }

    /// Writes a section with a zero pointer field, padding the last packet
    /// with 0xFF stuffing.
    pub fn write_section(&mut self, pid: u16, section: &[u8], out: &mut BytesMut) -> Result<()> {
        let mut payload = Vec::with_capacity(section.len() + 1);
        payload.push(0);
        payload.extend_from_slice(section);

        for (i, chunk) in payload.chunks(PAYLOAD_SIZE).enumerate() {
            TSHeader {
                payload_unit_start: i == 0,
                pid,
                continuity_counter: self.next_continuity_counter(pid),
                ..TSHeader::default()
            }
            .write_to(out)?;
            out.put_slice(chunk);
            out.put_bytes(0xFF, PAYLOAD_SIZE - chunk.len());
        }
        Ok(())
    }

    pub fn write_pat(&mut self, pat: &PAT, out: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::with_capacity(pat.len());
        pat.write_to(&mut body)?;
        let section = build_section(TABLE_ID_PAT, pat.transport_stream_id, pat.version, &body);
        self.write_section(PID_PAT, &section, out)
    }

    pub fn write_pmt(&mut self, pid: u16, pmt: &PMT, out: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::with_capacity(pmt.len());
        pmt.write_to(&mut body)?;
        let section = build_section(TABLE_ID_PMT, pmt.program_number, pmt.version, &body);
        self.write_section(pid, &section, out)
    }

    /// Writes an encoded PES packet; the last packet is padded with an
    /// adaptation field.
    pub fn write_pes(&mut self, pid: u16, pes: &[u8], out: &mut BytesMut) -> Result<()> {
        for (i, chunk) in pes.chunks(PAYLOAD_SIZE).enumerate() {
            let stuffing = PAYLOAD_SIZE - chunk.len();
            TSHeader {
                payload_unit_start: i == 0,
                pid,
                adaptation_field_exists: stuffing > 0,
                continuity_counter: self.next_continuity_counter(pid),
                ..TSHeader::default()
            }
            .write_to(out)?;
            if stuffing > 0 {
                out.put_u8((stuffing - 1) as u8);
                if stuffing > 1 {
                    out.put_u8(0x00);
                    out.put_bytes(0xFF, stuffing - 2);
                }
            }
            out.put_slice(chunk);
        }
        Ok(())
    }
}
