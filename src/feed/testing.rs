//! Recording builders shared by the feed tests.

use crate::format::ts::pes::PESPacket;
use crate::format::ts::types::*;
use crate::format::ts::writer::TsPacketWriter;
use bytes::BytesMut;
use std::time::Duration;

pub const PMT_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;

pub fn audio_pes(fill: u8) -> Vec<u8> {
    let mut pes = BytesMut::new();
    PESPacket::new(STREAM_ID_AUDIO, vec![fill; 300])
        .with_pts(Duration::from_secs(1))
        .write_to(&mut pes)
        .unwrap();
    pes.to_vec()
}

/// PAT, PMT with one MPEG audio stream, then `pes` on the audio PID.
pub fn recording(pes: &[Vec<u8>]) -> Vec<u8> {
    let mut writer = TsPacketWriter::new();
    let mut out = BytesMut::new();
    let pat = PAT {
        transport_stream_id: 1,
        version: 0,
        entries: vec![PATEntry {
            program_number: 1,
            program_map_pid: PMT_PID,
        }],
    };
    let pmt = PMT {
        program_number: 1,
        pcr_pid: AUDIO_PID,
        elementary_stream_infos: vec![ElementaryStreamInfo {
            stream_type: STREAM_TYPE_MPEG2_AUDIO,
            elementary_pid: AUDIO_PID,
            descriptors: Vec::new(),
        }],
        ..PMT::default()
    };
    writer.write_pat(&pat, &mut out).unwrap();
    writer.write_pmt(PMT_PID, &pmt, &mut out).unwrap();
    for packet in pes {
        writer.write_pes(AUDIO_PID, packet, &mut out).unwrap();
    }
    out.to_vec()
}
