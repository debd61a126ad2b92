use super::parser::TSPacketParser;
use super::pes::PESHeader;
use super::types::*;
use crate::utils::Crc32Mpeg2;
use log::trace;
use std::collections::HashMap;
use std::fmt;

/// Largest section a filter will assemble (private sections may use 4096).
const MAX_SECTION_SIZE: usize = 4096 + 3;

/// What a PID filter delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Complete PSI/SI sections, table id through CRC.
    Section,
    /// Raw PES byte stream, one delivery per run of packets.
    Stream,
}

/// One delivery of a stream filter: the payload of `packets` consecutive
/// transport packets of the same PID.
#[derive(Debug, Clone, Copy)]
pub struct StreamPayload<'a> {
    /// Running count of packets delivered on this filter, including this run.
    pub counter: u64,
    pub data: &'a [u8],
    pub packets: usize,
    /// Set when `data` starts with a PES header.
    pub is_first: bool,
    /// Payload bytes carried by the last packet of the run.
    pub size_of_last: usize,
    /// Presentation timestamp of the PES header at the start of `data`.
    pub pts: Option<u64>,
}

pub type SectionHandler = Box<dyn FnMut(&[u8]) + Send>;
pub type StreamHandler = Box<dyn FnMut(&StreamPayload<'_>) + Send>;

/// Callback registered for one PID.
pub enum FilterHandler {
    Section(SectionHandler),
    Stream(StreamHandler),
}

impl FilterHandler {
    pub fn section<F>(f: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        FilterHandler::Section(Box::new(f))
    }

    pub fn stream<F>(f: F) -> Self
    where
        F: FnMut(&StreamPayload<'_>) + Send + 'static,
    {
        FilterHandler::Stream(Box::new(f))
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            FilterHandler::Section(_) => FilterKind::Section,
            FilterHandler::Stream(_) => FilterKind::Stream,
        }
    }
}

impl fmt::Debug for FilterHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterHandler").field(&self.kind()).finish()
    }
}

/// Counters kept while tokenizing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TokenizerStats {
    pub packets: u64,
    pub bytes: u64,
    /// Bytes thrown away while searching for a sync byte.
    pub skipped_bytes: u64,
    pub resyncs: u64,
    pub transport_errors: u64,
    pub continuity_errors: u64,
    pub corrupted_sections: u64,
    pub scrambled: u64,
}

/// Splits raw transport stream payload into per-PID sections and PES data.
///
/// Payload may arrive in arbitrarily sized pieces; incomplete packets are
/// carried over to the next call. Handlers run synchronously inside
/// [`PacketTokenizer::add_payload`] and must not call back into the
/// tokenizer.
pub trait PacketTokenizer: Send {
    fn add_payload(&mut self, data: &[u8]);

    /// Installs `handler` for `pid`, replacing any previous filter.
    fn set_filter(&mut self, pid: u16, handler: FilterHandler);

    fn remove_filter(&mut self, pid: u16);

    fn stats(&self) -> TokenizerStats {
        TokenizerStats::default()
    }
}

#[derive(Default)]
struct SectionAssembler {
    buf: Vec<u8>,
    /// A section start has been seen since the last reset.
    active: bool,
}

#[derive(Default)]
struct StreamRun {
    data: Vec<u8>,
    packets: usize,
    is_first: bool,
    size_of_last: usize,
    pts: Option<u64>,
    counter: u64,
}

enum FilterState {
    Section(SectionHandler, SectionAssembler),
    Stream(StreamHandler, StreamRun),
}

struct Filter {
    last_cc: Option<u8>,
    state: FilterState,
}

/// Default [`PacketTokenizer`] for 188-byte transport streams.
pub struct TsTokenizer {
    parser: TSPacketParser,
    crc: Crc32Mpeg2,
    pending: Vec<u8>,
    filters: HashMap<u16, Filter>,
    stats: TokenizerStats,
    in_sync: bool,
}

impl Default for TsTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TsTokenizer {
    pub fn new() -> Self {
        Self {
            parser: TSPacketParser::new(),
            crc: Crc32Mpeg2::new(),
            pending: Vec::with_capacity(TS_PACKET_SIZE),
            filters: HashMap::new(),
            stats: TokenizerStats::default(),
            in_sync: true,
        }
    }

    pub fn has_filter(&self, pid: u16) -> bool {
        self.filters.contains_key(&pid)
    }

    /// Processes whole packets from `buf` and returns the number of bytes
    /// consumed; the rest is a partial packet.
    fn process(&mut self, buf: &[u8]) -> usize {
        let mut pos = 0;
        while pos < buf.len() {
            // after a loss of sync a candidate must be followed by another
            // sync byte, unless that byte has not arrived yet
            let synced = buf[pos] == TS_SYNC_BYTE
                && (self.in_sync
                    || buf
                        .get(pos + TS_PACKET_SIZE)
                        .map_or(true, |&next| next == TS_SYNC_BYTE));
            if !synced {
                if self.in_sync {
                    self.stats.resyncs += 1;
                    self.in_sync = false;
                }
                let skip = buf[pos + 1..]
                    .iter()
                    .position(|&b| b == TS_SYNC_BYTE)
                    .map_or(buf.len() - pos, |n| n + 1);
                self.stats.skipped_bytes += skip as u64;
                pos += skip;
                continue;
            }
            if buf.len() - pos < TS_PACKET_SIZE {
                break;
            }
            self.in_sync = true;
            self.process_packet(&buf[pos..pos + TS_PACKET_SIZE]);
            pos += TS_PACKET_SIZE;
        }
        pos
    }

    fn process_packet(&mut self, packet: &[u8]) {
        self.stats.packets += 1;

        let header = match self.parser.parse_header(packet) {
            Ok(header) => header,
            Err(_) => return,
        };
        if header.transport_error {
            self.stats.transport_errors += 1;
            return;
        }
        if header.pid == PID_NULL {
            return;
        }
        let Some(filter) = self.filters.get_mut(&header.pid) else {
            return;
        };
        if header.scrambling_control != 0 {
            self.stats.scrambled += 1;
            return;
        }
        if !header.contains_payload {
            return;
        }

        let mut offset = TS_HEADER_SIZE;
        let mut signalled = false;
        match self.parser.parse_adaptation_field(packet, TS_HEADER_SIZE) {
            Ok(Some(field)) => {
                offset += 1 + field.length;
                signalled = field.discontinuity;
            }
            Ok(None) => {}
            Err(_) => return,
        }
        if offset >= TS_PACKET_SIZE {
            return;
        }

        // a signalled discontinuity restarts the counter without an error
        let cc = header.continuity_counter;
        let mut discontinuity = signalled;
        if let (Some(last), false) = (filter.last_cc, signalled) {
            if cc == last {
                // duplicate
                return;
            }
            if cc != (last + 1) & 0x0F {
                self.stats.continuity_errors += 1;
                discontinuity = true;
            }
        }
        filter.last_cc = Some(cc);

        let payload = &packet[offset..];
        match &mut filter.state {
            FilterState::Section(handler, assembler) => {
                if discontinuity {
                    assembler.buf.clear();
                    assembler.active = false;
                }
                push_section_payload(
                    assembler,
                    payload,
                    header.payload_unit_start,
                    &self.crc,
                    &mut self.stats,
                    handler,
                );
            }
            FilterState::Stream(handler, run) => {
                if header.payload_unit_start || discontinuity {
                    flush_run(run, handler);
                }
                if run.packets == 0 {
                    run.is_first = header.payload_unit_start;
                    run.pts = if run.is_first {
                        PESHeader::parse(payload).ok().and_then(|(pes, _)| pes.pts)
                    } else {
                        None
                    };
                }
                run.data.extend_from_slice(payload);
                run.packets += 1;
                run.size_of_last = payload.len();
            }
        }
    }

    fn flush_streams(&mut self) {
        for filter in self.filters.values_mut() {
            if let FilterState::Stream(handler, run) = &mut filter.state {
                flush_run(run, handler);
            }
        }
    }
}

fn flush_run(run: &mut StreamRun, handler: &mut StreamHandler) {
    if run.packets == 0 {
        return;
    }
    run.counter += run.packets as u64;
    handler(&StreamPayload {
        counter: run.counter,
        data: &run.data,
        packets: run.packets,
        is_first: run.is_first,
        size_of_last: run.size_of_last,
        pts: run.pts,
    });
    run.data.clear();
    run.packets = 0;
    run.pts = None;
}

fn push_section_payload(
    assembler: &mut SectionAssembler,
    payload: &[u8],
    payload_unit_start: bool,
    crc: &Crc32Mpeg2,
    stats: &mut TokenizerStats,
    handler: &mut SectionHandler,
) {
    if !payload_unit_start {
        if assembler.active {
            assembler.buf.extend_from_slice(payload);
            extract_sections(assembler, crc, stats, handler);
        }
        return;
    }

    let pointer = payload[0] as usize;
    if 1 + pointer > payload.len() {
        stats.corrupted_sections += 1;
        assembler.buf.clear();
        assembler.active = false;
        return;
    }

    if assembler.active {
        assembler.buf.extend_from_slice(&payload[1..1 + pointer]);
        extract_sections(assembler, crc, stats, handler);
        if assembler.buf.first().is_some_and(|&b| b != 0xFF) {
            trace!("dropping {} bytes of an unfinished section", assembler.buf.len());
            stats.corrupted_sections += 1;
        }
    }

    assembler.buf.clear();
    assembler.buf.extend_from_slice(&payload[1 + pointer..]);
    assembler.active = true;
    extract_sections(assembler, crc, stats, handler);
}

fn extract_sections(
    assembler: &mut SectionAssembler,
    crc: &Crc32Mpeg2,
    stats: &mut TokenizerStats,
    handler: &mut SectionHandler,
) {
    loop {
        let buf = &assembler.buf;
        if buf.first() == Some(&0xFF) {
            // stuffing up to the end of the packet
            assembler.buf.clear();
            assembler.active = false;
            return;
        }
        if buf.len() < 3 {
            return;
        }

        let length = 3 + ((((buf[1] & 0x0F) as usize) << 8) | buf[2] as usize);
        if length > MAX_SECTION_SIZE {
            stats.corrupted_sections += 1;
            assembler.buf.clear();
            assembler.active = false;
            return;
        }
        if buf.len() < length {
            return;
        }

        let section = &buf[..length];
        let long_form = section[1] & 0x80 != 0;
        if long_form && !crc.verify(section) {
            trace!("section with table id {:#04x} failed CRC check", section[0]);
            stats.corrupted_sections += 1;
        } else {
            handler(section);
        }
        assembler.buf.drain(..length);
    }
}

impl PacketTokenizer for TsTokenizer {
    fn add_payload(&mut self, data: &[u8]) {
        self.stats.bytes += data.len() as u64;

        if self.pending.is_empty() {
            let consumed = self.process(data);
            self.pending.extend_from_slice(&data[consumed..]);
        } else {
            let mut buf = std::mem::take(&mut self.pending);
            buf.extend_from_slice(data);
            let consumed = self.process(&buf);
            buf.drain(..consumed);
            self.pending = buf;
        }

        self.flush_streams();
    }

    fn set_filter(&mut self, pid: u16, handler: FilterHandler) {
        let state = match handler {
            FilterHandler::Section(handler) => {
                FilterState::Section(handler, SectionAssembler::default())
            }
            FilterHandler::Stream(handler) => FilterState::Stream(handler, StreamRun::default()),
        };
        self.filters.insert(
            pid,
            Filter {
                last_cc: None,
                state,
            },
        );
    }

    fn remove_filter(&mut self, pid: u16) {
        self.filters.remove(&pid);
    }

    fn stats(&self) -> TokenizerStats {
        self.stats
    }
}
