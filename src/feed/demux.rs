use super::control::FeedControl;
use super::elementary::{BufferedElementaryFeed, FeedSource};
use crate::config::FeedConfig;
use crate::format::ts::parser::TSPacketParser;
use crate::format::ts::teletext::TeletextReassembler;
use crate::format::ts::tokenizer::{FilterHandler, PacketTokenizer, TokenizerStats, TsTokenizer};
use crate::format::ts::types::*;
use log::{debug, info, trace};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Elementary PIDs currently routed into the feed, replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidMapping {
    pub video: u16,
    pub audio: u16,
    pub teletext: u16,
    /// Video is H.264 rather than MPEG-2.
    pub alternate_video_codec: bool,
    /// Audio is AC3 rather than MPEG audio.
    pub alternate_audio_codec: bool,
    /// Treat every PID as new on the next program map.
    pub force_restart: bool,
}

impl Default for PidMapping {
    fn default() -> Self {
        Self {
            video: 0,
            audio: 0,
            teletext: 0,
            alternate_video_codec: false,
            alternate_audio_codec: false,
            force_restart: true,
        }
    }
}

/// One selectable audio track of the current program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrackDescriptor {
    pub name: String,
    pub pid: u16,
    pub ac3: bool,
    pub index: usize,
}

impl AudioTrackDescriptor {
    fn new(info: &ElementaryStreamInfo, ac3: bool, index: usize) -> Self {
        let language = info.language().unwrap_or_default();
        let codec = if ac3 { " (AC3)" } else { "" };
        Self {
            name: format!("{}{} [{}]", language.trim(), codec, index + 1),
            pid: info.elementary_pid,
            ac3,
            index,
        }
    }
}

#[derive(Debug, Default)]
struct ServiceProgramState {
    pmt_pid: u16,
    service_id: Option<u16>,
    current_event: Option<GuideEvent>,
    next_event: Option<GuideEvent>,
}

enum TableSignal {
    Pat(Vec<u8>),
    Pmt(u16, Vec<u8>),
    Eit(Vec<u8>),
}

type SignalQueue = Arc<Mutex<Vec<TableSignal>>>;

/// Observer calls collected while the tokenizer is locked.
enum Notification {
    StreamChanged(bool),
    Teletext {
        first: bool,
        pes: Vec<u8>,
        pts: Option<u64>,
    },
}

type NotificationQueue = Arc<Mutex<Vec<Notification>>>;

/// Called after a program map changed the routing; the flag asks for a
/// full graph rebuild.
///
/// Observers run once [`StreamDemultiplexer::add_payload`] has released its
/// locks and may call back into the demultiplexer.
pub type StreamChangedHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Receives reassembled teletext PES packets: `(is_first, pes, pts)`.
pub type TeletextHandler = Arc<dyn Fn(bool, &[u8], Option<u64>) + Send + Sync>;

/// Follows the PAT/PMT of a transport stream and routes the selected
/// video, audio and teletext PIDs.
///
/// Video and audio PES data end up in the channel buffers of the wrapped
/// [`BufferedElementaryFeed`]. Signaling sections are queued by the
/// tokenizer callbacks and handled after every packet, so filter changes
/// take effect from the next packet on.
pub struct StreamDemultiplexer {
    elementary: Arc<BufferedElementaryFeed>,
    parser: TSPacketParser,
    tokenizer: Mutex<Option<Box<dyn PacketTokenizer>>>,
    signals: SignalQueue,
    mapping: RwLock<PidMapping>,
    /// PIDs with an elementary filter installed; survives `stop`.
    routed: Mutex<PidMapping>,
    audio_index: AtomicUsize,
    audio_tracks: RwLock<Vec<AudioTrackDescriptor>>,
    program: Mutex<ServiceProgramState>,
    teletext: Arc<Mutex<TeletextReassembler>>,
    notifications: NotificationQueue,
    teletext_handler: RwLock<Option<TeletextHandler>>,
    stream_changed: RwLock<Option<StreamChangedHandler>>,
}

impl Default for StreamDemultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDemultiplexer {
    /// A pushed demultiplexer using [`TsTokenizer`].
    pub fn new() -> Self {
        Self::with_tokenizer(Box::new(TsTokenizer::new()), &FeedConfig::default())
    }

    pub fn with_tokenizer(tokenizer: Box<dyn PacketTokenizer>, config: &FeedConfig) -> Self {
        Self::with_elementary(BufferedElementaryFeed::with_config(config), tokenizer)
    }

    /// Builds on an existing elementary feed; PAT and EIT filters are
    /// installed right away.
    pub fn with_elementary(
        elementary: BufferedElementaryFeed,
        mut tokenizer: Box<dyn PacketTokenizer>,
    ) -> Self {
        let signals: SignalQueue = Arc::new(Mutex::new(Vec::new()));

        let queue = signals.clone();
        tokenizer.set_filter(
            PID_PAT,
            FilterHandler::section(move |section| {
                queue.lock().push(TableSignal::Pat(section.to_vec()))
            }),
        );
        let queue = signals.clone();
        tokenizer.set_filter(
            PID_EIT,
            FilterHandler::section(move |section| {
                queue.lock().push(TableSignal::Eit(section.to_vec()))
            }),
        );

        Self {
            elementary: Arc::new(elementary),
            parser: TSPacketParser::new(),
            tokenizer: Mutex::new(Some(tokenizer)),
            signals,
            mapping: RwLock::new(PidMapping::default()),
            routed: Mutex::new(PidMapping::default()),
            audio_index: AtomicUsize::new(0),
            audio_tracks: RwLock::new(Vec::new()),
            program: Mutex::new(ServiceProgramState::default()),
            teletext: Arc::new(Mutex::new(TeletextReassembler::new())),
            notifications: Arc::new(Mutex::new(Vec::new())),
            teletext_handler: RwLock::new(None),
            stream_changed: RwLock::new(None),
        }
    }

    /// Feeds raw transport stream bytes. Returns `false` once disposed.
    pub fn add_payload(&self, data: &[u8]) -> bool {
        {
            let mut guard = self.tokenizer.lock();
            let Some(tokenizer) = guard.as_mut() else {
                return false;
            };

            for packet in data.chunks(TS_PACKET_SIZE) {
                tokenizer.add_payload(packet);
                self.dispatch_signals(tokenizer.as_mut());
            }
        }
        self.notify();
        true
    }

    /// Runs the queued observer calls with no lock held.
    fn notify(&self) {
        let pending = std::mem::take(&mut *self.notifications.lock());
        for notification in pending {
            match notification {
                Notification::StreamChanged(rebuild) => {
                    let handler = self.stream_changed.read().clone();
                    if let Some(handler) = handler {
                        handler(rebuild);
                    }
                }
                Notification::Teletext { first, pes, pts } => {
                    let handler = self.teletext_handler.read().clone();
                    if let Some(handler) = handler {
                        handler(first, &pes, pts);
                    }
                }
            }
        }
    }

    fn dispatch_signals(&self, tokenizer: &mut dyn PacketTokenizer) {
        let pending: Vec<TableSignal> = {
            let mut queue = self.signals.lock();
            if queue.is_empty() {
                return;
            }
            queue.drain(..).collect()
        };

        for signal in pending {
            match signal {
                TableSignal::Pat(section) => self.process_pat(tokenizer, &section),
                TableSignal::Pmt(pid, section) => self.process_pmt(tokenizer, pid, &section),
                TableSignal::Eit(section) => self.process_eit(&section),
            }
        }
    }

    fn process_pat(&self, tokenizer: &mut dyn PacketTokenizer, section: &[u8]) {
        if !self.control().is_running() {
            return;
        }

        let pat = match self.parser.parse_pat(section) {
            Ok(pat) => pat,
            Err(err) => {
                trace!("discarding PAT: {}", err);
                return;
            }
        };
        let Some(pmt_pid) = pat.first_program_map_pid() else {
            return;
        };

        let mut program = self.program.lock();
        if program.pmt_pid == pmt_pid {
            return;
        }
        debug!("program map moved from PID {} to {}", program.pmt_pid, pmt_pid);

        self.audio_tracks.write().clear();
        if program.pmt_pid != 0 {
            tokenizer.remove_filter(program.pmt_pid);
        }

        *program = ServiceProgramState {
            pmt_pid,
            ..ServiceProgramState::default()
        };

        let queue = self.signals.clone();
        tokenizer.set_filter(
            pmt_pid,
            FilterHandler::section(move |section| {
                queue.lock().push(TableSignal::Pmt(pmt_pid, section.to_vec()))
            }),
        );
    }

    fn process_pmt(&self, tokenizer: &mut dyn PacketTokenizer, pid: u16, section: &[u8]) {
        if !self.control().is_running() {
            return;
        }

        let pmt = match self.parser.parse_pmt(section) {
            Ok(pmt) if !pmt.is_empty() => pmt,
            Ok(_) => return,
            Err(err) => {
                trace!("discarding PMT on PID {}: {}", pid, err);
                return;
            }
        };

        {
            let mut program = self.program.lock();
            if program.pmt_pid != pid {
                return;
            }
            program.service_id = Some(pmt.program_number);
        }

        let mut tracks: Vec<AudioTrackDescriptor> = Vec::new();
        let (mut video, mut teletext) = (0u16, 0u16);
        let mut alternate_video_codec = false;

        for info in &pmt.elementary_stream_infos {
            match info.stream_type {
                STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO => {
                    tracks.push(AudioTrackDescriptor::new(info, false, tracks.len()));
                }
                STREAM_TYPE_MPEG2_VIDEO | STREAM_TYPE_H264 => {
                    if video == 0 {
                        video = info.elementary_pid;
                        alternate_video_codec = info.stream_type == STREAM_TYPE_H264;
                    }
                }
                STREAM_TYPE_PRIVATE_DATA => {
                    if info.has_descriptor(DESCRIPTOR_AC3) {
                        tracks.push(AudioTrackDescriptor::new(info, true, tracks.len()));
                    }
                    if info.has_descriptor(DESCRIPTOR_TELETEXT) {
                        teletext = info.elementary_pid;
                    }
                }
                _ => {}
            }
        }

        let requested = self.audio_index.load(Ordering::Acquire);
        let audio_index = if requested < tracks.len() { requested } else { 0 };
        let (audio, alternate_audio_codec) = tracks
            .get(audio_index)
            .map_or((0, false), |track| (track.pid, track.ac3));
        *self.audio_tracks.write() = tracks;

        let old = *self.mapping.read();
        let restart = old.force_restart;
        let video_changed = video != old.video || restart;
        let video_codec_changed = alternate_video_codec != old.alternate_video_codec || restart;
        let audio_changed = audio != old.audio || restart;
        let audio_codec_changed = alternate_audio_codec != old.alternate_audio_codec || restart;
        let teletext_changed = teletext != old.teletext || restart;

        if !(video_changed
            || video_codec_changed
            || audio_changed
            || audio_codec_changed
            || teletext_changed)
        {
            return;
        }

        let mut routed = self.routed.lock();
        if video_changed && routed.video != 0 {
            tokenizer.remove_filter(routed.video);
        }
        if audio_changed && routed.audio != 0 {
            tokenizer.remove_filter(routed.audio);
        }
        if teletext_changed && routed.teletext != 0 {
            tokenizer.remove_filter(routed.teletext);
        }

        let first = (old.video == 0 && old.audio == 0) || restart;
        let mapping = PidMapping {
            video,
            audio,
            teletext,
            alternate_video_codec,
            alternate_audio_codec,
            force_restart: false,
        };
        // a selection made meanwhile wins over the clamped value
        let _ = self.audio_index.compare_exchange(
            requested,
            audio_index,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        *self.mapping.write() = mapping;
        *routed = mapping;
        drop(routed);

        if video_changed && video != 0 {
            let feed = self.elementary.clone();
            tokenizer.set_filter(
                video,
                FilterHandler::stream(move |payload| {
                    feed.add_video(payload.data);
                }),
            );
        }
        if audio_changed && audio != 0 {
            let feed = self.elementary.clone();
            tokenizer.set_filter(
                audio,
                FilterHandler::stream(move |payload| {
                    feed.add_audio(payload.data);
                }),
            );
        }
        if teletext_changed && teletext != 0 {
            self.teletext.lock().reset();
            let reassembler = self.teletext.clone();
            let queue = self.notifications.clone();
            tokenizer.set_filter(
                teletext,
                FilterHandler::stream(move |payload| {
                    reassembler.lock().add_payload(payload, |first, pes, pts| {
                        queue.lock().push(Notification::Teletext {
                            first,
                            pes: pes.to_vec(),
                            pts,
                        });
                    });
                }),
            );
        }

        let rebuild = first || video_codec_changed || audio_codec_changed;
        info!(
            "streams remapped: video {} audio {} teletext {} (rebuild: {})",
            video, audio, teletext, rebuild
        );
        self.notifications
            .lock()
            .push(Notification::StreamChanged(rebuild));
    }

    fn process_eit(&self, section: &[u8]) {
        let eit = match self.parser.parse_eit(section) {
            Ok(eit) if eit.table_id == TABLE_ID_EIT_PF_ACTUAL => eit,
            Ok(_) => return,
            Err(err) => {
                trace!("discarding EIT: {}", err);
                return;
            }
        };

        let mut program = self.program.lock();
        if program.service_id != Some(eit.service_id) {
            return;
        }

        // First match wins; events are not sorted by start time.
        let (mut got_current, mut got_next) = (false, false);
        for event in eit.events {
            if !got_current && event.running_status == RunningStatus::Running {
                program.current_event = Some(event);
                got_current = true;
            } else if !got_next && event.running_status == RunningStatus::NotRunning {
                program.next_event = Some(event);
                got_next = true;
            }
            if got_current && got_next {
                break;
            }
        }
    }

    pub fn elementary_feed(&self) -> &Arc<BufferedElementaryFeed> {
        &self.elementary
    }

    /// Snapshot of the current routing.
    pub fn pid_mapping(&self) -> PidMapping {
        *self.mapping.read()
    }

    pub fn audio_tracks(&self) -> Vec<AudioTrackDescriptor> {
        self.audio_tracks.read().clone()
    }

    pub fn audio_names(&self) -> Vec<String> {
        self.audio_tracks
            .read()
            .iter()
            .map(|track| track.name.clone())
            .collect()
    }

    pub fn audio_index(&self) -> usize {
        self.audio_index.load(Ordering::Acquire)
    }

    /// Selects an audio track; applied with the next program map.
    pub fn set_audio_index(&self, index: usize) {
        self.audio_index.store(index, Ordering::Release);
    }

    pub fn teletext_available(&self) -> bool {
        self.mapping.read().teletext != 0
    }

    pub fn pmt_pid(&self) -> u16 {
        self.program.lock().pmt_pid
    }

    pub fn service_id(&self) -> Option<u16> {
        self.program.lock().service_id
    }

    pub fn current_event(&self) -> Option<GuideEvent> {
        self.program.lock().current_event.clone()
    }

    pub fn next_event(&self) -> Option<GuideEvent> {
        self.program.lock().next_event.clone()
    }

    /// Starts the decode graph for the codecs of the current mapping.
    pub fn set_decoder(&self) {
        let mapping = self.pid_mapping();
        self.control()
            .start_graph(mapping.alternate_video_codec, mapping.alternate_audio_codec);
    }

    pub fn set_stream_changed(&self, handler: Option<StreamChangedHandler>) {
        *self.stream_changed.write() = handler;
    }

    pub fn set_teletext_handler(&self, handler: Option<TeletextHandler>) {
        *self.teletext_handler.write() = handler;
    }

    /// Statistics of the tokenizer, `None` once disposed.
    pub fn tokenizer_stats(&self) -> Option<TokenizerStats> {
        self.tokenizer.lock().as_ref().map(|tokenizer| tokenizer.stats())
    }
}

impl FeedSource for StreamDemultiplexer {
    fn elementary(&self) -> &BufferedElementaryFeed {
        &self.elementary
    }

    fn control(&self) -> &FeedControl {
        self.elementary.control()
    }

    fn clear_buffers(&self) {
        self.audio_tracks.write().clear();
        self.elementary.clear_buffers();
    }

    /// Stops the feed and clears the mapping; the next program map
    /// rebuilds every route.
    fn stop(&self) {
        self.control().stop();
        *self.mapping.write() = PidMapping::default();
    }

    fn on_dispose(&self) {
        self.tokenizer.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::pes::PESPacket;
    use crate::format::ts::tokenizer::{FilterKind, StreamPayload};
    use crate::format::ts::writer::build_section;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Calls {
        set: Vec<(u16, FilterKind)>,
        removed: Vec<u16>,
        /// Runs once, from inside the next `remove_filter`.
        on_remove: Option<Box<dyn FnOnce() + Send>>,
    }

    /// Understands `[pid_hi, pid_lo, payload..]` pseudo packets.
    struct RecordingTokenizer {
        calls: Arc<Mutex<Calls>>,
        filters: HashMap<u16, FilterHandler>,
    }

    impl PacketTokenizer for RecordingTokenizer {
        fn add_payload(&mut self, data: &[u8]) {
            let pid = u16::from_be_bytes([data[0], data[1]]);
            match self.filters.get_mut(&pid) {
                Some(FilterHandler::Section(handler)) => handler(&data[2..]),
                Some(FilterHandler::Stream(handler)) => handler(&StreamPayload {
                    counter: 1,
                    data: &data[2..],
                    packets: 1,
                    is_first: true,
                    size_of_last: data.len() - 2,
                    pts: None,
                }),
                None => {}
            }
        }

        fn set_filter(&mut self, pid: u16, handler: FilterHandler) {
            self.calls.lock().set.push((pid, handler.kind()));
            self.filters.insert(pid, handler);
        }

        fn remove_filter(&mut self, pid: u16) {
            let hook = {
                let mut calls = self.calls.lock();
                calls.removed.push(pid);
                calls.on_remove.take()
            };
            self.filters.remove(&pid);
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    fn demux() -> (StreamDemultiplexer, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let tokenizer = RecordingTokenizer {
            calls: calls.clone(),
            filters: HashMap::new(),
        };
        let demux = StreamDemultiplexer::with_tokenizer(Box::new(tokenizer), &FeedConfig::default());
        demux.start();
        calls.lock().set.clear();
        (demux, calls)
    }

    fn packet(pid: u16, section: &[u8]) -> Vec<u8> {
        let mut packet = pid.to_be_bytes().to_vec();
        packet.extend_from_slice(section);
        assert!(packet.len() <= TS_PACKET_SIZE);
        packet
    }

    fn pat(pmt_pid: u16) -> Vec<u8> {
        let mut body = BytesMut::new();
        PAT {
            transport_stream_id: 1,
            version: 0,
            entries: vec![
                PATEntry { program_number: 0, program_map_pid: 0x10 },
                PATEntry { program_number: 28106, program_map_pid: pmt_pid },
            ],
        }
        .write_to(&mut body)
        .unwrap();
        packet(PID_PAT, &build_section(TABLE_ID_PAT, 1, 0, &body))
    }

    fn stream(stream_type: u8, pid: u16, descriptors: Vec<Descriptor>) -> ElementaryStreamInfo {
        ElementaryStreamInfo {
            stream_type,
            elementary_pid: pid,
            descriptors,
        }
    }

    fn language(code: &[u8; 3]) -> Descriptor {
        Descriptor::new(DESCRIPTOR_ISO639_LANGUAGE, [code[0], code[1], code[2], 0])
    }

    fn pmt(pmt_pid: u16, streams: Vec<ElementaryStreamInfo>) -> Vec<u8> {
        let mut body = BytesMut::new();
        PMT {
            program_number: 28106,
            version: 0,
            pcr_pid: streams.first().map_or(0x1FFF, |s| s.elementary_pid),
            program_descriptors: Vec::new(),
            elementary_stream_infos: streams,
        }
        .write_to(&mut body)
        .unwrap();
        packet(pmt_pid, &build_section(TABLE_ID_PMT, 28106, 0, &body))
    }

    fn broadcast_pmt(pmt_pid: u16) -> Vec<u8> {
        pmt(
            pmt_pid,
            vec![
                stream(STREAM_TYPE_H264, 0x200, Vec::new()),
                stream(STREAM_TYPE_MPEG2_AUDIO, 0x201, vec![language(b"deu")]),
                stream(
                    STREAM_TYPE_PRIVATE_DATA,
                    0x202,
                    vec![language(b"eng"), Descriptor::new(DESCRIPTOR_AC3, vec![0x00])],
                ),
            ],
        )
    }

    fn record_changes(demux: &StreamDemultiplexer) -> Arc<Mutex<Vec<bool>>> {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        demux.set_stream_changed(Some(Arc::new(move |rebuild: bool| sink.lock().push(rebuild))));
        changes
    }

    #[test]
    fn test_pat_change_then_pmt() {
        let (demux, calls) = demux();
        let changes = record_changes(&demux);
        demux.set_audio_index(5);

        assert!(demux.add_payload(&pat(100)));
        assert!(demux.add_payload(&pat(200)));
        assert!(demux.add_payload(&broadcast_pmt(200)));

        assert_eq!(demux.audio_names(), vec!["deu [1]", "eng (AC3) [2]"]);
        assert_eq!(demux.audio_index(), 0);
        assert_eq!(*changes.lock(), vec![true]);
        assert_eq!(demux.service_id(), Some(28106));
        assert_eq!(demux.pmt_pid(), 200);

        let mapping = demux.pid_mapping();
        assert_eq!(mapping.video, 0x200);
        assert_eq!(mapping.audio, 0x201);
        assert!(mapping.alternate_video_codec);
        assert!(!mapping.alternate_audio_codec);
        assert!(!mapping.force_restart);

        let calls = calls.lock();
        // the stale program map filter, never an elementary stream
        assert_eq!(calls.removed, vec![100]);
        let pmt_filters: Vec<_> = calls.set.iter().filter(|(pid, _)| *pid == 200).collect();
        assert_eq!(pmt_filters, vec![&(200, FilterKind::Section)]);
        assert!(calls.set.contains(&(0x200, FilterKind::Stream)));
        assert!(calls.set.contains(&(0x201, FilterKind::Stream)));
        assert!(!calls.set.iter().any(|(pid, _)| *pid == 0x202));
    }

    #[test]
    fn test_unchanged_pat_and_pmt_are_ignored() {
        let (demux, calls) = demux();
        let changes = record_changes(&demux);

        demux.add_payload(&pat(100));
        demux.add_payload(&broadcast_pmt(100));
        let after_first = calls.lock().set.len();

        demux.add_payload(&pat(100));
        demux.add_payload(&broadcast_pmt(100));

        assert_eq!(calls.lock().set.len(), after_first);
        assert!(calls.lock().removed.is_empty());
        assert_eq!(*changes.lock(), vec![true]);
    }

    #[test]
    fn test_audio_selection_switches_codec() {
        let (demux, calls) = demux();
        let changes = record_changes(&demux);
        demux.add_payload(&pat(100));
        demux.add_payload(&broadcast_pmt(100));

        demux.set_audio_index(1);
        demux.add_payload(&broadcast_pmt(100));

        assert_eq!(*changes.lock(), vec![true, true]);
        assert_eq!(calls.lock().removed, vec![0x201]);
        assert_eq!(calls.lock().set.last(), Some(&(0x202, FilterKind::Stream)));
        let mapping = demux.pid_mapping();
        assert_eq!(mapping.audio, 0x202);
        assert!(mapping.alternate_audio_codec);
    }

    #[test]
    fn test_pid_only_remap_keeps_graph() {
        let (demux, calls) = demux();
        let changes = record_changes(&demux);
        demux.add_payload(&pat(100));
        demux.add_payload(&broadcast_pmt(100));

        demux.add_payload(&pmt(
            100,
            vec![
                stream(STREAM_TYPE_H264, 0x300, Vec::new()),
                stream(STREAM_TYPE_MPEG2_AUDIO, 0x201, vec![language(b"deu")]),
            ],
        ));

        assert_eq!(*changes.lock(), vec![true, false]);
        assert_eq!(calls.lock().removed, vec![0x200]);
        assert_eq!(demux.audio_names(), vec!["deu [1]"]);
    }

    #[test]
    fn test_stop_forces_full_restart() {
        let (demux, calls) = demux();
        let changes = record_changes(&demux);
        demux.add_payload(&pat(100));
        demux.add_payload(&broadcast_pmt(100));

        demux.stop();
        assert_eq!(demux.pid_mapping(), PidMapping::default());
        assert!(demux.pid_mapping().force_restart);
        // ignored while stopped
        demux.add_payload(&broadcast_pmt(100));
        assert_eq!(changes.lock().len(), 1);

        demux.start();
        demux.add_payload(&broadcast_pmt(100));
        assert_eq!(*changes.lock(), vec![true, true]);
        assert_eq!(calls.lock().removed, vec![0x200, 0x201]);
        assert!(!demux.pid_mapping().force_restart);
    }

    #[test]
    fn test_observers_may_call_back() {
        let (demux, _calls) = demux();
        let demux = Arc::new(demux);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (weak, sink) = (Arc::downgrade(&demux), seen.clone());
        demux.set_stream_changed(Some(Arc::new(move |rebuild: bool| {
            if let Some(demux) = weak.upgrade() {
                sink.lock().push((
                    rebuild,
                    demux.tokenizer_stats().is_some(),
                    demux.pid_mapping().video,
                ));
                demux.set_stream_changed(None);
            }
        })));

        demux.add_payload(&pat(100));
        demux.add_payload(&broadcast_pmt(100));
        demux.set_audio_index(1);
        demux.add_payload(&broadcast_pmt(100));

        assert_eq!(*seen.lock(), vec![(true, true, 0x200)]);
        assert_eq!(demux.pid_mapping().audio, 0x202);
    }

    #[test]
    fn test_every_teletext_packet_is_flagged_first() {
        let (demux, _calls) = demux();
        let demux = Arc::new(demux);
        demux.add_payload(&pat(100));
        demux.add_payload(&pmt(
            100,
            vec![stream(
                STREAM_TYPE_PRIVATE_DATA,
                0x205,
                vec![Descriptor::new(DESCRIPTOR_TELETEXT, *b"deu\x09\x00")],
            )],
        ));

        let pages = Arc::new(Mutex::new(Vec::new()));
        let (weak, sink) = (Arc::downgrade(&demux), pages.clone());
        demux.set_teletext_handler(Some(Arc::new(
            move |first: bool, pes: &[u8], _pts: Option<u64>| {
                let stats = weak.upgrade().and_then(|demux| demux.tokenizer_stats());
                sink.lock().push((first, pes.to_vec(), stats.is_some()));
            },
        )));

        let mut pes = BytesMut::new();
        PESPacket::new(STREAM_ID_PRIVATE_1, vec![0x10; 60])
            .write_to(&mut pes)
            .unwrap();
        demux.add_payload(&packet(0x205, &pes));
        demux.add_payload(&packet(0x205, &pes));

        let page = (true, pes.to_vec(), true);
        assert_eq!(*pages.lock(), vec![page.clone(), page]);
    }

    #[test]
    fn test_selection_during_remap_is_kept() {
        let (demux, calls) = demux();
        let demux = Arc::new(demux);
        demux.add_payload(&pat(100));
        demux.add_payload(&broadcast_pmt(100));

        demux.set_audio_index(7);
        let weak = Arc::downgrade(&demux);
        calls.lock().on_remove = Some(Box::new(move || {
            if let Some(demux) = weak.upgrade() {
                demux.set_audio_index(1);
            }
        }));
        demux.add_payload(&pmt(
            100,
            vec![
                stream(STREAM_TYPE_H264, 0x300, Vec::new()),
                stream(STREAM_TYPE_MPEG2_AUDIO, 0x201, vec![language(b"deu")]),
                stream(
                    STREAM_TYPE_PRIVATE_DATA,
                    0x202,
                    vec![language(b"eng"), Descriptor::new(DESCRIPTOR_AC3, vec![0x00])],
                ),
            ],
        ));

        // the out-of-range index was clamped for this map only
        assert_eq!(demux.pid_mapping().audio, 0x201);
        assert_eq!(demux.audio_index(), 1);

        demux.add_payload(&broadcast_pmt(100));
        assert_eq!(demux.pid_mapping().audio, 0x202);
    }

    #[test]
    fn test_teletext_and_invalid_sections() {
        let (demux, _calls) = demux();
        demux.add_payload(&pat(100));

        let mut corrupt = broadcast_pmt(100);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        demux.add_payload(&corrupt);
        demux.add_payload(&pmt(100, Vec::new()));
        assert_eq!(demux.pid_mapping(), PidMapping::default());
        assert!(!demux.teletext_available());

        demux.add_payload(&pmt(
            100,
            vec![
                stream(STREAM_TYPE_MPEG2_VIDEO, 0x200, Vec::new()),
                stream(
                    STREAM_TYPE_PRIVATE_DATA,
                    0x205,
                    vec![Descriptor::new(DESCRIPTOR_TELETEXT, *b"deu\x09\x00")],
                ),
            ],
        ));
        assert!(demux.teletext_available());
        assert_eq!(demux.pid_mapping().teletext, 0x205);
        assert_eq!(demux.pid_mapping().audio, 0);
        assert!(demux.audio_names().is_empty());
    }

    #[test]
    fn test_elementary_payload_is_routed() {
        let (demux, _calls) = demux();
        demux.add_payload(&pat(100));
        demux.add_payload(&broadcast_pmt(100));

        demux.add_payload(&packet(0x200, b"video pes"));
        demux.add_payload(&packet(0x201, b"audio pes"));
        demux.add_payload(&packet(0x202, b"other audio"));

        use crate::feed::Channel;
        assert_eq!(&demux.next_chunk(Channel::Video).unwrap()[..], b"video pes");
        assert_eq!(&demux.next_chunk(Channel::Audio).unwrap()[..], b"audio pes");
        assert!(demux.next_chunk(Channel::Audio).is_none());
    }

    fn eit(service_id: u16, events: &[(u16, u8)]) -> Vec<u8> {
        let mut body = vec![0x00, 0x01, 0x00, 0x01, 0x00, TABLE_ID_EIT_PF_ACTUAL];
        for &(event_id, status) in events {
            body.extend_from_slice(&event_id.to_be_bytes());
            body.extend_from_slice(&[0xC0, 0x79, 0x12, 0x45, 0x00, 0x00, 0x30, 0x00]);
            body.extend_from_slice(&[status << 5, 0x00]);
        }
        packet(PID_EIT, &build_section(TABLE_ID_EIT_PF_ACTUAL, service_id, 0, &body))
    }

    #[test]
    fn test_guide_events_first_match() {
        let (demux, _calls) = demux();
        demux.add_payload(&pat(100));
        // no service known yet
        demux.add_payload(&eit(28106, &[(1, 4)]));
        assert!(demux.current_event().is_none());

        demux.add_payload(&broadcast_pmt(100));
        demux.add_payload(&eit(999, &[(1, 4)]));
        assert!(demux.current_event().is_none());

        // unordered: the first not-running entry wins even if it is not the
        // one that follows the running event
        demux.add_payload(&eit(28106, &[(7, 1), (5, 4), (6, 1)]));
        assert_eq!(demux.current_event().map(|e| e.event_id), Some(5));
        assert_eq!(demux.next_event().map(|e| e.event_id), Some(7));
    }

    #[test]
    fn test_dispose_releases_tokenizer() {
        let (demux, _calls) = demux();
        assert!(demux.tokenizer_stats().is_some());
        demux.dispose();
        assert!(!demux.add_payload(&pat(100)));
        assert!(demux.tokenizer_stats().is_none());
    }
}
