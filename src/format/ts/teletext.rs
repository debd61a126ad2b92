use super::pes::PESHeader;
use super::tokenizer::StreamPayload;
use log::trace;

/// Rebuilds complete teletext PES packets from stream filter runs.
///
/// Teletext PES packets always carry an explicit length, so a packet is
/// delivered as soon as it is complete. A packet that is cut short by the
/// start of the next one is dropped.
#[derive(Debug, Default)]
pub struct TeletextReassembler {
    buf: Vec<u8>,
    expected: Option<usize>,
    pts: Option<u64>,
}

impl TeletextReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets any partial packet.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected = None;
        self.pts = None;
    }

    /// Feeds one stream run. `sink` receives `(is_first, pes, pts)`; every
    /// delivery is a whole PES packet, so `is_first` is always set.
    pub fn add_payload<F>(&mut self, payload: &StreamPayload<'_>, mut sink: F)
    where
        F: FnMut(bool, &[u8], Option<u64>),
    {
        if payload.is_first {
            if !self.buf.is_empty() {
                trace!("dropping incomplete teletext packet of {} bytes", self.buf.len());
            }
            self.buf.clear();
            self.expected = match PESHeader::parse(payload.data) {
                Ok((header, _)) if header.packet_length > 0 => {
                    Some(6 + header.packet_length as usize)
                }
                Ok(_) => None,
                Err(_) => return,
            };
            self.pts = payload.pts;
        } else if self.buf.is_empty() {
            // waiting for a packet start
            return;
        }

        self.buf.extend_from_slice(payload.data);

        if let Some(expected) = self.expected {
            if self.buf.len() >= expected {
                sink(true, &self.buf[..expected], self.pts);
                self.buf.clear();
                self.expected = None;
            }
        }
    }
}
