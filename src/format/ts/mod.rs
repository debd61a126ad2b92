//! # MPEG Transport Stream (TS) Implementation
//!
//! The transport stream layer underneath the feeds:
//!
//! - TS packet header parsing and re-synchronisation
//! - Program Specific Information (PAT, PMT) and the present/following
//!   Event Information Table
//! - Per-PID section and PES filters through [`PacketTokenizer`]
//! - Teletext PES reassembly
//! - Packet writing for synthetic streams
//!
//! ## Example Usage
//!
//! ```rust
//! use tsfeed::format::ts::{FilterHandler, PacketTokenizer, TsTokenizer, PID_PAT};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let sections = Arc::new(AtomicUsize::new(0));
//! let seen = sections.clone();
//!
//! let mut tokenizer = TsTokenizer::new();
//! tokenizer.set_filter(
//!     PID_PAT,
//!     FilterHandler::section(move |_section| {
//!         seen.fetch_add(1, Ordering::Relaxed);
//!     }),
//! );
//!
//! // Garbage is skipped until the next sync byte.
//! tokenizer.add_payload(&[0x00, 0x01, 0x02]);
//! assert_eq!(tokenizer.stats().skipped_bytes, 3);
//! assert_eq!(sections.load(Ordering::Relaxed), 0);
//! ```

/// Low-level TS packet and PSI/SI table parsing
pub mod parser;

/// PES packet handling
pub mod pes;

/// Teletext PES reassembly
pub mod teletext;

/// Per-PID packet filtering
pub mod tokenizer;

/// Core TS types and constants
pub mod types;

/// TS packet writing for sections and PES packets
pub mod writer;

pub use parser::{PsiSection, TSPacketParser};
pub use pes::{PESHeader, PESPacket};
pub use teletext::TeletextReassembler;
pub use tokenizer::{
    FilterHandler, FilterKind, PacketTokenizer, StreamPayload, TokenizerStats, TsTokenizer,
};
pub use types::{
    GuideEvent, RunningStatus, TSHeader, EIT, PAT, PID_EIT, PID_NULL, PID_PAT, PMT,
    TS_PACKET_SIZE,
};
pub use writer::{build_section, TsPacketWriter};
