#![doc(html_root_url = "https://docs.rs/tsfeed/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsfeed - Transport stream feeds for playback pipelines
//!
//! `tsfeed` sits between a source of MPEG-2 transport stream data and a
//! decode/render graph. It splits the stream into an audio and a video
//! chunk stream, follows program changes, and hands the chunks to the
//! graph on two consumer threads.
//!
//! ## Features
//!
//! ### Feeds
//! - Pushed elementary streams
//! - Pushed transport streams with PAT/PMT tracking, audio track
//!   selection, teletext and now/next guide data
//! - Paced replay of recordings, including recordings split over files
//! - UDP unicast and multicast reception
//!
//! ### Transport stream
//! - Packet tokenizer with per-PID section and PES filters
//! - PSI/SI parsing (PAT, PMT, EIT present/following)
//! - PES headers and packet writing for synthetic streams
//!
//! ## Quick Start
//!
//! ```rust
//! use tsfeed::feed::{BufferedElementaryFeed, Channel, FeedSource};
//!
//! let feed = BufferedElementaryFeed::new();
//! feed.start();
//! feed.add_video(&[0x00, 0x00, 0x01, 0xE0]);
//!
//! let chunk = feed.next_chunk(Channel::Video).unwrap();
//! assert_eq!(&chunk[..], &[0x00, 0x00, 0x01, 0xE0]);
//! ```
//!
//! ## Module Overview
//!
//! - `feed`: the feed variants, their shared lifecycle and the consumer
//!   threads
//! - `format`: transport stream parsing, filtering and writing
//! - `source`: positionable byte sources over recording files
//! - `config`: buffer sizes and timing knobs
//! - `error`: error type and result alias
//! - `utils`: bit reader and CRC
//!

/// Buffer sizes and timing
pub mod config;

/// Error types and utilities
pub mod error;

/// Audio/video feeds and the consumer threads
pub mod feed;

/// Container formats (MPEG transport stream)
pub mod format;

/// Recording files as byte sources
pub mod source;

/// Common utilities and helper functions
pub mod utils;

pub use config::FeedConfig;
pub use error::{FeedError, Result};
