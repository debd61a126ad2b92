//! Container formats understood by the feeds.

pub mod ts;
