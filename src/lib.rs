//! This crate coordinates synchronized list sweeps across the channels (SMUs) of a
//! multi-channel parameter analyzer.
//!
//! Each output terminal is driven by its own [`channel::SmuChannel`], but all channels of
//! one instrument share a single communication session and a single hardware list sweep.
//! The channels agree on that sweep among themselves:
//! * The first channel asking for a list sweep becomes the list master. It programs the
//!   list and its timing, triggers execution, polls for completion and reads the one
//!   interleaved reply back.
//! * Other list channels become followers and must use the master's step count, hold and
//!   delay exactly.
//! * Channels without a list sweep that share the session with a master follow it with a
//!   constant list of their fixed value.
//!
//! Any interface which implements [embedded_io::Read] & [embedded_io::Write] can carry the
//! session, e.g. a serial port or a GPIB/USB bridge. Commands and replies are newline
//! terminated.

pub mod channel;
pub mod demux;
pub mod error;
pub mod program;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod mock_serial;
