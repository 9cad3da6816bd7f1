//! Our error types for the list-sweep coordinator.

use thiserror::Error;

use crate::types::{ChannelId, Phase};

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Error type for anything that talks to the instrument.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error")]
    SerialError(I),
    #[error("Communication timeout")]
    Timeout,
    #[error("Invalid response received: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Sweep(#[from] SweepError),
}

/// Errors raised by the coordinator itself. None of these involve the transport, so
/// program building, election and demultiplexing can be used without one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SweepError {
    #[error(
        "channel {channel} disagrees with list master channel {master} on {field}: master has {expected}, channel has {found}"
    )]
    ListSweepMismatch {
        channel: ChannelId,
        master: ChannelId,
        field: MismatchField,
        expected: String,
        found: String,
    },
    #[error("logarithmic list sweep needs strictly positive bounds, got start {start} and stop {stop}")]
    InvalidListRange { start: f64, stop: f64 },
    #[error("list sweep needs at least one step, got {0}")]
    InvalidStepCount(usize),
    #[error("cannot demultiplex record {token:?}: {fault}")]
    DemuxParseError { token: String, fault: DemuxFault },
    #[error("role conflict on channel {channel}: {reason}")]
    RoleConflict {
        channel: ChannelId,
        reason: ConflictReason,
    },
    #[error("channel {channel} cannot enter {wanted:?} while channel {blocking} is {found:?}")]
    PhaseOrder {
        channel: ChannelId,
        wanted: Phase,
        blocking: ChannelId,
        found: Phase,
    },
    #[error("list reply holds {found} readings for channel {channel}, expected {expected}")]
    IncompleteListResult {
        channel: ChannelId,
        expected: usize,
        found: usize,
    },
    #[error("channel {0} is not registered in this session")]
    UnknownChannel(ChannelId),
    #[error("channel id {0} is out of range, valid ids are 1 to 10")]
    InvalidChannel(u8),
}

/// The list parameter a follower disagreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MismatchField {
    Steps,
    Hold,
    Delay,
    /// Single versus dual (palindromic) sweep.
    Direction,
}

/// Why a single record of a bulk reply could not be routed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemuxFault {
    #[error("record is shorter than its three character header")]
    Truncated,
    #[error("status {0:?} is not a digit")]
    Status(char),
    #[error("unrecognised channel tag {0:?}")]
    ChannelTag(char),
    #[error("unrecognised measurement kind {0:?}")]
    Kind(char),
    #[error("value {0:?} is not a number")]
    Value(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    #[error("it is already the list master of this session")]
    AlreadyMaster,
    #[error("channel {0} already holds the list master role")]
    MasterExists(ChannelId),
    #[error("it is already registered in this session")]
    AlreadyRegistered,
    #[error("it holds the list master role without a list sweep")]
    MasterWithoutList,
}
