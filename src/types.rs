//! This module contains the types shared by the coordinator: channel ids, roles, phases and
//! list sweep parameters.

use core::fmt;

use fugit::MicrosDurationU32;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::SweepError;

/// Identifies one output terminal (SMU) of the instrument.
///
/// Valid ids are `1..=10`. On the wire a channel is tagged by a letter, `A` for channel 1
/// through `J` for channel 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Highest channel id the instrument can address.
    pub const MAX: u8 = 10;

    /// Returns `None` if `id` is outside `1..=10`.
    pub const fn new(id: u8) -> Option<Self> {
        if id >= 1 && id <= Self::MAX {
            Some(Self(id))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Map a reply tag (`A`-`J` or `a`-`j`) to its channel.
    pub fn from_tag(tag: char) -> Option<Self> {
        let offset = match tag {
            'A'..='J' => tag as u8 - b'A',
            'a'..='j' => tag as u8 - b'a',
            _ => return None,
        };
        Self::new(offset + 1)
    }

    /// The upper case tag used for this channel in replies.
    pub fn tag(self) -> char {
        (b'A' + self.0 - 1) as char
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = SweepError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(SweepError::InvalidChannel(value))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which quantity a channel forces. The other one is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Voltage,
    Current,
}

impl SourceMode {
    /// The quantity the instrument reports back for a channel sourcing in this mode.
    pub const fn measured_kind(self) -> MeasureKind {
        match self {
            SourceMode::Voltage => MeasureKind::Current,
            SourceMode::Current => MeasureKind::Voltage,
        }
    }

    pub(crate) const fn mnemonic(self) -> &'static str {
        match self {
            SourceMode::Voltage => "VOLT",
            SourceMode::Current => "CURR",
        }
    }
}

/// Kind character of a tagged reply record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum MeasureKind {
    /// `V`
    Voltage,
    /// `I`
    Current,
    /// `T`
    Timestamp,
}

impl MeasureKind {
    pub const fn code(self) -> char {
        match self {
            MeasureKind::Voltage => 'V',
            MeasureKind::Current => 'I',
            MeasureKind::Timestamp => 'T',
        }
    }

    pub const fn from_code(code: char) -> Option<Self> {
        match code {
            'V' => Some(MeasureKind::Voltage),
            'I' => Some(MeasureKind::Current),
            'T' => Some(MeasureKind::Timestamp),
            _ => None,
        }
    }

    pub(crate) const fn mnemonic(self) -> &'static str {
        match self {
            MeasureKind::Voltage => "VOLT",
            MeasureKind::Current => "CURR",
            MeasureKind::Timestamp => "TIME",
        }
    }
}

/// Shape of the list of source values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum SweepMode {
    Linear,
    Logarithmic,
    /// Linear forward, then the same points in reverse.
    LinearDual,
    /// Logarithmic forward, then the same points in reverse.
    LogarithmicDual,
}

impl SweepMode {
    pub const fn is_dual(self) -> bool {
        matches!(self, SweepMode::LinearDual | SweepMode::LogarithmicDual)
    }

    pub const fn is_logarithmic(self) -> bool {
        matches!(self, SweepMode::Logarithmic | SweepMode::LogarithmicDual)
    }

    pub(crate) const fn wire_code(self) -> &'static str {
        match self {
            SweepMode::Linear => "LIN",
            SweepMode::Logarithmic => "LOG",
            SweepMode::LinearDual => "LIND",
            SweepMode::LogarithmicDual => "LOGD",
        }
    }
}

/// Per step timing of a list sweep. Every participant must use exactly the master's timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListTiming {
    /// Wait before the first step.
    pub hold: MicrosDurationU32,
    /// Wait between applying a step and measuring it.
    pub delay: MicrosDurationU32,
}

impl ListTiming {
    pub const fn new(hold: MicrosDurationU32, delay: MicrosDurationU32) -> Self {
        Self { hold, delay }
    }
}

impl Default for ListTiming {
    fn default() -> Self {
        Self::new(MicrosDurationU32::from_ticks(0), MicrosDurationU32::from_ticks(0))
    }
}

/// List sweep requested for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListSweep {
    pub mode: SweepMode,
    pub start: f64,
    pub stop: f64,
    /// Forward step count. Dual modes realise twice as many points.
    pub steps: usize,
    pub timing: ListTiming,
}

impl ListSweep {
    /// A sweep with zero hold and delay. See [`with_timing`](Self::with_timing).
    pub fn new(mode: SweepMode, start: f64, stop: f64, steps: usize) -> Self {
        Self {
            mode,
            start,
            stop,
            steps,
            timing: ListTiming::default(),
        }
    }

    pub const fn with_timing(mut self, timing: ListTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Number of source values the hardware actually steps through.
    pub const fn realized_points(&self) -> usize {
        if self.mode.is_dual() {
            self.steps * 2
        } else {
            self.steps
        }
    }
}

/// Role of a channel within one measurement branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Plain spot source/measure, no list sweep.
    Single,
    /// Programs, triggers and reads back the shared list sweep.
    ListMaster,
    /// Steps along with the master's list clock.
    ListFollower { master: ChannelId },
}

/// Where a channel is in the branch lifecycle.
///
/// Master: `Registered → SignedIn → Programmed → Triggered → AwaitingCompletion → Demultiplexed`.
/// Follower: `Registered → SignedIn → ProgramSubmitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Registered,
    SignedIn,
    Programmed,
    ProgramSubmitted,
    Triggered,
    AwaitingCompletion,
    Demultiplexed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn channel_tags() {
        for id in 1..=ChannelId::MAX {
            let channel = ChannelId::new(id).unwrap();
            assert_eq!(ChannelId::from_tag(channel.tag()), Some(channel));
            assert_eq!(
                ChannelId::from_tag(channel.tag().to_ascii_lowercase()),
                Some(channel)
            );
        }
        assert_eq!(ChannelId::from_tag('A').unwrap().get(), 1);
        assert_eq!(ChannelId::from_tag('j').unwrap().get(), 10);
        assert_eq!(ChannelId::from_tag('K'), None);
        assert_eq!(ChannelId::from_tag('0'), None);
    }

    #[test]
    fn channel_id_range() {
        assert!(ChannelId::new(0).is_none());
        assert!(ChannelId::new(11).is_none());
        assert_eq!(ChannelId::try_from(11), Err(SweepError::InvalidChannel(11)));
    }

    #[test]
    fn sweep_mode_names() {
        for mode in SweepMode::iter() {
            assert_eq!(SweepMode::from_str(&mode.to_string()).unwrap(), mode);
        }
        assert_eq!(
            SweepMode::from_str("logarithmic-dual").unwrap(),
            SweepMode::LogarithmicDual
        );
        assert!(SweepMode::from_str("staircase").is_err());
    }

    #[test]
    fn measure_kind_codes() {
        for kind in MeasureKind::iter() {
            assert_eq!(MeasureKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(MeasureKind::from_code('X'), None);
    }

    #[test]
    fn dual_sweeps_realize_twice_the_steps() {
        let sweep = ListSweep::new(SweepMode::LinearDual, 0.0, 1.0, 4);
        assert_eq!(sweep.realized_points(), 8);
        let sweep = ListSweep::new(SweepMode::Logarithmic, 1.0, 10.0, 4);
        assert_eq!(sweep.realized_points(), 4);
        assert_eq!(sweep.timing, ListTiming::default());
        assert_eq!(sweep.timing.hold.to_micros(), 0);
    }
}
