//! Shared coordination state for all channels multiplexed onto one instrument connection.
//!
//! Everything here assumes a single cooperative caller. The points that would need a lock
//! (or an owning task) in a concurrent port are [`SessionRegistry::get_or_create`] and the
//! `&mut self` methods of [`ListState`] that elect roles and store results.

use core::fmt;
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use log::{info, warn};

use crate::{
    demux::ListResult,
    error::{ConflictReason, MismatchField, SweepError},
    transport::Transport,
    types::{ChannelId, ListSweep, ListTiming, Phase, Role},
};

/// Identifies one physical connection, e.g. `("SMU-4200", "GPIB0::17")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub instrument: String,
    pub port: String,
}

impl ConnectionId {
    pub fn new(instrument: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.instrument, self.port)
    }
}

/// Parameters the elected master wrote into the session. Followers are checked against it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasterSlot {
    pub channel: ChannelId,
    /// Forward step count, also for dual sweeps.
    pub list_length: usize,
    pub timing: ListTiming,
    pub dual: bool,
}

impl MasterSlot {
    /// Points the hardware steps through, counting the return leg of a dual sweep.
    pub const fn realized_points(&self) -> usize {
        if self.dual {
            self.list_length * 2
        } else {
            self.list_length
        }
    }
}

/// How the master's completion poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed,
    /// Stopped on request; no results are read back.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Participant {
    role: Role,
    phase: Phase,
}

/// The session record: registered channels, the master slot and the demultiplexed results.
#[derive(Debug, Default)]
pub struct ListState {
    participants: BTreeMap<ChannelId, Participant>,
    master: Option<MasterSlot>,
    results: BTreeMap<ChannelId, ListResult>,
    outcome: Option<SweepOutcome>,
}

impl ListState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel and resolve its role from its list request.
    ///
    /// The first channel asking for a list sweep becomes master; later ones become
    /// followers and must agree with the master's step count and timing. On error nothing
    /// is registered.
    pub fn register(
        &mut self,
        channel: ChannelId,
        list: Option<&ListSweep>,
    ) -> Result<Role, SweepError> {
        if self.participants.contains_key(&channel) {
            let reason = match self.master {
                Some(master) if master.channel == channel => ConflictReason::AlreadyMaster,
                _ => ConflictReason::AlreadyRegistered,
            };
            return Err(SweepError::RoleConflict { channel, reason });
        }

        let role = match (list, self.master) {
            (Some(sweep), None) => {
                self.claim_master(channel, sweep)?;
                info!(
                    "Channel {} elected list master ({} steps, {})",
                    channel, sweep.steps, sweep.mode
                );
                Role::ListMaster
            }
            (Some(sweep), Some(master)) => {
                check_consistent(channel, &master, sweep)?;
                info!("Channel {} joins list of master {}", channel, master.channel);
                Role::ListFollower {
                    master: master.channel,
                }
            }
            (None, _) => Role::Single,
        };

        self.participants.insert(
            channel,
            Participant {
                role,
                phase: Phase::Registered,
            },
        );
        Ok(role)
    }

    /// Take the master slot for `channel`. Fails if any channel already holds it.
    pub fn claim_master(&mut self, channel: ChannelId, sweep: &ListSweep) -> Result<(), SweepError> {
        if let Some(master) = self.master {
            let reason = if master.channel == channel {
                ConflictReason::AlreadyMaster
            } else {
                ConflictReason::MasterExists(master.channel)
            };
            return Err(SweepError::RoleConflict { channel, reason });
        }

        self.master = Some(MasterSlot {
            channel,
            list_length: sweep.steps,
            timing: sweep.timing,
            dual: sweep.mode.is_dual(),
        });
        Ok(())
    }

    /// Turn a single channel into a follower of the current master.
    ///
    /// Returns `None` if the session has no master, leaving the role untouched.
    pub fn coerce_follower(&mut self, channel: ChannelId) -> Result<Option<MasterSlot>, SweepError> {
        let Some(master) = self.master else {
            return Ok(None);
        };
        let participant = self.participant_mut(channel)?;
        if participant.role != Role::Single || master.channel == channel {
            return Ok(None);
        }
        participant.role = Role::ListFollower {
            master: master.channel,
        };
        info!(
            "Channel {} follows master {} with a constant list",
            channel, master.channel
        );
        Ok(Some(master))
    }

    /// Remove a channel. A departing master frees the master slot and its timing.
    pub fn unregister(&mut self, channel: ChannelId) -> Result<(), SweepError> {
        self.participants
            .remove(&channel)
            .ok_or(SweepError::UnknownChannel(channel))?;
        self.results.remove(&channel);

        if self.master.is_some_and(|master| master.channel == channel) {
            if !self.participants.is_empty() {
                warn!("List master {} left with channels still registered", channel);
            }
            self.master = None;
            self.outcome = None;
        }
        if self.participants.is_empty() {
            self.results.clear();
            self.outcome = None;
        }
        Ok(())
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.participants.keys().copied()
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        self.participants.contains_key(&channel)
    }

    pub fn master(&self) -> Option<&MasterSlot> {
        self.master.as_ref()
    }

    pub fn role(&self, channel: ChannelId) -> Result<Role, SweepError> {
        self.participant(channel).map(|p| p.role)
    }

    pub fn phase(&self, channel: ChannelId) -> Result<Phase, SweepError> {
        self.participant(channel).map(|p| p.phase)
    }

    /// Move `channel` forward to `to`. Phases never move backwards.
    pub fn advance(&mut self, channel: ChannelId, to: Phase) -> Result<(), SweepError> {
        let participant = self.participant_mut(channel)?;
        if participant.phase > to {
            return Err(SweepError::PhaseOrder {
                channel,
                wanted: to,
                blocking: channel,
                found: participant.phase,
            });
        }
        participant.phase = to;
        Ok(())
    }

    /// Fail unless every registered channel has reached at least `min`.
    pub fn require_all(&self, channel: ChannelId, wanted: Phase, min: Phase) -> Result<(), SweepError> {
        self.require(channel, wanted, min, |_| true)
    }

    /// Fail unless every follower has reached at least `min`.
    pub fn require_followers(
        &self,
        channel: ChannelId,
        wanted: Phase,
        min: Phase,
    ) -> Result<(), SweepError> {
        self.require(channel, wanted, min, |role| {
            matches!(role, Role::ListFollower { .. })
        })
    }

    /// Fail unless `other` has reached at least `min`.
    pub fn require_channel(
        &self,
        channel: ChannelId,
        wanted: Phase,
        other: ChannelId,
        min: Phase,
    ) -> Result<(), SweepError> {
        let found = self.phase(other)?;
        if found < min {
            return Err(SweepError::PhaseOrder {
                channel,
                wanted,
                blocking: other,
                found,
            });
        }
        Ok(())
    }

    pub fn outcome(&self) -> Option<SweepOutcome> {
        self.outcome
    }

    pub fn finish(&mut self, outcome: SweepOutcome) {
        self.outcome = Some(outcome);
    }

    /// Fail unless every list channel has exactly `expected` readings in `results`.
    pub fn check_results(
        &self,
        results: &BTreeMap<ChannelId, ListResult>,
        expected: usize,
    ) -> Result<(), SweepError> {
        let short = self
            .participants
            .iter()
            .filter(|(_, p)| p.role != Role::Single)
            .map(|(&channel, _)| {
                let found = results.get(&channel).map_or(0, |r| r.measurements.len());
                (channel, found)
            })
            .find(|&(_, found)| found != expected);
        match short {
            Some((channel, found)) => Err(SweepError::IncompleteListResult {
                channel,
                expected,
                found,
            }),
            None => Ok(()),
        }
    }

    pub fn store_results(&mut self, results: BTreeMap<ChannelId, ListResult>) {
        self.results = results;
    }

    pub fn result(&self, channel: ChannelId) -> Option<&ListResult> {
        self.results.get(&channel)
    }

    fn require(
        &self,
        channel: ChannelId,
        wanted: Phase,
        min: Phase,
        filter: impl Fn(Role) -> bool,
    ) -> Result<(), SweepError> {
        let blocking = self
            .participants
            .iter()
            .find(|(id, p)| **id != channel && filter(p.role) && p.phase < min);
        match blocking {
            Some((&blocking, p)) => Err(SweepError::PhaseOrder {
                channel,
                wanted,
                blocking,
                found: p.phase,
            }),
            None => Ok(()),
        }
    }

    fn participant(&self, channel: ChannelId) -> Result<&Participant, SweepError> {
        self.participants
            .get(&channel)
            .ok_or(SweepError::UnknownChannel(channel))
    }

    fn participant_mut(&mut self, channel: ChannelId) -> Result<&mut Participant, SweepError> {
        self.participants
            .get_mut(&channel)
            .ok_or(SweepError::UnknownChannel(channel))
    }
}

fn check_consistent(
    channel: ChannelId,
    master: &MasterSlot,
    sweep: &ListSweep,
) -> Result<(), SweepError> {
    let mismatch = |field, expected: String, found: String| SweepError::ListSweepMismatch {
        channel,
        master: master.channel,
        field,
        expected,
        found,
    };

    if sweep.steps != master.list_length {
        return Err(mismatch(
            MismatchField::Steps,
            master.list_length.to_string(),
            sweep.steps.to_string(),
        ));
    }
    if sweep.timing.hold != master.timing.hold {
        return Err(mismatch(
            MismatchField::Hold,
            format!("{} us", master.timing.hold.ticks()),
            format!("{} us", sweep.timing.hold.ticks()),
        ));
    }
    if sweep.timing.delay != master.timing.delay {
        return Err(mismatch(
            MismatchField::Delay,
            format!("{} us", master.timing.delay.ticks()),
            format!("{} us", sweep.timing.delay.ticks()),
        ));
    }
    if sweep.mode.is_dual() != master.dual {
        let direction = |dual: bool| if dual { "dual" } else { "single" }.to_string();
        return Err(mismatch(
            MismatchField::Direction,
            direction(master.dual),
            direction(sweep.mode.is_dual()),
        ));
    }
    Ok(())
}

/// One shared connection: the command transport and the list coordination record.
pub struct Session<S: embedded_io::Read + embedded_io::Write> {
    pub connection: ConnectionId,
    pub transport: Transport<S>,
    pub list: ListState,
}

pub type SharedSession<S> = Rc<RefCell<Session<S>>>;

/// Maps each connection to the one session its channels share.
pub struct SessionRegistry<S: embedded_io::Read + embedded_io::Write> {
    sessions: HashMap<ConnectionId, SharedSession<S>>,
}

impl<S: embedded_io::Read + embedded_io::Write> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<S: embedded_io::Read + embedded_io::Write> SessionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `connection`, opening the interface with `open` only if this
    /// is the first request for it.
    pub fn get_or_create(
        &mut self,
        connection: &ConnectionId,
        open: impl FnOnce() -> S,
    ) -> SharedSession<S> {
        self.sessions
            .entry(connection.clone())
            .or_insert_with(|| {
                info!("Opening session for {}", connection);
                Rc::new(RefCell::new(Session {
                    connection: connection.clone(),
                    transport: Transport::new(open(), connection.to_string()),
                    list: ListState::new(),
                }))
            })
            .clone()
    }

    pub fn get(&self, connection: &ConnectionId) -> Option<SharedSession<S>> {
        self.sessions.get(connection).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
