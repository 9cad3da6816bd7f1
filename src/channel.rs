use core::time::Duration;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use fugit::MillisDurationU32;
use log::{debug, info, warn};

use crate::{
    demux::{self, ListResult, Record},
    error::{ConflictReason, Error, Result, SweepError},
    program::{self, Directive},
    session::{SharedSession, SweepOutcome},
    types::{ChannelId, ListSweep, Phase, Role, SourceMode},
};

/// Static configuration of one channel for a measurement branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub source_mode: SourceMode,
    /// Fixed source level. Also the constant list value if the channel gets coerced into
    /// following a list master.
    pub value: f64,
    pub compliance: f64,
    /// Present only when this channel asks for list sweep sourcing.
    pub list: Option<ListSweep>,
}

/// Use this type to create a [`ChannelConfig`].
pub struct ChannelConfigBuilder {
    id: u8,
    source_mode: SourceMode,
    value: f64,
    compliance: f64,
    list: Option<ListSweep>,
}

impl ChannelConfigBuilder {
    pub fn new(id: u8, source_mode: SourceMode) -> Self {
        Self {
            id,
            source_mode,
            value: 0.0,
            compliance: 0.1,
            list: None,
        }
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    pub fn compliance(mut self, compliance: f64) -> Self {
        self.compliance = compliance;
        self
    }

    pub fn list_sweep(mut self, sweep: ListSweep) -> Self {
        self.list = Some(sweep);
        self
    }

    /// Validates the channel id and any list sweep, so a bad range is reported before the
    /// channel is ever registered.
    pub fn build(self) -> core::result::Result<ChannelConfig, SweepError> {
        let id = ChannelId::try_from(self.id)?;
        if let Some(sweep) = &self.list {
            program::build_source_values(sweep)?;
        }
        Ok(ChannelConfig {
            id,
            source_mode: self.source_mode,
            value: self.value,
            compliance: self.compliance,
            list: self.list,
        })
    }
}

/// Completion polling of the list master.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// Sleep between two completion queries.
    pub interval: MillisDurationU32,
    /// Abort the sweep if it is still running after this long. `None` polls until the sweep
    /// finishes or a stop is requested.
    pub timeout: Option<MillisDurationU32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: MillisDurationU32::millis(50),
            timeout: None,
        }
    }
}

/// Cooperative stop request, shared between the sequencer and the polling master.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What [`SmuChannel::call`] hands back to the sequencer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    /// Programmed source values, computed locally since the instrument does not echo them.
    pub source: Vec<f64>,
    pub measured: Vec<f64>,
    /// Seconds relative to the master's first sample. Empty for spot measurements.
    pub timestamps: Vec<f64>,
    /// Indices of samples the instrument reported a non-zero status for.
    pub flagged: Vec<usize>,
}

impl Measurement {
    /// `(source, measured)` per step.
    pub fn pairs(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.source.iter().copied().zip(self.measured.iter().copied())
    }
}

/// Driver for one SMU output terminal.
///
/// Every channel sharing an instrument holds the same session. The sequencer calls each
/// lifecycle hook on all channels before moving on to the next hook:
/// `configure → signin → start → apply → measure → request_result → read_result → call →
/// unconfigure`.
pub struct SmuChannel<S: embedded_io::Read + embedded_io::Write> {
    config: ChannelConfig,
    session: SharedSession<S>,
    poll: PollConfig,
    role: Option<Role>,
    /// Values this channel steps through, empty for a single channel.
    source_values: Vec<f64>,
    level: f64,
    spot: Option<f64>,
}

impl<S: embedded_io::Read + embedded_io::Write> SmuChannel<S> {
    pub fn new(config: ChannelConfig, session: SharedSession<S>) -> Self {
        let level = config.value;
        Self {
            config,
            session,
            poll: PollConfig::default(),
            role: None,
            source_values: Vec::new(),
            level,
            spot: None,
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn id(&self) -> ChannelId {
        self.config.id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// `None` until [`configure`](Self::configure) succeeded.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn source_values(&self) -> &[f64] {
        &self.source_values
    }

    /// Register with the session and propose a role.
    ///
    /// Mismatching list parameters fail here, before anything is written to the instrument.
    pub fn configure(&mut self) -> Result<Role, S::Error> {
        let values = match &self.config.list {
            Some(sweep) => program::build_source_values(sweep)?,
            None => Vec::new(),
        };

        let role = self
            .session
            .borrow_mut()
            .list
            .register(self.config.id, self.config.list.as_ref())?;

        self.role = Some(role);
        self.source_values = values;
        self.spot = None;
        Ok(role)
    }

    /// Finalise the role once every channel is registered.
    ///
    /// A single channel sharing the session with a list master is coerced into following it
    /// with a constant list. The master programs its list and timing here.
    pub fn signin(&mut self) -> Result<(), S::Error> {
        let id = self.config.id;
        let role = self.current_role()?;
        let mut session = self.session.borrow_mut();
        session.list.require_all(id, Phase::SignedIn, Phase::Registered)?;

        match role {
            Role::Single => {
                if let Some(master) = session.list.coerce_follower(id)? {
                    self.role = Some(Role::ListFollower {
                        master: master.channel,
                    });
                    self.source_values =
                        program::constant_values(self.config.value, master.realized_points());
                }
                session.list.advance(id, Phase::SignedIn)?;
            }
            Role::ListMaster => {
                session.list.advance(id, Phase::SignedIn)?;
                let sweep = self.master_sweep()?;
                for directive in program::render_master_program(&self.config, &sweep) {
                    session.transport.send(&directive)?;
                }
                session.list.advance(id, Phase::Programmed)?;
            }
            Role::ListFollower { .. } => session.list.advance(id, Phase::SignedIn)?,
        }
        Ok(())
    }

    /// Followers submit their list, which is only valid after the master is programmed.
    pub fn start(&mut self) -> Result<(), S::Error> {
        let id = self.config.id;
        let role = self.current_role()?;
        let mut session = self.session.borrow_mut();
        session.list.require_all(id, Phase::ProgramSubmitted, Phase::SignedIn)?;

        if let Role::ListFollower { master } = role {
            session
                .list
                .require_channel(id, Phase::ProgramSubmitted, master, Phase::Programmed)?;
            let directive = program::render_follower_program(&self.config, &self.source_values);
            session.transport.send(&directive)?;
            session.list.advance(id, Phase::ProgramSubmitted)?;
        }
        Ok(())
    }

    /// Set the source level. Only a single channel sources a plain level; list channels
    /// step through their programmed values.
    pub fn apply(&mut self, value: f64) -> Result<(), S::Error> {
        match self.current_role()? {
            Role::Single => {
                self.level = value;
                self.session.borrow_mut().transport.send(&Directive::SetSource {
                    channel: self.config.id,
                    source: self.config.source_mode,
                    level: value,
                    compliance: self.config.compliance,
                })
            }
            _ => {
                debug!("Channel {} ignores level {} in list mode", self.config.id, value);
                Ok(())
            }
        }
    }

    /// The master triggers the list sweep for every participant.
    pub fn measure(&mut self) -> Result<(), S::Error> {
        let id = self.config.id;
        if self.current_role()? != Role::ListMaster {
            return Ok(());
        }

        let mut session = self.session.borrow_mut();
        session
            .list
            .require_followers(id, Phase::Triggered, Phase::ProgramSubmitted)?;
        session.transport.send(&Directive::ExecuteList)?;
        session.list.advance(id, Phase::Triggered)?;
        info!("Channel {} triggered list sweep", id);
        Ok(())
    }

    /// The master waits for the sweep to finish.
    ///
    /// `stop` is checked before every poll. A requested stop aborts the sweep and returns
    /// without error; no results will be read back.
    pub fn request_result(&mut self, stop: &StopFlag) -> Result<(), S::Error> {
        let id = self.config.id;
        if self.current_role()? != Role::ListMaster {
            return Ok(());
        }

        let mut session = self.session.borrow_mut();
        session
            .list
            .require_channel(id, Phase::AwaitingCompletion, id, Phase::Triggered)?;
        session.list.advance(id, Phase::AwaitingCompletion)?;

        let started = Instant::now();
        let interval = Duration::from_millis(u64::from(self.poll.interval.to_millis()));
        let deadline = self
            .poll
            .timeout
            .map(|timeout| Duration::from_millis(u64::from(timeout.to_millis())));

        loop {
            if stop.is_requested() {
                warn!("Channel {} list sweep cancelled", id);
                session.transport.send(&Directive::AbortList)?;
                session.list.finish(SweepOutcome::Cancelled);
                return Ok(());
            }

            let reply = session.transport.query(&Directive::QueryCompletion)?;
            match reply.trim() {
                "1" => break,
                "0" => {}
                other => {
                    return Err(Error::InvalidResponse(format!(
                        "unexpected completion flag {other:?}"
                    )));
                }
            }

            if deadline.is_some_and(|deadline| started.elapsed() >= deadline) {
                warn!("Channel {} list sweep timed out, aborting", id);
                session.transport.send(&Directive::AbortList)?;
                return Err(Error::Timeout);
            }
            std::thread::sleep(interval);
        }

        session.list.finish(SweepOutcome::Completed);
        info!("Channel {} list sweep complete", id);
        Ok(())
    }

    /// The master reads back and splits the bulk reply. A single channel takes a spot
    /// measurement.
    pub fn read_result(&mut self) -> Result<(), S::Error> {
        let id = self.config.id;
        match self.current_role()? {
            Role::ListMaster => {
                let mut session = self.session.borrow_mut();
                match session.list.outcome() {
                    Some(SweepOutcome::Completed) => {}
                    Some(SweepOutcome::Cancelled) => return Ok(()),
                    None => {
                        return Err(SweepError::PhaseOrder {
                            channel: id,
                            wanted: Phase::Demultiplexed,
                            blocking: id,
                            found: session.list.phase(id)?,
                        }
                        .into());
                    }
                }

                let expected = self.master_sweep()?.realized_points();
                let reply = session.transport.query_complete(&Directive::ReadBulkReply)?;
                let mut results = demux::demultiplex(&reply)?;
                session.list.check_results(&results, expected)?;
                demux::normalize_timestamps(&mut results, id);
                session.list.store_results(results);
                session.list.advance(id, Phase::Demultiplexed)?;
                Ok(())
            }
            Role::Single => {
                let kind = self.config.source_mode.measured_kind();
                let reply = self
                    .session
                    .borrow_mut()
                    .transport
                    .query(&Directive::MeasureSpot { channel: id, kind })?;
                let record: Record = reply.trim().parse()?;
                if record.channel != id || record.kind != kind {
                    return Err(Error::InvalidResponse(format!(
                        "expected {} reading of channel {}, got {:?}",
                        kind.code(),
                        id,
                        reply
                    )));
                }
                self.spot = Some(record.value);
                Ok(())
            }
            Role::ListFollower { .. } => Ok(()),
        }
    }

    /// Pair the source values with what was measured.
    pub fn call(&self) -> Result<Measurement, S::Error> {
        match self.current_role()? {
            Role::Single => Ok(Measurement {
                source: vec![self.level],
                measured: self.spot.into_iter().collect(),
                ..Default::default()
            }),
            Role::ListMaster | Role::ListFollower { .. } => {
                let session = self.session.borrow();
                let ListResult {
                    measurements,
                    timestamps,
                    flagged,
                } = session.list.result(self.config.id).cloned().unwrap_or_default();
                Ok(Measurement {
                    source: self.source_values.clone(),
                    measured: measurements,
                    timestamps,
                    flagged,
                })
            }
        }
    }

    /// Leave the session. If this channel was the master, another channel may become
    /// master in the next branch.
    pub fn unconfigure(&mut self) -> Result<(), S::Error> {
        self.session.borrow_mut().list.unregister(self.config.id)?;
        self.role = None;
        self.source_values.clear();
        self.spot = None;
        Ok(())
    }

    fn current_role(&self) -> core::result::Result<Role, SweepError> {
        self.role.ok_or(SweepError::UnknownChannel(self.config.id))
    }

    fn master_sweep(&self) -> core::result::Result<ListSweep, SweepError> {
        self.config.list.ok_or(SweepError::RoleConflict {
            channel: self.config.id,
            reason: ConflictReason::MasterWithoutList,
        })
    }
}
