//! List program building: the source values each channel steps through and the directives
//! that program them into the instrument.

use core::fmt;

use crate::{
    channel::ChannelConfig,
    error::SweepError,
    types::{ChannelId, ListSweep, MeasureKind, SourceMode, SweepMode},
};

/// Compute the ordered source values of a list sweep.
///
/// Dual modes return the forward points followed by the same points reversed, so the
/// result holds `2 * steps` values.
pub fn build_source_values(sweep: &ListSweep) -> Result<Vec<f64>, SweepError> {
    if sweep.steps == 0 {
        return Err(SweepError::InvalidStepCount(sweep.steps));
    }

    let mut values = if sweep.mode.is_logarithmic() {
        logarithmic(sweep.start, sweep.stop, sweep.steps)?
    } else {
        linear(sweep.start, sweep.stop, sweep.steps)
    };

    if sweep.mode.is_dual() {
        let reverse: Vec<f64> = values.iter().rev().copied().collect();
        values.extend(reverse);
    }
    Ok(values)
}

/// Values for a follower that holds one level for the whole sweep.
pub fn constant_values(value: f64, points: usize) -> Vec<f64> {
    vec![value; points]
}

fn linear(start: f64, stop: f64, steps: usize) -> Vec<f64> {
    if steps == 1 {
        return vec![start];
    }
    let last = (steps - 1) as f64;
    (0..steps)
        .map(|i| match i {
            0 => start,
            i if i == steps - 1 => stop,
            i => start + (stop - start) * (i as f64 / last),
        })
        .collect()
}

fn logarithmic(start: f64, stop: f64, steps: usize) -> Result<Vec<f64>, SweepError> {
    if start <= 0.0 || stop <= 0.0 || start.is_nan() || stop.is_nan() {
        return Err(SweepError::InvalidListRange { start, stop });
    }
    // Endpoints are pinned so rounding in powf never moves them.
    Ok(linear(start.log10(), stop.log10(), steps)
        .into_iter()
        .enumerate()
        .map(|(i, exponent)| match i {
            0 => start,
            i if i == steps - 1 => stop,
            _ => 10f64.powf(exponent),
        })
        .collect())
}

/// One command sent to the instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// The master's own list: mode, bounds, forward step count and compliance.
    ProgramMasterList {
        channel: ChannelId,
        source: SourceMode,
        mode: SweepMode,
        start: f64,
        stop: f64,
        steps: usize,
        compliance: f64,
    },
    /// Hold and delay, shared by every channel in the list sweep.
    ProgramListTiming { hold_s: f64, delay_s: f64 },
    /// Follower values, stepped on the master's clock.
    SubmitFollowerList {
        channel: ChannelId,
        source: SourceMode,
        compliance: f64,
        values: Vec<f64>,
    },
    ExecuteList,
    /// Replies `1` once the list sweep has finished, `0` while it is running.
    QueryCompletion,
    /// Replies with every tagged record of the last list sweep on one line.
    ReadBulkReply,
    AbortList,
    SetSource {
        channel: ChannelId,
        source: SourceMode,
        level: f64,
        compliance: f64,
    },
    /// Replies with a single tagged record.
    MeasureSpot { channel: ChannelId, kind: MeasureKind },
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::ProgramMasterList {
                channel,
                source,
                mode,
                start,
                stop,
                steps,
                compliance,
            } => write!(
                f,
                ":SOUR{channel}:LIST:{} {},{start},{stop},{steps},{compliance}",
                source.mnemonic(),
                mode.wire_code()
            ),
            Directive::ProgramListTiming { hold_s, delay_s } => {
                write!(f, ":SOUR:LIST:TIM {hold_s},{delay_s}")
            }
            Directive::SubmitFollowerList {
                channel,
                source,
                compliance,
                values,
            } => {
                write!(f, ":SOUR{channel}:LIST:{}:SYNC {compliance}", source.mnemonic())?;
                for value in values {
                    write!(f, ",{value}")?;
                }
                Ok(())
            }
            Directive::ExecuteList => f.write_str(":INIT:LIST"),
            Directive::QueryCompletion => f.write_str("*OPC?"),
            Directive::ReadBulkReply => f.write_str(":FETC:LIST?"),
            Directive::AbortList => f.write_str(":ABOR"),
            Directive::SetSource {
                channel,
                source,
                level,
                compliance,
            } => write!(f, ":SOUR{channel}:{} {level},{compliance}", source.mnemonic()),
            Directive::MeasureSpot { channel, kind } => {
                write!(f, ":MEAS{channel}:{}?", kind.mnemonic())
            }
        }
    }
}

/// The master's list program followed by the timing program.
///
/// Only the master emits timing; followers inherit it through the step clock.
pub fn render_master_program(config: &ChannelConfig, sweep: &ListSweep) -> [Directive; 2] {
    [
        Directive::ProgramMasterList {
            channel: config.id,
            source: config.source_mode,
            mode: sweep.mode,
            start: sweep.start,
            stop: sweep.stop,
            steps: sweep.steps,
            compliance: config.compliance,
        },
        Directive::ProgramListTiming {
            hold_s: seconds(sweep.timing.hold.ticks()),
            delay_s: seconds(sweep.timing.delay.ticks()),
        },
    ]
}

/// Ties `values` to the master's step clock. Must only be sent once the master's program
/// has been accepted.
pub fn render_follower_program(config: &ChannelConfig, values: &[f64]) -> Directive {
    Directive::SubmitFollowerList {
        channel: config.id,
        source: config.source_mode,
        compliance: config.compliance,
        values: values.to_vec(),
    }
}

fn seconds(micros: u32) -> f64 {
    f64::from(micros) / 1_000_000.0
}
