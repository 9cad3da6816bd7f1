//! Splitting the single interleaved list sweep reply into per channel series.
//!
//! The reply is one line of comma separated records. Each record is a status digit, a
//! channel tag (`A`-`J`, either case), a kind (`V`, `I` or `T`) and then the value, e.g.
//! `0AV1.0E-01,0AI2.5E-06,0AT0.0031`.

use core::str::FromStr;
use std::collections::BTreeMap;

use log::warn;

use crate::{
    error::{DemuxFault, SweepError},
    types::{ChannelId, MeasureKind},
};

const DELIMITER: char = ',';

/// One tagged value from a reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    /// `0` for a normal sample. Anything else is reported through [`ListResult::flagged`].
    pub status: u8,
    pub channel: ChannelId,
    pub kind: MeasureKind,
    pub value: f64,
}

impl FromStr for Record {
    type Err = SweepError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let fault = |fault: DemuxFault| SweepError::DemuxParseError {
            token: token.to_string(),
            fault,
        };

        let mut chars = token.chars();
        let (Some(status), Some(tag), Some(kind)) = (chars.next(), chars.next(), chars.next())
        else {
            return Err(fault(DemuxFault::Truncated));
        };
        let value = chars.as_str();

        let status = status
            .to_digit(10)
            .ok_or_else(|| fault(DemuxFault::Status(status)))? as u8;
        let channel = ChannelId::from_tag(tag).ok_or_else(|| fault(DemuxFault::ChannelTag(tag)))?;
        let kind = MeasureKind::from_code(kind).ok_or_else(|| fault(DemuxFault::Kind(kind)))?;
        let value = value
            .trim()
            .parse::<f64>()
            .map_err(|_| fault(DemuxFault::Value(value.to_string())))?;

        Ok(Record {
            status,
            channel,
            kind,
            value,
        })
    }
}

/// Results of a list sweep for one channel, in sweep step order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResult {
    /// Voltage and current samples.
    pub measurements: Vec<f64>,
    pub timestamps: Vec<f64>,
    /// Indices into `measurements` whose record carried a non-zero status digit.
    pub flagged: Vec<usize>,
}

/// Route every record of `reply` to its channel.
///
/// Any record that cannot be parsed fails the whole reply: dropping one would shift every
/// later value of that channel onto the wrong step.
pub fn demultiplex(reply: &str) -> Result<BTreeMap<ChannelId, ListResult>, SweepError> {
    let mut results: BTreeMap<ChannelId, ListResult> = BTreeMap::new();
    let reply = reply.trim();
    if reply.is_empty() {
        return Ok(results);
    }

    for token in reply.split(DELIMITER) {
        let record: Record = token.trim().parse()?;
        let result = results.entry(record.channel).or_default();
        match record.kind {
            MeasureKind::Voltage | MeasureKind::Current => {
                if record.status != 0 {
                    warn!(
                        "Channel {} sample {} reported status {}",
                        record.channel,
                        result.measurements.len(),
                        record.status
                    );
                    result.flagged.push(result.measurements.len());
                }
                result.measurements.push(record.value);
            }
            MeasureKind::Timestamp => result.timestamps.push(record.value),
        }
    }
    Ok(results)
}

/// Make every timestamp relative to the master's first sample.
///
/// Left untouched if the master recorded no timestamps.
pub fn normalize_timestamps(results: &mut BTreeMap<ChannelId, ListResult>, master: ChannelId) {
    let Some(t0) = results
        .get(&master)
        .and_then(|result| result.timestamps.first().copied())
    else {
        return;
    };

    for result in results.values_mut() {
        for timestamp in &mut result.timestamps {
            *timestamp -= t0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(id: u8) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    #[test]
    fn parse_record() {
        let record: Record = "0BI-2.5E-06".parse().unwrap();
        assert_eq!(
            record,
            Record {
                status: 0,
                channel: ch(2),
                kind: MeasureKind::Current,
                value: -2.5e-6,
            }
        );
        let record: Record = "3jT12.5".parse().unwrap();
        assert_eq!(record.status, 3);
        assert_eq!(record.channel, ch(10));
        assert_eq!(record.kind, MeasureKind::Timestamp);
    }

    #[test]
    fn parse_faults() {
        let cases = [
            ("0A", DemuxFault::Truncated),
            ("NAV1.0", DemuxFault::Status('N')),
            ("0KV1.0", DemuxFault::ChannelTag('K')),
            ("0AX1.0", DemuxFault::Kind('X')),
            ("0AVabc", DemuxFault::Value("abc".into())),
            ("0AV", DemuxFault::Value(String::new())),
        ];
        for (token, fault) in cases {
            assert_eq!(
                token.parse::<Record>(),
                Err(SweepError::DemuxParseError {
                    token: token.into(),
                    fault,
                })
            );
        }
    }

    #[test]
    fn round_trip_channels_by_steps() {
        let channels = 3u8;
        let steps = 4usize;
        let value = |c: u8, s: usize| f64::from(c) * 10.0 + s as f64 / 8.0;
        let current = |c: u8, s: usize| -(f64::from(c) + s as f64) * 1e-6;
        let time = |c: u8, s: usize| 100.0 + s as f64 * 0.01 + f64::from(c) * 0.001;

        let mut tokens = Vec::new();
        for s in 0..steps {
            for c in 1..=channels {
                let tag = ch(c).tag();
                let kind = if c == 2 { 'I' } else { 'V' };
                let sample = if c == 2 { current(c, s) } else { value(c, s) };
                tokens.push(format!("0{tag}{kind}{sample:E}"));
                tokens.push(format!("0{tag}T{}", time(c, s)));
            }
        }
        let reply = tokens.join(",");

        let results = demultiplex(&reply).unwrap();
        assert_eq!(results.len(), usize::from(channels));
        for c in 1..=channels {
            let result = &results[&ch(c)];
            let expected: Vec<f64> = (0..steps)
                .map(|s| if c == 2 { current(c, s) } else { value(c, s) })
                .collect();
            let expected_time: Vec<f64> = (0..steps).map(|s| time(c, s)).collect();
            assert_eq!(result.measurements, expected);
            assert_eq!(result.timestamps, expected_time);
            assert!(result.flagged.is_empty());
        }
    }

    #[test]
    fn unknown_tag_fails_whole_reply() {
        let result = demultiplex("0AV1.0,0AT0.1,0ZV2.0,0AT0.2");
        assert!(matches!(
            result,
            Err(SweepError::DemuxParseError {
                fault: DemuxFault::ChannelTag('Z'),
                ..
            })
        ));
    }

    #[test]
    fn whitespace_and_empty_reply() {
        assert!(demultiplex(" \r\n").unwrap().is_empty());
        let results = demultiplex("0AV1.0, 0AV2.0\r\n").unwrap();
        assert_eq!(results[&ch(1)].measurements, vec![1.0, 2.0]);
    }

    #[test]
    fn empty_token_is_an_error() {
        assert!(matches!(
            demultiplex("0AV1.0,,0AV2.0"),
            Err(SweepError::DemuxParseError {
                fault: DemuxFault::Truncated,
                ..
            })
        ));
    }

    #[test]
    fn non_zero_status_flags_sample() {
        let results = demultiplex("0AV1.0,7AV2.0,0AV3.0,1AT0.5").unwrap();
        let result = &results[&ch(1)];
        assert_eq!(result.measurements, vec![1.0, 2.0, 3.0]);
        assert_eq!(result.flagged, vec![1]);
        assert_eq!(result.timestamps, vec![0.5]);
    }

    #[test]
    fn timestamps_relative_to_master() {
        let mut results = demultiplex("0AV1,0AT10.5,0BV2,0BT10.6,0AV1,0AT11.5,0BV2,0BT11.6").unwrap();
        normalize_timestamps(&mut results, ch(1));
        assert_eq!(results[&ch(1)].timestamps[0], 0.0);
        assert_eq!(results[&ch(1)].timestamps[1], 11.5 - 10.5);
        assert_eq!(results[&ch(2)].timestamps[0], 10.6 - 10.5);
        assert_eq!(results[&ch(2)].timestamps[1], 11.6 - 10.5);
    }

    #[test]
    fn normalization_skipped_without_master_timestamps() {
        let mut results = demultiplex("0AV1,0BV2,0BT10.6").unwrap();
        normalize_timestamps(&mut results, ch(1));
        assert_eq!(results[&ch(2)].timestamps, vec![10.6]);

        normalize_timestamps(&mut results, ch(5));
        assert_eq!(results[&ch(2)].timestamps, vec![10.6]);
    }
}
