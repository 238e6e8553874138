// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Classic trigger train: an optional silent lead-in followed by a fixed
//! number of (trigger, interval) cycles on one channel.
//!
//! Parameter files written by older trigger generators use different field
//! names (`trigger_duration`, `nb_pulses`, ...). Those are accepted as
//! aliases. Extra fields such as `device` or `sampling_rate` are ignored.

use serde::{Deserialize, Serialize};

use super::node::PatternNode;
use super::{seconds_to_ns, ChannelId, DEFAULT_CHANNEL};
use crate::error::{Error, Result};

/// Parameters of a single-channel trigger train, in seconds and volts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerProtocol {
    /// Time at `level` per trigger
    #[serde(
        default = "default_trigger_duration",
        alias = "trigger_duration",
        alias = "pulse_duration"
    )]
    pub trigger_duration_s: f64,

    /// Time at neutral after each trigger
    #[serde(
        default = "default_inter_trigger_interval",
        alias = "inter_trigger_interval",
        alias = "inter_pulse_interval"
    )]
    pub inter_trigger_interval_s: f64,

    /// Neutral lead-in before the first trigger
    #[serde(default = "default_initial_delay", alias = "initial_trigger_delay")]
    pub initial_delay_s: f64,

    /// Number of triggers
    #[serde(default = "default_count", alias = "nb_triggers", alias = "nb_pulses")]
    pub count: u64,

    /// Trigger level
    #[serde(default = "default_level")]
    pub level: f64,

    /// Output channel id. Legacy files carry a `channel` name such as
    /// `ao0`; that belongs to the device configuration and is ignored here.
    #[serde(default)]
    pub output_channel: ChannelId,

    /// Repeat until stopped. Not playable: a train must be finite to be
    /// validated and compiled.
    #[serde(default)]
    pub infinite: bool,
}

impl Default for TriggerProtocol {
    fn default() -> Self {
        Self {
            trigger_duration_s: default_trigger_duration(),
            inter_trigger_interval_s: default_inter_trigger_interval(),
            initial_delay_s: default_initial_delay(),
            count: default_count(),
            level: default_level(),
            output_channel: DEFAULT_CHANNEL,
            infinite: false,
        }
    }
}

fn default_trigger_duration() -> f64 {
    0.2
}

fn default_inter_trigger_interval() -> f64 {
    20.0
}

fn default_initial_delay() -> f64 {
    5.0
}

fn default_count() -> u64 {
    5
}

fn default_level() -> f64 {
    2.0
}

/// Where a running trigger train currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPhase {
    /// Neutral lead-in
    InitialDelay { remaining_ns: u64 },
    /// Output at trigger level during cycle `cycle` (0-based)
    Trigger { cycle: u64, remaining_ns: u64 },
    /// Neutral interval after trigger `cycle`
    Interval { cycle: u64, remaining_ns: u64 },
    /// All cycles elapsed
    Done,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    trigger_ns: u64,
    interval_ns: u64,
    delay_ns: u64,
    period_ns: u64,
}

impl TriggerProtocol {
    fn timing(&self) -> Result<Timing> {
        if self.infinite {
            return Err(Error::Config(
                "indefinite repetition cannot be compiled; set a trigger count".into(),
            ));
        }
        let field = |name: &str, seconds: f64| {
            seconds_to_ns(seconds).ok_or_else(|| {
                Error::Config(format!("{} must be a non-negative duration, got {}", name, seconds))
            })
        };
        let trigger_ns = field("trigger_duration_s", self.trigger_duration_s)?;
        let interval_ns = field("inter_trigger_interval_s", self.inter_trigger_interval_s)?;
        let delay_ns = field("initial_delay_s", self.initial_delay_s)?;
        let period_ns = trigger_ns
            .checked_add(interval_ns)
            .ok_or_else(|| Error::Config("trigger period overflows".into()))?;
        Ok(Timing {
            trigger_ns,
            interval_ns,
            delay_ns,
            period_ns,
        })
    }

    /// Build the equivalent pattern tree.
    ///
    /// `Sequence[Delay(initial), Repeat(Primitive(level, trigger), count,
    /// trigger + interval)]`, without the delay when it is zero.
    pub fn to_pattern(&self) -> Result<PatternNode> {
        let t = self.timing()?;
        let train = PatternNode::repeat(
            PatternNode::pulse(self.level, t.trigger_ns),
            self.count,
            t.period_ns,
        );
        let node = if t.delay_ns > 0 {
            PatternNode::sequence(vec![PatternNode::delay(t.delay_ns), train], 0)
        } else {
            train
        };
        if self.output_channel == DEFAULT_CHANNEL {
            Ok(node)
        } else {
            Ok(PatternNode::parallel([(self.output_channel, node)]))
        }
    }

    /// Total elapsed time of the train.
    pub fn total_duration_ns(&self) -> Result<u64> {
        let t = self.timing()?;
        t.period_ns
            .checked_mul(self.count)
            .and_then(|train| train.checked_add(t.delay_ns))
            .ok_or_else(|| Error::Config("protocol duration overflows".into()))
    }

    /// Phase of the train `elapsed_ns` after playback started.
    pub fn phase_at(&self, elapsed_ns: u64) -> Result<ProtocolPhase> {
        let t = self.timing()?;
        if elapsed_ns < t.delay_ns {
            return Ok(ProtocolPhase::InitialDelay {
                remaining_ns: t.delay_ns - elapsed_ns,
            });
        }
        if t.period_ns == 0 {
            return Ok(ProtocolPhase::Done);
        }
        let in_train = elapsed_ns - t.delay_ns;
        let cycle = in_train / t.period_ns;
        if cycle >= self.count {
            return Ok(ProtocolPhase::Done);
        }
        let pos = in_train % t.period_ns;
        if pos < t.trigger_ns {
            Ok(ProtocolPhase::Trigger {
                cycle,
                remaining_ns: t.trigger_ns - pos,
            })
        } else {
            Ok(ProtocolPhase::Interval {
                cycle,
                remaining_ns: t.trigger_ns + t.interval_ns - pos,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{flatten_duration, NS_PER_MS, NS_PER_S};

    fn short_protocol() -> TriggerProtocol {
        TriggerProtocol {
            trigger_duration_s: 0.002,
            inter_trigger_interval_s: 0.008,
            initial_delay_s: 0.005,
            count: 3,
            level: 2.0,
            output_channel: 0,
            infinite: false,
        }
    }

    #[test]
    fn test_to_pattern_shape() {
        let node = short_protocol().to_pattern().unwrap();
        let expected = PatternNode::sequence(
            vec![
                PatternNode::delay(5 * NS_PER_MS),
                PatternNode::repeat(PatternNode::pulse(2.0, 2 * NS_PER_MS), 3, 10 * NS_PER_MS),
            ],
            0,
        );
        assert_eq!(node, expected);
        assert_eq!(flatten_duration(&node), 35 * NS_PER_MS);
        assert_eq!(short_protocol().total_duration_ns().unwrap(), 35 * NS_PER_MS);
    }

    #[test]
    fn test_to_pattern_without_delay_on_other_channel() {
        let mut p = short_protocol();
        p.initial_delay_s = 0.0;
        p.output_channel = 2;
        let node = p.to_pattern().unwrap();
        match node {
            PatternNode::Parallel { branches } => {
                assert_eq!(branches.len(), 1);
                assert_eq!(branches[0].channel, 2);
                assert!(matches!(branches[0].node, PatternNode::Repeat { .. }));
            }
            other => panic!("expected parallel, got {:?}", other),
        }
    }

    #[test]
    fn test_infinite_rejected() {
        let mut p = short_protocol();
        p.infinite = true;
        assert!(matches!(p.to_pattern(), Err(Error::Config(_))));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut p = short_protocol();
        p.inter_trigger_interval_s = -1.0;
        let msg = p.to_pattern().unwrap_err().to_string();
        assert!(msg.contains("inter_trigger_interval_s"));
    }

    // =========================================================================
    // Phase indicator
    // =========================================================================

    #[test]
    fn test_phase_at_walks_through_cycles() {
        let p = short_protocol();
        assert_eq!(
            p.phase_at(0).unwrap(),
            ProtocolPhase::InitialDelay {
                remaining_ns: 5 * NS_PER_MS
            }
        );
        assert_eq!(
            p.phase_at(6 * NS_PER_MS).unwrap(),
            ProtocolPhase::Trigger {
                cycle: 0,
                remaining_ns: NS_PER_MS
            }
        );
        assert_eq!(
            p.phase_at(8 * NS_PER_MS).unwrap(),
            ProtocolPhase::Interval {
                cycle: 0,
                remaining_ns: 7 * NS_PER_MS
            }
        );
        assert_eq!(
            p.phase_at(25 * NS_PER_MS).unwrap(),
            ProtocolPhase::Trigger {
                cycle: 2,
                remaining_ns: 2 * NS_PER_MS
            }
        );
        assert_eq!(p.phase_at(35 * NS_PER_MS).unwrap(), ProtocolPhase::Done);
    }

    // =========================================================================
    // Parameter files
    // =========================================================================

    #[test]
    fn test_legacy_field_names() {
        let json = r#"{
            "device": "Dev2",
            "channel": "ao0",
            "sampling_rate": 1000,
            "pulse_duration": 0.5,
            "inter_pulse_interval": 10,
            "initial_trigger_delay": 1,
            "nb_pulses": 12
        }"#;
        let p: TriggerProtocol = serde_json::from_str(json).unwrap();
        assert_eq!(p.trigger_duration_s, 0.5);
        assert_eq!(p.inter_trigger_interval_s, 10.0);
        assert_eq!(p.initial_delay_s, 1.0);
        assert_eq!(p.count, 12);
        assert_eq!(p.level, 2.0);
        assert_eq!(p.total_duration_ns().unwrap(), 127 * NS_PER_S);
    }

    #[test]
    fn test_defaults_match_classic_generator() {
        let p: TriggerProtocol = serde_json::from_str("{}").unwrap();
        assert_eq!(p, TriggerProtocol::default());
        assert_eq!(p.trigger_duration_s, 0.2);
        assert_eq!(p.inter_trigger_interval_s, 20.0);
        assert_eq!(p.count, 5);
    }
}
