// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Expansion of validated patterns into flat event lists.
//!
//! The compiler walks the tree with a time cursor and the current channel:
//!
//! - `Sequence` advances the cursor by each child's duration plus the gap
//! - `Repeat` emits its child `count` times, `period_ns` apart
//! - `Parallel` expands every branch from the same cursor on its own channel
//! - a biphasic primitive emits two back-to-back events
//!
//! The result is stably sorted by `(onset, channel)` and swept once per
//! channel for overlaps. Output depends only on the input tree.

pub mod sequence;

pub use sequence::{ChannelSummary, CompiledEvent, CompiledSequence};

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::pattern::{ChannelId, NodePath, PatternNode, DEFAULT_CHANNEL};
use crate::safety::ValidatedPattern;

/// Sequence compiler with a fixed event budget.
#[derive(Debug, Clone)]
pub struct Compiler {
    max_events: u64,
}

impl Compiler {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            max_events: config.max_events,
        }
    }

    /// Expand a validated pattern.
    ///
    /// # Errors
    ///
    /// - `CompileLimitExceeded` if the pattern expands to more than
    ///   `max_events` events (checked before expanding)
    /// - `PeriodTooShort` if a `Repeat` period is shorter than its child
    /// - `Overlap` if two events on one channel overlap
    /// - `DurationOverflow` if a timestamp does not fit in a `u64`
    pub fn compile(&self, pattern: &ValidatedPattern) -> Result<CompiledSequence, CompileError> {
        let node = pattern.pattern();

        let requested = node.event_count().unwrap_or(u64::MAX);
        if requested > self.max_events {
            warn!(
                limit = self.max_events,
                requested, "Pattern expansion exceeds event limit"
            );
            return Err(CompileError::CompileLimitExceeded {
                limit: self.max_events,
                requested,
            });
        }

        let root = NodePath::root();
        let total_duration_ns = node
            .duration_ns()
            .ok_or_else(|| CompileError::DurationOverflow { path: root.clone() })?;

        let mut expansion = Expansion {
            events: Vec::with_capacity(requested as usize),
            channels: BTreeSet::new(),
        };
        expansion.expand(node, DEFAULT_CHANNEL, 0, &root)?;

        let Expansion {
            mut events,
            channels,
        } = expansion;
        events.sort_by_key(|e| (e.onset_ns, e.channel));
        check_overlap(&events)?;

        let channels = summarize(&events, &channels, total_duration_ns);
        debug!(
            events = events.len(),
            channels = channels.len(),
            total_duration_ns,
            "Pattern compiled"
        );
        Ok(CompiledSequence::new(events, total_duration_ns, channels))
    }
}

struct Expansion {
    events: Vec<CompiledEvent>,
    /// Every channel the pattern touches, including delay-only ones
    channels: BTreeSet<ChannelId>,
}

impl Expansion {
    /// Emit `node` starting at `cursor`; returns the cursor after it.
    fn expand(
        &mut self,
        node: &PatternNode,
        channel: ChannelId,
        cursor: u64,
        path: &NodePath,
    ) -> Result<u64, CompileError> {
        let overflow = || CompileError::DurationOverflow { path: path.clone() };

        match node {
            PatternNode::Primitive(p) => {
                self.channels.insert(channel);
                let mut t = cursor;
                for value in p.phases() {
                    self.events.push(CompiledEvent {
                        channel,
                        onset_ns: t,
                        value,
                        duration_ns: p.width_ns,
                    });
                    t = t.checked_add(p.width_ns).ok_or_else(overflow)?;
                }
                Ok(t)
            }
            PatternNode::Delay { duration_ns } => {
                self.channels.insert(channel);
                cursor.checked_add(*duration_ns).ok_or_else(overflow)
            }
            PatternNode::Sequence { children, gap_ns } => {
                let mut t = cursor;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        t = t.checked_add(*gap_ns).ok_or_else(overflow)?;
                    }
                    t = self.expand(child, channel, t, &path.child_index(i))?;
                }
                Ok(t)
            }
            PatternNode::Repeat {
                child,
                count,
                period_ns,
            } => {
                let body = path.repeat_body();
                let child_duration_ns = child
                    .duration_ns()
                    .ok_or_else(|| CompileError::DurationOverflow { path: body.clone() })?;
                if *period_ns < child_duration_ns {
                    return Err(CompileError::PeriodTooShort {
                        path: path.clone(),
                        period_ns: *period_ns,
                        child_duration_ns,
                    });
                }
                let end = period_ns
                    .checked_mul(*count)
                    .and_then(|span| cursor.checked_add(span))
                    .ok_or_else(overflow)?;

                // Expand the body once, then replay it shifted by each period
                let first = self.events.len();
                self.expand(child, channel, cursor, &body)?;
                let last = self.events.len();
                for k in 1..*count {
                    let shift = period_ns * k;
                    for i in first..last {
                        let mut event = self.events[i];
                        event.onset_ns += shift;
                        self.events.push(event);
                    }
                }
                Ok(end)
            }
            PatternNode::Parallel { branches } => {
                let mut end = cursor;
                for branch in branches {
                    let branch_end = self.expand(
                        &branch.node,
                        branch.channel,
                        cursor,
                        &path.branch(branch.channel),
                    )?;
                    end = end.max(branch_end);
                }
                Ok(end)
            }
        }
    }
}

/// Events must already be sorted by onset.
fn check_overlap(events: &[CompiledEvent]) -> Result<(), CompileError> {
    let mut last: BTreeMap<ChannelId, (u64, u64)> = BTreeMap::new();
    for event in events {
        if let Some(&(onset, end)) = last.get(&event.channel) {
            if event.onset_ns < end {
                return Err(CompileError::Overlap {
                    channel: event.channel,
                    first_onset_ns: onset,
                    second_onset_ns: event.onset_ns,
                });
            }
        }
        last.insert(event.channel, (event.onset_ns, event.end_ns()));
    }
    Ok(())
}

fn summarize(
    events: &[CompiledEvent],
    channels: &BTreeSet<ChannelId>,
    total_duration_ns: u64,
) -> Vec<ChannelSummary> {
    let mut by_channel: BTreeMap<ChannelId, ChannelSummary> = channels
        .iter()
        .map(|&channel| {
            (
                channel,
                ChannelSummary {
                    channel,
                    event_count: 0,
                    on_time_ns: 0,
                    duty_cycle: 0.0,
                    peak_amplitude: 0.0,
                },
            )
        })
        .collect();

    for event in events {
        if let Some(s) = by_channel.get_mut(&event.channel) {
            s.event_count += 1;
            s.on_time_ns = s.on_time_ns.saturating_add(event.duration_ns);
            s.peak_amplitude = s.peak_amplitude.max(event.value.abs());
        }
    }

    by_channel
        .into_values()
        .map(|mut s| {
            if total_duration_ns > 0 {
                s.duty_cycle = s.on_time_ns as f64 / total_duration_ns as f64;
            }
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{NS_PER_MS, NS_PER_US};
    use crate::test_utils::validated;

    fn compiler() -> Compiler {
        Compiler::new(&CompilerConfig { max_events: 10_000 })
    }

    fn compile(node: PatternNode) -> Result<CompiledSequence, CompileError> {
        compiler().compile(&validated(node))
    }

    fn assert_no_overlap(seq: &CompiledSequence) {
        for ch in seq.channel_ids() {
            let evs: Vec<_> = seq.events().iter().filter(|e| e.channel == ch).collect();
            for pair in evs.windows(2) {
                assert!(pair[0].end_ns() <= pair[1].onset_ns, "{:?}", pair);
            }
        }
    }

    // =========================================================================
    // Expansion
    // =========================================================================

    #[test]
    fn test_repeat_emits_count_events_spaced_by_period() {
        let (a, w, n, p) = (2.5, 200 * NS_PER_US, 50, NS_PER_MS);
        let seq = compile(PatternNode::repeat(PatternNode::pulse(a, w), n, p)).unwrap();
        assert_eq!(seq.len(), n as usize);
        for (k, e) in seq.events().iter().enumerate() {
            assert_eq!(e.onset_ns, k as u64 * p);
            assert_eq!(e.value, a);
            assert_eq!(e.duration_ns, w);
            assert_eq!(e.channel, 0);
        }
        assert_eq!(seq.total_duration_ns(), n * p);
    }

    #[test]
    fn test_parallel_branches_share_start() {
        let seq = compile(PatternNode::parallel([
            (0, PatternNode::pulse(1.0, NS_PER_MS)),
            (1, PatternNode::pulse(1.0, 2 * NS_PER_MS)),
        ]))
        .unwrap();
        let events = seq.events();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].channel, events[0].onset_ns, events[0].duration_ns), (0, 0, NS_PER_MS));
        assert_eq!(
            (events[1].channel, events[1].onset_ns, events[1].duration_ns),
            (1, 0, 2 * NS_PER_MS)
        );
        assert_eq!(seq.total_duration_ns(), 2 * NS_PER_MS);
    }

    #[test]
    fn test_biphasic_back_to_back() {
        let seq = compile(PatternNode::biphasic(1.5, 100)).unwrap();
        let e = seq.events();
        assert_eq!(e.len(), 2);
        assert_eq!((e[0].onset_ns, e[0].value), (0, 1.5));
        assert_eq!((e[1].onset_ns, e[1].value), (100, -1.5));
        assert_eq!(e[0].end_ns(), e[1].onset_ns);
        assert_no_overlap(&seq);
    }

    #[test]
    fn test_sequence_gap_and_delay() {
        let seq = compile(PatternNode::sequence(
            vec![
                PatternNode::delay(1_000),
                PatternNode::pulse(1.0, 10),
                PatternNode::pulse(-1.0, 20),
            ],
            5,
        ))
        .unwrap();
        let onsets: Vec<u64> = seq.events().iter().map(|e| e.onset_ns).collect();
        // delay 1000, gap 5, pulse 10, gap 5
        assert_eq!(onsets, vec![1_005, 1_020]);
        assert_eq!(seq.total_duration_ns(), 1_040);
    }

    #[test]
    fn test_merge_orders_by_onset_then_channel() {
        let seq = compile(PatternNode::parallel([
            (3, PatternNode::repeat(PatternNode::pulse(1.0, 10), 3, 100)),
            (1, PatternNode::sequence(vec![PatternNode::delay(100), PatternNode::pulse(1.0, 10)], 0)),
        ]))
        .unwrap();
        let order: Vec<(u64, ChannelId)> =
            seq.events().iter().map(|e| (e.onset_ns, e.channel)).collect();
        assert_eq!(order, vec![(0, 3), (100, 1), (100, 3), (200, 3)]);
    }

    #[test]
    fn test_nested_parallel_rebinds_channel() {
        let seq = compile(PatternNode::parallel([(
            2,
            PatternNode::sequence(
                vec![
                    PatternNode::pulse(1.0, 10),
                    PatternNode::parallel([(5, PatternNode::pulse(1.0, 10))]),
                ],
                0,
            ),
        )]))
        .unwrap();
        assert_eq!(seq.channel_ids(), vec![2, 5]);
        assert_eq!(seq.events()[1].onset_ns, 10);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let node = PatternNode::parallel([
            (4, PatternNode::repeat(PatternNode::biphasic(1.0, 7), 9, 40)),
            (0, PatternNode::sequence(vec![PatternNode::pulse(2.0, 3), PatternNode::pulse(1.0, 3)], 11)),
            (2, PatternNode::delay(1_000)),
        ]);
        let a = serde_json::to_string(&compile(node.clone()).unwrap()).unwrap();
        let b = serde_json::to_string(&compile(node).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    // =========================================================================
    // Summaries
    // =========================================================================

    #[test]
    fn test_channel_summaries() {
        let seq = compile(PatternNode::parallel([
            (0, PatternNode::repeat(PatternNode::pulse(-3.0, 10), 4, 100)),
            (1, PatternNode::delay(400)),
        ]))
        .unwrap();
        let ch0 = seq.summary(0).unwrap();
        assert_eq!(ch0.event_count, 4);
        assert_eq!(ch0.on_time_ns, 40);
        assert!((ch0.duty_cycle - 0.1).abs() < 1e-12);
        assert_eq!(ch0.peak_amplitude, 3.0);
        let ch1 = seq.summary(1).unwrap();
        assert_eq!(ch1.event_count, 0);
        assert_eq!(ch1.duty_cycle, 0.0);
    }

    // =========================================================================
    // Rejections
    // =========================================================================

    #[test]
    fn test_compile_limit_checked_before_expansion() {
        let err = compile(PatternNode::repeat(PatternNode::pulse(1.0, 1), 1_000_000_000, 10)).unwrap_err();
        assert_eq!(
            err,
            CompileError::CompileLimitExceeded {
                limit: 10_000,
                requested: 1_000_000_000
            }
        );
    }

    #[test]
    fn test_period_shorter_than_child() {
        // Child lasts 12 ns but is on for only 2
        let child = PatternNode::sequence(vec![PatternNode::pulse(1.0, 2), PatternNode::delay(10)], 0);
        let err = compile(PatternNode::repeat(child, 3, 5)).unwrap_err();
        assert!(err.is_overlap());
        assert_eq!(
            err,
            CompileError::PeriodTooShort {
                path: NodePath::root(),
                period_ns: 5,
                child_duration_ns: 12
            }
        );
    }

    #[test]
    fn test_nested_parallel_overlap_detected() {
        let node = PatternNode::sequence(
            vec![
                PatternNode::parallel([
                    (0, PatternNode::parallel([(1, PatternNode::pulse(1.0, 10))])),
                    (1, PatternNode::pulse(1.0, 10)),
                ]),
                PatternNode::delay(1_000),
            ],
            0,
        );
        let err = compile(node).unwrap_err();
        assert_eq!(
            err,
            CompileError::Overlap {
                channel: 1,
                first_onset_ns: 0,
                second_onset_ns: 0
            }
        );
    }

    #[test]
    fn test_period_equal_to_child_is_contiguous() {
        let seq = compile(PatternNode::repeat(PatternNode::pulse(1.0, 10), 5, 10)).unwrap();
        assert_eq!(seq.len(), 5);
        assert_no_overlap(&seq);
    }
}
