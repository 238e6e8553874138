// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pattern tree and its shape rules.
//!
//! # Timing model
//!
//! | Node | Elapsed time |
//! |------|--------------|
//! | `Primitive` | `width` (`2 * width` if biphasic) |
//! | `Delay` | `duration_ns` |
//! | `Sequence` | sum of children + `gap_ns` between consecutive children |
//! | `Repeat` | `period_ns * count` |
//! | `Parallel` | longest branch |
//!
//! Nodes outside any `Parallel` play on channel 0. A `Parallel` branch
//! binds its subtree to the branch channel.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::path::NodePath;
use super::primitive::PulsePrimitive;
use super::ChannelId;
use crate::error::StructuralError;

/// A node of a stimulation pattern.
///
/// Serialized with an internal `kind` tag, e.g.
/// `{"kind": "repeat", "child": {...}, "count": 10, "period_ns": 1000000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternNode {
    /// A single pulse
    Primitive(PulsePrimitive),
    /// Silence on the current channel
    Delay { duration_ns: u64 },
    /// Children one after another
    Sequence {
        children: Vec<PatternNode>,
        #[serde(default)]
        gap_ns: u64,
    },
    /// `child` started every `period_ns`, `count` times
    Repeat {
        child: Box<PatternNode>,
        count: u64,
        period_ns: u64,
    },
    /// Independent branches, each on its own channel, sharing a start time
    Parallel { branches: Vec<ChannelBranch> },
}

/// One branch of a `Parallel` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBranch {
    pub channel: ChannelId,
    pub node: PatternNode,
}

impl PatternNode {
    /// Monophasic pulse.
    pub fn pulse(amplitude: f64, width_ns: u64) -> Self {
        PatternNode::Primitive(PulsePrimitive::monophasic(amplitude, width_ns))
    }

    /// Charge-balanced biphasic pulse.
    pub fn biphasic(amplitude: f64, width_ns: u64) -> Self {
        PatternNode::Primitive(PulsePrimitive::biphasic(amplitude, width_ns))
    }

    pub fn delay(duration_ns: u64) -> Self {
        PatternNode::Delay { duration_ns }
    }

    pub fn sequence(children: Vec<PatternNode>, gap_ns: u64) -> Self {
        PatternNode::Sequence { children, gap_ns }
    }

    pub fn repeat(child: PatternNode, count: u64, period_ns: u64) -> Self {
        PatternNode::Repeat {
            child: Box::new(child),
            count,
            period_ns,
        }
    }

    pub fn parallel<I>(branches: I) -> Self
    where
        I: IntoIterator<Item = (ChannelId, PatternNode)>,
    {
        PatternNode::Parallel {
            branches: branches
                .into_iter()
                .map(|(channel, node)| ChannelBranch { channel, node })
                .collect(),
        }
    }

    /// Check the shape rules, returning the first violation in
    /// depth-first order.
    ///
    /// # Errors
    ///
    /// - empty `Sequence` or `Parallel`
    /// - `Repeat` with `count == 0`
    /// - duplicate channel ids in one `Parallel`
    /// - primitive with zero width or non-finite amplitude
    pub fn check_structure(&self) -> Result<(), StructuralError> {
        self.check_at(&NodePath::root())
    }

    fn check_at(&self, path: &NodePath) -> Result<(), StructuralError> {
        match self {
            PatternNode::Primitive(p) => {
                if p.width_ns == 0 {
                    return Err(StructuralError::ZeroWidth { path: path.clone() });
                }
                if !p.amplitude.is_finite() {
                    return Err(StructuralError::NonFiniteAmplitude { path: path.clone() });
                }
                Ok(())
            }
            PatternNode::Delay { .. } => Ok(()),
            PatternNode::Sequence { children, .. } => {
                if children.is_empty() {
                    return Err(StructuralError::EmptySequence { path: path.clone() });
                }
                for (i, child) in children.iter().enumerate() {
                    child.check_at(&path.child_index(i))?;
                }
                Ok(())
            }
            PatternNode::Repeat { child, count, .. } => {
                if *count == 0 {
                    return Err(StructuralError::ZeroRepeat { path: path.clone() });
                }
                child.check_at(&path.repeat_body())
            }
            PatternNode::Parallel { branches } => {
                if branches.is_empty() {
                    return Err(StructuralError::EmptyParallel { path: path.clone() });
                }
                let mut seen = HashSet::with_capacity(branches.len());
                for branch in branches {
                    if !seen.insert(branch.channel) {
                        return Err(StructuralError::DuplicateChannel {
                            path: path.clone(),
                            channel: branch.channel,
                        });
                    }
                }
                for branch in branches {
                    branch.node.check_at(&path.branch(branch.channel))?;
                }
                Ok(())
            }
        }
    }

    /// Elapsed time in nanoseconds, or `None` if it does not fit in a `u64`.
    pub fn duration_ns(&self) -> Option<u64> {
        match self {
            PatternNode::Primitive(p) => p.duration_ns(),
            PatternNode::Delay { duration_ns } => Some(*duration_ns),
            PatternNode::Sequence { children, gap_ns } => {
                let mut total: u64 = 0;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        total = total.checked_add(*gap_ns)?;
                    }
                    total = total.checked_add(child.duration_ns()?)?;
                }
                Some(total)
            }
            PatternNode::Repeat {
                count, period_ns, ..
            } => period_ns.checked_mul(*count),
            PatternNode::Parallel { branches } => {
                let mut longest: u64 = 0;
                for branch in branches {
                    longest = longest.max(branch.node.duration_ns()?);
                }
                Some(longest)
            }
        }
    }

    /// Number of events a full expansion produces, without expanding.
    pub fn event_count(&self) -> Option<u64> {
        match self {
            PatternNode::Primitive(p) => Some(p.polarity.phase_count()),
            PatternNode::Delay { .. } => Some(0),
            PatternNode::Sequence { children, .. } => children
                .iter()
                .try_fold(0u64, |acc, c| acc.checked_add(c.event_count()?)),
            PatternNode::Repeat { child, count, .. } => child.event_count()?.checked_mul(*count),
            PatternNode::Parallel { branches } => branches
                .iter()
                .try_fold(0u64, |acc, b| acc.checked_add(b.node.event_count()?)),
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        1 + match self {
            PatternNode::Primitive(_) | PatternNode::Delay { .. } => 0,
            PatternNode::Sequence { children, .. } => {
                children.iter().map(PatternNode::node_count).sum()
            }
            PatternNode::Repeat { child, .. } => child.node_count(),
            PatternNode::Parallel { branches } => {
                branches.iter().map(|b| b.node.node_count()).sum()
            }
        }
    }
}

/// Total elapsed time of a pattern without expanding it.
///
/// Saturates at `u64::MAX` for timelines that overflow; meant for quick
/// feedback while editing.
pub fn flatten_duration(node: &PatternNode) -> u64 {
    node.duration_ns().unwrap_or(u64::MAX)
}
