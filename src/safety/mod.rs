// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Safety validation of pattern trees against [`SafetyLimits`].
//!
//! Validation never expands a pattern into events. Each node is reduced to
//! a per-channel profile (elapsed window, cumulative on-time) bottom-up, and
//! a `Repeat` scales its child's profile by `count` in constant time. Cost
//! is proportional to tree size times channel count, regardless of how many
//! events the pattern would produce.
//!
//! Checked limits:
//!
//! | Limit | Where |
//! |-------|-------|
//! | amplitude, width, charge per pulse | every primitive |
//! | duty cycle | every `Repeat` (on-time per period) and the whole pattern |
//! | channel count | whole pattern |
//!
//! A pattern that does not pass produces no [`ValidatedPattern`], and the
//! compiler accepts nothing else.

pub mod violation;

pub use violation::{Violation, ViolationKind};

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::SafetyLimits;
use crate::error::{Error, Result, StructuralError};
use crate::pattern::{ChannelId, NodePath, PatternNode, PulsePrimitive, DEFAULT_CHANNEL};

/// A pattern that passed structure and safety checks.
///
/// Only [`SafetyValidator::validate`] can produce one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPattern {
    node: PatternNode,
}

impl ValidatedPattern {
    pub fn pattern(&self) -> &PatternNode {
        &self.node
    }

    pub fn into_inner(self) -> PatternNode {
        self.node
    }
}

/// Outcome of safety validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(ValidatedPattern),
    Rejected(Vec<Violation>),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }

    /// Violations found (empty when accepted).
    pub fn violations(&self) -> &[Violation] {
        match self {
            Verdict::Accepted(_) => &[],
            Verdict::Rejected(v) => v,
        }
    }

    /// Convert into a `Result`, mapping rejection to [`Error::Safety`].
    pub fn into_result(self) -> Result<ValidatedPattern> {
        match self {
            Verdict::Accepted(p) => Ok(p),
            Verdict::Rejected(v) => Err(Error::Safety(v)),
        }
    }
}

/// Per-channel load of a subtree.
#[derive(Debug, Default)]
struct Profile {
    duration_ns: u128,
    on_ns: BTreeMap<ChannelId, u128>,
}

impl Profile {
    fn touch(&mut self, channel: ChannelId, on_ns: u128) {
        let slot = self.on_ns.entry(channel).or_insert(0);
        *slot = slot.saturating_add(on_ns);
    }

    fn absorb(&mut self, other: Profile) {
        for (ch, on) in other.on_ns {
            self.touch(ch, on);
        }
    }
}

fn ratio(on_ns: u128, window_ns: u128) -> f64 {
    if window_ns == 0 {
        if on_ns == 0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        on_ns as f64 / window_ns as f64
    }
}

/// Checks pattern trees against a fixed set of limits.
#[derive(Debug, Clone, Copy)]
pub struct SafetyValidator<'a> {
    limits: &'a SafetyLimits,
}

impl<'a> SafetyValidator<'a> {
    pub fn new(limits: &'a SafetyLimits) -> Self {
        Self { limits }
    }

    /// Structure check followed by safety check.
    ///
    /// # Errors
    ///
    /// Returns the structural error if the tree is malformed; safety
    /// analysis is not attempted in that case.
    pub fn validate(&self, node: PatternNode) -> std::result::Result<Verdict, StructuralError> {
        node.check_structure()?;
        let violations = self.check(&node);
        if violations.is_empty() {
            debug!(nodes = node.node_count(), "Pattern accepted");
            Ok(Verdict::Accepted(ValidatedPattern { node }))
        } else {
            debug!(
                nodes = node.node_count(),
                violations = violations.len(),
                "Pattern rejected"
            );
            Ok(Verdict::Rejected(violations))
        }
    }

    /// Every limit violation in the tree, in depth-first order.
    ///
    /// Assumes the tree is structurally valid.
    pub fn check(&self, node: &PatternNode) -> Vec<Violation> {
        let mut violations = Vec::new();
        let root = NodePath::root();
        let profile = self.walk(node, DEFAULT_CHANNEL, &root, &mut violations);

        for (&channel, &on) in &profile.on_ns {
            let duty = ratio(on, profile.duration_ns);
            let already_reported = violations.iter().any(|v| {
                v.kind == ViolationKind::DutyCycleExceeded
                    && v.channel == Some(channel)
                    && v.location.is_root()
            });
            if duty > self.limits.max_duty_cycle && !already_reported {
                violations.push(Violation {
                    kind: ViolationKind::DutyCycleExceeded,
                    location: root.clone(),
                    channel: Some(channel),
                    observed: duty,
                    limit: self.limits.max_duty_cycle,
                });
            }
        }

        let channels = profile.on_ns.len();
        if channels > self.limits.max_channel_count as usize {
            violations.push(Violation {
                kind: ViolationKind::ChannelCountExceeded,
                location: root,
                channel: None,
                observed: channels as f64,
                limit: self.limits.max_channel_count as f64,
            });
        }

        violations
    }

    fn walk(
        &self,
        node: &PatternNode,
        channel: ChannelId,
        path: &NodePath,
        out: &mut Vec<Violation>,
    ) -> Profile {
        match node {
            PatternNode::Primitive(p) => {
                self.check_primitive(p, channel, path, out);
                let duration = p.width_ns as u128 * p.polarity.phase_count() as u128;
                let mut profile = Profile {
                    duration_ns: duration,
                    ..Profile::default()
                };
                profile.touch(channel, duration);
                profile
            }
            PatternNode::Delay { duration_ns } => {
                let mut profile = Profile {
                    duration_ns: *duration_ns as u128,
                    ..Profile::default()
                };
                profile.touch(channel, 0);
                profile
            }
            PatternNode::Sequence { children, gap_ns } => {
                let mut profile = Profile::default();
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        profile.duration_ns = profile.duration_ns.saturating_add(*gap_ns as u128);
                    }
                    let sub = self.walk(child, channel, &path.child_index(i), out);
                    profile.duration_ns = profile.duration_ns.saturating_add(sub.duration_ns);
                    profile.absorb(sub);
                }
                profile
            }
            PatternNode::Repeat {
                child,
                count,
                period_ns,
            } => {
                let sub = self.walk(child, channel, &path.repeat_body(), out);
                let mut profile = Profile {
                    duration_ns: (*period_ns as u128).saturating_mul(*count as u128),
                    ..Profile::default()
                };
                for (ch, on) in sub.on_ns {
                    let duty = ratio(on, *period_ns as u128);
                    if duty > self.limits.max_duty_cycle {
                        out.push(Violation {
                            kind: ViolationKind::DutyCycleExceeded,
                            location: path.clone(),
                            channel: Some(ch),
                            observed: duty,
                            limit: self.limits.max_duty_cycle,
                        });
                    }
                    profile.touch(ch, on.saturating_mul(*count as u128));
                }
                profile
            }
            PatternNode::Parallel { branches } => {
                let mut profile = Profile::default();
                for branch in branches {
                    let sub = self.walk(&branch.node, branch.channel, &path.branch(branch.channel), out);
                    profile.duration_ns = profile.duration_ns.max(sub.duration_ns);
                    profile.absorb(sub);
                }
                profile
            }
        }
    }

    fn check_primitive(
        &self,
        p: &PulsePrimitive,
        channel: ChannelId,
        path: &NodePath,
        out: &mut Vec<Violation>,
    ) {
        let limits = self.limits;
        let mut push = |kind, observed: f64, limit: f64| {
            out.push(Violation {
                kind,
                location: path.clone(),
                channel: Some(channel),
                observed,
                limit,
            })
        };

        if p.amplitude.abs() > limits.max_amplitude {
            push(
                ViolationKind::AmplitudeExceeded,
                p.amplitude.abs(),
                limits.max_amplitude,
            );
        }
        if p.width_ns > limits.max_pulse_width_ns {
            push(
                ViolationKind::WidthExceeded,
                p.width_ns as f64,
                limits.max_pulse_width_ns as f64,
            );
        }
        let charge = p.charge_per_phase();
        if charge > limits.max_charge_per_pulse {
            push(
                ViolationKind::ChargeExceeded,
                charge,
                limits.max_charge_per_pulse,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{NS_PER_MS, NS_PER_S, NS_PER_US};

    fn limits() -> SafetyLimits {
        SafetyLimits {
            max_amplitude: 5.0,
            max_pulse_width_ns: 10 * NS_PER_MS,
            max_duty_cycle: 0.1,
            max_charge_per_pulse: 0.01,
            max_channel_count: 2,
        }
    }

    fn kinds(v: &[Violation]) -> Vec<ViolationKind> {
        v.iter().map(|v| v.kind).collect()
    }

    // =========================================================================
    // Acceptance
    // =========================================================================

    #[test]
    fn test_accepts_pattern_within_limits() {
        let limits = limits();
        let node = PatternNode::repeat(PatternNode::pulse(2.0, NS_PER_MS), 100, 20 * NS_PER_MS);
        let verdict = SafetyValidator::new(&limits).validate(node.clone()).unwrap();
        assert!(verdict.is_accepted());
        assert!(verdict.violations().is_empty());
        assert_eq!(verdict.into_result().unwrap().pattern(), &node);
    }

    #[test]
    fn test_duty_exactly_at_limit_passes() {
        let limits = limits();
        let node = PatternNode::repeat(PatternNode::pulse(1.0, NS_PER_MS), 1000, 10 * NS_PER_MS);
        assert!(SafetyValidator::new(&limits).check(&node).is_empty());
    }

    #[test]
    fn test_structural_error_short_circuits() {
        let limits = limits();
        // Would also exceed amplitude, but shape is checked first
        let node = PatternNode::repeat(PatternNode::pulse(100.0, NS_PER_MS), 0, NS_PER_MS);
        let err = SafetyValidator::new(&limits).validate(node).unwrap_err();
        assert!(matches!(err, StructuralError::ZeroRepeat { .. }));
    }

    // =========================================================================
    // Per-primitive limits
    // =========================================================================

    #[test]
    fn test_amplitude_checked_by_magnitude() {
        let limits = limits();
        let node = PatternNode::pulse(-6.0, NS_PER_US);
        let v = SafetyValidator::new(&limits).check(&node);
        assert_eq!(kinds(&v), vec![ViolationKind::AmplitudeExceeded]);
        assert_eq!(v[0].observed, 6.0);
        assert_eq!(v[0].limit, 5.0);
        assert_eq!(v[0].channel, Some(0));
    }

    #[test]
    fn test_width_and_charge_reported_together() {
        let limits = limits();
        // 4 V for 20 ms: width > 10 ms, charge 0.08 > 0.01
        let node = PatternNode::sequence(
            vec![PatternNode::delay(NS_PER_MS), PatternNode::pulse(4.0, 20 * NS_PER_MS)],
            0,
        );
        let mut big = limits.clone();
        big.max_duty_cycle = 1.0;
        let v = SafetyValidator::new(&big).check(&node);
        assert_eq!(
            kinds(&v),
            vec![ViolationKind::WidthExceeded, ViolationKind::ChargeExceeded]
        );
        assert_eq!(v[0].location.to_string(), "root/[1]");
    }

    #[test]
    fn test_biphasic_charge_is_per_phase() {
        let mut limits = limits();
        limits.max_duty_cycle = 1.0;
        // 2 V x 5 ms = 0.01 per phase: at the limit, not over it
        let node = PatternNode::biphasic(2.0, 5 * NS_PER_MS);
        assert!(SafetyValidator::new(&limits).check(&node).is_empty());
    }

    // =========================================================================
    // Duty cycle
    // =========================================================================

    #[test]
    fn test_repeat_duty_cycle_rejected_at_repeat_node() {
        let limits = limits();
        // period < 10 x width
        let node = PatternNode::repeat(PatternNode::pulse(1.0, NS_PER_MS), 1000, 5 * NS_PER_MS);
        let verdict = SafetyValidator::new(&limits).validate(node).unwrap();
        let v = verdict.violations();
        assert_eq!(kinds(v), vec![ViolationKind::DutyCycleExceeded]);
        assert!(v[0].location.is_root());
        assert!((v[0].observed - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_validation_cost_independent_of_repeat_count() {
        let limits = limits();
        // A trillion expanded events; enumerating them would never finish
        let node = PatternNode::repeat(
            PatternNode::repeat(PatternNode::pulse(1.0, NS_PER_US), 1_000_000, 5 * NS_PER_US),
            1_000_000,
            20 * NS_PER_S,
        );
        let v = SafetyValidator::new(&limits).check(&node);
        assert_eq!(kinds(&v), vec![ViolationKind::DutyCycleExceeded]);
        assert_eq!(v[0].location.to_string(), "root/repeat");
    }

    #[test]
    fn test_whole_pattern_duty_cycle() {
        let mut limits = limits();
        limits.max_duty_cycle = 0.5;
        // No repeat; 3 ms on within 4 ms
        let node = PatternNode::sequence(
            vec![PatternNode::pulse(1.0, 3 * NS_PER_MS), PatternNode::delay(NS_PER_MS)],
            0,
        );
        let v = SafetyValidator::new(&limits).check(&node);
        assert_eq!(kinds(&v), vec![ViolationKind::DutyCycleExceeded]);
        assert!((v[0].observed - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_duty_cycle_is_per_channel() {
        let mut limits = limits();
        limits.max_duty_cycle = 0.5;
        let node = PatternNode::parallel([
            (0, PatternNode::pulse(1.0, NS_PER_MS)),
            (1, PatternNode::delay(4 * NS_PER_MS)),
        ]);
        // Channel 0 is on 1 of 4 ms; channel 1 never
        assert!(SafetyValidator::new(&limits).check(&node).is_empty());
    }

    #[test]
    fn test_zero_period_repeat_is_infinite_duty() {
        let limits = limits();
        let node = PatternNode::repeat(PatternNode::pulse(1.0, 10), 3, 0);
        let v = SafetyValidator::new(&limits).check(&node);
        assert_eq!(v[0].kind, ViolationKind::DutyCycleExceeded);
        assert!(v[0].observed.is_infinite());
    }

    // =========================================================================
    // Channel count
    // =========================================================================

    #[test]
    fn test_channel_count_exceeded() {
        let mut limits = limits();
        limits.max_duty_cycle = 1.0;
        let node = PatternNode::parallel([
            (0, PatternNode::pulse(1.0, 10)),
            (1, PatternNode::pulse(1.0, 10)),
            (5, PatternNode::delay(10)),
        ]);
        let verdict = SafetyValidator::new(&limits).validate(node).unwrap();
        assert!(!verdict.is_accepted());
        let v = verdict.violations();
        assert_eq!(kinds(v), vec![ViolationKind::ChannelCountExceeded]);
        assert_eq!(v[0].observed, 3.0);
        assert_eq!(v[0].channel, None);
    }

    #[test]
    fn test_into_result_maps_to_safety_error() {
        let limits = limits();
        let verdict = SafetyValidator::new(&limits)
            .validate(PatternNode::pulse(50.0, 10))
            .unwrap();
        match verdict.into_result() {
            Err(Error::Safety(v)) => assert_eq!(v[0].kind, ViolationKind::AmplitudeExceeded),
            other => panic!("expected safety error, got {:?}", other),
        }
    }
}
