// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Declarative stimulation patterns.
//!
//! A pattern is a tree of [`PatternNode`]s whose leaves are
//! [`PulsePrimitive`]s. The tree only describes shape and timing; it knows
//! nothing about safety limits or hardware.
//!
//! - [`PulsePrimitive`] and [`Polarity`]: a single pulse
//! - [`PatternNode`]: composition (sequence, repeat, parallel, delay)
//! - [`NodePath`]: location of a node inside a tree, used in diagnostics
//! - [`TriggerProtocol`]: the classic single-channel trigger train
//!
//! All times are integer nanoseconds.

pub mod node;
pub mod path;
pub mod primitive;
pub mod protocol;

pub use node::{flatten_duration, ChannelBranch, PatternNode};
pub use path::{NodePath, PathSegment};
pub use primitive::{Polarity, PulsePrimitive};
pub use protocol::{ProtocolPhase, TriggerProtocol};

/// Output channel identifier.
pub type ChannelId = u16;

/// Channel used by nodes outside any `Parallel`.
pub const DEFAULT_CHANNEL: ChannelId = 0;

/// Nanoseconds per microsecond.
pub const NS_PER_US: u64 = 1_000;
/// Nanoseconds per millisecond.
pub const NS_PER_MS: u64 = 1_000_000;
/// Nanoseconds per second.
pub const NS_PER_S: u64 = 1_000_000_000;

/// Convert seconds to whole nanoseconds, rounding to nearest.
///
/// Returns `None` for negative, non-finite, or out-of-range input.
pub fn seconds_to_ns(seconds: f64) -> Option<u64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    whole_ns((seconds * NS_PER_S as f64).round())
}

/// `u64::MAX as f64` is 2^64, one past the largest `u64`.
fn whole_ns(ns: f64) -> Option<u64> {
    if ns >= u64::MAX as f64 {
        return None;
    }
    Some(ns as u64)
}
