// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compiled output: a flat, onset-ordered list of events.

use serde::Serialize;

use crate::pattern::ChannelId;

/// One constant-level span on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompiledEvent {
    pub channel: ChannelId,
    /// Offset from pattern start
    pub onset_ns: u64,
    /// Output level
    pub value: f64,
    pub duration_ns: u64,
}

impl CompiledEvent {
    /// First nanosecond after the event.
    pub fn end_ns(&self) -> u64 {
        self.onset_ns.saturating_add(self.duration_ns)
    }
}

/// Per-channel load of a compiled sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub channel: ChannelId,
    pub event_count: u64,
    /// Sum of event durations
    pub on_time_ns: u64,
    /// `on_time_ns / total_duration_ns` (0 for an empty timeline)
    pub duty_cycle: f64,
    /// Largest `|value|` on the channel
    pub peak_amplitude: f64,
}

/// Output of the compiler.
///
/// Events are sorted by onset, ties broken by ascending channel, and no two
/// events on one channel overlap. Only the compiler constructs these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSequence {
    events: Vec<CompiledEvent>,
    total_duration_ns: u64,
    channels: Vec<ChannelSummary>,
}

impl CompiledSequence {
    pub(crate) fn new(
        events: Vec<CompiledEvent>,
        total_duration_ns: u64,
        channels: Vec<ChannelSummary>,
    ) -> Self {
        Self {
            events,
            total_duration_ns,
            channels,
        }
    }

    pub fn events(&self) -> &[CompiledEvent] {
        &self.events
    }

    pub fn total_duration_ns(&self) -> u64 {
        self.total_duration_ns
    }

    /// One summary per channel, ascending by channel id.
    pub fn channels(&self) -> &[ChannelSummary] {
        &self.channels
    }

    /// Channel ids in ascending order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|c| c.channel).collect()
    }

    pub fn summary(&self, channel: ChannelId) -> Option<&ChannelSummary> {
        self.channels.iter().find(|c| c.channel == channel)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let seq = CompiledSequence::new(
            vec![CompiledEvent {
                channel: 3,
                onset_ns: 10,
                value: 1.0,
                duration_ns: 5,
            }],
            20,
            vec![ChannelSummary {
                channel: 3,
                event_count: 1,
                on_time_ns: 5,
                duty_cycle: 0.25,
                peak_amplitude: 1.0,
            }],
        );
        assert_eq!(seq.len(), 1);
        assert!(!seq.is_empty());
        assert_eq!(seq.events()[0].end_ns(), 15);
        assert_eq!(seq.channel_ids(), vec![3]);
        assert_eq!(seq.summary(3).map(|s| s.on_time_ns), Some(5));
        assert!(seq.summary(0).is_none());
    }

    #[test]
    fn test_serializes_field_names() {
        let seq = CompiledSequence::new(Vec::new(), 0, Vec::new());
        let json = serde_json::to_value(&seq).unwrap();
        assert_eq!(json["total_duration_ns"], 0);
        assert!(json["events"].as_array().unwrap().is_empty());
    }
}
