// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware adapter boundary.
//!
//! The engine drives an output device only through [`HardwareAdapter`].
//! Every call is fallible; the scheduler treats any error or unexpected
//! status as a fault and forces outputs to neutral.
//!
//! - [`SimulatedAdapter`]: in-memory device that records every frame

pub mod simulated;

pub use simulated::{SimulatedAdapter, SimulatedProbe};

use std::fmt;

use serde::Serialize;

use crate::error::HardwareError;
use crate::pattern::ChannelId;

/// Device state as reported by [`HardwareAdapter::query_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Configured and ready for samples, not outputting
    Idle,
    /// Consuming samples
    Streaming,
    /// Device-side fault
    Fault,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Idle => write!(f, "idle"),
            DeviceStatus::Streaming => write!(f, "streaming"),
            DeviceStatus::Fault => write!(f, "fault"),
        }
    }
}

/// Outcome of a buffer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Samples were queued for output
    Accepted,
    /// Device buffer full; retry later
    Busy,
}

/// An analog output device that plays interleaved sample frames.
///
/// A frame holds one sample per prepared channel: column `i` drives the
/// `i`-th id passed to [`prepare`](Self::prepare). Buffers passed to
/// [`write_buffer`](Self::write_buffer) are whole frames.
pub trait HardwareAdapter: Send {
    /// Adapter name for logging.
    fn name(&self) -> &str;

    /// Configure the output task for `channels`, in ascending order.
    fn prepare(&mut self, channels: &[ChannelId], sample_rate_hz: u32) -> Result<(), HardwareError>;

    /// Queue interleaved frames for output.
    fn write_buffer(&mut self, samples: &[f64]) -> Result<WriteStatus, HardwareError>;

    /// Stop output and drive every channel to `neutral`.
    fn abort_output(&mut self, neutral: f64) -> Result<(), HardwareError>;

    fn query_status(&mut self) -> Result<DeviceStatus, HardwareError>;
}

impl<A: HardwareAdapter + ?Sized> HardwareAdapter for Box<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn prepare(&mut self, channels: &[ChannelId], sample_rate_hz: u32) -> Result<(), HardwareError> {
        (**self).prepare(channels, sample_rate_hz)
    }

    fn write_buffer(&mut self, samples: &[f64]) -> Result<WriteStatus, HardwareError> {
        (**self).write_buffer(samples)
    }

    fn abort_output(&mut self, neutral: f64) -> Result<(), HardwareError> {
        (**self).abort_output(neutral)
    }

    fn query_status(&mut self) -> Result<DeviceStatus, HardwareError> {
        (**self).query_status()
    }
}
