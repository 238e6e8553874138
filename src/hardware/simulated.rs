// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory output device.
//!
//! Accepts every write, keeps every frame, and records neutral commands.
//! A [`SimulatedProbe`] shares the recorded state so callers can inspect
//! the output after the adapter has been moved into a playback thread.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{DeviceStatus, HardwareAdapter, WriteStatus};
use crate::config::DeviceConfig;
use crate::error::HardwareError;
use crate::pattern::ChannelId;

#[derive(Debug, Default)]
struct Recording {
    channel_count: usize,
    channels: Vec<ChannelId>,
    /// Physical output per frame column
    outputs: Vec<String>,
    sample_rate_hz: u32,
    /// Interleaved frames in output order
    samples: Vec<f64>,
    writes: u64,
    neutral_commands: Vec<f64>,
    status: Option<DeviceStatus>,
}

/// Read-only view of a [`SimulatedAdapter`]'s output.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProbe {
    inner: Arc<Mutex<Recording>>,
}

impl SimulatedProbe {
    /// `(channel_count, sample_rate_hz)` from the last `prepare`.
    pub fn prepared(&self) -> Option<(usize, u32)> {
        let rec = self.inner.lock();
        rec.status.map(|_| (rec.channel_count, rec.sample_rate_hz))
    }

    /// Channel ids from the last `prepare`, one per frame column.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.inner.lock().channels.clone()
    }

    /// Physical outputs the frame columns are routed to, e.g. `Dev2/ao5`.
    pub fn outputs(&self) -> Vec<String> {
        self.inner.lock().outputs.clone()
    }

    pub fn frame_count(&self) -> usize {
        let rec = self.inner.lock();
        if rec.channel_count == 0 {
            0
        } else {
            rec.samples.len() / rec.channel_count
        }
    }

    /// All output frames, one `Vec` per frame.
    pub fn frames(&self) -> Vec<Vec<f64>> {
        let rec = self.inner.lock();
        if rec.channel_count == 0 {
            return Vec::new();
        }
        rec.samples
            .chunks(rec.channel_count)
            .map(<[f64]>::to_vec)
            .collect()
    }

    /// Output of one channel column over time.
    pub fn channel_trace(&self, column: usize) -> Vec<f64> {
        let rec = self.inner.lock();
        if column >= rec.channel_count {
            return Vec::new();
        }
        rec.samples
            .iter()
            .skip(column)
            .step_by(rec.channel_count)
            .copied()
            .collect()
    }

    /// Level each channel is currently driven to.
    pub fn output_levels(&self) -> Vec<f64> {
        let rec = self.inner.lock();
        let n = rec.channel_count;
        if n == 0 || rec.samples.len() < n {
            return Vec::new();
        }
        rec.samples[rec.samples.len() - n..].to_vec()
    }

    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Neutral levels requested through `abort_output`, in order.
    pub fn neutral_commands(&self) -> Vec<f64> {
        self.inner.lock().neutral_commands.clone()
    }

    pub fn status(&self) -> Option<DeviceStatus> {
        self.inner.lock().status
    }
}

/// Output device that lives in memory.
#[derive(Debug, Default)]
pub struct SimulatedAdapter {
    device: DeviceConfig,
    recording: SimulatedProbe,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate `device`, resolving channel ids to its output names.
    pub fn with_device(device: DeviceConfig) -> Self {
        Self {
            device,
            recording: SimulatedProbe::default(),
        }
    }

    /// Shared view of everything this adapter outputs.
    pub fn probe(&self) -> SimulatedProbe {
        self.recording.clone()
    }
}

impl HardwareAdapter for SimulatedAdapter {
    fn name(&self) -> &str {
        "simulated"
    }

    fn prepare(&mut self, channels: &[ChannelId], sample_rate_hz: u32) -> Result<(), HardwareError> {
        let channel_count = channels.len();
        if channel_count == 0 || sample_rate_hz == 0 {
            return Err(HardwareError::NotReady(format!(
                "cannot open {} channel(s) at {} Hz",
                channel_count, sample_rate_hz
            )));
        }
        if channels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HardwareError::NotReady(format!(
                "channels must be strictly ascending, got {:?}",
                channels
            )));
        }
        let outputs: Vec<String> = channels
            .iter()
            .map(|&ch| self.device.physical_channel(ch))
            .collect();
        let mut rec = self.recording.inner.lock();
        rec.channel_count = channel_count;
        rec.channels = channels.to_vec();
        rec.sample_rate_hz = sample_rate_hz;
        rec.samples.clear();
        rec.writes = 0;
        rec.status = Some(DeviceStatus::Idle);
        debug!(outputs = ?outputs, sample_rate_hz, "Simulated device prepared");
        rec.outputs = outputs;
        Ok(())
    }

    fn write_buffer(&mut self, samples: &[f64]) -> Result<WriteStatus, HardwareError> {
        let mut rec = self.recording.inner.lock();
        let n = rec.channel_count;
        if rec.status.is_none() || n == 0 {
            return Err(HardwareError::NotReady("write before prepare".into()));
        }
        if samples.len() % n != 0 {
            return Err(HardwareError::Device(format!(
                "buffer of {} samples is not a whole number of {}-channel frames",
                samples.len(),
                n
            )));
        }
        rec.samples.extend_from_slice(samples);
        rec.writes += 1;
        rec.status = Some(DeviceStatus::Streaming);
        Ok(WriteStatus::Accepted)
    }

    fn abort_output(&mut self, neutral: f64) -> Result<(), HardwareError> {
        let mut rec = self.recording.inner.lock();
        rec.neutral_commands.push(neutral);
        let n = rec.channel_count;
        if n > 0 {
            let len = rec.samples.len() + n;
            rec.samples.resize(len, neutral);
        }
        if rec.status.is_some() {
            rec.status = Some(DeviceStatus::Idle);
        }
        Ok(())
    }

    fn query_status(&mut self) -> Result<DeviceStatus, HardwareError> {
        self.recording
            .inner
            .lock()
            .status
            .ok_or_else(|| HardwareError::NotReady("device not prepared".into()))
    }
}
