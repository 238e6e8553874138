// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared test utilities: permissive validation and scripted devices.

use crate::config::SafetyLimits;
use crate::error::HardwareError;
use crate::hardware::{DeviceStatus, HardwareAdapter, SimulatedAdapter, SimulatedProbe, WriteStatus};
use crate::pattern::{ChannelId, PatternNode};
use crate::safety::{SafetyValidator, ValidatedPattern};

/// Limits no test pattern is meant to hit, apart from duty cycle <= 1.
pub fn permissive_limits() -> SafetyLimits {
    SafetyLimits {
        max_amplitude: 1e6,
        max_pulse_width_ns: u64::MAX,
        max_duty_cycle: 1.0,
        max_charge_per_pulse: f64::MAX,
        max_channel_count: u32::MAX,
    }
}

/// Validate `node` against [`permissive_limits`], panicking on rejection.
pub fn validated(node: PatternNode) -> ValidatedPattern {
    let limits = permissive_limits();
    match SafetyValidator::new(&limits).validate(node) {
        Ok(verdict) => match verdict.into_result() {
            Ok(pattern) => pattern,
            Err(e) => panic!("test pattern rejected: {}", e),
        },
        Err(e) => panic!("test pattern malformed: {}", e),
    }
}

/// Misbehavior of a [`ScriptedAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Accept `n` writes, then report busy forever
    BusyAfter(u64),
    /// Accept `n` writes, then fail with `Disconnected`
    FailWriteAfter(u64),
    /// Report `Fault` once `n` writes were accepted
    FaultAfter(u64),
    /// Refuse `prepare`
    PrepareFails,
    /// Report `Streaming` before anything was written
    StreamingBeforeStart,
}

/// Simulated device that misbehaves on cue.
///
/// Accepted frames and neutral commands are recorded by an inner
/// [`SimulatedAdapter`].
pub struct ScriptedAdapter {
    inner: SimulatedAdapter,
    script: Script,
    writes: u64,
}

impl ScriptedAdapter {
    pub fn new(script: Script) -> Self {
        Self {
            inner: SimulatedAdapter::new(),
            script,
            writes: 0,
        }
    }

    pub fn probe(&self) -> SimulatedProbe {
        self.inner.probe()
    }
}

impl HardwareAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn prepare(&mut self, channels: &[ChannelId], sample_rate_hz: u32) -> Result<(), HardwareError> {
        if self.script == Script::PrepareFails {
            return Err(HardwareError::NotReady("scripted prepare failure".into()));
        }
        self.inner.prepare(channels, sample_rate_hz)
    }

    fn write_buffer(&mut self, samples: &[f64]) -> Result<WriteStatus, HardwareError> {
        match self.script {
            Script::BusyAfter(n) if self.writes >= n => return Ok(WriteStatus::Busy),
            Script::FailWriteAfter(n) if self.writes >= n => {
                return Err(HardwareError::Disconnected("scripted cable pull".into()))
            }
            _ => {}
        }
        let status = self.inner.write_buffer(samples)?;
        self.writes += 1;
        Ok(status)
    }

    fn abort_output(&mut self, neutral: f64) -> Result<(), HardwareError> {
        self.inner.abort_output(neutral)
    }

    fn query_status(&mut self) -> Result<DeviceStatus, HardwareError> {
        match self.script {
            Script::FaultAfter(n) if self.writes >= n => Ok(DeviceStatus::Fault),
            Script::StreamingBeforeStart if self.writes == 0 => Ok(DeviceStatus::Streaming),
            _ => self.inner.query_status(),
        }
    }
}
