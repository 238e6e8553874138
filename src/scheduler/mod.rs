// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Real-time playback of compiled sequences.
//!
//! # State machine
//!
//! ```text
//! Idle --arm--> Armed --start--> Running --step*--> Completed
//!                 |                 |
//!                 +------abort------+--> Aborted
//!                 +------fault------+--> Faulted
//! ```
//!
//! `arm` quantizes the sequence, allocates the lookahead segments once,
//! pre-fills them and prepares the device. Each [`Scheduler::step`] moves
//! one segment from the lookahead to the device. Any fault or abort drives
//! every channel to the neutral value before the state changes.

pub mod render;

pub use render::{quantize, SampleSpan, Segment, SegmentRenderer};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, RingBuffer};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::compiler::CompiledSequence;
use crate::config::SchedulerConfig;
use crate::error::{HardwareError, ScheduleError};
use crate::hardware::{DeviceStatus, HardwareAdapter, WriteStatus};
use crate::pattern::DEFAULT_CHANNEL;

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    /// Sequence loaded, lookahead filled, device prepared
    Armed,
    Running,
    Completed,
    Aborted,
    Faulted,
}

impl SchedulerState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SchedulerState::Completed | SchedulerState::Aborted | SchedulerState::Faulted
        )
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Armed => write!(f, "armed"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Completed => write!(f, "completed"),
            SchedulerState::Aborted => write!(f, "aborted"),
            SchedulerState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Cross-thread abort request.
///
/// The scheduler observes it at the start of every cycle and while waiting
/// on the device.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    requested: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Streams one compiled sequence to a hardware adapter.
pub struct Scheduler<A: HardwareAdapter> {
    adapter: A,
    config: SchedulerConfig,
    state: SchedulerState,
    abort: AbortHandle,
    /// Rendered segments, from the renderer
    filled: Option<Consumer<Segment>>,
    /// Drained segments, back to the renderer
    free: Option<Producer<Segment>>,
    channel_count: usize,
    total_frames: u64,
    frames_written: u64,
    segments_written: u64,
}

impl<A: HardwareAdapter> Scheduler<A> {
    pub fn new(adapter: A, config: SchedulerConfig) -> Self {
        Self {
            adapter,
            config,
            state: SchedulerState::Idle,
            abort: AbortHandle::new(),
            filled: None,
            free: None,
            channel_count: 0,
            total_frames: 0,
            frames_written: 0,
            segments_written: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Handle another thread can use to abort playback.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn into_adapter(self) -> A {
        self.adapter
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn segments_written(&self) -> u64 {
        self.segments_written
    }

    /// Frames in the armed playback, trailing neutral frame included.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.config.poll_interval_us)
    }

    fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.config.ready_timeout_ms)
    }

    fn invalid(&self, action: &str) -> ScheduleError {
        ScheduleError::InvalidTransition {
            from: self.state.to_string(),
            action: action.to_string(),
        }
    }

    fn transition(&mut self, to: SchedulerState) {
        info!(from = %self.state, to = %to, "Scheduler state change");
        self.state = to;
        if to.is_terminal() {
            // Lets the renderer see the rings abandoned and stop
            self.filled = None;
            self.free = None;
        }
    }

    /// Force neutral output, enter `Faulted`, and hand back the cause.
    fn fault(&mut self, cause: ScheduleError) -> ScheduleError {
        if let Err(e) = self.adapter.abort_output(self.config.neutral_value) {
            error!(adapter = self.adapter.name(), error = %e, "Failed to drive outputs to neutral");
        }
        error!(
            adapter = self.adapter.name(),
            frame = self.frames_written,
            error = %cause,
            "Playback faulted"
        );
        self.transition(SchedulerState::Faulted);
        cause
    }

    /// Load a sequence and get ready to stream.
    ///
    /// Returns the renderer that keeps the lookahead filled; it is already
    /// primed with up to `lookahead_segments` segments.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` unless `Idle`
    /// - `TimingResolution` if an event cannot be placed on the sample grid
    /// - `WidthExceeded` if the sample grid would lengthen an event
    /// - `Hardware` if the device refuses the configuration
    ///
    /// Every error except `InvalidTransition` leaves the scheduler `Faulted`.
    pub fn arm(&mut self, sequence: &CompiledSequence) -> Result<SegmentRenderer, ScheduleError> {
        if self.state != SchedulerState::Idle {
            return Err(self.invalid("arm"));
        }

        let mut channels = sequence.channel_ids();
        if channels.is_empty() {
            channels.push(DEFAULT_CHANNEL);
        }
        let channel_count = channels.len();
        let (spans, total_frames) = match quantize(
            sequence,
            self.config.sample_rate_hz,
            self.config.max_onset_error_ns,
        ) {
            Ok(q) => q,
            Err(e) => return Err(self.fault(e)),
        };

        let lookahead = self.config.lookahead_segments;
        let (mut free_tx, free_rx) = RingBuffer::new(lookahead);
        let (filled_tx, filled_rx) = RingBuffer::new(lookahead);
        for _ in 0..lookahead {
            if free_tx
                .push(Segment::with_capacity(self.config.segment_frames, channel_count))
                .is_err()
            {
                break;
            }
        }

        let mut renderer = SegmentRenderer::new(
            spans,
            total_frames,
            channel_count,
            self.config.segment_frames,
            self.config.neutral_value,
            free_rx,
            filled_tx,
        );
        let primed = renderer.fill();

        if let Err(e) = self
            .adapter
            .prepare(&channels, self.config.sample_rate_hz)
        {
            return Err(self.fault(e.into()));
        }

        self.filled = Some(filled_rx);
        self.free = Some(free_tx);
        self.channel_count = channel_count;
        self.total_frames = total_frames;
        self.frames_written = 0;
        self.segments_written = 0;
        debug!(
            channels = ?channels,
            total_frames,
            primed,
            sample_rate_hz = self.config.sample_rate_hz,
            "Lookahead primed"
        );
        self.transition(SchedulerState::Armed);
        Ok(renderer)
    }

    /// Begin streaming once the device reports ready.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless `Armed`; `Hardware` if the device is not
    /// idle (the scheduler is then `Faulted`).
    pub fn start(&mut self) -> Result<(), ScheduleError> {
        if self.state != SchedulerState::Armed {
            return Err(self.invalid("start"));
        }
        match self.adapter.query_status() {
            Ok(DeviceStatus::Idle) => {
                self.transition(SchedulerState::Running);
                Ok(())
            }
            Ok(status) => Err(self.fault(
                HardwareError::UnexpectedStatus(format!("device {} before start", status)).into(),
            )),
            Err(e) => Err(self.fault(e.into())),
        }
    }

    /// One buffer-fill cycle: move the next rendered segment to the device.
    ///
    /// Returns the state after the cycle.
    ///
    /// # Errors
    ///
    /// - `Underrun` if no segment is ready or the device stays busy past
    ///   `ready_timeout_ms`, or if the device went idle mid-playback
    /// - `Hardware` on any adapter error or a device fault
    pub fn step(&mut self) -> Result<SchedulerState, ScheduleError> {
        if self.state != SchedulerState::Running {
            return Err(self.invalid("step"));
        }
        if self.abort.is_requested() {
            self.abort()?;
            return Ok(self.state);
        }

        let timeout = self.ready_timeout();
        let poll = self.poll_interval();

        // Take the next rendered segment
        let waiting = Instant::now();
        let segment = loop {
            let popped = match self.filled.as_mut() {
                Some(rx) => rx.pop().ok(),
                None => return Err(self.invalid("step")),
            };
            if let Some(segment) = popped {
                break segment;
            }
            if self.abort.is_requested() {
                self.abort()?;
                return Ok(self.state);
            }
            if waiting.elapsed() >= timeout {
                return Err(self.underrun(waiting));
            }
            thread::sleep(poll);
        };

        // Hand it to the device
        let writing = Instant::now();
        loop {
            match self.adapter.write_buffer(segment.samples()) {
                Ok(WriteStatus::Accepted) => break,
                Ok(WriteStatus::Busy) => {
                    if self.abort.is_requested() {
                        self.abort()?;
                        return Ok(self.state);
                    }
                    if writing.elapsed() >= timeout {
                        return Err(self.underrun(writing));
                    }
                    thread::sleep(poll);
                }
                Err(e) => return Err(self.fault(e.into())),
            }
        }

        self.frames_written += segment.frame_count() as u64;
        self.segments_written += 1;
        let last = segment.is_last();
        if let Some(tx) = self.free.as_mut() {
            // Ring capacity equals the segment count, so this cannot be full
            let _ = tx.push(segment);
        }

        match self.adapter.query_status() {
            Ok(DeviceStatus::Fault) => {
                return Err(self.fault(HardwareError::Device("device reported fault".into()).into()))
            }
            Ok(DeviceStatus::Idle) if !last => {
                warn!(frame = self.frames_written, "Device went idle mid-playback");
                return Err(self.fault(ScheduleError::Underrun {
                    frame: self.frames_written,
                    waited_ms: 0,
                }));
            }
            Ok(_) => {}
            Err(e) => return Err(self.fault(e.into())),
        }

        if last {
            info!(
                frames = self.frames_written,
                segments = self.segments_written,
                "Playback complete"
            );
            self.transition(SchedulerState::Completed);
        }
        Ok(self.state)
    }

    fn underrun(&mut self, since: Instant) -> ScheduleError {
        let cause = ScheduleError::Underrun {
            frame: self.frames_written,
            waited_ms: since.elapsed().as_millis() as u64,
        };
        self.fault(cause)
    }

    /// Step until a terminal state.
    pub fn run(&mut self) -> Result<SchedulerState, ScheduleError> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        Ok(self.state)
    }

    /// Stop emitting and force outputs to neutral.
    ///
    /// No-op in `Idle` and in terminal states. Samples already accepted by
    /// the device are not recalled.
    ///
    /// # Errors
    ///
    /// `Hardware` if the device could not be driven to neutral; the
    /// scheduler is then `Faulted` rather than `Aborted`.
    pub fn abort(&mut self) -> Result<(), ScheduleError> {
        match self.state {
            SchedulerState::Armed | SchedulerState::Running => {
                self.abort.request();
                match self.adapter.abort_output(self.config.neutral_value) {
                    Ok(()) => {
                        info!(frame = self.frames_written, "Playback aborted");
                        self.transition(SchedulerState::Aborted);
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "Abort could not drive outputs to neutral");
                        self.transition(SchedulerState::Faulted);
                        Err(e.into())
                    }
                }
            }
            _ => Ok(()),
        }
    }
}
