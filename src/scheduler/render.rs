// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sample rendering for the lookahead buffer.
//!
//! Compiled events are quantized once to [`SampleSpan`]s on the output
//! sample grid. The [`SegmentRenderer`] then writes interleaved frames into
//! pre-allocated [`Segment`]s that circulate between it and the scheduler
//! through two SPSC rings. Whoever holds a segment owns it; no segment is
//! shared.

use std::thread;
use std::time::Duration;

use rtrb::{Consumer, Producer};
use tracing::debug;

use super::AbortHandle;
use crate::compiler::CompiledSequence;
use crate::error::ScheduleError;
use crate::pattern::NS_PER_S;

/// A compiled event placed on the sample grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSpan {
    /// Frame column (index into the ascending channel list)
    pub column: usize,
    pub start_frame: u64,
    /// Exclusive
    pub end_frame: u64,
    pub value: f64,
}

/// Nearest frame to `ns` (half rounds up) and its distance from `ns`.
fn to_frame(ns: u64, sample_rate_hz: u32) -> (u64, u64) {
    let rate = sample_rate_hz as u128;
    let scaled = ns as u128 * rate;
    let per_s = NS_PER_S as u128;
    let frame = (scaled + per_s / 2) / per_s;
    let error = (frame * per_s).abs_diff(scaled).div_ceil(rate.max(1));
    (
        u64::try_from(frame).unwrap_or(u64::MAX),
        u64::try_from(error).unwrap_or(u64::MAX),
    )
}

/// Nanoseconds covered by `frames` samples, rounded up.
fn frames_to_ns(frames: u64, sample_rate_hz: u32) -> u64 {
    let ns = (frames as u128 * NS_PER_S as u128).div_ceil((sample_rate_hz as u128).max(1));
    u64::try_from(ns).unwrap_or(u64::MAX)
}

/// Place every event of `sequence` on the sample grid.
///
/// Returns the spans (in event order) and the total frame count, which
/// includes one trailing neutral frame.
///
/// A span never covers more time than its event, so pulse width, charge
/// and duty on the output stay within what was validated, and the phases
/// of a biphasic pulse get the same number of frames.
///
/// # Errors
///
/// - `TimingResolution` if either edge of an event misses the grid by more
///   than `tolerance_ns`, or an event is too short to cover a single frame
/// - `WidthExceeded` if rounding would lengthen an event
pub fn quantize(
    sequence: &CompiledSequence,
    sample_rate_hz: u32,
    tolerance_ns: u64,
) -> Result<(Vec<SampleSpan>, u64), ScheduleError> {
    let channels = sequence.channel_ids();
    let mut spans = Vec::with_capacity(sequence.len());

    for event in sequence.events() {
        let (start_frame, onset_error_ns) = to_frame(event.onset_ns, sample_rate_hz);
        let (end_frame, end_error_ns) = to_frame(event.end_ns(), sample_rate_hz);
        let error_ns = onset_error_ns.max(end_error_ns);
        let off_grid = || ScheduleError::TimingResolution {
            channel: event.channel,
            onset_ns: event.onset_ns,
            error_ns,
            tolerance_ns,
        };
        if error_ns > tolerance_ns || end_frame <= start_frame {
            return Err(off_grid());
        }

        let frames = end_frame - start_frame;
        let rendered = frames as u128 * NS_PER_S as u128;
        if rendered > event.duration_ns as u128 * sample_rate_hz as u128 {
            return Err(ScheduleError::WidthExceeded {
                channel: event.channel,
                onset_ns: event.onset_ns,
                width_ns: event.duration_ns,
                rendered_ns: frames_to_ns(frames, sample_rate_hz),
            });
        }

        let column = channels
            .binary_search(&event.channel)
            .map_err(|_| off_grid())?;
        spans.push(SampleSpan {
            column,
            start_frame,
            end_frame,
            value: event.value,
        });
    }

    let (last_frame, _) = to_frame(sequence.total_duration_ns(), sample_rate_hz);
    let total_frames = last_frame.saturating_add(1);
    Ok((spans, total_frames))
}

/// A block of interleaved frames.
#[derive(Debug)]
pub struct Segment {
    samples: Vec<f64>,
    channel_count: usize,
    frames: usize,
    start_frame: u64,
    last: bool,
}

impl Segment {
    pub(crate) fn with_capacity(frames: usize, channel_count: usize) -> Self {
        Self {
            samples: vec![0.0; frames * channel_count],
            channel_count,
            frames: 0,
            start_frame: 0,
            last: false,
        }
    }

    /// Rendered frames, interleaved.
    pub fn samples(&self) -> &[f64] {
        &self.samples[..self.frames * self.channel_count]
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Index of the first frame in the whole playback.
    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    /// Whether this segment ends the playback.
    pub fn is_last(&self) -> bool {
        self.last
    }
}

/// Fills free segments with the next frames of the playback.
pub struct SegmentRenderer {
    spans: Vec<SampleSpan>,
    next_span: usize,
    /// Per column: `(end_frame, value)` of the span in progress
    active: Vec<Option<(u64, f64)>>,
    channel_count: usize,
    segment_frames: usize,
    total_frames: u64,
    cursor: u64,
    neutral: f64,
    free: Consumer<Segment>,
    filled: Producer<Segment>,
}

impl SegmentRenderer {
    pub(crate) fn new(
        spans: Vec<SampleSpan>,
        total_frames: u64,
        channel_count: usize,
        segment_frames: usize,
        neutral: f64,
        free: Consumer<Segment>,
        filled: Producer<Segment>,
    ) -> Self {
        Self {
            spans,
            next_span: 0,
            active: vec![None; channel_count],
            channel_count,
            segment_frames,
            total_frames,
            cursor: 0,
            neutral,
            free,
            filled,
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Whether every frame has been rendered.
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.total_frames
    }

    /// Render into every free segment the scheduler has returned.
    ///
    /// Returns the number of segments handed to the scheduler.
    pub fn fill(&mut self) -> usize {
        let mut rendered = 0;
        while !self.is_finished() && !self.filled.is_full() {
            let Ok(mut segment) = self.free.pop() else {
                break;
            };
            self.render_into(&mut segment);
            if self.filled.push(segment).is_err() {
                break;
            }
            rendered += 1;
        }
        rendered
    }

    /// Keep the lookahead full until the playback is rendered, aborted, or
    /// the scheduler has let go of its end of the rings.
    pub fn run(mut self, abort: AbortHandle, poll_interval: Duration) {
        let mut segments = 0usize;
        loop {
            if self.is_finished() || abort.is_requested() || self.filled.is_abandoned() {
                break;
            }
            let n = self.fill();
            segments += n;
            if n == 0 {
                thread::sleep(poll_interval);
            }
        }
        debug!(
            segments,
            frames = self.cursor,
            finished = self.is_finished(),
            "Renderer stopped"
        );
    }

    fn render_into(&mut self, segment: &mut Segment) {
        let remaining = self.total_frames - self.cursor;
        let frames = (self.segment_frames as u64).min(remaining) as usize;
        let cc = self.channel_count;

        for i in 0..frames {
            let frame = self.cursor + i as u64;
            while let Some(span) = self.spans.get(self.next_span) {
                if span.start_frame > frame {
                    break;
                }
                self.active[span.column] = Some((span.end_frame, span.value));
                self.next_span += 1;
            }
            for (col, slot) in self.active.iter().enumerate() {
                segment.samples[i * cc + col] = match slot {
                    Some((end, value)) if frame < *end => *value,
                    _ => self.neutral,
                };
            }
        }

        segment.frames = frames;
        segment.start_frame = self.cursor;
        self.cursor += frames as u64;
        segment.last = self.is_finished();
    }
}
