// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Session orchestration.
//!
//! A [`Session`] owns one validated configuration for its whole lifetime.
//! Compilation (structure, safety, expansion) runs on the caller's thread
//! and produces an immutable `Arc<CompiledSequence>`. Playback hands that
//! sequence to two threads:
//!
//! - `stimgen-render` keeps the lookahead buffer filled
//! - `stimgen-rt` moves segments to the device
//!
//! The two threads share nothing but the segment rings and the abort flag.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::compiler::{CompiledSequence, Compiler};
use crate::config::{Config, SafetyLimits};
use crate::error::{Error, Result, ScheduleError};
use crate::hardware::HardwareAdapter;
use crate::pattern::{PatternNode, TriggerProtocol};
use crate::safety::{SafetyValidator, Verdict};
use crate::scheduler::{AbortHandle, Scheduler, SchedulerState};

/// A stimulation session with fixed limits.
///
/// Changing limits means creating a new session.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    config: Config,
    compiler: Compiler,
}

impl Session {
    /// Validate `config` and open a session.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        info!(
            session_id = %id,
            max_amplitude = config.safety.max_amplitude,
            max_duty_cycle = config.safety.max_duty_cycle,
            sample_rate_hz = config.scheduler.sample_rate_hz,
            "Session opened"
        );
        Ok(Self {
            id,
            compiler: Compiler::new(&config.compiler),
            config,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.config.safety
    }

    /// Structure and safety check only.
    pub fn validate(&self, node: PatternNode) -> Result<Verdict> {
        Ok(SafetyValidator::new(&self.config.safety).validate(node)?)
    }

    /// Full compile pipeline: structure, safety, expansion.
    ///
    /// # Errors
    ///
    /// `Pattern`, `Safety` or `Compile`. A pattern rejected by the safety
    /// check never reaches the compiler.
    pub fn compile(&self, node: PatternNode) -> Result<Arc<CompiledSequence>> {
        let pattern = match self.validate(node)? {
            Verdict::Accepted(pattern) => pattern,
            Verdict::Rejected(violations) => {
                warn!(
                    session_id = %self.id,
                    violations = violations.len(),
                    "Pattern rejected by safety check"
                );
                return Err(Error::Safety(violations));
            }
        };
        let sequence = self.compiler.compile(&pattern)?;
        info!(
            session_id = %self.id,
            events = sequence.len(),
            channels = sequence.channels().len(),
            total_duration_ns = sequence.total_duration_ns(),
            "Sequence ready"
        );
        Ok(Arc::new(sequence))
    }

    /// Compile a classic trigger train.
    pub fn compile_protocol(&self, protocol: &TriggerProtocol) -> Result<Arc<CompiledSequence>> {
        self.compile(protocol.to_pattern()?)
    }

    /// Arm and start playback of `sequence` on `adapter`.
    ///
    /// Arming (pre-fill and device prepare) and the start handshake happen
    /// on the calling thread, so device refusal is reported here. Streaming
    /// then continues on background threads.
    pub fn play<A>(&self, sequence: Arc<CompiledSequence>, adapter: A) -> Result<Playback<A>>
    where
        A: HardwareAdapter + 'static,
    {
        let mut scheduler = Scheduler::new(adapter, self.config.scheduler.clone());
        let renderer = scheduler.arm(&sequence)?;
        scheduler.start()?;

        let abort = scheduler.abort_handle();
        let total_frames = scheduler.total_frames();
        let poll = Duration::from_micros(self.config.scheduler.poll_interval_us);
        let started = Instant::now();

        let rt = start_realtime(scheduler, |body| {
            thread::Builder::new().name("stimgen-rt".into()).spawn(body)
        })
        .map_err(|e| {
            error!(session_id = %self.id, error = %e, "Could not start real-time thread");
            e
        })?;

        let render_abort = abort.clone();
        let render = match thread::Builder::new()
            .name("stimgen-render".into())
            .spawn(move || renderer.run(render_abort, poll))
        {
            Ok(handle) => handle,
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Could not start renderer, aborting");
                abort.request();
                let _ = rt.join();
                return Err(e.into());
            }
        };

        info!(
            session_id = %self.id,
            total_frames,
            "Playback started"
        );
        Ok(Playback {
            session_id: self.id,
            abort,
            started,
            rt,
            render,
        })
    }
}

type RealtimeOutcome<A> = Option<(Scheduler<A>, std::result::Result<SchedulerState, ScheduleError>)>;
type RealtimeBody<A> = Box<dyn FnOnce() -> RealtimeOutcome<A> + Send>;

/// Run `scheduler` on the thread `spawn` starts.
///
/// If the thread cannot be started the scheduler is aborted on the calling
/// thread, so the device is left at neutral.
fn start_realtime<A, S>(scheduler: Scheduler<A>, spawn: S) -> io::Result<JoinHandle<RealtimeOutcome<A>>>
where
    A: HardwareAdapter + 'static,
    S: FnOnce(RealtimeBody<A>) -> io::Result<JoinHandle<RealtimeOutcome<A>>>,
{
    let handoff = Arc::new(Mutex::new(Some(scheduler)));
    let rt_handoff = Arc::clone(&handoff);
    let body: RealtimeBody<A> = Box::new(move || {
        let taken = rt_handoff.lock().take();
        taken.map(|mut scheduler| {
            let result = scheduler.run();
            (scheduler, result)
        })
    });

    spawn(body).map_err(|e| {
        let pending = handoff.lock().take();
        if let Some(mut scheduler) = pending {
            if let Err(abort_err) = scheduler.abort() {
                error!(error = %abort_err, "Outputs not confirmed neutral");
            }
        }
        e
    })
}

/// Summary of a finished playback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackReport {
    pub session_id: Uuid,
    pub state: SchedulerState,
    pub frames_written: u64,
    pub total_frames: u64,
    pub segments_written: u64,
    pub elapsed_ms: u64,
}

/// A playback in progress.
pub struct Playback<A: HardwareAdapter> {
    session_id: Uuid,
    abort: AbortHandle,
    started: Instant,
    rt: JoinHandle<RealtimeOutcome<A>>,
    render: JoinHandle<()>,
}

impl<A: HardwareAdapter> Playback<A> {
    /// Request an abort; observed within one buffer-fill cycle.
    ///
    /// Has no effect once playback has ended.
    pub fn abort(&self) {
        self.abort.request();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.rt.is_finished()
    }

    /// Block until playback ends.
    ///
    /// # Errors
    ///
    /// The runtime fault that ended playback. Outputs were driven to
    /// neutral before it was reported.
    pub fn wait(self) -> Result<PlaybackReport> {
        let (scheduler, result) = self
            .rt
            .join()
            .map_err(|_| Error::Io(io::Error::other("real-time thread panicked")))?
            .ok_or_else(|| Error::Io(io::Error::other("real-time thread had no scheduler")))?;
        if self.render.join().is_err() {
            warn!(session_id = %self.session_id, "Renderer thread panicked");
        }

        let state = result?;
        let report = PlaybackReport {
            session_id: self.session_id,
            state,
            frames_written: scheduler.frames_written(),
            total_frames: scheduler.total_frames(),
            segments_written: scheduler.segments_written(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        info!(
            session_id = %self.session_id,
            state = %report.state,
            frames = report.frames_written,
            elapsed_ms = report.elapsed_ms,
            "Playback finished"
        );
        Ok(report)
    }
}
