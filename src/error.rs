// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the stimulation engine.
//!
//! Compile-time failures (`Pattern`, `Safety`, `Compile`) are returned to the
//! editing layer as structured values. Runtime failures (`Schedule`) are only
//! reported after the scheduler has forced every channel to neutral.

use std::fmt;

use crate::pattern::NodePath;
use crate::safety::Violation;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug)]
pub enum Error {
    /// Configuration error
    Config(String),
    /// Malformed pattern tree
    Pattern(StructuralError),
    /// Pattern rejected by the safety validator
    Safety(Vec<Violation>),
    /// Sequence compiler rejection
    Compile(CompileError),
    /// Runtime fault during arming or playback
    Schedule(ScheduleError),
    /// IO error
    Io(std::io::Error),
    /// Serialization error
    Serialization(String),
}

impl Error {
    /// Whether this error happened at runtime (playback was affected).
    pub fn is_runtime(&self) -> bool {
        matches!(self, Error::Schedule(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Pattern(e) => write!(f, "Structural error: {}", e),
            Error::Safety(violations) => {
                write!(f, "Safety violation: {} limit(s) exceeded", violations.len())?;
                if let Some(first) = violations.first() {
                    write!(f, " (first: {})", first)?;
                }
                Ok(())
            }
            Error::Compile(e) => write!(f, "Compile error: {}", e),
            Error::Schedule(e) => write!(f, "Playback error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Pattern(e) => Some(e),
            Error::Compile(e) => Some(e),
            Error::Schedule(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<StructuralError> for Error {
    fn from(e: StructuralError) -> Self {
        Error::Pattern(e)
    }
}

impl From<CompileError> for Error {
    fn from(e: CompileError) -> Self {
        Error::Compile(e)
    }
}

impl From<ScheduleError> for Error {
    fn from(e: ScheduleError) -> Self {
        Error::Schedule(e)
    }
}

impl From<HardwareError> for Error {
    fn from(e: HardwareError) -> Self {
        Error::Schedule(ScheduleError::Hardware(e))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Shape-rule violations in a pattern tree.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralError {
    /// Sequence with no children
    EmptySequence { path: NodePath },
    /// Repeat with count = 0
    ZeroRepeat { path: NodePath },
    /// Parallel with no branches
    EmptyParallel { path: NodePath },
    /// Same channel id used twice in one Parallel
    DuplicateChannel { path: NodePath, channel: u16 },
    /// Primitive with zero width
    ZeroWidth { path: NodePath },
    /// NaN or infinite amplitude
    NonFiniteAmplitude { path: NodePath },
}

impl StructuralError {
    /// Location of the offending node.
    pub fn path(&self) -> &NodePath {
        match self {
            StructuralError::EmptySequence { path }
            | StructuralError::ZeroRepeat { path }
            | StructuralError::EmptyParallel { path }
            | StructuralError::DuplicateChannel { path, .. }
            | StructuralError::ZeroWidth { path }
            | StructuralError::NonFiniteAmplitude { path } => path,
        }
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralError::EmptySequence { path } => {
                write!(f, "sequence at {} has no children", path)
            }
            StructuralError::ZeroRepeat { path } => {
                write!(f, "repeat at {} has count 0", path)
            }
            StructuralError::EmptyParallel { path } => {
                write!(f, "parallel at {} has no branches", path)
            }
            StructuralError::DuplicateChannel { path, channel } => {
                write!(f, "parallel at {} assigns channel {} twice", path, channel)
            }
            StructuralError::ZeroWidth { path } => {
                write!(f, "primitive at {} has zero width", path)
            }
            StructuralError::NonFiniteAmplitude { path } => {
                write!(f, "primitive at {} has a non-finite amplitude", path)
            }
        }
    }
}

impl std::error::Error for StructuralError {}

/// Sequence compiler rejections.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Two events on one channel would overlap
    Overlap {
        channel: u16,
        first_onset_ns: u64,
        second_onset_ns: u64,
    },
    /// Repeat period shorter than the repeated child
    PeriodTooShort {
        path: NodePath,
        period_ns: u64,
        child_duration_ns: u64,
    },
    /// Expansion would exceed the configured maximum
    CompileLimitExceeded { limit: u64, requested: u64 },
    /// Timeline does not fit in 64-bit nanoseconds
    DurationOverflow { path: NodePath },
}

impl CompileError {
    /// Whether this is an overlap-class error.
    pub fn is_overlap(&self) -> bool {
        matches!(
            self,
            CompileError::Overlap { .. } | CompileError::PeriodTooShort { .. }
        )
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Overlap {
                channel,
                first_onset_ns,
                second_onset_ns,
            } => write!(
                f,
                "Overlap on channel {}: event at {} ns overlaps event at {} ns",
                channel, second_onset_ns, first_onset_ns
            ),
            CompileError::PeriodTooShort {
                path,
                period_ns,
                child_duration_ns,
            } => write!(
                f,
                "Overlap at {}: period {} ns is shorter than child duration {} ns",
                path, period_ns, child_duration_ns
            ),
            CompileError::CompileLimitExceeded { limit, requested } => write!(
                f,
                "Compile limit exceeded: limit={}, requested={}",
                limit, requested
            ),
            CompileError::DurationOverflow { path } => {
                write!(f, "Compile limit exceeded: duration overflow at {}", path)
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Errors raised while arming or streaming a compiled sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleError {
    /// Lookahead buffer could not be refilled before the hardware deadline
    Underrun { frame: u64, waited_ms: u64 },
    /// Device-reported fault
    Hardware(HardwareError),
    /// Operation not allowed in the current state
    InvalidTransition { from: String, action: String },
    /// An event cannot be placed on the sample grid within tolerance
    TimingResolution {
        channel: u16,
        onset_ns: u64,
        error_ns: u64,
        tolerance_ns: u64,
    },
    /// An event would play longer on the sample grid than it was validated for
    WidthExceeded {
        channel: u16,
        onset_ns: u64,
        width_ns: u64,
        rendered_ns: u64,
    },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::Underrun { frame, waited_ms } => write!(
                f,
                "Underrun at frame {}: hardware not refilled after {} ms",
                frame, waited_ms
            ),
            ScheduleError::Hardware(e) => write!(f, "Hardware adapter error: {}", e),
            ScheduleError::InvalidTransition { from, action } => {
                write!(f, "Cannot {} while {}", action, from)
            }
            ScheduleError::TimingResolution {
                channel,
                onset_ns,
                error_ns,
                tolerance_ns,
            } => write!(
                f,
                "Event on channel {} at {} ns misses the sample grid by {} ns (tolerance {} ns)",
                channel, onset_ns, error_ns, tolerance_ns
            ),
            ScheduleError::WidthExceeded {
                channel,
                onset_ns,
                width_ns,
                rendered_ns,
            } => write!(
                f,
                "Event on channel {} at {} ns would play for {} ns on the sample grid (validated width {} ns)",
                channel, onset_ns, rendered_ns, width_ns
            ),
        }
    }
}

impl std::error::Error for ScheduleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScheduleError::Hardware(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HardwareError> for ScheduleError {
    fn from(e: HardwareError) -> Self {
        ScheduleError::Hardware(e)
    }
}

/// Errors reported by a hardware adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Device refused the output configuration
    NotReady(String),
    /// Device reported a fault
    Device(String),
    /// Device went away
    Disconnected(String),
    /// Unexpected status for the current operation
    UnexpectedStatus(String),
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareError::NotReady(msg) => write!(f, "Device not ready: {}", msg),
            HardwareError::Device(msg) => write!(f, "Device fault: {}", msg),
            HardwareError::Disconnected(msg) => write!(f, "Device disconnected: {}", msg),
            HardwareError::UnexpectedStatus(msg) => write!(f, "Unexpected status: {}", msg),
        }
    }
}

impl std::error::Error for HardwareError {}
