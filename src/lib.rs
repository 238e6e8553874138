// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stimgen: neurostimulation trigger-sequence engine
//!
//! This crate turns declarative stimulation patterns into sample-accurate
//! output streams for an analog output device, checking physical safety
//! limits before anything reaches the hardware.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Pattern    │──▶│    Safety    │──▶│   Compiler   │
//! │  (tree)      │   │  Validator   │   │ (flat events)│
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │ Arc<CompiledSequence>
//!                    ┌──────────────┐   ┌──────▼───────┐
//!                    │   Hardware   │◀──│  Scheduler   │
//!                    │   Adapter    │   │ (real time)  │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management and safety limits
//! - [`pattern`]: Pattern tree, pulse primitives, trigger protocols
//! - [`safety`]: Limit checks over pattern trees
//! - [`compiler`]: Expansion into time-ordered events
//! - [`scheduler`]: Playback state machine and lookahead buffer
//! - [`hardware`]: Device adapter trait and simulated device
//! - [`session`]: Compile pipeline and playback threads
//! - [`error`]: Error types

pub mod compiler;
pub mod config;
pub mod error;
pub mod hardware;
pub mod pattern;
pub mod safety;
pub mod scheduler;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Playback, PlaybackReport, Session};

#[cfg(test)]
pub mod test_utils;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
