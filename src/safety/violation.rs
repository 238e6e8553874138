// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Structured safety violations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pattern::{ChannelId, NodePath};

/// Which limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    AmplitudeExceeded,
    WidthExceeded,
    DutyCycleExceeded,
    ChargeExceeded,
    ChannelCountExceeded,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::AmplitudeExceeded => write!(f, "amplitude"),
            ViolationKind::WidthExceeded => write!(f, "pulse width"),
            ViolationKind::DutyCycleExceeded => write!(f, "duty cycle"),
            ViolationKind::ChargeExceeded => write!(f, "charge per pulse"),
            ViolationKind::ChannelCountExceeded => write!(f, "channel count"),
        }
    }
}

/// One exceeded limit, located in the pattern tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Limit that was exceeded
    pub kind: ViolationKind,
    /// Node responsible
    pub location: NodePath,
    /// Channel the node plays on (`None` for pattern-wide limits)
    pub channel: Option<ChannelId>,
    /// Value computed from the pattern
    pub observed: f64,
    /// Configured limit
    pub limit: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} exceeded at {}: observed {} > limit {}",
            self.kind, self.location, self.observed, self.limit
        )?;
        if let Some(ch) = self.channel {
            write!(f, " on channel {}", ch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_channel() {
        let v = Violation {
            kind: ViolationKind::DutyCycleExceeded,
            location: NodePath::root().repeat_body(),
            channel: Some(2),
            observed: 0.25,
            limit: 0.1,
        };
        assert_eq!(
            v.to_string(),
            "duty cycle exceeded at root/repeat: observed 0.25 > limit 0.1 on channel 2"
        );
    }

    #[test]
    fn test_display_pattern_wide() {
        let v = Violation {
            kind: ViolationKind::ChannelCountExceeded,
            location: NodePath::root(),
            channel: None,
            observed: 9.0,
            limit: 8.0,
        };
        assert_eq!(
            v.to_string(),
            "channel count exceeded at root: observed 9 > limit 8"
        );
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ViolationKind::ChargeExceeded).unwrap();
        assert_eq!(json, r#""charge_exceeded""#);
    }
}
