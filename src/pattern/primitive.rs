// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pulse primitives: the leaves of a pattern tree.

use serde::{Deserialize, Serialize};

use super::NS_PER_S;

/// Direction of a pulse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Emit `amplitude`
    #[default]
    Positive,
    /// Emit `-amplitude`
    Negative,
    /// Emit `amplitude` then `-amplitude`, each for `width`
    Biphasic,
}

impl Polarity {
    /// Number of phases a pulse of this polarity emits.
    pub fn phase_count(self) -> u64 {
        match self {
            Polarity::Positive | Polarity::Negative => 1,
            Polarity::Biphasic => 2,
        }
    }
}

/// A single electrical excursion.
///
/// `width_ns` is the width of one phase. A biphasic pulse therefore lasts
/// `2 * width_ns` and both phases carry exactly the same charge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulsePrimitive {
    /// Signed output level in device units (volts)
    pub amplitude: f64,
    /// Phase width in nanoseconds
    pub width_ns: u64,
    /// Pulse polarity
    #[serde(default)]
    pub polarity: Polarity,
}

impl PulsePrimitive {
    pub fn new(amplitude: f64, width_ns: u64, polarity: Polarity) -> Self {
        Self {
            amplitude,
            width_ns,
            polarity,
        }
    }

    /// Monophasic pulse at `amplitude`.
    pub fn monophasic(amplitude: f64, width_ns: u64) -> Self {
        Self::new(amplitude, width_ns, Polarity::Positive)
    }

    /// Charge-balanced pulse: `amplitude` then `-amplitude`.
    pub fn biphasic(amplitude: f64, width_ns: u64) -> Self {
        Self::new(amplitude, width_ns, Polarity::Biphasic)
    }

    /// Total elapsed time, or `None` on overflow.
    pub fn duration_ns(&self) -> Option<u64> {
        self.width_ns.checked_mul(self.polarity.phase_count())
    }

    /// Output value of each phase, in emission order.
    pub fn phases(&self) -> impl Iterator<Item = f64> {
        let (first, second) = match self.polarity {
            Polarity::Positive => (self.amplitude, None),
            Polarity::Negative => (-self.amplitude, None),
            Polarity::Biphasic => (self.amplitude, Some(-self.amplitude)),
        };
        std::iter::once(first).chain(second)
    }

    /// Charge of one phase: |amplitude| x width, in amplitude-seconds.
    pub fn charge_per_phase(&self) -> f64 {
        self.amplitude.abs() * (self.width_ns as f64 / NS_PER_S as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::NS_PER_MS;

    #[test]
    fn test_monophasic_duration() {
        let p = PulsePrimitive::monophasic(2.0, 200 * NS_PER_MS);
        assert_eq!(p.duration_ns(), Some(200 * NS_PER_MS));
        assert_eq!(p.phases().collect::<Vec<_>>(), vec![2.0]);
    }

    #[test]
    fn test_negative_flips_sign() {
        let p = PulsePrimitive::new(1.5, 10, Polarity::Negative);
        assert_eq!(p.phases().collect::<Vec<_>>(), vec![-1.5]);
    }

    #[test]
    fn test_biphasic_two_equal_charge_phases() {
        let p = PulsePrimitive::biphasic(-3.0, 100);
        assert_eq!(p.duration_ns(), Some(200));
        let phases: Vec<f64> = p.phases().collect();
        assert_eq!(phases, vec![-3.0, 3.0]);
        assert_eq!(phases[0].abs(), phases[1].abs());
    }

    #[test]
    fn test_biphasic_duration_overflow() {
        let p = PulsePrimitive::biphasic(1.0, u64::MAX);
        assert_eq!(p.duration_ns(), None);
    }

    #[test]
    fn test_charge_per_phase() {
        // 2 V for 200 ms = 0.4 V*s
        let p = PulsePrimitive::monophasic(-2.0, 200 * NS_PER_MS);
        assert!((p.charge_per_phase() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_polarity_defaults_to_positive_when_omitted() {
        let p: PulsePrimitive = serde_json::from_str(r#"{"amplitude":1.0,"width_ns":5}"#).unwrap();
        assert_eq!(p.polarity, Polarity::Positive);
    }
}
