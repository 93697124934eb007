//! Target transfer functions built from a gain and pole/zero factors.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde_derive::Deserialize;

use super::ac::{check_frequencies, response_from_samples};
use super::{MagnitudeMode, Response};
use crate::error::EvalError;

/// One factor of a target transfer function. Frequencies are in Hz; a zero
/// frequency gives a pure integrator or differentiator. Factors with a NaN
/// frequency or quality factor are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Factor {
    /// `1/(1 + s/ω0)`
    RealPole { f0: f64 },
    /// `1 + s/ω0`
    RealZero { f0: f64 },
    /// `1/(1 + s/(ω0·Q) + s²/ω0²)`
    PolePair { f0: f64, q: f64 },
    /// `1 + s/(ω0·Q) + s²/ω0²`
    ZeroPair { f0: f64, q: f64 },
}

impl Factor {
    fn eval(&self, s: Complex64) -> Option<Complex64> {
        let (f0, q, pole) = match *self {
            Factor::RealPole { f0 } => (f0, None, true),
            Factor::RealZero { f0 } => (f0, None, false),
            Factor::PolePair { f0, q } => (f0, Some(q), true),
            Factor::ZeroPair { f0, q } => (f0, Some(q), false),
        };
        if f0.is_nan() {
            return None;
        }
        let w0 = 2.0 * PI * f0;
        let value = match q {
            None if w0 == 0.0 => s,
            None => 1.0 + s / w0,
            Some(_) if w0 == 0.0 => s * s,
            Some(q) if q.is_nan() => return None,
            Some(q) => 1.0 + s / (w0 * q) + s * s / (w0 * w0),
        };
        Some(if pole { value.inv() } else { value })
    }
}

/// `gain·e^{j·phase}·Π factors`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransferTemplate {
    /// Linear gain magnitude.
    pub gain: f64,
    /// Gain phase in degrees.
    pub phase_deg: f64,
    pub factors: Vec<Factor>,
}

impl Default for TransferTemplate {
    fn default() -> Self {
        Self {
            gain: 1.0,
            phase_deg: 0.0,
            factors: Vec::new(),
        }
    }
}

impl TransferTemplate {
    pub fn new(gain: f64, phase_deg: f64) -> Self {
        Self {
            gain,
            phase_deg,
            factors: Vec::new(),
        }
    }

    pub fn with(mut self, factor: Factor) -> Self {
        self.factors.push(factor);
        self
    }

    fn gain_phasor(&self) -> Complex64 {
        if self.phase_deg == 0.0 {
            Complex64::new(self.gain, 0.0)
        } else if self.phase_deg.abs() == 180.0 {
            Complex64::new(-self.gain, 0.0)
        } else {
            Complex64::from_polar(self.gain, self.phase_deg.to_radians())
        }
    }

    /// Value at frequency `f` (Hz).
    pub fn at(&self, f: f64) -> Complex64 {
        let s = Complex64::new(0.0, 2.0 * PI * f);
        self.factors
            .iter()
            .filter_map(|factor| factor.eval(s))
            .fold(self.gain_phasor(), |acc, v| acc * v)
    }

    pub fn evaluate(&self, frequencies: &[f64], mode: MagnitudeMode) -> Result<Response, EvalError> {
        check_frequencies(frequencies)?;
        if mode == MagnitudeMode::Decibel && self.gain == 0.0 {
            return Err(EvalError::ZeroResponse);
        }
        let h: Vec<Complex64> = frequencies.iter().map(|&f| self.at(f)).collect();
        Ok(response_from_samples(frequencies, &h, mode))
    }
}
