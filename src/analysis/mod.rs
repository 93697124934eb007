//! Frequency-domain evaluation of transfer functions.

pub mod ac;
pub mod target;

use serde_derive::Deserialize;

/// Scale of the magnitude samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MagnitudeMode {
    /// `20·log10(|H|)`.
    #[default]
    Decibel,
    /// `|H|`.
    Linear,
}

/// Frequency response samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Frequency points (Hz).
    pub frequencies: Vec<f64>,
    /// Magnitude per frequency, in dB or linear per `mode`.
    pub magnitude: Vec<f64>,
    /// Unwrapped phase per frequency, in degrees.
    pub phase_deg: Vec<f64>,
    pub mode: MagnitudeMode,
}

impl Response {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Magnitude in dB regardless of `mode`.
    pub fn magnitude_db(&self) -> Vec<f64> {
        match self.mode {
            MagnitudeMode::Decibel => self.magnitude.clone(),
            MagnitudeMode::Linear => self.magnitude.iter().map(|m| 20.0 * m.log10()).collect(),
        }
    }
}
