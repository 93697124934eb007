//! Run settings, loadable from TOML.
//!
//! ```toml
//! freq_min = 10.0
//! freq_max = 1e6
//! npoints = 80
//! sweep = "dec"
//! input = "Vin"
//! output = "V(out)"
//!
//! [policy]
//! pre_substitute = true
//!
//! [bounds.r]
//! min = 1.0
//! max = 1e7
//!
//! [optimizer]
//! method = "trf"
//! optimize_phase = true
//!
//! [target]
//! gain = 1.0
//! [[target.factors]]
//! kind = "real_pole"
//! f0 = 1000.0
//! ```

use std::path::Path;

use serde_derive::Deserialize;

use crate::analysis::ac::{log_frequencies, sweep_frequencies, SweepType};
use crate::analysis::target::TransferTemplate;
use crate::error::{OhmfitError, Result};
use crate::ir::BoundsTable;
use crate::optim::OptimizeConfig;
use crate::solver::SubstitutionPolicy;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub freq_min: f64,
    pub freq_max: f64,
    /// Total points, or points per interval when `sweep` is set.
    pub npoints: usize,
    /// Grid spacing; `None` spreads `npoints` logarithmically over the range.
    pub sweep: Option<SweepType>,
    /// Driving source.
    pub input: String,
    /// Output selector, e.g. `V(out)`.
    pub output: String,
    pub policy: SubstitutionPolicy,
    /// Default search range per element kind.
    pub bounds: BoundsTable,
    pub optimizer: OptimizeConfig,
    pub target: TransferTemplate,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            freq_min: 1.0,
            freq_max: 1e9,
            npoints: 60,
            sweep: None,
            input: String::new(),
            output: String::new(),
            policy: SubstitutionPolicy::default(),
            bounds: BoundsTable::default(),
            optimizer: OptimizeConfig::default(),
            target: TransferTemplate::new(1e3, 0.0),
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).map_err(|e| OhmfitError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.freq_min > 0.0 && self.freq_max > self.freq_min) {
            return Err(OhmfitError::Config(format!(
                "frequency range must satisfy 0 < freq_min < freq_max, got {}..{}",
                self.freq_min, self.freq_max
            )));
        }
        if self.npoints < 2 {
            return Err(OhmfitError::Config(format!(
                "npoints must be at least 2, got {}",
                self.npoints
            )));
        }
        Ok(())
    }

    pub fn frequencies(&self) -> Vec<f64> {
        match self.sweep {
            None => log_frequencies(self.freq_min, self.freq_max, self.npoints),
            Some(sweep) => sweep_frequencies(sweep, self.npoints, self.freq_min, self.freq_max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::target::Factor;
    use crate::ir::Range;
    use crate::optim::Method;

    #[test]
    fn test_defaults() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.frequencies().len(), 60);
        assert!(s.optimizer.log_space);
        assert!(s.policy.pre_substitute);
        assert_eq!(s.target.gain, 1e3);
    }

    #[test]
    fn test_overrides() {
        let s = Settings::from_toml_str(
            r#"
            freq_min = 10.0
            freq_max = 1e6
            input = "Vin"
            output = "V(out)"

            [policy]
            pre_substitute = false

            [bounds.r]
            min = 1.0
            max = 1e7

            [optimizer]
            method = "de"
            weight_phase = 0.5

            [target]
            gain = 2.0
            [[target.factors]]
            kind = "real_pole"
            f0 = 1000.0
            "#,
        )
        .unwrap();
        assert_eq!(s.input, "Vin");
        assert!(!s.policy.pre_substitute);
        assert_eq!(s.bounds.r, Range::new(1.0, 1e7));
        assert_eq!(s.bounds.c, BoundsTable::default().c);
        assert_eq!(s.optimizer.method, Method::DifferentialEvolution);
        assert_eq!(s.optimizer.weight_phase, 0.5);
        assert_eq!(s.optimizer.weight_mag, 0.01);
        assert_eq!(s.target.factors, vec![Factor::RealPole { f0: 1000.0 }]);
    }

    #[test]
    fn test_sweep_grid() {
        let s = Settings::from_toml_str("freq_min = 1.0\nfreq_max = 1e3\nnpoints = 10\nsweep = \"dec\"").unwrap();
        assert_eq!(s.sweep, Some(SweepType::Dec));
        assert_eq!(s.frequencies().len(), 31);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            Settings::from_toml_str("freq_min = -1.0"),
            Err(OhmfitError::Config(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("[optimizer]\nmethod = \"dogbox\""),
            Err(OhmfitError::Config(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("npoints = \"many\""),
            Err(OhmfitError::Config(_))
        ));
    }
}
