//! AC frequency response of a transfer function.
//!
//! For each frequency point:
//!   1. Set s = jω where ω = 2πf
//!   2. Evaluate the compiled expression
//!   3. Convert to magnitude and phase
//!
//! Points are independent and evaluated in parallel; phase unwrapping runs
//! over the whole sweep afterwards.
//!
//! Frequency grids:
//!   - DEC: logarithmic, n_points per decade
//!   - OCT: logarithmic, n_points per octave
//!   - LIN: linear, n_points total

use std::f64::consts::PI;

use num_complex::Complex64;
use rayon::prelude::*;
use serde_derive::Deserialize;

use super::{MagnitudeMode, Response};
use crate::error::EvalError;
use crate::expr::eval::CompiledExpr;
use crate::expr::Expr;

/// Grid spacing of a frequency sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepType {
    Dec,
    Oct,
    Lin,
}

/// Evaluate `expr`, a function of `s` only, at each frequency.
pub fn evaluate(expr: &Expr, frequencies: &[f64], mode: MagnitudeMode) -> Result<Response, EvalError> {
    check_frequencies(frequencies)?;
    if mode == MagnitudeMode::Decibel && expr.is_zero() {
        return Err(EvalError::ZeroResponse);
    }
    let compiled = CompiledExpr::new(expr, &[])?;
    let _span = tracing::info_span!("ac_response", n_points = frequencies.len()).entered();

    let h = sample(&compiled, &[], frequencies);
    Ok(response_from_samples(frequencies, &h, mode))
}

/// Every frequency must be finite and strictly positive.
pub fn check_frequencies(frequencies: &[f64]) -> Result<(), EvalError> {
    match frequencies.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
        Some(&f) => Err(EvalError::InvalidFrequency(f)),
        None => Ok(()),
    }
}

/// Complex samples of a compiled transfer function at `s = j·2π·f`.
pub fn sample(compiled: &CompiledExpr, params: &[f64], frequencies: &[f64]) -> Vec<Complex64> {
    frequencies
        .par_iter()
        .map(|&f| compiled.eval(Complex64::new(0.0, 2.0 * PI * f), params))
        .collect()
}

/// Magnitude and unwrapped phase of complex samples.
pub fn response_from_samples(frequencies: &[f64], h: &[Complex64], mode: MagnitudeMode) -> Response {
    let magnitude = h
        .iter()
        .map(|v| match mode {
            MagnitudeMode::Decibel => 20.0 * v.norm().log10(),
            MagnitudeMode::Linear => v.norm(),
        })
        .collect();
    let phase: Vec<f64> = h.iter().map(|v| v.arg()).collect();
    let phase_deg = unwrap_phase(&phase).into_iter().map(f64::to_degrees).collect();
    Response {
        frequencies: frequencies.to_vec(),
        magnitude,
        phase_deg,
        mode,
    }
}

/// Remove 2π jumps between consecutive phase samples (radians).
pub fn unwrap_phase(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let mut correction = 0.0;
    for (i, &p) in phase.iter().enumerate() {
        if i > 0 {
            let d = p - phase[i - 1];
            let mut dd = (d + PI).rem_euclid(2.0 * PI) - PI;
            if dd == -PI && d > 0.0 {
                dd = PI;
            }
            if d.abs() >= PI {
                correction += dd - d;
            }
        }
        out.push(p + correction);
    }
    out
}

/// `n` logarithmically spaced points from `fmin` to `fmax`, both included.
pub fn log_frequencies(fmin: f64, fmax: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![fmin],
        _ => {
            let (a, b) = (fmin.log10(), fmax.log10());
            let step = (b - a) / (n - 1) as f64;
            (0..n).map(|i| 10f64.powf(a + step * i as f64)).collect()
        }
    }
}

/// Generate frequency points for the given sweep type. Logarithmic sweeps
/// include `f_stop` when it falls on the grid.
pub fn sweep_frequencies(sweep_type: SweepType, n_points: usize, f_start: f64, f_stop: f64) -> Vec<f64> {
    if n_points == 0 || f_stop < f_start {
        return Vec::new();
    }
    match sweep_type {
        SweepType::Dec => geometric(10.0, n_points, f_start, f_stop),
        SweepType::Oct => geometric(2.0, n_points, f_start, f_stop),
        SweepType::Lin => {
            if n_points <= 1 {
                return vec![f_start];
            }
            let step = (f_stop - f_start) / (n_points - 1) as f64;
            (0..n_points).map(|i| f_start + step * i as f64).collect()
        }
    }
}

fn geometric(base: f64, per_interval: usize, f_start: f64, f_stop: f64) -> Vec<f64> {
    let intervals = (f_stop / f_start).ln() / base.ln();
    let total = (per_interval as f64 * intervals + 1e-9).floor() as usize + 1;
    (0..total)
        .map(|i| f_start * base.powf(i as f64 / per_interval as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rc() -> Expr {
        // 1/(1 + s*R*C), R = 5M, C = 10p
        (Expr::one() + Expr::s() * Expr::num(5e6) * Expr::num(10e-12)).recip()
    }

    #[test]
    fn test_rc_corner() {
        let r = evaluate(&rc(), &[3183.1], MagnitudeMode::Decibel).unwrap();
        assert!((r.magnitude[0] + 3.0103).abs() < 0.1);
        assert!((r.phase_deg[0] + 45.0).abs() < 0.1);
    }

    #[test]
    fn test_linear_mode() {
        let r = evaluate(&rc(), &[1e-3, 3183.1], MagnitudeMode::Linear).unwrap();
        assert_relative_eq!(r.magnitude[0], 1.0, max_relative = 1e-9);
        assert_relative_eq!(r.magnitude[1], 0.5f64.sqrt(), max_relative = 1e-3);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            evaluate(&rc(), &[10.0, 0.0], MagnitudeMode::Decibel).unwrap_err(),
            EvalError::InvalidFrequency(0.0)
        );
        assert_eq!(
            evaluate(&Expr::zero(), &[10.0], MagnitudeMode::Decibel).unwrap_err(),
            EvalError::ZeroResponse
        );
        assert!(evaluate(&Expr::zero(), &[10.0], MagnitudeMode::Linear).is_ok());
        assert!(matches!(
            evaluate(&Expr::sym("R1"), &[10.0], MagnitudeMode::Decibel),
            Err(EvalError::IncompleteSubstitution { .. })
        ));
    }

    #[test]
    fn test_unwrap_phase() {
        let wrapped = [3.0, -3.0, 3.1, -3.1];
        let unwrapped = unwrap_phase(&wrapped);
        for pair in unwrapped.windows(2) {
            assert!((pair[1] - pair[0]).abs() < PI);
        }
        assert_relative_eq!(unwrapped[1], -3.0 + 2.0 * PI, max_relative = 1e-12);
    }

    #[test]
    fn test_third_order_phase_continuous() {
        // three coincident poles pass through -180 degrees
        let pole = (Expr::one() + Expr::s() * Expr::num(1e-3)).recip();
        let expr = pole.clone() * pole.clone() * pole;
        let f = log_frequencies(1.0, 1e5, 200);
        let r = evaluate(&expr, &f, MagnitudeMode::Decibel).unwrap();
        assert_eq!(r.frequencies, f);
        for pair in r.phase_deg.windows(2) {
            assert!((pair[1] - pair[0]).abs() < 10.0);
        }
        assert!(*r.phase_deg.last().unwrap() < -260.0);
    }

    #[test]
    fn test_log_frequencies() {
        let f = log_frequencies(1.0, 1e9, 10);
        assert_eq!(f.len(), 10);
        assert_relative_eq!(f[0], 1.0, max_relative = 1e-12);
        assert_relative_eq!(f[9], 1e9, max_relative = 1e-12);
        assert_relative_eq!(f[1], 10.0, max_relative = 1e-12);
    }

    #[test]
    fn test_sweep_frequencies() {
        let dec = sweep_frequencies(SweepType::Dec, 10, 1.0, 1000.0);
        assert_eq!(dec.len(), 31);
        assert_relative_eq!(dec[30], 1000.0, max_relative = 1e-9);
        let oct = sweep_frequencies(SweepType::Oct, 1, 100.0, 800.0);
        assert_eq!(oct.len(), 4);
        let lin = sweep_frequencies(SweepType::Lin, 5, 0.0, 100.0);
        assert_eq!(lin, vec![0.0, 25.0, 50.0, 75.0, 100.0]);
    }
}
