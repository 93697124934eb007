//! Fitting of free component values to a target frequency response.
//!
//! The search runs over a parameter vector holding the free component values
//! (natural logarithms of them when `log_space` is set), followed by an
//! optional make-up gain. The residual vector is laid out as
//!
//! ```text
//! | magnitude [n_freq] | phase [n_freq] | regularization [n_params] | gain [1] |
//! ```
//!
//! with every block optional.

pub mod evolution;
pub mod least_squares;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_derive::Deserialize;

use crate::analysis::ac::{check_frequencies, sample, unwrap_phase};
use crate::analysis::target::TransferTemplate;
use crate::analysis::{MagnitudeMode, Response};
use crate::error::{EvalError, OptimizeError};
use crate::expr::eval::CompiledExpr;
use crate::expr::rational::simplify;
use crate::expr::Expr;
use crate::ir::FreeParam;
use crate::numeng::num2eng_digits;

/// Search algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Method {
    /// Bounded Levenberg–Marquardt on a soft-L1 loss.
    #[default]
    LeastSquares,
    /// Bounded global search minimizing the sum of squared residuals.
    DifferentialEvolution,
}

impl FromStr for Method {
    type Err = OptimizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trf" | "lm" | "least_squares" => Ok(Method::LeastSquares),
            "de" | "differential_evolution" => Ok(Method::DifferentialEvolution),
            _ => Err(OptimizeError::UnknownMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = OptimizeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::LeastSquares => write!(f, "least_squares"),
            Method::DifferentialEvolution => write!(f, "differential_evolution"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OptimizeConfig {
    pub method: Method,
    /// Search over `ln(value)` instead of the value.
    pub log_space: bool,
    /// Add a make-up gain parameter, initially 1.
    pub makeup_gain: bool,
    pub makeup_gain_min: f64,
    pub makeup_gain_max: f64,
    pub optimize_mag: bool,
    pub optimize_phase: bool,
    /// Penalize distance from the initial values.
    pub optimize_reg: bool,
    pub weight_mag: f64,
    pub weight_phase: f64,
    pub weight_reg: f64,
    pub weight_amp: f64,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Relative step of the finite-difference Jacobian.
    pub diff_step: f64,
    /// Residual evaluations allowed to the least-squares search, not counting
    /// Jacobian evaluations.
    pub max_nfev: usize,
    pub max_generations: usize,
    pub seed: u64,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            method: Method::LeastSquares,
            log_space: true,
            makeup_gain: true,
            makeup_gain_min: 0.01,
            makeup_gain_max: 100.0,
            optimize_mag: true,
            optimize_phase: false,
            optimize_reg: true,
            weight_mag: 0.01,
            weight_phase: 0.01,
            weight_reg: 0.01,
            weight_amp: 0.01,
            ftol: 1e-19,
            xtol: 1e-19,
            gtol: 1e-8,
            diff_step: 1e-3,
            max_nfev: 1000,
            max_generations: 1000,
            seed: 0x5eed_0f_0a17,
        }
    }
}

/// Response to fit, sampled at `frequencies`.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub frequencies: Vec<f64>,
    pub magnitude_db: Vec<f64>,
    pub phase_deg: Vec<f64>,
}

impl Target {
    pub fn from_response(response: &Response) -> Self {
        Self {
            frequencies: response.frequencies.clone(),
            magnitude_db: response.magnitude_db(),
            phase_deg: response.phase_deg.clone(),
        }
    }

    pub fn from_template(template: &TransferTemplate, frequencies: &[f64]) -> Result<Self, EvalError> {
        Ok(Self::from_response(
            &template.evaluate(frequencies, MagnitudeMode::Decibel)?,
        ))
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Answer of a step observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Progress report passed to the step observer once per iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimStep {
    pub iteration: usize,
    pub residual_norm: f64,
    pub values: BTreeMap<String, f64>,
    pub makeup_gain: f64,
}

impl OptimStep {
    /// `R1=1.2k, C1=10n` style summary of the values.
    pub fn describe_values(&self) -> String {
        describe(&self.values)
    }
}

fn describe(values: &BTreeMap<String, f64>) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{k}={}", num2eng_digits(*v, 3)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cooperative cancellation flag shared between threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Step observer that stops the search once the token is cancelled,
    /// clearing the flag.
    pub fn observer(&self) -> impl FnMut(&OptimStep) -> Flow + Send + 'static {
        let flag = Arc::clone(&self.0);
        move |_| {
            if flag.swap(false, Ordering::SeqCst) {
                Flow::Stop
            } else {
                Flow::Continue
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Relative cost reduction below `ftol`.
    Ftol,
    /// Relative step below `xtol`.
    Xtol,
    /// Projected gradient below `gtol`.
    Gtol,
    /// Damping grew without finding a better point.
    NoProgress,
    /// Population energies within 1% of their mean.
    PopulationSpread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Converged(StopReason),
    MaxEvaluations,
    Cancelled,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Converged(_))
    }

    pub fn message(&self) -> &'static str {
        match self {
            Status::Converged(StopReason::Ftol) => "`ftol` termination condition is satisfied",
            Status::Converged(StopReason::Xtol) => "`xtol` termination condition is satisfied",
            Status::Converged(StopReason::Gtol) => "`gtol` termination condition is satisfied",
            Status::Converged(StopReason::NoProgress) => "no further reduction of the cost is possible",
            Status::Converged(StopReason::PopulationSpread) => "population converged",
            Status::MaxEvaluations => "maximum number of evaluations exceeded",
            Status::Cancelled => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizedResult {
    /// Optimized component values.
    pub values: BTreeMap<String, f64>,
    pub makeup_gain: f64,
    /// Transfer function at the optimized values.
    pub expr: Expr,
    pub iterations: usize,
    pub nfev: usize,
    /// `sqrt(Σ r²)` over the final residual vector.
    pub residual_norm: f64,
    pub status: Status,
}

/// What a search algorithm hands back.
pub(crate) struct Outcome {
    pub x: Vec<f64>,
    pub iterations: usize,
    pub nfev: usize,
    pub status: Status,
}

/// Residual function over the (transformed) parameter vector.
pub(crate) struct Problem<'a> {
    compiled: CompiledExpr,
    target: &'a Target,
    config: &'a OptimizeConfig,
    names: Vec<String>,
    x0: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl<'a> Problem<'a> {
    fn new(
        expr: &Expr,
        params: &[FreeParam],
        target: &'a Target,
        config: &'a OptimizeConfig,
    ) -> Result<Self, OptimizeError> {
        if params.is_empty() {
            return Err(OptimizeError::NoParameters);
        }
        if !config.optimize_mag && !config.optimize_phase {
            return Err(OptimizeError::NoObjective);
        }
        for len in [target.magnitude_db.len(), target.phase_deg.len()] {
            if len != target.frequencies.len() {
                return Err(OptimizeError::TargetMismatch {
                    target: len,
                    expected: target.frequencies.len(),
                });
            }
        }
        check_frequencies(&target.frequencies)?;

        let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
        let compiled = CompiledExpr::new(expr, &names)?;

        let mut specs: Vec<(String, f64, f64, f64)> = params
            .iter()
            .map(|p| (p.name.clone(), p.initial, p.min, p.max))
            .collect();
        if config.makeup_gain {
            specs.push((
                "makeup_gain".to_string(),
                1.0,
                config.makeup_gain_min,
                config.makeup_gain_max,
            ));
        }

        let (mut x0, mut lower, mut upper) = (Vec::new(), Vec::new(), Vec::new());
        for (name, initial, min, max) in specs {
            let invalid = || OptimizeError::InvalidBounds {
                name: name.clone(),
                initial,
                min,
                max,
            };
            if !(min <= initial && initial <= max && min < max) {
                return Err(invalid());
            }
            let (x, lo, hi) = if config.log_space {
                if initial <= 0.0 || min < 0.0 {
                    return Err(invalid());
                }
                (initial.ln(), min.ln(), max.ln())
            } else {
                (initial, min, max)
            };
            if config.method == Method::DifferentialEvolution && !(lo.is_finite() && hi.is_finite()) {
                return Err(invalid());
            }
            x0.push(x);
            lower.push(lo);
            upper.push(hi);
        }

        Ok(Self {
            compiled,
            target,
            config,
            names,
            x0,
            lower,
            upper,
        })
    }

    pub fn dim(&self) -> usize {
        self.x0.len()
    }

    pub fn x0(&self) -> &[f64] {
        &self.x0
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn config(&self) -> &OptimizeConfig {
        self.config
    }

    fn untransform(&self, v: f64) -> f64 {
        if self.config.log_space {
            v.exp()
        } else {
            v
        }
    }

    /// Component values in parameter order.
    fn circuit_values(&self, x: &[f64]) -> Vec<f64> {
        x[..self.names.len()]
            .iter()
            .map(|&v| self.untransform(v))
            .collect()
    }

    fn makeup_gain(&self, x: &[f64]) -> f64 {
        if self.config.makeup_gain {
            self.untransform(x[self.names.len()])
        } else {
            1.0
        }
    }

    fn values_map(&self, x: &[f64]) -> BTreeMap<String, f64> {
        self.names
            .iter()
            .cloned()
            .zip(self.circuit_values(x))
            .collect()
    }

    /// Residual vector at `x`. Entries may be non-finite.
    pub fn residuals(&self, x: &[f64]) -> Vec<f64> {
        let cfg = self.config;
        let n_freq = self.target.len() as f64;
        let values = self.circuit_values(x);
        let gain_db = 20.0 * self.makeup_gain(x).log10();
        let h = sample(&self.compiled, &values, &self.target.frequencies);

        let mut r = Vec::with_capacity(2 * h.len() + x.len());
        if cfg.optimize_mag {
            r.extend(
                h.iter()
                    .zip(&self.target.magnitude_db)
                    .map(|(v, t)| cfg.weight_mag * (20.0 * v.norm().log10() - t + gain_db)),
            );
        }
        if cfg.optimize_phase {
            let phase: Vec<f64> = h.iter().map(|v| v.arg()).collect();
            r.extend(
                unwrap_phase(&phase)
                    .into_iter()
                    .zip(&self.target.phase_deg)
                    .map(|(p, t)| cfg.weight_phase * (p.to_degrees() - t)),
            );
        }
        if cfg.optimize_reg {
            let n = self.names.len();
            let scale = (n_freq / n as f64).sqrt();
            r.extend(
                x[..n]
                    .iter()
                    .zip(&self.x0[..n])
                    .map(|(xi, x0)| cfg.weight_reg * (xi - x0) * scale),
            );
        }
        if cfg.makeup_gain {
            r.push(cfg.weight_amp * gain_db * n_freq.sqrt());
        }
        r
    }

    pub fn step(&self, iteration: usize, x: &[f64], residuals: &[f64]) -> OptimStep {
        OptimStep {
            iteration,
            residual_norm: norm(residuals),
            values: self.values_map(x),
            makeup_gain: self.makeup_gain(x),
        }
    }
}

pub(crate) fn norm(v: &[f64]) -> f64 {
    v.iter().map(|r| r * r).sum::<f64>().sqrt()
}

pub(crate) fn all_finite(v: &[f64]) -> bool {
    v.iter().all(|r| r.is_finite())
}

/// Fit the free symbols of `expr` (listed in `params`) to `target`.
///
/// `on_step` is called once per iteration (per generation for differential
/// evolution); returning [`Flow::Stop`] ends the search at the best point
/// found so far.
pub fn optimize<F>(
    expr: &Expr,
    params: &[FreeParam],
    target: &Target,
    config: &OptimizeConfig,
    mut on_step: F,
) -> Result<OptimizedResult, OptimizeError>
where
    F: FnMut(&OptimStep) -> Flow,
{
    let _span = tracing::info_span!("optimize", method = %config.method, n_params = params.len())
        .entered();
    let problem = Problem::new(expr, params, target, config)?;

    let r0 = problem.residuals(problem.x0());
    if !all_finite(&r0) {
        return Err(OptimizeError::NonFiniteResidual(format!(
            "initial values {}",
            describe(&problem.values_map(problem.x0()))
        )));
    }
    tracing::info!(
        dim = problem.dim(),
        residuals = r0.len(),
        initial_norm = norm(&r0),
        "starting search"
    );

    let outcome = match config.method {
        Method::LeastSquares => least_squares::minimize(&problem, &mut on_step),
        Method::DifferentialEvolution => evolution::minimize(&problem, &mut on_step),
    };

    let values = problem.values_map(&outcome.x);
    let subs = values
        .iter()
        .map(|(k, v)| (k.clone(), Expr::num(*v)))
        .collect();
    let residual_norm = norm(&problem.residuals(&outcome.x));
    tracing::info!(
        status = outcome.status.message(),
        iterations = outcome.iterations,
        nfev = outcome.nfev,
        residual_norm,
        "search finished"
    );

    Ok(OptimizedResult {
        makeup_gain: problem.makeup_gain(&outcome.x),
        expr: simplify(&expr.subs(&subs)),
        values,
        iterations: outcome.iterations,
        nfev: outcome.nfev,
        residual_norm,
        status: outcome.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rc_expr() -> Expr {
        (Expr::one() + Expr::s() * Expr::sym("R1") * Expr::num(1e-9)).recip()
    }

    fn r1(initial: f64) -> Vec<FreeParam> {
        vec![FreeParam {
            name: "R1".into(),
            initial,
            min: 1.0,
            max: 1e9,
        }]
    }

    fn pole_target(f0: f64) -> Target {
        let t = TransferTemplate::default().with(crate::analysis::target::Factor::RealPole { f0 });
        Target::from_template(&t, &crate::analysis::ac::log_frequencies(10.0, 1e7, 60)).unwrap()
    }

    #[test]
    fn test_method_names() {
        assert_eq!("trf".parse::<Method>().unwrap(), Method::LeastSquares);
        assert_eq!("DE".parse::<Method>().unwrap(), Method::DifferentialEvolution);
        assert_eq!(
            "dogbox".parse::<Method>().unwrap_err(),
            OptimizeError::UnknownMethod("dogbox".into())
        );
    }

    #[test]
    fn test_residual_layout() {
        let target = pole_target(1e4);
        let config = OptimizeConfig {
            optimize_phase: true,
            ..Default::default()
        };
        let problem = Problem::new(&rc_expr(), &r1(1e3), &target, &config).unwrap();
        assert_eq!(problem.dim(), 2);
        let r = problem.residuals(problem.x0());
        assert_eq!(r.len(), 60 + 60 + 1 + 1);
        // regularization and gain residuals vanish at the start point
        assert_eq!(r[120], 0.0);
        assert_eq!(r[121], 0.0);
    }

    #[test]
    fn test_validation_errors() {
        let target = pole_target(1e4);
        let config = OptimizeConfig::default();
        let flow = |_: &OptimStep| Flow::Continue;
        assert_eq!(
            optimize(&rc_expr(), &[], &target, &config, flow).unwrap_err(),
            OptimizeError::NoParameters
        );
        let bad = vec![FreeParam {
            name: "R1".into(),
            initial: 5.0,
            min: 10.0,
            max: 100.0,
        }];
        assert!(matches!(
            optimize(&rc_expr(), &bad, &target, &config, flow),
            Err(OptimizeError::InvalidBounds { .. })
        ));
        let mut short = target.clone();
        short.phase_deg.pop();
        assert_eq!(
            optimize(&rc_expr(), &r1(1e3), &short, &config, flow).unwrap_err(),
            OptimizeError::TargetMismatch {
                target: 59,
                expected: 60
            }
        );
        let off = OptimizeConfig {
            optimize_mag: false,
            ..Default::default()
        };
        assert_eq!(
            optimize(&rc_expr(), &r1(1e3), &target, &off, flow).unwrap_err(),
            OptimizeError::NoObjective
        );
        let missing = rc_expr() * Expr::sym("C9");
        assert!(matches!(
            optimize(&missing, &r1(1e3), &target, &config, flow),
            Err(OptimizeError::Evaluation(EvalError::IncompleteSubstitution { .. }))
        ));
    }

    #[test]
    fn test_cancel_token_observer() {
        let token = CancelToken::new();
        let mut observer = token.observer();
        let step = OptimStep {
            iteration: 1,
            residual_norm: 0.0,
            values: BTreeMap::new(),
            makeup_gain: 1.0,
        };
        assert_eq!(observer(&step), Flow::Continue);
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(observer(&step), Flow::Stop);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_fit_pole_least_squares() {
        // 1/(2π·R·1n) = 10 kHz at R ≈ 15.9k
        let target = pole_target(1e4);
        let config = OptimizeConfig {
            optimize_reg: false,
            makeup_gain: false,
            ..Default::default()
        };
        let result = optimize(&rc_expr(), &r1(1e3), &target, &config, |_| Flow::Continue).unwrap();
        let expected = 1.0 / (2.0 * std::f64::consts::PI * 1e4 * 1e-9);
        assert!(result.status.is_success(), "{:?}", result.status);
        assert!((result.values["R1"] / expected - 1.0).abs() < 1e-3);
        assert!(result.residual_norm < 1e-6);
    }

    #[test]
    fn test_stop_returns_cancelled() {
        let target = pole_target(1e4);
        let config = OptimizeConfig::default();
        let result = optimize(&rc_expr(), &r1(1e3), &target, &config, |_| Flow::Stop).unwrap();
        assert_eq!(result.status, Status::Cancelled);
        assert_eq!(result.iterations, 1);
    }
}
