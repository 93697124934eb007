//! Bounded Levenberg–Marquardt with a soft-L1 loss.
//!
//! Each iteration:
//!   1. Forward-difference Jacobian at x
//!   2. Reweight residuals by ρ'(f²) = 1/sqrt(1 + f²) (soft-L1)
//!   3. Solve the damped normal equations over the variables not pinned at
//!      a bound
//!   4. Clip the step into the box; accept if the cost decreases
//!
//! The cost is `Σ (sqrt(1 + f²) − 1)`. Damping shrinks by 3 on an accepted
//! step and grows by 4 on a rejected one.

use super::{all_finite, norm, Flow, OptimStep, Outcome, Problem, Status, StopReason};
use crate::solver::dense::solve_real;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

fn soft_l1_cost(f: &[f64]) -> f64 {
    if !all_finite(f) {
        return f64::INFINITY;
    }
    f.iter().map(|r| (1.0 + r * r).sqrt() - 1.0).sum()
}

/// Forward differences, stepping backwards near the upper bound.
fn jacobian(problem: &Problem, x: &[f64], f: &[f64]) -> Vec<Vec<f64>> {
    let (upper, diff_step) = (problem.upper(), problem.config().diff_step);
    let mut jac = vec![vec![0.0; x.len()]; f.len()];
    for j in 0..x.len() {
        let mut h = diff_step * x[j].abs().max(1.0);
        if x[j] + h > upper[j] {
            h = -h;
        }
        let mut xh = x.to_vec();
        xh[j] += h;
        let fh = problem.residuals(&xh);
        for (row, (a, b)) in jac.iter_mut().zip(fh.iter().zip(f)) {
            let d = (a - b) / h;
            row[j] = if d.is_finite() { d } else { 0.0 };
        }
    }
    jac
}

pub(crate) fn minimize(problem: &Problem, on_step: &mut dyn FnMut(&OptimStep) -> Flow) -> Outcome {
    let cfg = problem.config();
    let (lower, upper) = (problem.lower(), problem.upper());
    let n = problem.dim();

    let mut x = problem.x0().to_vec();
    let mut f = problem.residuals(&x);
    let mut cost = soft_l1_cost(&f);
    let mut nfev = 1;
    let mut iteration = 0;
    let mut lambda = LAMBDA_INIT;

    let status = 'outer: loop {
        if nfev >= cfg.max_nfev {
            break Status::MaxEvaluations;
        }
        let _span = tracing::debug_span!("lm_iter", iteration).entered();

        let jac = jacobian(problem, &x, &f);
        let w: Vec<f64> = f.iter().map(|r| 1.0 / (1.0 + r * r).sqrt()).collect();

        // gradient Jᵀ·W·f and Gauss–Newton matrix Jᵀ·W·J
        let mut g = vec![0.0; n];
        let mut h = vec![vec![0.0; n]; n];
        for ((row, wi), fi) in jac.iter().zip(&w).zip(&f) {
            for j in 0..n {
                g[j] += row[j] * wi * fi;
                for k in 0..n {
                    h[j][k] += row[j] * wi * row[k];
                }
            }
        }

        // variables pinned at a bound with the descent direction outwards
        let free: Vec<usize> = (0..n)
            .filter(|&j| !((x[j] <= lower[j] && g[j] > 0.0) || (x[j] >= upper[j] && g[j] < 0.0)))
            .collect();
        let projected = free.iter().fold(0.0f64, |m, &j| m.max(g[j].abs()));
        tracing::debug!(cost, projected, lambda, free = free.len(), "gradient");
        if projected < cfg.gtol {
            break Status::Converged(StopReason::Gtol);
        }

        loop {
            let a: Vec<Vec<f64>> = free
                .iter()
                .map(|&j| {
                    free.iter()
                        .map(|&k| {
                            if j == k {
                                h[j][j] + lambda * h[j][j].max(LAMBDA_MIN)
                            } else {
                                h[j][k]
                            }
                        })
                        .collect()
                })
                .collect();
            let b: Vec<f64> = free.iter().map(|&j| -g[j]).collect();

            let accepted = match solve_real(&a, &b) {
                Some(delta) => {
                    let mut x_new = x.clone();
                    for (&j, d) in free.iter().zip(&delta) {
                        x_new[j] = (x[j] + d).clamp(lower[j], upper[j]);
                    }
                    let f_new = problem.residuals(&x_new);
                    nfev += 1;
                    let cost_new = soft_l1_cost(&f_new);
                    if cost_new < cost {
                        let step: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
                        let reduction = cost - cost_new;
                        let cost_old = cost;
                        x = x_new;
                        f = f_new;
                        cost = cost_new;
                        Some((reduction, cost_old, norm(&step)))
                    } else {
                        None
                    }
                }
                None => None,
            };

            match accepted {
                Some((reduction, cost_old, step_norm)) => {
                    lambda = (lambda / 3.0).max(LAMBDA_MIN);
                    iteration += 1;
                    if on_step(&problem.step(iteration, &x, &f)) == Flow::Stop {
                        break 'outer Status::Cancelled;
                    }
                    if reduction < cfg.ftol * cost_old {
                        break 'outer Status::Converged(StopReason::Ftol);
                    }
                    if step_norm < cfg.xtol * (cfg.xtol + norm(&x)) {
                        break 'outer Status::Converged(StopReason::Xtol);
                    }
                    break;
                }
                None => {
                    lambda *= 4.0;
                    if lambda > LAMBDA_MAX {
                        break 'outer Status::Converged(StopReason::NoProgress);
                    }
                    if nfev >= cfg.max_nfev {
                        break 'outer Status::MaxEvaluations;
                    }
                }
            }
        }
    };

    Outcome {
        x,
        iterations: iteration,
        nfev,
        status,
    }
}
