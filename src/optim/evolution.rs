//! Differential evolution (best/1/bin) over the parameter box.
//!
//! Population of 15 members per dimension, seeded with the initial point.
//! Mutation factor dithered per generation in [0.5, 1), crossover rate 0.7.
//! Stops when the spread of the population's energies falls below 1% of
//! their mean.

use rayon::prelude::*;

use super::{all_finite, Flow, OptimStep, Outcome, Problem, Status, StopReason};

const POPULATION_PER_DIM: usize = 15;
const CROSSOVER: f64 = 0.7;
const TOLERANCE: f64 = 0.01;

/// xorshift64* generator; reproducible from a seed.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        // zero is a fixed point of xorshift
        Self(seed ^ 0x9e37_79b9_7f4a_7c15)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform in [0, 1).
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in 0..n.
    fn below(&mut self, n: usize) -> usize {
        (self.next_f64() * n as f64) as usize % n
    }
}

fn energy(problem: &Problem, x: &[f64]) -> f64 {
    let r = problem.residuals(x);
    if all_finite(&r) {
        r.iter().map(|v| v * v).sum()
    } else {
        f64::INFINITY
    }
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &v)| if v < best.1 { (i, v) } else { best })
        .0
}

fn converged(energies: &[f64]) -> bool {
    if !all_finite(energies) {
        return false;
    }
    let n = energies.len() as f64;
    let mean = energies.iter().sum::<f64>() / n;
    let var = energies.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
    var.sqrt() <= TOLERANCE * mean.abs()
}

pub(crate) fn minimize(problem: &Problem, on_step: &mut dyn FnMut(&OptimStep) -> Flow) -> Outcome {
    let cfg = problem.config();
    let (lower, upper) = (problem.lower(), problem.upper());
    let n = problem.dim();
    let size = (POPULATION_PER_DIM * n).max(5);
    let mut rng = Rng::new(cfg.seed);

    let mut population: Vec<Vec<f64>> = Vec::with_capacity(size);
    population.push(problem.x0().to_vec());
    while population.len() < size {
        population.push(
            (0..n)
                .map(|j| lower[j] + rng.next_f64() * (upper[j] - lower[j]))
                .collect(),
        );
    }
    let mut energies: Vec<f64> = population.par_iter().map(|x| energy(problem, x)).collect();
    let mut nfev = size;
    let mut best = argmin(&energies);

    let mut generation = 0;
    let status = loop {
        if generation >= cfg.max_generations {
            break Status::MaxEvaluations;
        }
        generation += 1;
        let _span = tracing::debug_span!("de_generation", generation).entered();
        let scale = 0.5 + 0.5 * rng.next_f64();

        let trials: Vec<Vec<f64>> = (0..size)
            .map(|i| {
                let r1 = loop {
                    let r = rng.below(size);
                    if r != i {
                        break r;
                    }
                };
                let r2 = loop {
                    let r = rng.below(size);
                    if r != i && r != r1 {
                        break r;
                    }
                };
                let forced = rng.below(n);
                (0..n)
                    .map(|j| {
                        if j == forced || rng.next_f64() < CROSSOVER {
                            let v = population[best][j]
                                + scale * (population[r1][j] - population[r2][j]);
                            v.clamp(lower[j], upper[j])
                        } else {
                            population[i][j]
                        }
                    })
                    .collect()
            })
            .collect();
        let trial_energies: Vec<f64> = trials.par_iter().map(|x| energy(problem, x)).collect();
        nfev += size;

        for (i, (trial, e)) in trials.into_iter().zip(trial_energies).enumerate() {
            if e <= energies[i] {
                population[i] = trial;
                energies[i] = e;
            }
        }
        best = argmin(&energies);
        tracing::debug!(best_energy = energies[best], scale, "generation done");

        let x = &population[best];
        if on_step(&problem.step(generation, x, &problem.residuals(x))) == Flow::Stop {
            break Status::Cancelled;
        }
        if converged(&energies) {
            break Status::Converged(StopReason::PopulationSpread);
        }
    };

    Outcome {
        x: population.swap_remove(best),
        iterations: generation,
        nfev,
        status,
    }
}
