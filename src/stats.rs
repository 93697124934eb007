//! Performance statistics collection for `--stats` output.

use std::time::{Duration, Instant};

/// Collects phase timings and run counters.
///
/// Created when `--stats` is passed, threaded as `Option<&mut Stats>`.
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    pub elements: usize,
    pub free_params: usize,
    pub unknowns: usize,
    pub frequency_points: usize,
    // Solver
    pub solves: usize,
    pub cache_hits: usize,
    // Optimizer
    pub iterations: usize,
    pub evaluations: usize,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            elements: 0,
            free_params: 0,
            unknowns: 0,
            frequency_points: 0,
            solves: 0,
            cache_hits: 0,
            iterations: 0,
            evaluations: 0,
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    /// Run `f` and record its duration under `name` when stats are enabled.
    pub fn time<T>(stats: Option<&mut Stats>, name: &'static str, f: impl FnOnce() -> T) -> T {
        match stats {
            Some(stats) => {
                let start = Instant::now();
                let out = f();
                stats.add_phase(name, start.elapsed());
                out
            }
            None => f(),
        }
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== ohmfit stats ===");

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        eprintln!("  Elements:               {}  free={}", self.elements, self.free_params);
        eprintln!("  MNA unknowns:           {}", self.unknowns);
        eprintln!("  Frequency points:       {}", self.frequency_points);
        if self.solves > 0 {
            eprintln!("  Solves:                 {}  cached={}", self.solves, self.cache_hits);
        }
        if self.evaluations > 0 {
            eprintln!(
                "  Optimizer:              iterations={}  evaluations={}",
                self.iterations, self.evaluations
            );
        }

        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}
