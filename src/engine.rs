//! Stateful front end tying the pipeline together.
//!
//! `Engine` keeps the last compiled circuit and solution, runs each stage
//! with its [`Settings`] and reports every outcome as an [`Event`] to a
//! caller-supplied sink.

use crate::analysis::ac::evaluate;
use crate::analysis::{MagnitudeMode, Response};
use crate::compiler::{compile_with, Circuit};
use crate::config::Settings;
use crate::error::{OhmfitError, Result};
use crate::event::Event;
use crate::generate::generate;
use crate::optim::{optimize, CancelToken, OptimizedResult, Status, Target};
use crate::solver::{Solution, Solver};

pub struct Engine<S: FnMut(&Event)> {
    settings: Settings,
    solver: Solver,
    circuit: Option<Circuit>,
    solution: Option<Solution>,
    sink: S,
}

impl<S: FnMut(&Event)> Engine<S> {
    pub fn new(settings: Settings, sink: S) -> Self {
        Self {
            settings,
            solver: Solver::new(),
            circuit: None,
            solution: None,
            sink,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Changing settings invalidates the current solution.
    pub fn settings_mut(&mut self) -> &mut Settings {
        self.solution = None;
        &mut self.settings
    }

    pub fn circuit(&self) -> Option<&Circuit> {
        self.circuit.as_ref()
    }

    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    /// Compile netlist text, replacing the current circuit.
    pub fn load(&mut self, text: &str) -> Result<&Circuit> {
        self.solution = None;
        self.circuit = None;
        match compile_with(text, &self.settings.bounds) {
            Ok(circuit) => {
                (self.sink)(&Event::ParsedOk {
                    elements: circuit.netlist.elements.len(),
                    free_params: circuit.free_params().len(),
                });
                Ok(self.circuit.insert(circuit))
            }
            Err(e) => {
                (self.sink)(&Event::ParseError(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Derive the transfer function selected by the settings.
    pub fn solve(&mut self) -> Result<&Solution> {
        let circuit = self.circuit.as_ref().ok_or(OhmfitError::NotReady("load"))?;
        let s = &self.settings;
        match self.solver.solve(circuit, &s.input, &s.output, s.policy) {
            Ok(solution) => {
                (self.sink)(&Event::SolvedOk {
                    expr: solution.expr.to_string(),
                    cached: solution.cached,
                });
                Ok(self.solution.insert(solution))
            }
            Err(e) => {
                self.solution = None;
                (self.sink)(&Event::SolveError(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Target response over the settings' frequency axis.
    pub fn target(&self) -> Result<Target> {
        Ok(Target::from_template(
            &self.settings.target,
            &self.settings.frequencies(),
        )?)
    }

    /// Response with every free value at its initial value.
    pub fn initial_response(&self, mode: MagnitudeMode) -> Result<Response> {
        let solution = self.solution.as_ref().ok_or(OhmfitError::NotReady("solve"))?;
        Ok(evaluate(&solution.initial, &self.settings.frequencies(), mode)?)
    }

    /// Fit the free values to the target. `cancel` is polled once per
    /// iteration.
    pub fn optimize(&mut self, cancel: &CancelToken) -> Result<OptimizedResult> {
        let Self {
            settings,
            circuit,
            solution,
            sink,
            ..
        } = self;
        let circuit = circuit.as_ref().ok_or(OhmfitError::NotReady("load"))?;
        let solution = solution.as_ref().ok_or(OhmfitError::NotReady("solve"))?;
        let target = Target::from_template(&settings.target, &settings.frequencies())?;

        let mut stop = cancel.observer();
        let outcome = optimize(
            &solution.expr,
            &circuit.free_params(),
            &target,
            &settings.optimizer,
            |step| {
                sink(&Event::OptimStep(step.clone()));
                stop(step)
            },
        );
        match outcome {
            Ok(result) => {
                let event = if result.status == Status::Cancelled {
                    Event::OptimCancelled(Box::new(result.clone()))
                } else {
                    Event::OptimDone(Box::new(result.clone()))
                };
                sink(&event);
                Ok(result)
            }
            Err(e) => {
                sink(&Event::OptimError(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Netlist text with the optimized values written back.
    pub fn generate(&self, result: &OptimizedResult) -> Result<String> {
        let circuit = self.circuit.as_ref().ok_or(OhmfitError::NotReady("load"))?;
        Ok(generate(circuit, &result.values))
    }
}
