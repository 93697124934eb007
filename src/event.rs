//! Progress and result notifications emitted by the [`Engine`](crate::engine::Engine).

use crate::optim::{OptimStep, OptimizedResult};

#[derive(Debug, Clone)]
pub enum Event {
    ParsedOk {
        elements: usize,
        free_params: usize,
    },
    ParseError(String),
    SolvedOk {
        expr: String,
        cached: bool,
    },
    SolveError(String),
    OptimStep(OptimStep),
    OptimDone(Box<OptimizedResult>),
    OptimCancelled(Box<OptimizedResult>),
    OptimError(String),
}

impl Event {
    /// Single-line description.
    pub fn message(&self) -> String {
        match self {
            Event::ParsedOk {
                elements,
                free_params,
            } => format!("parse: ok, {elements} elements, {free_params} free values"),
            Event::ParseError(e) => format!("parse: {e}"),
            Event::SolvedOk { expr, cached } => {
                let origin = if *cached { " (cached)" } else { "" };
                format!("solve: ok{origin}, H(s) = {expr}")
            }
            Event::SolveError(e) => format!("solve: {e}"),
            Event::OptimStep(step) => format!(
                "optimize: step {}: resnorm={:.2}, {}",
                step.iteration,
                step.residual_norm,
                step.describe_values()
            ),
            Event::OptimDone(result) => format!(
                "optimize: {} after {} iterations, resnorm={:.4}",
                result.status.message(),
                result.iterations,
                result.residual_norm
            ),
            Event::OptimCancelled(result) => {
                format!("optimize: stopped after {} iterations", result.iterations)
            }
            Event::OptimError(e) => format!("optimize: {e}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::ParseError(_) | Event::SolveError(_) | Event::OptimError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_messages_are_single_line() {
        let events = vec![
            Event::ParsedOk {
                elements: 3,
                free_params: 2,
            },
            Event::ParseError("line 2: unknown circuit element 'X'".into()),
            Event::SolvedOk {
                expr: "1/(1 + s*R1*C1)".into(),
                cached: true,
            },
            Event::OptimStep(OptimStep {
                iteration: 4,
                residual_norm: 0.25,
                values: BTreeMap::from([("R1".to_string(), 1500.0)]),
                makeup_gain: 1.0,
            }),
        ];
        for e in &events {
            assert!(!e.message().contains('\n'));
        }
        assert_eq!(events[2].message(), "solve: ok (cached), H(s) = 1/(1 + s*R1*C1)");
        assert_eq!(events[3].message(), "optimize: step 4: resnorm=0.25, R1=1.5K");
        assert!(events[1].is_error());
    }
}
