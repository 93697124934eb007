//! Symbolic small-signal analysis of linear circuits and fitting of their
//! component values to a target frequency response.
//!
//! The pipeline is: netlist text → [`compile`] → [`Solver::solve`] for a
//! closed-form transfer function → [`evaluate`] over frequency →
//! [`optimize`] the free values → [`generate`] the updated netlist.
//! [`Engine`] runs the same stages behind an event sink.

pub mod analysis;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod expr;
pub mod generate;
pub mod ir;
pub mod numeng;
pub mod optim;
pub mod output;
pub mod parser;
pub mod selector;
pub mod solver;
pub mod sparse;
pub mod stats;

pub use analysis::ac::evaluate;
pub use analysis::{MagnitudeMode, Response};
pub use compiler::{compile, compile_with, Circuit};
pub use config::Settings;
pub use engine::Engine;
pub use error::{
    EvalError, OhmfitError, OptimizeError, ParseError, Result, SelectorError, SolveError,
};
pub use event::Event;
pub use expr::Expr;
pub use generate::generate;
pub use optim::{optimize, CancelToken, Flow, OptimizeConfig, OptimizedResult, Target};
pub use selector::list_candidate_io_expressions;
pub use solver::{Solution, Solver, SubstitutionPolicy};
