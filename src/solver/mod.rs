//! Symbolic solution of the MNA system.
//!
//! The system `(G + s·C)·X = M` is solved exactly over rational functions of
//! `s` and the remaining element symbols, then reduced to a single transfer
//! function by the output selector.

pub mod dense;
pub mod linear;

use std::collections::{BTreeSet, HashMap};

use serde_derive::Deserialize;

use crate::compiler::Circuit;
use crate::error::SolveError;
use crate::expr::rational::{simplify, AtomTable, Rational};
use crate::expr::{Expr, LAPLACE};
use crate::selector;

/// When element values enter the symbolic solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubstitutionPolicy {
    /// Substitute Fixed values, Expression definitions and zeroed sources
    /// into the matrices before solving. Otherwise they are substituted into
    /// the output expression afterwards.
    pub pre_substitute: bool,
}

impl Default for SubstitutionPolicy {
    fn default() -> Self {
        Self {
            pre_substitute: true,
        }
    }
}

/// Exact solution vector, one rational function per unknown.
#[derive(Debug, Clone)]
pub struct SystemSolution {
    atoms: AtomTable,
    x: Vec<Rational>,
}

impl SystemSolution {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Atoms the rational entries are expressed over.
    pub fn atoms(&self) -> &AtomTable {
        &self.atoms
    }

    pub fn rational(&self, i: usize) -> &Rational {
        &self.x[i]
    }

    /// Unknown `i` as an expression.
    pub fn unknown(&self, i: usize) -> Expr {
        self.x[i].to_expr(&self.atoms)
    }
}

/// Output of a solve: the transfer function output/input.
#[derive(Debug, Clone)]
pub struct Solution {
    pub input: String,
    pub output: String,
    /// Function of `s` and the Free element symbols.
    pub expr: Expr,
    /// `expr` with every Free symbol at its initial value.
    pub initial: Expr,
    /// The solve was served from the cache.
    pub cached: bool,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    a: Vec<Vec<Expr>>,
    m: Vec<Expr>,
    solution: SystemSolution,
}

/// Solves circuits, remembering the last system solved.
#[derive(Debug, Default)]
pub struct Solver {
    cache: Option<CacheEntry>,
    solves: usize,
    cache_hits: usize,
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of exact eliminations performed.
    pub fn solves(&self) -> usize {
        self.solves
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }

    /// Derive the transfer function `output / input` for `circuit`.
    pub fn solve(
        &mut self,
        circuit: &Circuit,
        input: &str,
        output: &str,
        policy: SubstitutionPolicy,
    ) -> Result<Solution, SolveError> {
        let _span = tracing::info_span!("solve", input, output).entered();
        let netlist = &circuit.netlist;

        let source = selector::input_source(netlist, input)?;
        let selector = selector::parse_selector(output)?;
        let subs = netlist.substitution_map(&source.id);

        let mut a = circuit.system.system_matrix().to_dense();
        let mut m = circuit.system.m.clone();
        if policy.pre_substitute {
            for entry in a.iter_mut().flatten().chain(m.iter_mut()) {
                *entry = entry.subs(&subs);
            }
        }

        let (system, cached) = match &self.cache {
            Some(entry) if entry.a == a && entry.m == m => {
                self.cache_hits += 1;
                tracing::debug!("system unchanged, reusing previous solution");
                (entry.solution.clone(), true)
            }
            _ => {
                let solution = solve_system(&a, &m)?;
                self.solves += 1;
                self.cache = Some(CacheEntry {
                    a,
                    m,
                    solution: solution.clone(),
                });
                (solution, false)
            }
        };

        let raw = selector::build_output_expression(netlist, &selector, source, &system)?;
        let expr = finalize(circuit, &raw, &subs)?;
        let initial = simplify(&expr.subs(&netlist.initial_values()));
        tracing::info!(%expr, cached, "transfer function derived");

        Ok(Solution {
            input: source.id.clone(),
            output: output.to_string(),
            expr,
            initial,
            cached,
        })
    }
}

/// Solve the dense symbolic system `a·x = m` exactly.
pub fn solve_system(a: &[Vec<Expr>], m: &[Expr]) -> Result<SystemSolution, SolveError> {
    let mut atoms = AtomTable::new();
    atoms.intern(&Expr::s());
    let ra: Vec<Vec<Rational>> = a
        .iter()
        .map(|row| row.iter().map(|e| Rational::from_expr(e, &mut atoms)).collect())
        .collect();
    let rm: Vec<Rational> = m.iter().map(|e| Rational::from_expr(e, &mut atoms)).collect();
    tracing::debug!(size = a.len(), atoms = atoms.len(), "solving symbolic system");

    let x = linear::solve(&ra, &rm, atoms.len())?;
    Ok(SystemSolution { atoms, x })
}

/// Apply the remaining substitutions, reject leftover symbols and simplify.
fn finalize(circuit: &Circuit, raw: &Expr, subs: &HashMap<String, Expr>) -> Result<Expr, SolveError> {
    let expr = raw.subs(subs);
    let free: BTreeSet<String> = circuit.free_params().into_iter().map(|p| p.name).collect();
    let leftover: Vec<String> = expr
        .free_symbols()
        .into_iter()
        .filter(|name| name != LAPLACE && !free.contains(name))
        .collect();
    if !leftover.is_empty() {
        return Err(SolveError::IncompleteSubstitution {
            symbols: leftover.join(", "),
        });
    }
    Ok(simplify(&expr))
}
