//! MNA (Modified Nodal Analysis) compiler.
//!
//! Converts a parsed `Netlist` into symbolic MNA matrices.
//!
//! # MNA System
//!
//! For N non-ground nodes and B branch currents the system is (N+B) x (N+B):
//!
//! ```text
//! (G + s·C) · X = M
//! ```
//!
//! where X = [node_voltages; branch_currents]. Row/col `i < N` is node `i+1`,
//! row/col `N+j` is branch `j`. Entries are expressions over element symbols;
//! `inv` is the product of the terminal polarity signs (`-1` per inverted
//! node).
//!
//! # Stamps
//!
//! - **R** plain: `1/R` at (p,p),(n,n); `-inv/R` at (p,n),(n,p)
//! - **R** with branch b (current sensed by F/H): G(p,b)+=1, G(b,p)+=1,
//!   G(n,b)-=inv, G(b,n)-=inv, G(b,b)-=R
//! - **C** plain: as R, with `C` into the C matrix
//! - **C** with branch b: G(p,b)+=1, C(b,p)+=C, G(n,b)-=inv, C(b,n)-=inv·C,
//!   G(b,b)-=1
//! - **L**: G(p,b)+=1, G(b,p)+=1, G(n,b)-=inv, G(b,n)-=inv, C(b,b)-=L
//! - **V**: G(p,b)+=1, G(b,p)+=1, G(n,b)-=1, G(b,n)-=1, M(b)+=V
//! - **I**: M(p)+=I, M(n)-=I
//! - **G**: G(p,c+)+=g, G(p,c-)-=g, G(n,c+)-=g, G(n,c-)+=g
//! - **E**: V stamp without source, G(b,c+)-=e, G(b,c-)+=e
//! - **F**: G(p,bc)-=f, G(n,bc)+=f
//! - **H**: V stamp without source, G(b,bc)-=h
//! - **O**: G(out,b)+=1, G(b,in+)+=1, G(b,in-)-=1
//! - **K**: C(b1,b2)-=k·√(L1·L2), C(b2,b1)-=k·√(L1·L2)
//! - **T**: windings b1, b2 with V1 = n·V2 and I2 = -n·I1
//!
//! The `inv` handling of the passive two-terminal stamps has not been
//! verified for balanced topologies.

use crate::error::ParseError;
use crate::expr::Expr;
use crate::ir::{BoundsTable, Element, ElementKind, FreeParam, Netlist, NodeRef};
use crate::parser;
use crate::sparse::{form_system_matrix, CsrMatrix};

use std::collections::BTreeMap;

/// The symbolic MNA system.
#[derive(Debug, Clone)]
pub struct MnaSystem {
    /// Frequency-independent stamps.
    pub g: CsrMatrix<Expr>,
    /// Stamps multiplied by `s`.
    pub c: CsrMatrix<Expr>,
    /// Excitation vector.
    pub m: Vec<Expr>,
    /// Total system size (n_nodes + n_branches).
    pub size: usize,
    /// Node names in matrix-index order.
    pub node_names: Vec<String>,
    /// Branch names; branch k has matrix index n_nodes + k.
    pub branch_names: Vec<String>,
}

impl MnaSystem {
    /// A = G + s·C.
    pub fn system_matrix(&self) -> CsrMatrix<Expr> {
        form_system_matrix(&self.g, &self.c)
    }
}

/// A compiled circuit: the parsed netlist and its MNA system.
#[derive(Debug, Clone)]
pub struct Circuit {
    pub netlist: Netlist,
    pub system: MnaSystem,
}

impl Circuit {
    pub fn element(&self, id: &str) -> Option<&Element> {
        self.netlist.element(id)
    }

    pub fn free_params(&self) -> Vec<FreeParam> {
        self.netlist.free_params()
    }

    pub fn resolve_values(&self, assignment: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        self.netlist.resolve_values(assignment)
    }
}

/// Parse and compile a netlist with default bounds.
pub fn compile(text: &str) -> Result<Circuit, ParseError> {
    compile_with(text, &BoundsTable::default())
}

/// Parse and compile a netlist.
pub fn compile_with(text: &str, bounds: &BoundsTable) -> Result<Circuit, ParseError> {
    let _span = tracing::info_span!("compile").entered();
    let netlist = parser::parse_with(text, bounds)?;
    let system = build(&netlist);
    tracing::debug!(
        size = system.size,
        nnz_g = system.g.nnz(),
        nnz_c = system.c.nnz(),
        "MNA system built"
    );
    Ok(Circuit { netlist, system })
}

/// Accumulates stamps as triplets.
struct Stamper<'a> {
    netlist: &'a Netlist,
    g: Vec<(usize, usize, Expr)>,
    c: Vec<(usize, usize, Expr)>,
    m: Vec<Expr>,
}

impl<'a> Stamper<'a> {
    fn node(&self, node: NodeRef) -> Option<usize> {
        self.netlist.node_row(node.index)
    }

    fn branch(&self, name: &str) -> Option<usize> {
        self.netlist
            .branch_index(name)
            .map(|b| self.netlist.branch_row(b))
    }

    fn g(&mut self, row: Option<usize>, col: Option<usize>, v: Expr) {
        if let (Some(r), Some(c)) = (row, col) {
            self.g.push((r, c, v));
        }
    }

    fn c(&mut self, row: Option<usize>, col: Option<usize>, v: Expr) {
        if let (Some(r), Some(c)) = (row, col) {
            self.c.push((r, c, v));
        }
    }

    fn m(&mut self, row: Option<usize>, v: Expr) {
        if let Some(r) = row {
            self.m[r] += v;
        }
    }

    /// Branch incidence of a voltage-defined element: KCL at p/n and the
    /// V(p) - V(n) terms of the branch equation.
    fn branch_incidence(&mut self, p: Option<usize>, n: Option<usize>, b: Option<usize>, inv: f64) {
        self.g(p, b, Expr::one());
        self.g(b, p, Expr::one());
        self.g(n, b, Expr::num(-inv));
        self.g(b, n, Expr::num(-inv));
    }

    fn stamp(&mut self, e: &Element) {
        let sym = e.symbol();
        let node = |i: usize| e.nodes.get(i).copied();
        let (p, n) = (
            node(0).and_then(|x| self.node(x)),
            node(1).and_then(|x| self.node(x)),
        );
        let inv: f64 = e
            .nodes
            .iter()
            .take(2)
            .map(|x| if x.inverted { -1.0 } else { 1.0 })
            .product();
        let own = self.branch(&e.id);

        match e.kind {
            ElementKind::Resistor => match own {
                Some(b) => {
                    self.branch_incidence(p, n, Some(b), inv);
                    self.g(Some(b), Some(b), -sym);
                }
                None => {
                    let g = sym.recip();
                    self.g(p, p, g.clone());
                    self.g(n, n, g.clone());
                    self.g(p, n, Expr::num(-inv) * g.clone());
                    self.g(n, p, Expr::num(-inv) * g);
                }
            },
            ElementKind::Capacitor => match own {
                Some(b) => {
                    self.g(p, Some(b), Expr::one());
                    self.g(n, Some(b), Expr::num(-inv));
                    self.c(Some(b), p, sym.clone());
                    self.c(Some(b), n, Expr::num(-inv) * sym);
                    self.g(Some(b), Some(b), Expr::num(-1.0));
                }
                None => {
                    self.c(p, p, sym.clone());
                    self.c(n, n, sym.clone());
                    self.c(p, n, Expr::num(-inv) * sym.clone());
                    self.c(n, p, Expr::num(-inv) * sym);
                }
            },
            ElementKind::Inductor => {
                self.branch_incidence(p, n, own, inv);
                self.c(own, own, -sym);
            }
            ElementKind::VoltageSource => {
                self.branch_incidence(p, n, own, 1.0);
                self.m(own, sym);
            }
            ElementKind::CurrentSource => {
                self.m(p, sym.clone());
                self.m(n, -sym);
            }
            ElementKind::Vccs => {
                let (cp, cn) = (
                    node(2).and_then(|x| self.node(x)),
                    node(3).and_then(|x| self.node(x)),
                );
                self.g(p, cp, sym.clone());
                self.g(p, cn, -sym.clone());
                self.g(n, cp, -sym.clone());
                self.g(n, cn, sym);
            }
            ElementKind::Vcvs => {
                let (cp, cn) = (
                    node(2).and_then(|x| self.node(x)),
                    node(3).and_then(|x| self.node(x)),
                );
                self.branch_incidence(p, n, own, 1.0);
                self.g(own, cp, -sym.clone());
                self.g(own, cn, sym);
            }
            ElementKind::Cccs => {
                let control = self.branch(&e.refs[0]);
                self.g(p, control, -sym.clone());
                self.g(n, control, sym);
            }
            ElementKind::Ccvs => {
                let control = self.branch(&e.refs[0]);
                self.branch_incidence(p, n, own, 1.0);
                self.g(own, control, -sym);
            }
            ElementKind::OpAmp => {
                let out = node(2).and_then(|x| self.node(x));
                self.g(out, own, Expr::one());
                self.g(own, p, Expr::one());
                self.g(own, n, Expr::num(-1.0));
            }
            ElementKind::Coupling => {
                let (b1, b2) = (self.branch(&e.refs[0]), self.branch(&e.refs[1]));
                let mutual = sym * (Expr::sym(&e.refs[0]) * Expr::sym(&e.refs[1])).sqrt();
                self.c(b1, b2, -mutual.clone());
                self.c(b2, b1, -mutual);
            }
            ElementKind::Transformer => {
                let (p2, n2) = (
                    node(2).and_then(|x| self.node(x)),
                    node(3).and_then(|x| self.node(x)),
                );
                let b1 = self.branch(&format!("{}_1", e.id));
                let b2 = self.branch(&format!("{}_2", e.id));
                self.g(p, b1, Expr::one());
                self.g(n, b1, Expr::num(-1.0));
                self.g(p2, b2, Expr::one());
                self.g(n2, b2, Expr::num(-1.0));
                // V1 - n·V2 = 0
                self.g(b1, p, Expr::one());
                self.g(b1, n, Expr::num(-1.0));
                self.g(b1, p2, -sym.clone());
                self.g(b1, n2, sym.clone());
                // n·I1 + I2 = 0
                self.g(b2, b1, sym);
                self.g(b2, b2, Expr::one());
            }
        }
    }
}

/// Stamp every element of `netlist`.
pub fn build(netlist: &Netlist) -> MnaSystem {
    let size = netlist.size();
    let mut stamper = Stamper {
        netlist,
        g: Vec::new(),
        c: Vec::new(),
        m: vec![Expr::zero(); size],
    };
    for e in &netlist.elements {
        stamper.stamp(e);
    }
    let Stamper { g, c, m, .. } = stamper;
    MnaSystem {
        g: CsrMatrix::from_triplets(size, size, &g),
        c: CsrMatrix::from_triplets(size, size, &c),
        m,
        size,
        node_names: netlist.nodes[1..].to_vec(),
        branch_names: netlist.branches.clone(),
    }
}
