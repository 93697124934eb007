//! Numeric evaluation of expressions at complex frequency.
//!
//! `CompiledExpr` resolves symbol names once so that repeated evaluation
//! (frequency sweeps, optimizer residuals) only walks a tree of indices.

use num_complex::Complex64;

use super::{Expr, LAPLACE};
use crate::error::EvalError;

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    S,
    Param(usize),
    Add(Vec<Node>),
    Mul(Vec<Node>),
    PowI(Box<Node>, i32),
    Pow(Box<Node>, Box<Node>),
}

/// An expression in `s` and positional real parameters.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    root: Node,
    params: Vec<String>,
}

impl CompiledExpr {
    /// Compile `expr`. Every symbol other than `s` must be listed in `params`.
    pub fn new(expr: &Expr, params: &[String]) -> Result<Self, EvalError> {
        let unknown: Vec<String> = expr
            .free_symbols()
            .into_iter()
            .filter(|name| name != LAPLACE && !params.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(EvalError::IncompleteSubstitution {
                symbols: unknown.join(", "),
            });
        }
        Ok(Self {
            root: compile(expr, params),
            params: params.to_vec(),
        })
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn eval(&self, s: Complex64, params: &[f64]) -> Complex64 {
        eval(&self.root, s, params)
    }
}

fn compile(expr: &Expr, params: &[String]) -> Node {
    match expr {
        Expr::Num(v) => Node::Const(*v),
        Expr::Sym(name) if name == LAPLACE => Node::S,
        Expr::Sym(name) => Node::Param(params.iter().position(|p| p == name).unwrap_or(0)),
        Expr::Add(terms) => Node::Add(terms.iter().map(|t| compile(t, params)).collect()),
        Expr::Mul(factors) => Node::Mul(factors.iter().map(|f| compile(f, params)).collect()),
        Expr::Pow(base, exponent) => match exponent.as_number() {
            Some(e) if e.fract() == 0.0 && e.abs() <= i32::MAX as f64 => {
                Node::PowI(Box::new(compile(base, params)), e as i32)
            }
            _ => Node::Pow(
                Box::new(compile(base, params)),
                Box::new(compile(exponent, params)),
            ),
        },
    }
}

fn eval(node: &Node, s: Complex64, params: &[f64]) -> Complex64 {
    match node {
        Node::Const(v) => Complex64::new(*v, 0.0),
        Node::S => s,
        Node::Param(i) => Complex64::new(params[*i], 0.0),
        Node::Add(terms) => terms.iter().map(|t| eval(t, s, params)).sum(),
        Node::Mul(factors) => factors.iter().map(|f| eval(f, s, params)).product(),
        Node::PowI(base, e) => eval(base, s, params).powi(*e),
        Node::Pow(base, exponent) => {
            let b = eval(base, s, params);
            let e = eval(exponent, s, params);
            if e.im == 0.0 {
                b.powf(e.re)
            } else {
                b.powc(e)
            }
        }
    }
}
