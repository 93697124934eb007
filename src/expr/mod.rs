//! Algebraic expressions over element symbols and the Laplace variable `s`.
//!
//! `Expr` is a small tree: numbers, symbols, flattened sums and products, and
//! powers. The smart constructors (`sum`, `product`, `pow`) fold constants and
//! drop neutral elements so trees stay compact under substitution. Exact
//! manipulation of rational functions lives in [`rational`], numeric
//! evaluation in [`eval`], and text parsing in [`parse`].

pub mod eval;
pub mod parse;
pub mod rational;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Name of the Laplace variable.
pub const LAPLACE: &str = "s";

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Sym(String),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Pow(Box<Expr>, Box<Expr>),
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Num(0.0)
    }
}

impl Expr {
    pub fn num(v: f64) -> Self {
        Expr::Num(v)
    }

    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Sym(name.into())
    }

    /// The Laplace variable.
    pub fn s() -> Self {
        Expr::Sym(LAPLACE.to_string())
    }

    pub fn zero() -> Self {
        Expr::Num(0.0)
    }

    pub fn one() -> Self {
        Expr::Num(1.0)
    }

    /// Flattened sum with constants folded and zeros dropped.
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Self {
        let mut constant = 0.0;
        let mut out = Vec::new();
        for term in terms {
            match term {
                Expr::Num(v) => constant += v,
                Expr::Add(inner) => {
                    for t in inner {
                        match t {
                            Expr::Num(v) => constant += v,
                            other => out.push(other),
                        }
                    }
                }
                other => out.push(other),
            }
        }
        if constant != 0.0 {
            out.insert(0, Expr::Num(constant));
        }
        match out.len() {
            0 => Expr::Num(0.0),
            1 => out.pop().unwrap_or_default(),
            _ => Expr::Add(out),
        }
    }

    /// Flattened product with constants folded; any zero factor yields zero.
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Self {
        let mut coefficient = 1.0;
        let mut out = Vec::new();
        for factor in factors {
            match factor {
                Expr::Num(v) => coefficient *= v,
                Expr::Mul(inner) => {
                    for f in inner {
                        match f {
                            Expr::Num(v) => coefficient *= v,
                            other => out.push(other),
                        }
                    }
                }
                other => out.push(other),
            }
        }
        if coefficient == 0.0 {
            return Expr::Num(0.0);
        }
        if coefficient != 1.0 || out.is_empty() {
            out.insert(0, Expr::Num(coefficient));
        }
        match out.len() {
            1 => out.pop().unwrap_or_default(),
            _ => Expr::Mul(out),
        }
    }

    pub fn pow(base: Expr, exponent: Expr) -> Self {
        match (&base, &exponent) {
            (_, Expr::Num(e)) if *e == 1.0 => base,
            (_, Expr::Num(e)) if *e == 0.0 => Expr::Num(1.0),
            (Expr::Num(b), Expr::Num(e)) => Expr::Num(b.powf(*e)),
            _ => Expr::Pow(Box::new(base), Box::new(exponent)),
        }
    }

    pub fn sqrt(self) -> Self {
        Expr::pow(self, Expr::Num(0.5))
    }

    pub fn recip(self) -> Self {
        Expr::pow(self, Expr::Num(-1.0))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Num(v) if *v == 0.0)
    }

    /// The value of a constant expression.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Num(v) => Some(*v),
            _ => None,
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Sym(name) => {
                out.insert(name.clone());
            }
            Expr::Add(items) | Expr::Mul(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
            Expr::Pow(b, e) => {
                b.collect_symbols(out);
                e.collect_symbols(out);
            }
        }
    }

    pub fn depends_on(&self, name: &str) -> bool {
        match self {
            Expr::Num(_) => false,
            Expr::Sym(n) => n == name,
            Expr::Add(items) | Expr::Mul(items) => items.iter().any(|i| i.depends_on(name)),
            Expr::Pow(b, e) => b.depends_on(name) || e.depends_on(name),
        }
    }

    /// Replace symbols by expressions. Symbols absent from `map` are kept.
    pub fn subs(&self, map: &HashMap<String, Expr>) -> Expr {
        match self {
            Expr::Num(_) => self.clone(),
            Expr::Sym(name) => map.get(name).cloned().unwrap_or_else(|| self.clone()),
            Expr::Add(items) => Expr::sum(items.iter().map(|i| i.subs(map))),
            Expr::Mul(items) => Expr::product(items.iter().map(|i| i.subs(map))),
            Expr::Pow(b, e) => Expr::pow(b.subs(map), e.subs(map)),
        }
    }

    /// Real-valued evaluation. `None` if a symbol has no value.
    pub fn eval_real(&self, values: &HashMap<String, f64>) -> Option<f64> {
        match self {
            Expr::Num(v) => Some(*v),
            Expr::Sym(name) => values.get(name).copied(),
            Expr::Add(items) => items.iter().map(|i| i.eval_real(values)).sum(),
            Expr::Mul(items) => items.iter().map(|i| i.eval_real(values)).product(),
            Expr::Pow(b, e) => Some(b.eval_real(values)?.powf(e.eval_real(values)?)),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(_) => 1,
            Expr::Mul(_) => 2,
            Expr::Num(v) if *v < 0.0 => 2,
            Expr::Pow(..) => 3,
            Expr::Num(_) | Expr::Sym(_) => 4,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        let wrap = self.precedence() < parent;
        if wrap {
            write!(f, "(")?;
        }
        match self {
            Expr::Num(v) => write!(f, "{}", fmt_number(*v))?,
            Expr::Sym(name) => write!(f, "{}", name)?,
            Expr::Add(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    match (i, term.negated()) {
                        (0, _) => term.fmt_prec(f, 1)?,
                        (_, Some(positive)) => {
                            write!(f, " - ")?;
                            positive.fmt_prec(f, 2)?;
                        }
                        (_, None) => {
                            write!(f, " + ")?;
                            term.fmt_prec(f, 2)?;
                        }
                    }
                }
            }
            Expr::Mul(factors) => {
                let (numer, denom): (Vec<&Expr>, Vec<&Expr>) =
                    factors.iter().partition(|x| x.reciprocal_base().is_none());
                if numer.is_empty() {
                    write!(f, "1")?;
                }
                for (i, factor) in numer.iter().enumerate() {
                    if i > 0 {
                        write!(f, "*")?;
                    }
                    factor.fmt_prec(f, 3)?;
                }
                for factor in denom {
                    write!(f, "/")?;
                    if let Some(base) = factor.reciprocal_base() {
                        base.fmt_prec(f, 4)?;
                    }
                }
            }
            Expr::Pow(b, e) => {
                if let Some(base) = self.reciprocal_base() {
                    write!(f, "1/")?;
                    base.fmt_prec(f, 4)?;
                } else {
                    b.fmt_prec(f, 4)?;
                    write!(f, "^")?;
                    e.fmt_prec(f, 4)?;
                }
            }
        }
        if wrap {
            write!(f, ")")?;
        }
        Ok(())
    }

    /// `x` for `x^-1`.
    fn reciprocal_base(&self) -> Option<&Expr> {
        match self {
            Expr::Pow(b, e) if e.as_number() == Some(-1.0) => Some(b),
            _ => None,
        }
    }

    /// `x` for `-x`, if the term carries a negative leading coefficient.
    fn negated(&self) -> Option<Expr> {
        match self {
            Expr::Num(v) if *v < 0.0 => Some(Expr::Num(-v)),
            Expr::Mul(factors) => match factors.first() {
                Some(Expr::Num(v)) if *v < 0.0 => {
                    let mut rest = factors.clone();
                    rest[0] = Expr::Num(-v);
                    Some(Expr::product(rest))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn fmt_number(v: f64) -> String {
    let a = v.abs();
    if a == 0.0 || (1e-3..1e6).contains(&a) {
        format!("{}", v)
    } else {
        format!("{:e}", v)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::sum([self, rhs])
    }
}

impl AddAssign for Expr {
    fn add_assign(&mut self, rhs: Expr) {
        let lhs = std::mem::take(self);
        *self = lhs + rhs;
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum([self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product([self, rhs])
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::product([self, rhs.recip()])
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::product([Expr::Num(-1.0), self])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::sym("X")
    }

    #[test]
    fn test_sum_folds_constants() {
        let e = Expr::num(1.0) + x() + Expr::num(2.0);
        assert_eq!(e, Expr::Add(vec![Expr::Num(3.0), x()]));
        assert_eq!(Expr::num(1.0) + Expr::num(-1.0), Expr::zero());
    }

    #[test]
    fn test_product_zero_and_one() {
        assert!((Expr::zero() * x()).is_zero());
        assert_eq!(Expr::one() * x(), x());
        assert_eq!(Expr::num(2.0) * x() * Expr::num(3.0), Expr::Mul(vec![Expr::Num(6.0), x()]));
    }

    #[test]
    fn test_pow_neutral() {
        assert_eq!(Expr::pow(x(), Expr::one()), x());
        assert_eq!(Expr::pow(x(), Expr::zero()), Expr::one());
        assert_eq!(Expr::pow(Expr::num(4.0), Expr::num(0.5)), Expr::num(2.0));
    }

    #[test]
    fn test_subs_and_eval() {
        let e = Expr::num(10.0) * Expr::sym("C1");
        let mut map = HashMap::new();
        map.insert("C1".to_string(), Expr::num(0.5));
        assert_eq!(e.subs(&map), Expr::num(5.0));

        let mut values = HashMap::new();
        values.insert("C1".to_string(), 3.0);
        assert_eq!(e.eval_real(&values), Some(30.0));
        assert_eq!(Expr::sym("C2").eval_real(&values), None);
    }

    #[test]
    fn test_free_symbols() {
        let e = Expr::s() * Expr::sym("R1") / (Expr::sym("C1") + Expr::one());
        let syms: Vec<String> = e.free_symbols().into_iter().collect();
        assert_eq!(syms, vec!["C1", "R1", "s"]);
        assert!(e.depends_on("R1"));
        assert!(!e.depends_on("R2"));
    }

    #[test]
    fn test_display() {
        let e = Expr::one() / (Expr::one() + Expr::s() * Expr::sym("R1") * Expr::sym("C1"));
        assert_eq!(e.to_string(), "1/(1 + s*R1*C1)");
        let d = x() - Expr::num(2.0) * Expr::sym("Y");
        assert_eq!(d.to_string(), "X - 2*Y");
    }
}
