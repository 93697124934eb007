//! Exact rational functions over a set of atoms.
//!
//! An atom is anything the polynomial layer treats as an indeterminate: an
//! element symbol, `s`, or an opaque subexpression such as `(L1*L2)^0.5`
//! that has no polynomial form. Atoms are interned in an [`AtomTable`] and
//! referenced by index.
//!
//! Coefficients are `f64`. When two coefficients are added, the result is
//! dropped if it is within `CANCEL_EPS` of zero relative to the largest
//! contribution, so that exact symbolic cancellation survives rounding.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use num_complex::Complex64;

use super::Expr;

pub type Atom = usize;

const CANCEL_EPS: f64 = 1e-12;

/// Largest integer power expanded into a polynomial.
const MAX_EXPANDED_POWER: f64 = 64.0;

// ---------------------------------------------------------------------------
// Atoms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomTable {
    atoms: Vec<Expr>,
}

impl AtomTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, expr: &Expr) -> Atom {
        if let Some(i) = self.index_of(expr) {
            return i;
        }
        self.atoms.push(expr.clone());
        self.atoms.len() - 1
    }

    pub fn index_of(&self, expr: &Expr) -> Option<Atom> {
        self.atoms.iter().position(|a| a == expr)
    }

    pub fn get(&self, atom: Atom) -> &Expr {
        &self.atoms[atom]
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Monomials
// ---------------------------------------------------------------------------

/// Product of atoms with positive integer exponents, sorted by atom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Monomial(Vec<(Atom, u32)>);

impl Monomial {
    pub fn one() -> Self {
        Self(Vec::new())
    }

    pub fn atom(a: Atom) -> Self {
        Self(vec![(a, 1)])
    }

    pub fn is_one(&self) -> bool {
        self.0.is_empty()
    }

    pub fn degree(&self) -> u32 {
        self.0.iter().map(|&(_, e)| e).sum()
    }

    pub fn factors(&self) -> &[(Atom, u32)] {
        &self.0
    }

    fn exponent(&self, atom: Atom) -> u32 {
        self.0
            .iter()
            .find(|&&(a, _)| a == atom)
            .map(|&(_, e)| e)
            .unwrap_or(0)
    }

    /// Merge two monomials, combining exponents of shared atoms with `op`.
    fn merge(&self, other: &Self, op: impl Fn(u32, u32) -> u32) -> Self {
        let mut out = Vec::with_capacity(self.0.len() + other.0.len());
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() || j < other.0.len() {
            let (atom, e) = match (self.0.get(i), other.0.get(j)) {
                (Some(&(a, ea)), Some(&(b, eb))) if a == b => {
                    i += 1;
                    j += 1;
                    (a, op(ea, eb))
                }
                (Some(&(a, ea)), Some(&(b, _))) if a < b => {
                    i += 1;
                    (a, op(ea, 0))
                }
                (Some(_), Some(&(b, eb))) => {
                    j += 1;
                    (b, op(0, eb))
                }
                (Some(&(a, ea)), None) => {
                    i += 1;
                    (a, op(ea, 0))
                }
                (None, Some(&(b, eb))) => {
                    j += 1;
                    (b, op(0, eb))
                }
                (None, None) => break,
            };
            if e > 0 {
                out.push((atom, e));
            }
        }
        Self(out)
    }

    pub fn mul(&self, other: &Self) -> Self {
        self.merge(other, |a, b| a + b)
    }

    /// `self / other`; `other` must divide `self`.
    pub fn div(&self, other: &Self) -> Self {
        self.merge(other, |a, b| a.saturating_sub(b))
    }

    pub fn gcd(&self, other: &Self) -> Self {
        self.merge(other, u32::min)
    }

    pub fn lcm(&self, other: &Self) -> Self {
        self.merge(other, u32::max)
    }

    pub fn divides(&self, other: &Self) -> bool {
        self.0.iter().all(|&(a, e)| other.exponent(a) >= e)
    }

    /// Graded lexicographic order, compatible with multiplication.
    pub fn graded_cmp(&self, other: &Self) -> Ordering {
        self.degree()
            .cmp(&other.degree())
            .then_with(|| self.lex_cmp(other))
    }

    /// Lexicographic order on dense exponent vectors, lower atoms first.
    fn lex_cmp(&self, other: &Self) -> Ordering {
        let (mut i, mut j) = (0, 0);
        loop {
            match (self.0.get(i), other.0.get(j)) {
                (None, None) => return Ordering::Equal,
                (Some(_), None) => return Ordering::Greater,
                (None, Some(_)) => return Ordering::Less,
                (Some(&(a, ea)), Some(&(b, eb))) => {
                    if a < b {
                        return Ordering::Greater;
                    }
                    if a > b {
                        return Ordering::Less;
                    }
                    if ea != eb {
                        return ea.cmp(&eb);
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
    }

    pub fn eval(&self, values: &[Complex64]) -> Complex64 {
        self.0
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, &(a, e)| {
                acc * values[a].powi(e as i32)
            })
    }
}

// ---------------------------------------------------------------------------
// Polynomials
// ---------------------------------------------------------------------------

/// Sums coefficients per monomial while tracking the largest contribution.
#[derive(Default)]
struct Accumulator {
    sums: BTreeMap<Monomial, (f64, f64)>,
}

impl Accumulator {
    fn push(&mut self, m: Monomial, v: f64) {
        let entry = self.sums.entry(m).or_insert((0.0, 0.0));
        entry.0 += v;
        entry.1 = entry.1.max(v.abs());
    }

    fn finish(self) -> Poly {
        let terms = self
            .sums
            .into_iter()
            .filter(|(_, (v, scale))| *v != 0.0 && v.abs() > CANCEL_EPS * scale)
            .map(|(m, (v, _))| (m, v))
            .collect();
        Poly { terms }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Poly {
    terms: BTreeMap<Monomial, f64>,
}

impl Poly {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(c: f64) -> Self {
        Self::monomial(Monomial::one(), c)
    }

    pub fn atom(a: Atom) -> Self {
        Self::monomial(Monomial::atom(a), 1.0)
    }

    pub fn monomial(m: Monomial, c: f64) -> Self {
        let mut terms = BTreeMap::new();
        if c != 0.0 {
            terms.insert(m, c);
        }
        Self { terms }
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Value of a constant polynomial.
    pub fn as_constant(&self) -> Option<f64> {
        match self.terms.len() {
            0 => Some(0.0),
            1 => self.terms.get(&Monomial::one()).copied(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Monomial, f64)> {
        self.terms.iter().map(|(m, &c)| (m, c))
    }

    pub fn add(&self, other: &Self) -> Self {
        let mut acc = Accumulator::default();
        for (m, c) in self.terms().chain(other.terms()) {
            acc.push(m.clone(), c);
        }
        acc.finish()
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.scale(-1.0))
    }

    pub fn mul(&self, other: &Self) -> Self {
        let mut acc = Accumulator::default();
        for (ma, ca) in self.terms() {
            for (mb, cb) in other.terms() {
                acc.push(ma.mul(mb), ca * cb);
            }
        }
        acc.finish()
    }

    pub fn scale(&self, c: f64) -> Self {
        if c == 0.0 {
            return Self::zero();
        }
        Self {
            terms: self.terms.iter().map(|(m, &v)| (m.clone(), v * c)).collect(),
        }
    }

    pub fn mul_monomial(&self, m: &Monomial) -> Self {
        Self {
            terms: self.terms.iter().map(|(t, &v)| (t.mul(m), v)).collect(),
        }
    }

    pub fn div_monomial(&self, m: &Monomial) -> Self {
        Self {
            terms: self.terms.iter().map(|(t, &v)| (t.div(m), v)).collect(),
        }
    }

    /// Greatest monomial dividing every term.
    pub fn content(&self) -> Monomial {
        let mut iter = self.terms.keys();
        let Some(first) = iter.next() else {
            return Monomial::one();
        };
        iter.fold(first.clone(), |g, m| g.gcd(m))
    }

    /// Leading term in graded lexicographic order.
    pub fn leading(&self) -> Option<(&Monomial, f64)> {
        self.terms
            .iter()
            .max_by(|a, b| a.0.graded_cmp(b.0))
            .map(|(m, &c)| (m, c))
    }

    /// Coefficient of the first term in storage order (the constant term if
    /// there is one).
    pub fn first_coefficient(&self) -> Option<f64> {
        self.terms.values().next().copied()
    }

    /// Exact division. `None` if `divisor` does not divide `self`.
    pub fn div_exact(&self, divisor: &Self) -> Option<Self> {
        let (dm, dc) = divisor.leading()?;
        let (dm, dc) = (dm.clone(), dc);
        if let Some(c) = divisor.as_constant() {
            return Some(self.scale(1.0 / c));
        }
        let mut remainder = self.clone();
        let mut quotient = Accumulator::default();
        let limit = 64 * (self.len() + 1) * (divisor.len() + 1);
        for _ in 0..limit {
            let Some((lm, lc)) = remainder.leading() else {
                return Some(quotient.finish());
            };
            if !dm.divides(lm) {
                return None;
            }
            let m = lm.div(&dm);
            let c = lc / dc;
            let step = divisor.mul_monomial(&m).scale(c);
            remainder = remainder.sub(&step);
            quotient.push(m, c);
        }
        None
    }

    pub fn eval(&self, values: &[Complex64]) -> Complex64 {
        self.terms()
            .map(|(m, c)| m.eval(values) * c)
            .sum()
    }

    pub fn to_expr(&self, atoms: &AtomTable) -> Expr {
        Expr::sum(self.terms().map(|(m, c)| {
            let factors = m
                .factors()
                .iter()
                .map(|&(a, e)| Expr::pow(atoms.get(a).clone(), Expr::num(e as f64)));
            Expr::product(std::iter::once(Expr::num(c)).chain(factors))
        }))
    }
}

// ---------------------------------------------------------------------------
// Rational functions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Rational {
    pub num: Poly,
    pub den: Poly,
}

impl Rational {
    pub fn new(num: Poly, den: Poly) -> Self {
        Self { num, den }.simplify()
    }

    pub fn from_poly(p: Poly) -> Self {
        Self {
            num: p,
            den: Poly::constant(1.0),
        }
    }

    pub fn zero() -> Self {
        Self::from_poly(Poly::zero())
    }

    pub fn constant(c: f64) -> Self {
        Self::from_poly(Poly::constant(c))
    }

    pub fn atom(a: Atom) -> Self {
        Self::from_poly(Poly::atom(a))
    }

    pub fn is_zero(&self) -> bool {
        self.num.is_zero()
    }

    pub fn add(&self, other: &Self) -> Self {
        if self.den == other.den {
            return Self::new(self.num.add(&other.num), self.den.clone());
        }
        Self::new(
            self.num.mul(&other.den).add(&other.num.mul(&self.den)),
            self.den.mul(&other.den),
        )
    }

    pub fn neg(&self) -> Self {
        Self {
            num: self.num.scale(-1.0),
            den: self.den.clone(),
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self::new(self.num.mul(&other.num), self.den.mul(&other.den))
    }

    /// `None` on division by zero.
    pub fn div(&self, other: &Self) -> Option<Self> {
        Some(self.mul(&other.recip()?))
    }

    pub fn recip(&self) -> Option<Self> {
        if self.num.is_zero() {
            return None;
        }
        Some(Self::new(self.den.clone(), self.num.clone()))
    }

    pub fn powi(&self, n: i32) -> Option<Self> {
        let base = if n < 0 { self.recip()? } else { self.clone() };
        let mut out = Self::constant(1.0);
        for _ in 0..n.unsigned_abs() {
            out = out.mul(&base);
        }
        Some(out)
    }

    /// Cancel the common monomial content and normalize the denominator so
    /// that its first coefficient is one.
    pub fn simplify(self) -> Self {
        if self.num.is_zero() {
            return Self::zero();
        }
        let common = self.num.content().gcd(&self.den.content());
        let (num, den) = if common.is_one() {
            (self.num, self.den)
        } else {
            (self.num.div_monomial(&common), self.den.div_monomial(&common))
        };
        match den.first_coefficient() {
            Some(c) if c != 1.0 => Self {
                num: num.scale(1.0 / c),
                den: den.scale(1.0 / c),
            },
            _ => Self { num, den },
        }
    }

    /// Divide numerator and denominator by `factor` while both are
    /// divisible. Returns whether anything was cancelled.
    pub fn cancel_factor(&mut self, factor: &Poly) -> bool {
        if factor.as_constant().is_some() {
            return false;
        }
        let mut changed = false;
        while let (Some(n), Some(d)) = (self.num.div_exact(factor), self.den.div_exact(factor)) {
            self.num = n;
            self.den = d;
            changed = true;
        }
        if changed {
            *self = std::mem::replace(self, Self::zero()).simplify();
        }
        changed
    }

    pub fn eval(&self, values: &[Complex64]) -> Complex64 {
        self.num.eval(values) / self.den.eval(values)
    }

    /// Convert an expression. Subexpressions without a polynomial form
    /// become opaque atoms.
    pub fn from_expr(expr: &Expr, atoms: &mut AtomTable) -> Self {
        match expr {
            Expr::Num(v) => Self::constant(*v),
            Expr::Sym(_) => Self::atom(atoms.intern(expr)),
            Expr::Add(terms) => terms
                .iter()
                .fold(Self::zero(), |acc, t| acc.add(&Self::from_expr(t, atoms))),
            Expr::Mul(factors) => factors
                .iter()
                .fold(Self::constant(1.0), |acc, f| acc.mul(&Self::from_expr(f, atoms))),
            Expr::Pow(base, exponent) => {
                match (base.as_number(), exponent.as_number()) {
                    (Some(b), Some(e)) => return Self::constant(b.powf(e)),
                    (_, Some(e)) if e.fract() == 0.0 && e.abs() <= MAX_EXPANDED_POWER => {
                        if let Some(r) = Self::from_expr(base, atoms).powi(e as i32) {
                            return r;
                        }
                    }
                    _ => {}
                }
                Self::atom(atoms.intern(expr))
            }
        }
    }

    pub fn to_expr(&self, atoms: &AtomTable) -> Expr {
        let num = self.num.to_expr(atoms);
        match self.den.as_constant() {
            Some(c) if c == 1.0 => num,
            Some(c) => num * Expr::num(1.0 / c),
            None => num / self.den.to_expr(atoms),
        }
    }
}

/// Canonicalize an expression through its rational form.
pub fn simplify(expr: &Expr) -> Expr {
    let mut atoms = AtomTable::new();
    Rational::from_expr(expr, &mut atoms).to_expr(&atoms)
}
