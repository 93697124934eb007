//! Exact solution of a linear system over rational functions.
//!
//! Each row is first cleared of denominators: entries are multiplied by the
//! least common monomial of the row's denominators and by the product of the
//! row's distinct non-monomial denominator factors. The polynomial system is
//! then solved by Cramer's rule, `x_i = det(A_i) / det(A)`, where `det(A_i)`
//! is expanded along the replaced column into cofactors of `A`. Determinants
//! and minors come from a fraction-free Laplace expansion memoized on the
//! set of remaining columns, so no polynomial division is ever needed.

use std::collections::HashMap;

use num_complex::Complex64;

use super::dense;
use crate::error::SolveError;
use crate::expr::rational::{Monomial, Poly, Rational};

/// Largest system solved by exact elimination.
pub const MAX_UNKNOWNS: usize = 40;

const RANK_TOLERANCE: f64 = 1e-9;

/// A linear system with polynomial entries.
#[derive(Debug, Clone)]
pub struct ClearedSystem {
    pub a: Vec<Vec<Poly>>,
    pub m: Vec<Poly>,
    /// Non-monomial denominator factors removed from the rows.
    pub factors: Vec<Poly>,
}

/// Split a denominator into `coef · content · rest`, with `rest` normalized
/// to a first coefficient of one.
fn split_denominator(d: &Poly) -> (f64, Monomial, Poly) {
    let content = d.content();
    let rest = d.div_monomial(&content);
    let coef = rest.first_coefficient().unwrap_or(1.0);
    (coef, content, rest.scale(1.0 / coef))
}

/// Multiply every row through by its common denominator.
pub fn clear_denominators(a: &[Vec<Rational>], m: &[Rational]) -> ClearedSystem {
    let mut factors: Vec<Poly> = Vec::new();
    let mut rows = Vec::with_capacity(a.len());
    let mut rhs = Vec::with_capacity(m.len());

    for (row, b) in a.iter().zip(m) {
        let entries: Vec<&Rational> = row.iter().chain(std::iter::once(b)).collect();
        let splits: Vec<Option<(f64, Monomial, Poly)>> = entries
            .iter()
            .map(|e| (!e.is_zero()).then(|| split_denominator(&e.den)))
            .collect();

        let lcm = splits
            .iter()
            .flatten()
            .fold(Monomial::one(), |acc, (_, mono, _)| acc.lcm(mono));
        let mut distinct: Vec<&Poly> = Vec::new();
        for (_, _, rest) in splits.iter().flatten() {
            if rest.as_constant().is_none() && !distinct.contains(&rest) {
                distinct.push(rest);
            }
        }

        let mut cleared: Vec<Poly> = entries
            .iter()
            .zip(&splits)
            .map(|(e, split)| match split {
                None => Poly::zero(),
                Some((coef, mono, rest)) => distinct
                    .iter()
                    .filter(|q| **q != rest)
                    .fold(
                        e.num.scale(1.0 / coef).mul_monomial(&lcm.div(mono)),
                        |p, q| p.mul(q),
                    ),
            })
            .collect();

        for q in distinct {
            if !factors.contains(q) {
                factors.push(q.clone());
            }
        }
        rhs.push(cleared.pop().unwrap_or_default());
        rows.push(cleared);
    }

    ClearedSystem {
        a: rows,
        m: rhs,
        factors,
    }
}

/// Laplace expansion along rows in order, memoized on the remaining columns.
struct MinorExpansion<'a> {
    a: &'a [Vec<Poly>],
    rows: Vec<usize>,
    memo: HashMap<u64, Poly>,
}

impl<'a> MinorExpansion<'a> {
    /// Expansion over all rows except `skip_row`.
    fn new(a: &'a [Vec<Poly>], skip_row: Option<usize>) -> Self {
        Self {
            a,
            rows: (0..a.len()).filter(|&r| Some(r) != skip_row).collect(),
            memo: HashMap::new(),
        }
    }

    /// Determinant of the remaining rows restricted to the columns in `mask`.
    fn minor(&mut self, mask: u64) -> Poly {
        if mask == 0 {
            return Poly::constant(1.0);
        }
        if let Some(p) = self.memo.get(&mask) {
            return p.clone();
        }
        let a = self.a;
        let depth = self.rows.len() - mask.count_ones() as usize;
        let row = &a[self.rows[depth]];

        let mut acc = Poly::zero();
        let mut position = 0;
        for (col, entry) in row.iter().enumerate() {
            let bit = 1u64 << col;
            if mask & bit == 0 {
                continue;
            }
            if !entry.is_zero() {
                let sub = self.minor(mask & !bit);
                if !sub.is_zero() {
                    let term = entry.mul(&sub);
                    acc = if position % 2 == 0 {
                        acc.add(&term)
                    } else {
                        acc.sub(&term)
                    };
                }
            }
            position += 1;
        }
        self.memo.insert(mask, acc.clone());
        acc
    }
}

fn full_mask(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// Deterministic sample values for the atoms, away from zero and from the
/// real axis.
fn probe_point(n_atoms: usize) -> Vec<Complex64> {
    (0..n_atoms)
        .map(|k| {
            let k = k as f64 + 1.0;
            Complex64::new(
                1.0 + (k * 0.754_877_666).fract(),
                0.3 + 0.5 * (k * 0.569_840_291).fract(),
            )
        })
        .collect()
}

/// Distinguish an inconsistent system from an underdetermined one by
/// comparing the numeric ranks of A and [A | M] at a sample point.
fn classify_singular(sys: &ClearedSystem, n_atoms: usize) -> SolveError {
    let point = probe_point(n_atoms);
    let a: Vec<Vec<Complex64>> = sys
        .a
        .iter()
        .map(|row| row.iter().map(|p| p.eval(&point)).collect())
        .collect();
    let augmented: Vec<Vec<Complex64>> = a
        .iter()
        .zip(&sys.m)
        .map(|(row, b)| {
            let mut r = row.clone();
            r.push(b.eval(&point));
            r
        })
        .collect();
    let rank_a = dense::rank(&a, RANK_TOLERANCE);
    let rank_aug = dense::rank(&augmented, RANK_TOLERANCE);
    tracing::debug!(rank_a, rank_aug, "determinant vanishes identically");
    if rank_a < rank_aug {
        SolveError::SingularSystem
    } else {
        SolveError::NonUniqueSystem
    }
}

/// Solve `a·x = m` exactly. `n_atoms` is the size of the atom table the
/// entries were built over.
pub fn solve(a: &[Vec<Rational>], m: &[Rational], n_atoms: usize) -> Result<Vec<Rational>, SolveError> {
    let n = a.len();
    if n > MAX_UNKNOWNS {
        return Err(SolveError::TooLarge {
            size: n,
            limit: MAX_UNKNOWNS,
        });
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let sys = clear_denominators(a, m);
    let det = MinorExpansion::new(&sys.a, None).minor(full_mask(n));
    if det.is_zero() {
        return Err(classify_singular(&sys, n_atoms));
    }
    tracing::debug!(terms = det.len(), factors = sys.factors.len(), "determinant expanded");

    // det(A_i) = sum_k m_k · (-1)^(k+i) · minor(k, i)
    let mut numerators = vec![Poly::zero(); n];
    for (k, mk) in sys.m.iter().enumerate() {
        if mk.is_zero() {
            continue;
        }
        let mut expansion = MinorExpansion::new(&sys.a, Some(k));
        for (i, num) in numerators.iter_mut().enumerate() {
            let minor = expansion.minor(full_mask(n) & !(1u64 << i));
            if minor.is_zero() {
                continue;
            }
            let term = mk.mul(&minor);
            *num = if (k + i) % 2 == 0 {
                num.add(&term)
            } else {
                num.sub(&term)
            };
        }
    }

    Ok(numerators
        .into_iter()
        .map(|num| {
            let mut x = Rational::new(num, det.clone());
            for f in &sys.factors {
                x.cancel_factor(f);
            }
            x
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::rational::AtomTable;
    use crate::expr::Expr;

    fn rationals(rows: &[Vec<Expr>], atoms: &mut AtomTable) -> Vec<Vec<Rational>> {
        rows.iter()
            .map(|r| r.iter().map(|e| Rational::from_expr(e, atoms)).collect())
            .collect()
    }

    #[test]
    fn test_numeric_2x2() {
        let mut atoms = AtomTable::new();
        let a = rationals(
            &[
                vec![Expr::num(2.0), Expr::num(1.0)],
                vec![Expr::num(1.0), Expr::num(3.0)],
            ],
            &mut atoms,
        );
        let m = vec![Rational::constant(3.0), Rational::constant(5.0)];
        let x = solve(&a, &m, atoms.len()).unwrap();
        let x0 = x[0].num.as_constant().unwrap() / x[0].den.as_constant().unwrap();
        let x1 = x[1].num.as_constant().unwrap() / x[1].den.as_constant().unwrap();
        assert!((x0 - 0.8).abs() < 1e-12);
        assert!((x1 - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_voltage_divider() {
        // Node 1 driven by V, R1 from 1 to 2, R2 from 2 to ground.
        let mut atoms = AtomTable::new();
        let (g1, g2) = (Expr::sym("R1").recip(), Expr::sym("R2").recip());
        let rows = vec![
            vec![g1.clone(), -g1.clone(), Expr::one()],
            vec![-g1.clone(), g1 + g2, Expr::zero()],
            vec![Expr::one(), Expr::zero(), Expr::zero()],
        ];
        let a = rationals(&rows, &mut atoms);
        let v = Rational::from_expr(&Expr::sym("V"), &mut atoms);
        let m = vec![Rational::zero(), Rational::zero(), v];
        let x = solve(&a, &m, atoms.len()).unwrap();

        let expected = Expr::sym("V") * Expr::sym("R2") / (Expr::sym("R1") + Expr::sym("R2"));
        let e = Rational::from_expr(&expected, &mut atoms);
        let mut point = vec![Complex64::new(0.0, 0.0); atoms.len()];
        point[atoms.index_of(&Expr::sym("R1")).unwrap()] = Complex64::new(1000.0, 0.0);
        point[atoms.index_of(&Expr::sym("R2")).unwrap()] = Complex64::new(3000.0, 0.0);
        point[atoms.index_of(&Expr::sym("V")).unwrap()] = Complex64::new(2.0, 0.0);
        assert!((x[1].eval(&point) - e.eval(&point)).norm() < 1e-12);
        // the row-clearing factor R1 + R2 must not survive in both parts
        assert!(x[1].den.len() <= 2);
    }

    #[test]
    fn test_singular_and_non_unique() {
        let mut atoms = AtomTable::new();
        let x = Expr::sym("X");
        let a = rationals(
            &[vec![x.clone(), x.clone()], vec![x.clone(), x.clone()]],
            &mut atoms,
        );
        let consistent = vec![Rational::constant(1.0), Rational::constant(1.0)];
        assert_eq!(
            solve(&a, &consistent, atoms.len()).unwrap_err(),
            SolveError::NonUniqueSystem
        );
        let inconsistent = vec![Rational::constant(1.0), Rational::constant(2.0)];
        assert_eq!(
            solve(&a, &inconsistent, atoms.len()).unwrap_err(),
            SolveError::SingularSystem
        );
    }
}
