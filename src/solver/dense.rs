//! Dense numeric elimination with partial pivoting.
//!
//! Used for the optimizer's normal equations and for numeric rank checks of
//! a symbolic system evaluated at a sample point. Suitable for small systems
//! only.

use num_complex::Complex64;

/// Solve `a·x = b`. Returns `None` if a pivot vanishes.
pub fn solve_real(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = a.len();
    if n == 0 {
        return Some(Vec::new());
    }

    // Build augmented matrix [A | b]
    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .zip(b)
        .map(|(row, &bi)| {
            let mut r = row.clone();
            r.push(bi);
            r
        })
        .collect();

    let scale = aug
        .iter()
        .flat_map(|r| r[..n].iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        return None;
    }

    // Forward elimination with partial pivoting
    for k in 0..n {
        let mut max_val = aug[k][k].abs();
        let mut max_row = k;
        for (i, row) in aug.iter().enumerate().skip(k + 1) {
            let v = row[k].abs();
            if v > max_val {
                max_val = v;
                max_row = i;
            }
        }

        if max_val <= 1e-15 * scale {
            return None;
        }

        if max_row != k {
            aug.swap(k, max_row);
        }

        let pivot_row = aug[k].clone();
        for row in aug.iter_mut().skip(k + 1) {
            let factor = row[k] / pivot_row[k];
            row[k] = 0.0;
            for j in (k + 1)..=n {
                row[j] -= factor * pivot_row[j];
            }
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = aug[i][n];
        for j in (i + 1)..n {
            sum -= aug[i][j] * x[j];
        }
        x[i] = sum / aug[i][i];
    }
    Some(x)
}

/// Numeric rank of a complex matrix (rows may have any common length).
///
/// Each row is scaled to unit max-norm first, so rows stamped with very
/// different component magnitudes compare fairly.
pub fn rank(rows: &[Vec<Complex64>], tolerance: f64) -> usize {
    let mut m: Vec<Vec<Complex64>> = rows
        .iter()
        .filter_map(|row| {
            let norm = row.iter().fold(0.0f64, |acc, v| acc.max(v.norm()));
            (norm > 0.0).then(|| row.iter().map(|v| *v / norm).collect())
        })
        .collect();
    let ncols = m.first().map_or(0, Vec::len);

    let mut rank = 0;
    for col in 0..ncols {
        if rank == m.len() {
            break;
        }
        let (pivot_row, pivot_val) = m
            .iter()
            .enumerate()
            .skip(rank)
            .map(|(i, r)| (i, r[col].norm()))
            .fold((rank, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if pivot_val <= tolerance {
            continue;
        }
        m.swap(rank, pivot_row);
        let pivot = m[rank].clone();
        for row in m.iter_mut().skip(rank + 1) {
            let factor = row[col] / pivot[col];
            for j in col..ncols {
                row[j] -= factor * pivot[j];
            }
        }
        rank += 1;
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_solve_real_2x2() {
        // [[2, 1], [1, 3]] x = [3, 5] -> x = [0.8, 1.4]
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve_real(&a, &[3.0, 5.0]).unwrap();
        assert_abs_diff_eq!(x[0], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.4, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_real_needs_pivoting() {
        let a = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let x = solve_real(&a, &[2.0, 3.0]).unwrap();
        assert_abs_diff_eq!(x[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_real_singular() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(solve_real(&a, &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_rank() {
        let c = |re: f64| Complex64::new(re, 0.0);
        let full = vec![vec![c(1.0), c(2.0)], vec![c(3.0), c(4.0)]];
        assert_eq!(rank(&full, 1e-9), 2);
        let deficient = vec![vec![c(1.0), c(2.0)], vec![c(1e6), c(2e6)]];
        assert_eq!(rank(&deficient, 1e-9), 1);
        let augmented = vec![
            vec![c(1.0), c(2.0), c(0.0)],
            vec![c(1e6), c(2e6), c(1.0)],
        ];
        assert_eq!(rank(&augmented, 1e-9), 2);
    }
}
