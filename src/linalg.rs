//! Dense linear algebra used by the second-order trainer.
//!
//! Only what Levenberg-Marquardt needs: a row-major matrix, an upper
//! Cholesky factorization `A = U^T U`, the matching solve and an in-place
//! inverse of an upper-triangular factor.

use std::ops::{Index, IndexMut};

use crate::{Error, Result};

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        let start = i * self.cols;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        let start = i * self.cols;
        &mut self.data[start..start + self.cols]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Resize to `(rows, cols)` and zero every entry. Reuses the allocation.
    pub fn reset(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.data.clear();
        self.data.resize(rows * cols, 0.0);
    }

    pub fn add_diagonal(&mut self, value: f64) {
        let n = self.rows.min(self.cols);
        for i in 0..n {
            self[(i, i)] += value;
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    #[inline]
    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.cols + j]
    }
}

/// Factor a symmetric matrix in place as `A = U^T U`.
///
/// Reads only the upper triangle. On success the upper triangle holds `U` and
/// the strict lower triangle is zeroed. Returns `false` if `A` is not
/// numerically positive definite; the contents are then unspecified.
pub fn cholesky_upper(a: &mut Matrix) -> bool {
    assert_eq!(a.rows(), a.cols(), "cholesky needs a square matrix");
    let n = a.rows();

    for j in 0..n {
        let mut s = a[(j, j)];
        for k in 0..j {
            let u = a[(k, j)];
            s -= u * u;
        }
        if !(s > 0.0 && s.is_finite()) {
            return false;
        }
        let ujj = s.sqrt();
        a[(j, j)] = ujj;

        for i in (j + 1)..n {
            let mut v = a[(j, i)];
            for k in 0..j {
                v -= a[(k, j)] * a[(k, i)];
            }
            a[(j, i)] = v / ujj;
        }
    }

    for i in 1..n {
        for j in 0..i {
            a[(i, j)] = 0.0;
        }
    }
    true
}

/// Solve `U^T U x = b` given the factor from [`cholesky_upper`].
pub fn cholesky_solve_upper(u: &Matrix, b: &[f64], x: &mut [f64]) {
    let n = u.rows();
    assert_eq!(b.len(), n);
    assert_eq!(x.len(), n);

    // U^T y = b
    for i in 0..n {
        let mut v = b[i];
        for k in 0..i {
            v -= u[(k, i)] * x[k];
        }
        x[i] = v / u[(i, i)];
    }
    // U x = y
    for i in (0..n).rev() {
        let mut v = x[i];
        for k in (i + 1)..n {
            v -= u[(i, k)] * x[k];
        }
        x[i] = v / u[(i, i)];
    }
}

/// Invert an upper-triangular matrix in place. The strict lower triangle is ignored.
pub fn invert_upper_triangular(a: &mut Matrix) -> Result<()> {
    assert_eq!(a.rows(), a.cols(), "triangular inverse needs a square matrix");
    let n = a.rows();

    for j in 0..n {
        let d = a[(j, j)];
        if d == 0.0 || !d.is_finite() {
            return Err(Error::InvalidData(format!(
                "triangular matrix is singular at diagonal {j}"
            )));
        }
        a[(j, j)] = 1.0 / d;
        let ajj = -a[(j, j)];

        // Column j above the diagonal: inv(U[0..j, 0..j]) * U[0..j, j], scaled.
        for i in 0..j {
            let mut v = 0.0;
            for k in i..j {
                v += a[(i, k)] * a[(k, j)];
            }
            a[(i, j)] = v * ajj;
        }
    }

    for i in 0..n {
        for j in i..n {
            if !a[(i, j)].is_finite() {
                return Err(Error::InvalidData(
                    "triangular inverse overflowed".to_owned(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd3() -> Matrix {
        let mut a = Matrix::zeros(3, 3);
        let v = [[4.0, 2.0, 0.6], [2.0, 5.0, 1.0], [0.6, 1.0, 3.0]];
        for i in 0..3 {
            for j in 0..3 {
                a[(i, j)] = v[i][j];
            }
        }
        a
    }

    #[test]
    fn cholesky_reconstructs_matrix() {
        let a = spd3();
        let mut u = a.clone();
        assert!(cholesky_upper(&mut u));
        for i in 0..3 {
            for j in 0..3 {
                let mut v = 0.0;
                for k in 0..3 {
                    v += u[(k, i)] * u[(k, j)];
                }
                assert!((v - a[(i, j)]).abs() < 1e-12, "({i},{j}): {v}");
            }
        }
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let mut a = Matrix::zeros(2, 2);
        a[(0, 0)] = 1.0;
        a[(0, 1)] = 2.0;
        a[(1, 0)] = 2.0;
        a[(1, 1)] = 1.0;
        assert!(!cholesky_upper(&mut a));
    }

    #[test]
    fn solve_matches_rhs() {
        let a = spd3();
        let mut u = a.clone();
        assert!(cholesky_upper(&mut u));
        let b = [1.0, -2.0, 0.5];
        let mut x = [0.0; 3];
        cholesky_solve_upper(&u, &b, &mut x);
        for i in 0..3 {
            let ax: f64 = (0..3).map(|j| a[(i, j)] * x[j]).sum();
            assert!((ax - b[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn triangular_inverse_is_inverse() {
        let mut u = spd3();
        assert!(cholesky_upper(&mut u));
        let mut inv = u.clone();
        invert_upper_triangular(&mut inv).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let mut v = 0.0;
                for k in 0..3 {
                    if i <= k && k <= j {
                        v += u[(i, k)] * inv[(k, j)];
                    }
                }
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn triangular_inverse_rejects_zero_diagonal() {
        let mut a = Matrix::zeros(2, 2);
        a[(0, 0)] = 1.0;
        assert!(invert_upper_triangular(&mut a).is_err());
    }
}
