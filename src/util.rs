//! Small numeric helpers shared across the crate.

use crate::{Error, Result};

/// Largest magnitude used as a stand-in for infinity in guarded logarithms.
pub(crate) const MAX_REAL: f64 = 1e300;

/// Smallest magnitude used as a stand-in for zero in guarded logarithms.
pub(crate) const MIN_REAL: f64 = 1e-300;

/// `-1`, `0` or `+1`.
#[inline]
pub(crate) fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Round half up: `floor(x + 0.5)`.
#[inline]
pub(crate) fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Interpret `value` as a class label in `0..classes`.
///
/// Returns `None` for labels that round outside the range.
#[inline]
pub(crate) fn class_label(value: f64, classes: usize) -> Option<usize> {
    if !value.is_finite() {
        return None;
    }
    let k = round_half_up(value);
    if k >= 0 && (k as usize) < classes {
        Some(k as usize)
    } else {
        None
    }
}

/// Cross-entropy term `t * ln(t / z)` guarded against division by zero and overflow.
pub fn safe_cross_entropy(t: f64, z: f64) -> f64 {
    if t == 0.0 {
        return 0.0;
    }
    let r = if z.abs() > 1.0 {
        let q = t / z;
        if q == 0.0 {
            MIN_REAL
        } else {
            q
        }
    } else if z == 0.0 || t.abs() >= MAX_REAL * z.abs() {
        MAX_REAL
    } else {
        t / z
    };
    t * r.ln()
}

/// Index of the first maximum.
#[inline]
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += alpha * x`.
#[inline]
pub(crate) fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

#[inline]
pub(crate) fn norm2_squared(a: &[f64]) -> f64 {
    dot(a, a)
}

pub(crate) fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} must be finite, got {value}"
        )))
    }
}

pub(crate) fn ensure_len(name: &str, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidShape(format!(
            "{name} len {got} does not match expected {expected}"
        )))
    }
}
