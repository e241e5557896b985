//! Training matrices.
//!
//! A [`Dataset`] is a contiguous row-major matrix. Its row layout depends on the
//! network it is used with:
//!
//! - regression: `nin` inputs followed by `nout` targets,
//! - softmax classifier: `nin` inputs followed by one class label in `0..nout`,
//!   stored as a float and rounded half-up.

use crate::topology::Topology;
use crate::util::class_label;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    values: Vec<f64>,
    len: usize,
    cols: usize,
}

impl Dataset {
    /// Build a dataset from a flat buffer with shape `(len, cols)`.
    pub fn from_flat(values: Vec<f64>, cols: usize) -> Result<Self> {
        if cols == 0 {
            return Err(Error::InvalidData("cols must be > 0".to_owned()));
        }
        if !values.len().is_multiple_of(cols) {
            return Err(Error::InvalidData(format!(
                "values length {} is not divisible by cols {cols}",
                values.len()
            )));
        }
        let len = values.len() / cols;
        Ok(Self { values, len, cols })
    }

    /// Build a dataset from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if cols == 0 {
            return Err(Error::InvalidData(
                "rows must be non-empty and have at least one column".to_owned(),
            ));
        }
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::InvalidData(format!(
                    "row {i} has len {}, expected {cols}",
                    row.len()
                )));
            }
            values.extend_from_slice(row);
        }
        Self::from_flat(values, cols)
    }

    /// Cut a scalar series into overlapping windows of `width` values.
    ///
    /// Window `r` starts at `r * step`; trailing values that do not fill a whole
    /// window are dropped. With a regression network of `nin` inputs and one
    /// output, `width = nin + 1` turns a series into next-value prediction rows.
    pub fn from_windows(series: &[f64], width: usize, step: usize) -> Result<Self> {
        if width == 0 || step == 0 {
            return Err(Error::InvalidData(format!(
                "window width and step must be > 0, got {width} and {step}"
            )));
        }
        if series.len() < width {
            return Err(Error::InvalidData(format!(
                "series of length {} is shorter than one window ({width})",
                series.len()
            )));
        }
        let rows = (series.len() - width) / step + 1;
        let mut values = Vec::with_capacity(rows * width);
        for r in 0..rows {
            let start = r * step;
            values.extend_from_slice(&series[start..start + width]);
        }
        Self::from_flat(values, width)
    }

    #[inline]
    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    /// Returns the `idx`-th row.
    ///
    /// Panics if `idx >= len`.
    pub fn row(&self, idx: usize) -> &[f64] {
        let start = idx * self.cols;
        &self.values[start..start + self.cols]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Copy the rows at `indices` (repeats allowed) into a new dataset.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        let mut values = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            values.extend_from_slice(self.row(i));
        }
        Dataset {
            values,
            len: indices.len(),
            cols: self.cols,
        }
    }

    /// Per-column mean and population standard deviation of the first `cols` columns.
    pub(crate) fn column_stats(&self, cols: usize) -> (Vec<f64>, Vec<f64>) {
        debug_assert!(cols <= self.cols);
        let mut means = vec![0.0; cols];
        let mut sigmas = vec![0.0; cols];
        if self.len == 0 {
            return (means, sigmas);
        }
        let n = self.len as f64;
        for r in 0..self.len {
            for (m, &v) in means.iter_mut().zip(self.row(r)) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }
        for r in 0..self.len {
            for ((s, &m), &v) in sigmas.iter_mut().zip(&means).zip(self.row(r)) {
                *s += (v - m) * (v - m);
            }
        }
        for s in &mut sigmas {
            *s = (*s / n).sqrt();
        }
        (means, sigmas)
    }

    /// Check that every row fits `topology`: width, finiteness, and class labels.
    pub(crate) fn validate_for(&self, topology: &Topology) -> Result<()> {
        let width = topology.row_width();
        if self.cols != width {
            return Err(Error::InvalidShape(format!(
                "dataset has {} columns, network expects {width}",
                self.cols
            )));
        }
        if let Some(pos) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidData(format!(
                "dataset value at row {} col {} is not finite",
                pos / self.cols,
                pos % self.cols
            )));
        }
        if topology.is_classifier() {
            let nin = topology.input_count();
            let classes = topology.output_count();
            for r in 0..self.len {
                let label = self.row(r)[nin];
                if class_label(label, classes).is_none() {
                    return Err(Error::InvalidData(format!(
                        "row {r} has class label {label}, expected 0..{classes}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_flat_validates_shapes() {
        assert!(Dataset::from_flat(vec![0.0, 1.0, 2.0, 3.0], 2).is_ok());
        assert!(Dataset::from_flat(vec![0.0, 1.0, 2.0], 2).is_err());
        assert!(Dataset::from_flat(vec![], 0).is_err());
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let err = Dataset::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn windows_overlap_by_step() {
        let series: Vec<f64> = (0..7).map(f64::from).collect();
        let d = Dataset::from_windows(&series, 3, 2).unwrap();
        assert_eq!(d.len(), 3);
        assert_eq!(d.row(0), &[0.0, 1.0, 2.0]);
        assert_eq!(d.row(1), &[2.0, 3.0, 4.0]);
        assert_eq!(d.row(2), &[4.0, 5.0, 6.0]);
        assert!(Dataset::from_windows(&series, 8, 1).is_err());
    }

    #[test]
    fn column_stats_are_population_moments() {
        let d = Dataset::from_rows(&[vec![1.0, 5.0], vec![3.0, 5.0]]).unwrap();
        let (means, sigmas) = d.column_stats(2);
        assert_eq!(means, vec![2.0, 5.0]);
        assert_eq!(sigmas, vec![1.0, 0.0]);
    }

    #[test]
    fn select_repeats_rows() {
        let d = Dataset::from_rows(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let s = d.select(&[2, 2, 0]);
        assert_eq!(s.as_slice(), &[3.0, 3.0, 1.0]);
    }
}
