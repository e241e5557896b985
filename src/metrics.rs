//! Error metrics.
//!
//! Metrics are evaluation helpers (they do not participate in training).
//! [`ErrorAccumulator`] folds one `(output, desired)` pair at a time into five
//! summary numbers, reported as a [`CvReport`]:
//!
//! - relative classification error (argmax mismatches / samples),
//! - average cross-entropy in bits per sample (classifiers only),
//! - RMS error over all outputs,
//! - average absolute error over all outputs,
//! - average relative error over non-zero targets.
//!
//! Networks and ensembles expose the same error functions on whole datasets.

use std::f64::consts::LN_2;

use crate::data::Dataset;
use crate::network::{forward_pass, Params};
use crate::topology::Topology;
use crate::util::{argmax, class_label, safe_cross_entropy, MAX_REAL};
use crate::{Error, Network, Result, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What the accumulated outputs represent.
pub enum Task {
    /// Probabilities over `classes` classes; the desired value is a class label.
    Classification { classes: usize },
    /// `outputs` real values; the desired value is a target vector.
    Regression { outputs: usize },
}

impl Task {
    pub fn of(topology: &Topology) -> Self {
        if topology.is_classifier() {
            Task::Classification {
                classes: topology.output_count(),
            }
        } else {
            Task::Regression {
                outputs: topology.output_count(),
            }
        }
    }

    #[inline]
    fn outputs(self) -> usize {
        match self {
            Task::Classification { classes } => classes,
            Task::Regression { outputs } => outputs,
        }
    }

    /// Length of the `desired` slice passed to [`ErrorAccumulator::accumulate`].
    #[inline]
    pub fn desired_len(self) -> usize {
        match self {
            Task::Classification { .. } => 1,
            Task::Regression { outputs } => outputs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Summary error numbers of a model on a dataset.
pub struct CvReport {
    pub rel_cls_error: f64,
    /// Bits per sample.
    pub avg_ce: f64,
    pub rms_error: f64,
    pub avg_error: f64,
    pub avg_rel_error: f64,
}

#[derive(Debug, Clone)]
pub struct ErrorAccumulator {
    task: Task,
    misclassified: usize,
    ce: f64,
    squared: f64,
    absolute: f64,
    relative: f64,
    count: usize,
    rel_count: usize,
}

impl ErrorAccumulator {
    pub fn new(task: Task) -> Result<Self> {
        if task.outputs() == 0 {
            return Err(Error::InvalidConfig(
                "error accumulator needs at least one output".to_owned(),
            ));
        }
        Ok(Self {
            task,
            misclassified: 0,
            ce: 0.0,
            squared: 0.0,
            absolute: 0.0,
            relative: 0.0,
            count: 0,
            rel_count: 0,
        })
    }

    #[inline]
    pub fn task(&self) -> Task {
        self.task
    }

    /// Number of samples accumulated so far.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of argmax mismatches so far.
    #[inline]
    pub fn misclassified(&self) -> usize {
        self.misclassified
    }

    /// Fold one sample in.
    ///
    /// Panics if `y.len()` or `desired.len()` do not match the task
    /// (see [`Task::desired_len`]).
    pub fn accumulate(&mut self, y: &[f64], desired: &[f64]) {
        assert_eq!(y.len(), self.task.outputs(), "output length mismatch");
        assert_eq!(
            desired.len(),
            self.task.desired_len(),
            "desired length mismatch"
        );

        match self.task {
            Task::Classification { classes } => {
                let label = class_label(desired[0], classes);
                if Some(argmax(y)) != label {
                    self.misclassified += 1;
                }
                match label {
                    Some(k) if y[k] > 0.0 => self.ce -= y[k].ln(),
                    _ => self.ce += MAX_REAL.ln(),
                }
                for (j, &v) in y.iter().enumerate() {
                    let ev = if Some(j) == label { 1.0 } else { 0.0 };
                    self.squared += (v - ev) * (v - ev);
                    self.absolute += (v - ev).abs();
                    if ev != 0.0 {
                        self.relative += ((v - ev) / ev).abs();
                        self.rel_count += 1;
                    }
                }
            }
            Task::Regression { .. } => {
                if argmax(y) != argmax(desired) {
                    self.misclassified += 1;
                }
                for (&v, &ev) in y.iter().zip(desired) {
                    self.squared += (v - ev) * (v - ev);
                    self.absolute += (v - ev).abs();
                    if ev != 0.0 {
                        self.relative += ((v - ev) / ev).abs();
                        self.rel_count += 1;
                    }
                }
            }
        }
        self.count += 1;
    }

    /// Normalize the sums. An empty accumulator reports all zeros.
    pub fn finish(&self) -> CvReport {
        let mut report = CvReport::default();
        if self.count > 0 {
            let n = self.count as f64;
            let cells = n * self.task.outputs() as f64;
            report.rel_cls_error = self.misclassified as f64 / n;
            if let Task::Classification { .. } = self.task {
                report.avg_ce = self.ce / (n * LN_2);
            }
            report.rms_error = (self.squared / cells).sqrt();
            report.avg_error = self.absolute / cells;
        }
        if self.rel_count > 0 {
            report.avg_rel_error = self.relative / self.rel_count as f64;
        }
        report
    }
}

/// Anything that maps an input row to post-processed outputs.
pub(crate) trait Predictor {
    fn topology(&self) -> &Topology;
    fn workspace(&self) -> Workspace;
    /// Writes the outputs into `ws.y`.
    fn predict(&self, x: &[f64], ws: &mut Workspace);
}

impl Predictor for Network {
    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn workspace(&self) -> Workspace {
        Network::workspace(self)
    }

    fn predict(&self, x: &[f64], ws: &mut Workspace) {
        self.forward(x, ws);
    }
}

/// Run `model` over `data` and fold every row into an accumulator.
pub(crate) fn accumulate_errors<M: Predictor>(model: &M, data: &Dataset) -> Result<ErrorAccumulator> {
    let topology = model.topology();
    data.validate_for(topology)?;
    let nin = topology.input_count();
    let mut acc = ErrorAccumulator::new(Task::of(topology))?;
    let mut ws = model.workspace();
    for r in 0..data.len() {
        let row = data.row(r);
        model.predict(&row[..nin], &mut ws);
        acc.accumulate(&ws.y, &row[nin..]);
    }
    Ok(acc)
}

impl Network {
    /// All five summary errors on `data`.
    pub fn all_errors(&self, data: &Dataset) -> Result<CvReport> {
        Ok(accumulate_errors(self, data)?.finish())
    }

    /// Number of samples whose argmax output differs from the true class.
    pub fn classification_error_count(&self, data: &Dataset) -> Result<usize> {
        Ok(accumulate_errors(self, data)?.misclassified())
    }

    pub fn relative_classification_error(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.rel_cls_error)
    }

    /// Average cross-entropy in bits per sample; 0 for regression networks.
    pub fn avg_cross_entropy(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.avg_ce)
    }

    pub fn rms_error(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.rms_error)
    }

    pub fn avg_error(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.avg_error)
    }

    pub fn avg_relative_error(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.avg_rel_error)
    }

    /// Sum over samples of `0.5 * |y - desired|^2`, with one-hot desired vectors for classifiers.
    pub fn error(&self, data: &Dataset) -> Result<f64> {
        data.validate_for(&self.topology)?;
        Ok(least_squares_error(self.params(), data, &mut self.workspace()))
    }

    /// Cross-entropy for classifiers (`sum -ln p[label]`), [`Network::error`] otherwise.
    pub fn error_natural(&self, data: &Dataset) -> Result<f64> {
        data.validate_for(&self.topology)?;
        Ok(natural_error(self.params(), data, &mut self.workspace()))
    }
}

/// [`Network::error`] for borrowed parameters on validated data.
pub(crate) fn least_squares_error(p: Params<'_>, data: &Dataset, ws: &mut Workspace) -> f64 {
    let topo = p.topology;
    let nin = topo.input_count();
    let nout = topo.output_count();
    let mut e = 0.0;
    for r in 0..data.len() {
        let row = data.row(r);
        forward_pass(p, &row[..nin], &mut ws.neurons, &mut ws.dfdnet, &mut ws.y);
        if topo.is_classifier() {
            let label = class_label(row[nin], nout);
            for (i, &yi) in ws.y.iter().enumerate() {
                let t = if Some(i) == label { 1.0 } else { 0.0 };
                e += 0.5 * (yi - t) * (yi - t);
            }
        } else {
            for (yi, t) in ws.y.iter().zip(&row[nin..]) {
                e += 0.5 * (yi - t) * (yi - t);
            }
        }
    }
    e
}

/// [`Network::error_natural`] for borrowed parameters on validated data.
pub(crate) fn natural_error(p: Params<'_>, data: &Dataset, ws: &mut Workspace) -> f64 {
    let topo = p.topology;
    if !topo.is_classifier() {
        return least_squares_error(p, data, ws);
    }
    let nin = topo.input_count();
    let nout = topo.output_count();
    let mut e = 0.0;
    for r in 0..data.len() {
        let row = data.row(r);
        forward_pass(p, &row[..nin], &mut ws.neurons, &mut ws.dfdnet, &mut ws.y);
        if let Some(k) = class_label(row[nin], nout) {
            e += safe_cross_entropy(1.0, ws.y[k]);
        }
    }
    e
}
