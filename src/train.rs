//! Batch trainers.
//!
//! Every trainer minimizes the dataset error plus `0.5 * decay * |w|^2`,
//! restarts from `restarts` random initializations and keeps the best
//! weights. Data are validated and the preprocessor is initialized from the
//! training set before any optimization work starts.

use std::ops::{AddAssign, ControlFlow};

use log::{debug, trace, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::gradient::batch_gradient;
use crate::hessian::{batch_hessian, HessianBuffers};
use crate::linalg::{cholesky_solve_upper, cholesky_upper, invert_upper_triangular, Matrix};
use crate::metrics::{least_squares_error, natural_error, ErrorAccumulator, Task};
use crate::network::Params;
use crate::optim::{Lbfgs, StoppingCriteria};
use crate::util::{axpy, norm2_squared, MAX_REAL};
use crate::{CvReport, Dataset, Error, Network, Result, Workspace};

/// Weight decay below this value is raised to it.
pub const MIN_DECAY: f64 = 0.001;

const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.3;
const LM_STEP_TOL: f64 = 0.001;

/// An early-stopping run never stops before this iteration.
const ES_MIN_ITERATIONS: usize = 30;
/// Stop once the iteration count exceeds this multiple of the best iteration.
const ES_PATIENCE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Work counters of a training call.
pub struct TrainReport {
    /// Gradient evaluations over the whole training set.
    pub ngrad: usize,
    /// Hessian evaluations.
    pub nhess: usize,
    /// Cholesky factorizations.
    pub ncholesky: usize,
}

impl AddAssign for TrainReport {
    fn add_assign(&mut self, rhs: Self) {
        self.ngrad += rhs.ngrad;
        self.nhess += rhs.nhess;
        self.ncholesky += rhs.ncholesky;
    }
}

fn validate_decay_restarts(decay: f64, restarts: usize) -> Result<()> {
    if !(decay.is_finite() && decay >= 0.0) {
        return Err(Error::InvalidConfig(format!(
            "decay must be finite and >= 0, got {decay}"
        )));
    }
    if restarts == 0 {
        return Err(Error::InvalidConfig("restarts must be > 0".to_owned()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LbfgsConfig {
    pub decay: f64,
    pub restarts: usize,
    pub stopping: StoppingCriteria,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            decay: MIN_DECAY,
            restarts: 2,
            stopping: StoppingCriteria::default(),
        }
    }
}

impl LbfgsConfig {
    pub fn validate(&self) -> Result<()> {
        validate_decay_restarts(self.decay, self.restarts)?;
        self.stopping.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LmConfig {
    pub decay: f64,
    pub restarts: usize,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            decay: MIN_DECAY,
            restarts: 2,
        }
    }
}

impl LmConfig {
    pub fn validate(&self) -> Result<()> {
        validate_decay_restarts(self.decay, self.restarts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EarlyStoppingConfig {
    pub decay: f64,
    pub restarts: usize,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            decay: MIN_DECAY,
            restarts: 2,
        }
    }
}

impl EarlyStoppingConfig {
    pub fn validate(&self) -> Result<()> {
        validate_decay_restarts(self.decay, self.restarts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Trainer selection for [`Network::train`], k-fold CV and bagging.
pub enum Algorithm {
    Lbfgs(LbfgsConfig),
    Lm(LmConfig),
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Lm(LmConfig::default())
    }
}

impl Algorithm {
    pub fn validate(&self) -> Result<()> {
        match self {
            Algorithm::Lbfgs(cfg) => cfg.validate(),
            Algorithm::Lm(cfg) => cfg.validate(),
        }
    }
}

/// `e + 0.5 * decay * |w|^2`, adding `decay * w` to `g`.
fn regularize(e: f64, decay: f64, w: &[f64], g: &mut [f64]) -> f64 {
    axpy(decay, w, g);
    e + 0.5 * decay * norm2_squared(w)
}

fn regularized_hessian(
    p: Params<'_>,
    data: &Dataset,
    ws: &mut Workspace,
    bufs: &mut HessianBuffers,
    g: &mut [f64],
    h: &mut Matrix,
    decay: f64,
) -> f64 {
    let e = batch_hessian(p, data, ws, bufs, g, h, false);
    h.add_diagonal(decay);
    regularize(e, decay, p.weights, g)
}

impl Network {
    #[inline]
    pub(crate) fn params_with<'a>(&'a self, weights: &'a [f64]) -> Params<'a> {
        Params {
            weights,
            ..self.params()
        }
    }

    pub(crate) fn check_training_set(&self, data: &Dataset) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidData(
                "training set must not be empty".to_owned(),
            ));
        }
        data.validate_for(&self.topology)
    }

    /// Train with the selected algorithm.
    pub fn train<R: Rng + ?Sized>(
        &mut self,
        data: &Dataset,
        algorithm: &Algorithm,
        rng: &mut R,
    ) -> Result<TrainReport> {
        match algorithm {
            Algorithm::Lbfgs(cfg) => self.train_lbfgs(data, cfg, rng),
            Algorithm::Lm(cfg) => self.train_lm(data, cfg, rng),
        }
    }

    /// L-BFGS on the natural error (cross-entropy for classifiers) with weight decay.
    pub fn train_lbfgs<R: Rng + ?Sized>(
        &mut self,
        data: &Dataset,
        cfg: &LbfgsConfig,
        rng: &mut R,
    ) -> Result<TrainReport> {
        cfg.validate()?;
        self.check_training_set(data)?;
        let decay = cfg.decay.max(MIN_DECAY);
        self.init_preprocessor(data)?;

        let wc = self.weight_count();
        let opt = Lbfgs::new(wc.min(10), cfg.stopping)?;
        let mut ws = self.workspace();
        let mut report = TrainReport::default();
        let mut best_e = f64::INFINITY;
        let mut best_w = self.weights.clone();
        let mut w = vec![0.0; wc];

        for restart in 0..cfg.restarts {
            self.randomize(rng);
            w.copy_from_slice(&self.weights);
            let run = opt.minimize(&mut w, |x, g| {
                report.ngrad += 1;
                let e = batch_gradient(self.params_with(x), data, &mut ws, g, true);
                regularize(e, decay, x, g)
            });
            let e = natural_error(self.params_with(&w), data, &mut ws)
                + 0.5 * decay * norm2_squared(&w);
            debug!(
                "lbfgs restart {restart}: error {e:.6} after {} iterations ({:?})",
                run.iterations, run.termination
            );
            if e < best_e {
                best_e = e;
                best_w.copy_from_slice(&w);
            }
        }

        self.weights = best_w;
        Ok(report)
    }

    /// Hybrid trainer: an L-BFGS warm-up on the least-squares error, then
    /// damped Newton steps on the exact Hessian, each accepted step polished
    /// by a short L-BFGS run in Cholesky-whitened coordinates.
    ///
    /// Fails with [`Error::Numerical`] if a Cholesky factor cannot be inverted.
    pub fn train_lm<R: Rng + ?Sized>(
        &mut self,
        data: &Dataset,
        cfg: &LmConfig,
        rng: &mut R,
    ) -> Result<TrainReport> {
        cfg.validate()?;
        self.check_training_set(data)?;
        let decay = cfg.decay.max(MIN_DECAY);
        self.init_preprocessor(data)?;

        let wc = self.weight_count();
        let warmup = Lbfgs::new(wc.min(5), StoppingCriteria::iterations(wc.max(25)))?;
        let polish = Lbfgs::new(wc, StoppingCriteria::iterations(5))?;

        let mut ws = self.workspace();
        let mut bufs = HessianBuffers::new(self.params());
        let mut report = TrainReport::default();
        let mut g = vec![0.0; wc];
        let mut gw = vec![0.0; wc];
        let mut h = Matrix::zeros(wc, wc);
        let mut hmod = Matrix::zeros(wc, wc);
        let mut w = vec![0.0; wc];
        let mut wnew = vec![0.0; wc];
        let mut wdir = vec![0.0; wc];
        let mut wt = vec![0.0; wc];
        let mut t = vec![0.0; wc];
        let mut best_e = f64::INFINITY;
        let mut best_w = self.weights.clone();

        for restart in 0..cfg.restarts {
            self.randomize(rng);
            w.copy_from_slice(&self.weights);
            warmup.minimize(&mut w, |x, grad| {
                report.ngrad += 1;
                let e = batch_gradient(self.params_with(x), data, &mut ws, grad, false);
                regularize(e, decay, x, grad)
            });

            let mut e = regularized_hessian(
                self.params_with(&w),
                data,
                &mut ws,
                &mut bufs,
                &mut g,
                &mut h,
                decay,
            );
            report.nhess += 1;
            let mut lambda: f64 = 0.001;
            let mut nu: f64 = 2.0;

            loop {
                if !lambda.is_finite() || lambda > MAX_REAL {
                    warn!("lm restart {restart}: damping overflowed, keeping current weights");
                    break;
                }

                hmod.clone_from(&h);
                hmod.add_diagonal(lambda);
                report.ncholesky += 1;
                if !cholesky_upper(&mut hmod) {
                    lambda *= LAMBDA_UP * nu;
                    nu *= 2.0;
                    continue;
                }
                cholesky_solve_upper(&hmod, &g, &mut wdir);
                for (n, (wi, di)) in wnew.iter_mut().zip(w.iter().zip(&wdir)) {
                    *n = wi - di;
                }

                let xnorm2 = norm2_squared(&wnew);
                let step_norm = norm2_squared(&wdir).sqrt();
                let enew = least_squares_error(self.params_with(&wnew), data, &mut ws)
                    + 0.5 * decay * xnorm2;
                trace!("lm restart {restart}: lambda {lambda:e}, step {step_norm:e}, error {enew:.6}");
                if step_norm < LM_STEP_TOL * (1.0 + xnorm2.sqrt()) {
                    w.copy_from_slice(&wnew);
                    break;
                }
                if !(enew <= e) {
                    // rejected: w is untouched, retry with more damping
                    lambda *= LAMBDA_UP * nu;
                    nu *= 2.0;
                    continue;
                }

                if let Err(err) = invert_upper_triangular(&mut hmod) {
                    warn!("lm restart {restart}: preconditioner inverse failed: {err}");
                    return Err(Error::Numerical {
                        message: format!("preconditioner inverse failed: {err}"),
                        report,
                    });
                }

                // Polish in t-space: w = wnew + U^-1 t.
                t.fill(0.0);
                polish.minimize(&mut t, |t, gt| {
                    report.ngrad += 1;
                    upper_times(&hmod, t, &wnew, &mut wt);
                    let e = batch_gradient(self.params_with(&wt), data, &mut ws, &mut gw, false);
                    let e = regularize(e, decay, &wt, &mut gw);
                    upper_transpose_times(&hmod, &gw, gt);
                    e
                });
                upper_times(&hmod, &t, &wnew, &mut w);

                e = regularized_hessian(
                    self.params_with(&w),
                    data,
                    &mut ws,
                    &mut bufs,
                    &mut g,
                    &mut h,
                    decay,
                );
                report.nhess += 1;
                lambda *= LAMBDA_DOWN;
                nu = 2.0;
            }

            let e = least_squares_error(self.params_with(&w), data, &mut ws)
                + 0.5 * decay * norm2_squared(&w);
            debug!("lm restart {restart}: error {e:.6}");
            if e < best_e {
                best_e = e;
                best_w.copy_from_slice(&w);
            }
        }

        self.weights = best_w;
        Ok(report)
    }

    /// L-BFGS with early stopping on a validation set.
    ///
    /// Each run keeps the weights with the lowest validation error seen so
    /// far and stops once it is past iteration 30 and 1.5 times past its
    /// best iteration. The run with the lowest validation error wins.
    pub fn train_es<R: Rng + ?Sized>(
        &mut self,
        train: &Dataset,
        validation: &Dataset,
        cfg: &EarlyStoppingConfig,
        rng: &mut R,
    ) -> Result<TrainReport> {
        cfg.validate()?;
        self.check_training_set(train)?;
        if validation.is_empty() {
            return Err(Error::InvalidData(
                "validation set must not be empty".to_owned(),
            ));
        }
        validation.validate_for(&self.topology)?;
        let decay = cfg.decay.max(MIN_DECAY);
        self.init_preprocessor(train)?;

        let wc = self.weight_count();
        let criteria = StoppingCriteria {
            epsx: 1e-6,
            ..StoppingCriteria::default()
        };
        let opt = Lbfgs::new(wc.min(10), criteria)?;
        let mut ws = self.workspace();
        let mut vws = self.workspace();
        let mut report = TrainReport::default();
        let mut best_verr = f64::INFINITY;
        let mut best_w = self.weights.clone();
        let mut w = vec![0.0; wc];
        let mut run_w = vec![0.0; wc];

        for restart in 0..cfg.restarts {
            self.randomize(rng);
            w.copy_from_slice(&self.weights);
            run_w.copy_from_slice(&w);
            let mut run_verr = least_squares_error(self.params_with(&w), validation, &mut vws);
            let mut run_best_it = 0;

            opt.minimize_with(
                &mut w,
                |x, g| {
                    report.ngrad += 1;
                    let e = batch_gradient(self.params_with(x), train, &mut ws, g, true);
                    regularize(e, decay, x, g)
                },
                |it, x, _| {
                    let verr = least_squares_error(self.params_with(x), validation, &mut vws);
                    if verr < run_verr {
                        run_verr = verr;
                        run_w.copy_from_slice(x);
                        run_best_it = it;
                    }
                    if it > ES_MIN_ITERATIONS && it as f64 > ES_PATIENCE * run_best_it as f64 {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                },
            );
            debug!("early stopping restart {restart}: validation error {run_verr:.6} at iteration {run_best_it}");
            if run_verr < best_verr {
                best_verr = run_verr;
                best_w.copy_from_slice(&run_w);
            }
        }

        self.weights = best_w;
        Ok(report)
    }
}

/// `out = base + U x` for the upper triangle of `u`.
fn upper_times(u: &Matrix, x: &[f64], base: &[f64], out: &mut [f64]) {
    for (i, o) in out.iter_mut().enumerate() {
        let row = u.row(i);
        let mut v = base[i];
        for j in i..x.len() {
            v += row[j] * x[j];
        }
        *o = v;
    }
}

/// `out = U^T x` for the upper triangle of `u`.
fn upper_transpose_times(u: &Matrix, x: &[f64], out: &mut [f64]) {
    out.fill(0.0);
    for (i, &xi) in x.iter().enumerate() {
        let row = u.row(i);
        for j in i..out.len() {
            out[j] += row[j] * xi;
        }
    }
}

/// K-fold cross-validation of `network`'s architecture.
///
/// Rows are assigned to `folds` folds at random. For every fold a copy of
/// `network` is trained on the other folds and evaluated on that one. Errors
/// are accumulated over all held-out rows. Requires `2 <= folds <= data.len()`.
pub fn kfold_cv<R: Rng + ?Sized>(
    network: &Network,
    data: &Dataset,
    algorithm: &Algorithm,
    folds: usize,
    rng: &mut R,
) -> Result<(TrainReport, CvReport)> {
    algorithm.validate()?;
    network.check_training_set(data)?;
    let n = data.len();
    if folds < 2 || folds > n {
        return Err(Error::InvalidConfig(format!(
            "folds must be in [2, {n}], got {folds}"
        )));
    }

    let mut assignment: Vec<usize> = (0..n).map(|i| i * folds / n).collect();
    assignment.shuffle(rng);

    let nin = network.input_count();
    let mut acc = ErrorAccumulator::new(Task::of(&network.topology))?;
    let mut report = TrainReport::default();
    let mut train_rows = Vec::with_capacity(n);
    let mut test_rows = Vec::with_capacity(n);

    for fold in 0..folds {
        train_rows.clear();
        test_rows.clear();
        for (i, &f) in assignment.iter().enumerate() {
            if f == fold {
                test_rows.push(i);
            } else {
                train_rows.push(i);
            }
        }

        let mut net = network.clone();
        let fold_report = net
            .train(&data.select(&train_rows), algorithm, rng)
            .map_err(|e| e.with_earlier_report(report))?;
        report += fold_report;

        let mut ws = net.workspace();
        for &i in &test_rows {
            let row = data.row(i);
            let y = net.forward(&row[..nin], &mut ws);
            acc.accumulate(y, &row[nin..]);
        }
        debug!("kfold: fold {fold} trained on {} rows", train_rows.len());
    }

    Ok((report, acc.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkBuilder, OutputKind};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn line_data(n: usize) -> Dataset {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let x = -1.0 + 2.0 * i as f64 / (n - 1) as f64;
                vec![x, 3.0 * x - 0.5]
            })
            .collect();
        Dataset::from_rows(&rows).unwrap()
    }

    #[test]
    fn config_validation() {
        assert!(LbfgsConfig::default().validate().is_ok());
        assert!(LmConfig { decay: -1.0, restarts: 1 }.validate().is_err());
        assert!(EarlyStoppingConfig { decay: 0.1, restarts: 0 }.validate().is_err());
        let cfg = LbfgsConfig {
            stopping: StoppingCriteria::iterations(0),
            ..LbfgsConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn report_adds_up() {
        let mut r = TrainReport { ngrad: 1, nhess: 2, ncholesky: 3 };
        r += TrainReport { ngrad: 10, nhess: 20, ncholesky: 30 };
        assert_eq!(r, TrainReport { ngrad: 11, nhess: 22, ncholesky: 33 });
    }

    #[test]
    fn lbfgs_fits_a_line() {
        let data = line_data(20);
        let mut net = NetworkBuilder::new(1, 1)
            .unwrap()
            .build_with_seed(1)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let cfg = LbfgsConfig {
            stopping: StoppingCriteria {
                max_its: 200,
                ..StoppingCriteria::default()
            },
            ..LbfgsConfig::default()
        };
        let report = net.train_lbfgs(&data, &cfg, &mut rng).unwrap();
        assert!(report.ngrad > 0);
        assert_eq!(report.nhess, 0);
        assert!(net.rms_error(&data).unwrap() < 0.05);
    }

    #[test]
    fn lm_fits_a_line_and_counts_work() {
        let data = line_data(20);
        let mut net = NetworkBuilder::new(1, 1)
            .unwrap()
            .hidden(3)
            .unwrap()
            .build_with_seed(3)
            .unwrap();
        let before = net.rms_error(&data).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let report = net.train_lm(&data, &LmConfig::default(), &mut rng).unwrap();
        assert!(report.nhess >= 2);
        assert!(report.ncholesky >= 1);
        let after = net.rms_error(&data).unwrap();
        assert!(after < 0.5 * before);
        assert!(after < 0.1);
    }

    #[test]
    fn classifier_labels_are_checked_before_training() {
        let data = Dataset::from_rows(&[vec![0.0, 0.0], vec![1.0, 2.0]]).unwrap();
        let mut net = NetworkBuilder::new(1, 2)
            .unwrap()
            .output(OutputKind::Classifier)
            .unwrap()
            .build_with_seed(5)
            .unwrap();
        let before = net.weights().to_vec();
        let mut rng = StdRng::seed_from_u64(6);
        let err = net
            .train(&data, &Algorithm::default(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
        assert_eq!(net.weights(), &before[..]);
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let data = Dataset::from_flat(Vec::new(), 2).unwrap();
        let mut net = NetworkBuilder::new(1, 1)
            .unwrap()
            .build_with_seed(7)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        assert!(net.train_lbfgs(&data, &LbfgsConfig::default(), &mut rng).is_err());
    }

    #[test]
    fn early_stopping_keeps_best_validation_weights() {
        let data = line_data(30);
        let train = data.select(&(0..30).filter(|i| i % 3 != 0).collect::<Vec<_>>());
        let validation = data.select(&(0..30).filter(|i| i % 3 == 0).collect::<Vec<_>>());
        let mut net = NetworkBuilder::new(1, 1)
            .unwrap()
            .hidden(2)
            .unwrap()
            .build_with_seed(9)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(10);
        let report = net
            .train_es(&train, &validation, &EarlyStoppingConfig::default(), &mut rng)
            .unwrap();
        assert!(report.ngrad > 0);
        assert!(net.rms_error(&validation).unwrap() < 0.2);
    }

    #[test]
    fn kfold_checks_fold_count() {
        let data = line_data(5);
        let net = NetworkBuilder::new(1, 1)
            .unwrap()
            .build_with_seed(11)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(12);
        let alg = Algorithm::Lm(LmConfig::default());
        assert!(kfold_cv(&net, &data, &alg, 1, &mut rng).is_err());
        assert!(kfold_cv(&net, &data, &alg, 6, &mut rng).is_err());
        let (report, cv) = kfold_cv(&net, &data, &alg, 5, &mut rng).unwrap();
        assert!(report.nhess >= 5);
        assert!(cv.rms_error.is_finite());
    }

    #[test]
    fn whitened_products_match_dense() {
        let mut u = Matrix::zeros(2, 2);
        u[(0, 0)] = 2.0;
        u[(0, 1)] = 1.0;
        u[(1, 1)] = 3.0;
        let mut out = [0.0; 2];
        upper_times(&u, &[1.0, 2.0], &[0.5, 0.5], &mut out);
        assert_eq!(out, [4.5, 6.5]);
        upper_transpose_times(&u, &[1.0, 2.0], &mut out);
        assert_eq!(out, [2.0, 7.0]);
    }
}
