//! Limited-memory BFGS.
//!
//! Minimizes a smooth function given by a value-and-gradient callback. The
//! inverse Hessian is approximated from the last `memory` step/gradient-change
//! pairs (two-loop recursion); each step is found by a line search satisfying
//! the strong Wolfe conditions.
//!
//! Design notes:
//! - All buffers are allocated once per `minimize` call.
//! - The callback cannot fail; non-finite values are treated as "too far" by
//!   the line search.
//! - An optional observer sees every accepted iterate and may stop the run.

use std::ops::ControlFlow;

use crate::util::{axpy, dot, norm2_squared};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// When to stop iterating. A zero threshold disables that criterion.
pub struct StoppingCriteria {
    /// Stop when the gradient norm drops to `epsg`.
    pub epsg: f64,
    /// Stop when `|f_k - f_{k+1}| <= epsf * max(|f_k|, |f_{k+1}|, 1)`.
    pub epsf: f64,
    /// Stop when the step length drops to `epsx`.
    pub epsx: f64,
    /// Stop after this many iterations.
    pub max_its: usize,
}

impl Default for StoppingCriteria {
    fn default() -> Self {
        Self {
            epsg: 0.0,
            epsf: 0.0,
            epsx: 0.01,
            max_its: 0,
        }
    }
}

impl StoppingCriteria {
    /// Stop only after `max_its` iterations.
    pub fn iterations(max_its: usize) -> Self {
        Self {
            epsg: 0.0,
            epsf: 0.0,
            epsx: 0.0,
            max_its,
        }
    }

    /// Validate thresholds: finite, non-negative, and not all disabled.
    pub fn validate(self) -> Result<()> {
        for (name, v) in [("epsg", self.epsg), ("epsf", self.epsf), ("epsx", self.epsx)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be finite and >= 0, got {v}"
                )));
            }
        }
        if self.epsg == 0.0 && self.epsf == 0.0 && self.epsx == 0.0 && self.max_its == 0 {
            return Err(Error::InvalidConfig(
                "at least one stopping criterion must be set".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why a run ended.
pub enum Termination {
    GradientNorm,
    FunctionChange,
    StepSize,
    MaxIterations,
    /// The observer asked to stop.
    Stopped,
    /// The line search could not find a decrease.
    Stalled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbfgsReport {
    pub iterations: usize,
    /// Number of value-and-gradient evaluations.
    pub evaluations: usize,
    pub termination: Termination,
    /// Function value at the returned point.
    pub value: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Lbfgs {
    memory: usize,
    criteria: StoppingCriteria,
}

const C1: f64 = 1e-4;
const C2: f64 = 0.9;
const MAX_LINE_EVALS: usize = 20;

impl Lbfgs {
    pub fn new(memory: usize, criteria: StoppingCriteria) -> Result<Self> {
        if memory == 0 {
            return Err(Error::InvalidConfig("memory must be > 0".to_owned()));
        }
        criteria.validate()?;
        Ok(Self { memory, criteria })
    }

    /// Minimize `fg` starting from `x`; `x` holds the result.
    ///
    /// `fg(x, g)` returns `f(x)` and writes the gradient into `g`.
    pub fn minimize<F>(&self, x: &mut [f64], fg: F) -> LbfgsReport
    where
        F: FnMut(&[f64], &mut [f64]) -> f64,
    {
        self.minimize_with(x, fg, |_, _, _| ControlFlow::Continue(()))
    }

    /// Like [`Lbfgs::minimize`], calling `observer(iteration, x, f)` after every iteration.
    pub fn minimize_with<F, O>(&self, x: &mut [f64], mut fg: F, mut observer: O) -> LbfgsReport
    where
        F: FnMut(&[f64], &mut [f64]) -> f64,
        O: FnMut(usize, &[f64], f64) -> ControlFlow<()>,
    {
        let n = x.len();
        let m = self.memory;
        let mut g = vec![0.0; n];
        let mut d = vec![0.0; n];
        let mut x_new = vec![0.0; n];
        let mut g_new = vec![0.0; n];
        let mut s_hist = vec![vec![0.0; n]; m];
        let mut y_hist = vec![vec![0.0; n]; m];
        let mut rho = vec![0.0; m];
        let mut alpha = vec![0.0; m];
        let mut stored = 0usize;
        let mut newest = 0usize;

        let mut f = finite_or_inf(fg(x, &mut g));
        let mut report = LbfgsReport {
            iterations: 0,
            evaluations: 1,
            termination: Termination::Stalled,
            value: f,
        };
        if !f.is_finite() {
            return report;
        }

        loop {
            let gnorm = norm2_squared(&g).sqrt();
            if gnorm == 0.0 || (self.criteria.epsg > 0.0 && gnorm <= self.criteria.epsg) {
                report.termination = Termination::GradientNorm;
                break;
            }

            // d = -H g
            d.copy_from_slice(&g);
            for k in 0..stored {
                let idx = (newest + m - k) % m;
                alpha[idx] = rho[idx] * dot(&s_hist[idx], &d);
                axpy(-alpha[idx], &y_hist[idx], &mut d);
            }
            if stored > 0 {
                let yy = norm2_squared(&y_hist[newest]);
                let gamma = dot(&s_hist[newest], &y_hist[newest]) / yy;
                for v in d.iter_mut() {
                    *v *= gamma;
                }
            }
            for k in (0..stored).rev() {
                let idx = (newest + m - k) % m;
                let beta = rho[idx] * dot(&y_hist[idx], &d);
                axpy(alpha[idx] - beta, &s_hist[idx], &mut d);
            }
            for v in d.iter_mut() {
                *v = -*v;
            }
            if dot(&d, &g) >= 0.0 {
                // lost descent; restart from steepest descent
                stored = 0;
                for (di, gi) in d.iter_mut().zip(&g) {
                    *di = -gi;
                }
            }

            let stp0 = if stored == 0 {
                1.0 / norm2_squared(&d).sqrt()
            } else {
                1.0
            };
            let found = line_search(
                &mut fg,
                x,
                f,
                &g,
                &d,
                stp0,
                &mut x_new,
                &mut g_new,
                &mut report.evaluations,
            );
            let Some((stp, f_new)) = found else {
                report.termination = Termination::Stalled;
                break;
            };

            // history update
            let slot = if stored == 0 { 0 } else { (newest + 1) % m };
            for i in 0..n {
                s_hist[slot][i] = x_new[i] - x[i];
                y_hist[slot][i] = g_new[i] - g[i];
            }
            let sy = dot(&s_hist[slot], &y_hist[slot]);
            if sy > 0.0 {
                rho[slot] = 1.0 / sy;
                newest = slot;
                stored = (stored + 1).min(m);
            } else {
                stored = 0;
            }
            let step_norm = stp * norm2_squared(&d).sqrt();

            let f_old = f;
            x.copy_from_slice(&x_new);
            g.copy_from_slice(&g_new);
            f = f_new;
            report.iterations += 1;
            report.value = f;

            if observer(report.iterations, x, f).is_break() {
                report.termination = Termination::Stopped;
                break;
            }
            let c = &self.criteria;
            if c.epsf > 0.0 && (f_old - f).abs() <= c.epsf * f_old.abs().max(f.abs()).max(1.0) {
                report.termination = Termination::FunctionChange;
                break;
            }
            if c.epsx > 0.0 && step_norm <= c.epsx {
                report.termination = Termination::StepSize;
                break;
            }
            if c.max_its > 0 && report.iterations >= c.max_its {
                report.termination = Termination::MaxIterations;
                break;
            }
        }
        report.value = f;
        report
    }
}

#[inline]
fn finite_or_inf(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        f64::INFINITY
    }
}

fn trial_point<F>(fg: &mut F, x: &[f64], d: &[f64], a: f64, x_new: &mut [f64], g_new: &mut [f64]) -> (f64, f64)
where
    F: FnMut(&[f64], &mut [f64]) -> f64,
{
    for i in 0..x.len() {
        x_new[i] = x[i] + a * d[i];
    }
    let f = finite_or_inf(fg(x_new, g_new));
    (f, dot(g_new, d))
}

/// Minimizer of the cubic through two points with slopes, safeguarded into the interval.
fn interpolate(a_lo: f64, f_lo: f64, d_lo: f64, a_hi: f64, f_hi: f64, d_hi: f64) -> f64 {
    let mid = 0.5 * (a_lo + a_hi);
    if !(f_hi.is_finite() && d_hi.is_finite()) {
        return mid;
    }
    let d1 = d_lo + d_hi - 3.0 * (f_lo - f_hi) / (a_lo - a_hi);
    let disc = d1 * d1 - d_lo * d_hi;
    if disc < 0.0 {
        return mid;
    }
    let d2 = (a_hi - a_lo).signum() * disc.sqrt();
    let a = a_hi - (a_hi - a_lo) * (d_hi + d2 - d1) / (d_hi - d_lo + 2.0 * d2);
    let (lo, hi) = if a_lo < a_hi { (a_lo, a_hi) } else { (a_hi, a_lo) };
    let margin = 0.1 * (hi - lo);
    if a.is_finite() && a >= lo + margin && a <= hi - margin {
        a
    } else {
        mid
    }
}

/// Strong Wolfe line search along `d`. On success `x_new`/`g_new` hold the accepted point.
#[allow(clippy::too_many_arguments)]
fn line_search<F>(
    fg: &mut F,
    x: &[f64],
    f0: f64,
    g0: &[f64],
    d: &[f64],
    stp0: f64,
    x_new: &mut [f64],
    g_new: &mut [f64],
    evals: &mut usize,
) -> Option<(f64, f64)>
where
    F: FnMut(&[f64], &mut [f64]) -> f64,
{
    let dg0 = dot(g0, d);
    let mut a_prev = 0.0;
    let mut f_prev = f0;
    let mut dg_prev = dg0;
    let mut a = stp0;

    let mut bracket = None;
    for i in 0..MAX_LINE_EVALS {
        let (f, dg) = trial_point(fg, x, d, a, x_new, g_new);
        *evals += 1;
        if f > f0 + C1 * a * dg0 || (i > 0 && f >= f_prev) {
            bracket = Some(((a_prev, f_prev, dg_prev), (a, f, dg)));
            break;
        }
        if dg.abs() <= -C2 * dg0 {
            return Some((a, f));
        }
        if dg >= 0.0 {
            bracket = Some(((a, f, dg), (a_prev, f_prev, dg_prev)));
            break;
        }
        a_prev = a;
        f_prev = f;
        dg_prev = dg;
        a *= 2.0;
    }
    let Some(((mut a_lo, mut f_lo, mut d_lo), (mut a_hi, mut f_hi, mut d_hi))) = bracket else {
        // only ever expanded: the last trial point already satisfies sufficient decrease
        return (a_prev > 0.0).then_some((a_prev, f_prev));
    };

    for _ in 0..MAX_LINE_EVALS {
        let a = interpolate(a_lo, f_lo, d_lo, a_hi, f_hi, d_hi);
        let (f, dg) = trial_point(fg, x, d, a, x_new, g_new);
        *evals += 1;
        if f > f0 + C1 * a * dg0 || f >= f_lo {
            a_hi = a;
            f_hi = f;
            d_hi = dg;
        } else {
            if dg.abs() <= -C2 * dg0 {
                return Some((a, f));
            }
            if dg * (a_hi - a_lo) >= 0.0 {
                a_hi = a_lo;
                f_hi = f_lo;
                d_hi = d_lo;
            }
            a_lo = a;
            f_lo = f;
            d_lo = dg;
        }
        if (a_hi - a_lo).abs() <= 1e-12 * a_lo.abs().max(1e-300) {
            break;
        }
    }

    // Accept the best sufficient-decrease point found, if any.
    if a_lo > 0.0 && f_lo < f0 {
        let (f, _) = trial_point(fg, x, d, a_lo, x_new, g_new);
        *evals += 1;
        if f < f0 {
            return Some((a_lo, f));
        }
    }
    None
}
