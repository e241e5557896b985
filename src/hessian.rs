//! Exact Hessian of the batch error (R-algorithm).
//!
//! For every sample the gradient pass leaves neuron values, `dfdnet` and
//! `dE/d(neuron)` in the workspace. A forward R-pass then differentiates every
//! neuron value with respect to every weight (`ry`, and `rx` for the input of
//! activation neurons). A backward R-pass differentiates the backpropagated
//! errors (`rdy`) and accumulates one Hessian row per weight.
//!
//! Memory is `O(neurons * weights)` per pass; the result is the exact sum of
//! per-sample Hessians (no Gauss-Newton approximation).

use crate::data::Dataset;
use crate::gradient::sample_gradient;
use crate::linalg::Matrix;
use crate::network::Params;
use crate::topology::NeuronKind;
use crate::util::{axpy, class_label};
use crate::{Error, Network, Result, Workspace};

/// Reusable buffers for [`batch_hessian`].
#[derive(Debug, Clone)]
pub(crate) struct HessianBuffers {
    rx: Vec<f64>,
    ry: Vec<f64>,
    rdy: Vec<f64>,
    desired: Vec<f64>,
    sample_grad: Vec<f64>,
}

impl HessianBuffers {
    pub(crate) fn new(p: Params<'_>) -> Self {
        let n = p.topology.neuron_count() * p.topology.weight_count();
        Self {
            rx: vec![0.0; n],
            ry: vec![0.0; n],
            rdy: vec![0.0; n],
            desired: vec![0.0; p.topology.output_count()],
            sample_grad: vec![0.0; p.topology.weight_count()],
        }
    }
}

/// Summed error, gradient and Hessian over `data` (already validated).
pub(crate) fn batch_hessian(
    p: Params<'_>,
    data: &Dataset,
    ws: &mut Workspace,
    bufs: &mut HessianBuffers,
    grad: &mut [f64],
    h: &mut Matrix,
    natural: bool,
) -> f64 {
    let topo = p.topology;
    let nin = topo.input_count();
    let nout = topo.output_count();

    grad.fill(0.0);
    h.fill(0.0);
    let mut e = 0.0;
    for r in 0..data.len() {
        let row = data.row(r);
        if topo.is_classifier() {
            let label = class_label(row[nin], nout);
            for (i, d) in bufs.desired.iter_mut().enumerate() {
                *d = if Some(i) == label { 1.0 } else { 0.0 };
            }
        } else {
            bufs.desired.copy_from_slice(&row[nin..nin + nout]);
        }
        e += sample_gradient(
            p,
            &row[..nin],
            &bufs.desired,
            ws,
            &mut bufs.sample_grad,
            natural,
        );
        axpy(1.0, &bufs.sample_grad, grad);
        sample_hessian(p, ws, bufs, h, natural);
    }
    e
}

fn sample_hessian(
    p: Params<'_>,
    ws: &Workspace,
    bufs: &mut HessianBuffers,
    h: &mut Matrix,
    natural: bool,
) {
    let topo = p.topology;
    let nin = topo.input_count();
    let nout = topo.output_count();
    let out0 = topo.output_start();
    let wc = topo.weight_count();
    let table = topo.neurons();

    let neurons = &ws.neurons;
    let dfdnet = &ws.dfdnet;
    let derror = &ws.derror;
    let rx = &mut bufs.rx;
    let ry = &mut bufs.ry;
    let rdy = &mut bufs.rdy;
    rx.fill(0.0);
    ry.fill(0.0);
    rdy.fill(0.0);

    // forward R-pass
    for (i, kind) in table.iter().enumerate() {
        let (lo, hi) = ry.split_at_mut(i * wc);
        let ry_i = &mut hi[..wc];
        match *kind {
            NeuronKind::Activation { source, .. } => {
                let src = &lo[source * wc..(source + 1) * wc];
                rx[i * wc..(i + 1) * wc].copy_from_slice(src);
                let d = dfdnet[i];
                for (o, s) in ry_i.iter_mut().zip(src) {
                    *o = d * s;
                }
            }
            NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            } => {
                for j in 0..fan_in {
                    let n = first_source + j;
                    axpy(p.weights[first_weight + j], &lo[n * wc..(n + 1) * wc], ry_i);
                    ry_i[first_weight + j] += neurons[n];
                }
                rx[i * wc..(i + 1) * wc].copy_from_slice(ry_i);
            }
            NeuronKind::Input | NeuronKind::Bias | NeuronKind::Zero => {}
        }
    }

    // second derivatives of the error with respect to the output neurons
    if topo.is_classifier() {
        let prob = &ws.y;
        let t = &bufs.desired;
        let (q, s2, total) = prob.iter().zip(t.iter()).fold(
            (0.0, 0.0, 0.0),
            |(q, s2, total), (&pk, &tk)| (q + (pk - tk) * pk, s2 + pk * pk, total + tk),
        );
        for i in 0..nout {
            let ri = prob[i] - t[i];
            let row = &mut rdy[(out0 + i) * wc..(out0 + i + 1) * wc];
            for j in 0..nout {
                let hij = if natural {
                    let delta = if i == j { 1.0 } else { 0.0 };
                    total * prob[i] * (delta - prob[j])
                } else {
                    let rj = prob[j] - t[j];
                    let mut v = prob[i] * prob[j] * (2.0 * q + s2 - ri - rj - prob[i] - prob[j]);
                    if i == j {
                        v += prob[i] * (ri - q + prob[i]);
                    }
                    v
                };
                axpy(hij, &ry[(out0 + j) * wc..(out0 + j + 1) * wc], row);
            }
        }
    } else {
        for i in 0..nout {
            let sigma = p.sigmas[nin + i];
            let n = out0 + i;
            axpy(
                sigma * sigma,
                &ry[n * wc..(n + 1) * wc],
                &mut rdy[n * wc..(n + 1) * wc],
            );
        }
    }

    // backward R-pass
    for (i, kind) in table.iter().enumerate().rev() {
        let de = derror[i];
        match *kind {
            NeuronKind::Activation { func, source } => {
                let d = func.eval(neurons[source]);
                let (lo, hi) = rdy.split_at_mut(i * wc);
                let rdy_i = &hi[..wc];
                let rdy_src = &mut lo[source * wc..(source + 1) * wc];
                let rx_i = &rx[i * wc..(i + 1) * wc];
                for k in 0..wc {
                    rdy_src[k] += d.df * rdy_i[k] + d.d2f * de * rx_i[k];
                }
            }
            NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            } => {
                let (lo, hi) = rdy.split_at_mut(i * wc);
                let rdx = &hi[..wc];
                for j in 0..fan_in {
                    let n = first_source + j;
                    let w = first_weight + j;
                    let hrow = h.row_mut(w);
                    axpy(neurons[n], rdx, hrow);
                    axpy(de, &ry[n * wc..(n + 1) * wc], hrow);

                    let src = &mut lo[n * wc..(n + 1) * wc];
                    axpy(p.weights[w], rdx, src);
                    src[w] += de;
                }
            }
            NeuronKind::Input | NeuronKind::Bias | NeuronKind::Zero => {}
        }
    }
}

impl Network {
    fn hessian_impl(
        &self,
        data: &Dataset,
        grad: &mut [f64],
        h: &mut Matrix,
        natural: bool,
    ) -> Result<f64> {
        data.validate_for(&self.topology)?;
        let wc = self.weight_count();
        if grad.len() != wc || h.rows() != wc || h.cols() != wc {
            return Err(Error::InvalidShape(format!(
                "gradient/hessian must be {wc} and {wc}x{wc}, got {} and {}x{}",
                grad.len(),
                h.rows(),
                h.cols()
            )));
        }
        let mut ws = self.workspace();
        let mut bufs = HessianBuffers::new(self.params());
        Ok(batch_hessian(
            self.params(),
            data,
            &mut ws,
            &mut bufs,
            grad,
            h,
            natural,
        ))
    }

    /// Least-squares error, gradient and Hessian summed over a training matrix.
    pub fn hessian_batch(&self, data: &Dataset, grad: &mut [f64], h: &mut Matrix) -> Result<f64> {
        self.hessian_impl(data, grad, h, false)
    }

    /// Natural error, gradient and Hessian summed over a training matrix.
    pub fn hessian_natural_batch(
        &self,
        data: &Dataset,
        grad: &mut [f64],
        h: &mut Matrix,
    ) -> Result<f64> {
        self.hessian_impl(data, grad, h, true)
    }
}
