//! Error gradients with respect to the weights.
//!
//! Two error functions are supported:
//!
//! - least squares: `E = 0.5 * sum (y - d)^2` on post-processed outputs,
//! - natural: cross-entropy `E = sum d * ln(d / y)` for softmax classifiers and
//!   least squares for regression networks.
//!
//! Backpropagation walks the neuron table backwards. Every weight belongs to
//! exactly one summator, so per-sample gradients are written (not accumulated).
//!
//! Batch gradients process the dataset in chunks of [`CHUNK_SIZE`] samples:
//! each neuron owns a row of per-sample values, which turns the inner loops
//! into contiguous row operations. The result is the sum over all samples.

use crate::data::Dataset;
use crate::network::{forward_pass, softmax, Params};
use crate::topology::NeuronKind;
use crate::util::{class_label, dot, ensure_len, safe_cross_entropy};
use crate::workspace::CHUNK_SIZE;
use crate::{Error, Network, Result, Workspace};

/// Error and `dE/d(output neuron)` for one sample, then backprop into `grad`.
///
/// Leaves `neurons`, `dfdnet` and `derror` of the sample in `ws`.
pub(crate) fn sample_gradient(
    p: Params<'_>,
    x: &[f64],
    desired: &[f64],
    ws: &mut Workspace,
    grad: &mut [f64],
    natural: bool,
) -> f64 {
    let topo = p.topology;
    let nin = topo.input_count();
    let out0 = topo.output_start();

    forward_pass(p, x, &mut ws.neurons, &mut ws.dfdnet, &mut ws.y);
    ws.derror.fill(0.0);

    let y = &ws.y;
    let derror = &mut ws.derror[out0..];
    let mut e = 0.0;
    if topo.is_classifier() && natural {
        let total: f64 = desired.iter().sum();
        for i in 0..y.len() {
            e += safe_cross_entropy(desired[i], y[i]);
            derror[i] = total * y[i] - desired[i];
        }
    } else {
        for i in 0..y.len() {
            let de = y[i] - desired[i];
            e += 0.5 * de * de;
            derror[i] = de;
        }
        if topo.is_classifier() {
            // through the softmax: dE/dz_i = y_i * (de_i - sum_j de_j y_j)
            let s = dot(derror, y);
            for i in 0..y.len() {
                derror[i] = y[i] * (derror[i] - s);
            }
        } else {
            for (i, d) in derror.iter_mut().enumerate() {
                *d *= p.sigmas[nin + i];
            }
        }
    }

    backprop(p, &ws.neurons, &ws.dfdnet, &mut ws.derror, grad);
    e
}

/// Propagate `derror` (already set at the outputs) back through the table.
pub(crate) fn backprop(
    p: Params<'_>,
    neurons: &[f64],
    dfdnet: &[f64],
    derror: &mut [f64],
    grad: &mut [f64],
) {
    for (i, kind) in p.topology.neurons().iter().enumerate().rev() {
        match *kind {
            NeuronKind::Activation { source, .. } => {
                derror[source] += derror[i] * dfdnet[i];
            }
            NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            } => {
                let d = derror[i];
                for j in 0..fan_in {
                    grad[first_weight + j] = d * neurons[first_source + j];
                    derror[first_source + j] += d * p.weights[first_weight + j];
                }
            }
            NeuronKind::Input | NeuronKind::Bias | NeuronKind::Zero => {}
        }
    }
}

/// Sum of per-sample errors and gradients over `data`, in chunks.
///
/// `data` must already be validated for the network. `grad` is overwritten.
pub(crate) fn batch_gradient(
    p: Params<'_>,
    data: &Dataset,
    ws: &mut Workspace,
    grad: &mut [f64],
    natural: bool,
) -> f64 {
    grad.fill(0.0);
    let mut e = 0.0;
    let mut start = 0;
    while start < data.len() {
        let len = CHUNK_SIZE.min(data.len() - start);
        e += chunk_gradient(p, data, start, len, ws, grad, natural);
        start += len;
    }
    e
}

fn chunk_gradient(
    p: Params<'_>,
    data: &Dataset,
    start: usize,
    len: usize,
    ws: &mut Workspace,
    grad: &mut [f64],
    natural: bool,
) -> f64 {
    const C: usize = CHUNK_SIZE;
    let topo = p.topology;
    let nin = topo.input_count();
    let nout = topo.output_count();
    let ntotal = topo.neuron_count();
    let out0 = topo.output_start();
    let table = topo.neurons();

    let chunk = &mut ws.chunk;
    let (values, rest) = chunk.split_at_mut(ntotal * C);
    let (dfdnet, derror) = rest.split_at_mut(ntotal * C);

    // forward
    for k in 0..len {
        let row = data.row(start + k);
        for i in 0..nin {
            let s = p.sigmas[i];
            values[i * C + k] = if s != 0.0 {
                (row[i] - p.means[i]) / s
            } else {
                row[i] - p.means[i]
            };
        }
    }
    for (i, kind) in table.iter().enumerate().skip(nin) {
        let (before, rest) = values.split_at_mut(i * C);
        let out = &mut rest[..C];
        let dout = &mut dfdnet[i * C..(i + 1) * C];
        match *kind {
            NeuronKind::Activation { func, source } => {
                let src = &before[source * C..source * C + C];
                for k in 0..len {
                    let d = func.eval(src[k]);
                    out[k] = d.f;
                    dout[k] = d.df;
                }
            }
            NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            } => {
                out[..len].fill(0.0);
                for j in 0..fan_in {
                    let w = p.weights[first_weight + j];
                    let src = &before[(first_source + j) * C..(first_source + j) * C + C];
                    for k in 0..len {
                        out[k] += w * src[k];
                    }
                }
                dout[..len].fill(1.0);
            }
            NeuronKind::Bias => {
                out[..len].fill(-1.0);
                dout[..len].fill(0.0);
            }
            NeuronKind::Zero | NeuronKind::Input => {
                out[..len].fill(0.0);
                dout[..len].fill(0.0);
            }
        }
    }

    // output errors
    derror.fill(0.0);
    let logits = &mut ws.desired;
    let prob = &mut ws.tmp;
    let mut e = 0.0;
    for k in 0..len {
        let row = data.row(start + k);
        if topo.is_classifier() {
            for i in 0..nout {
                logits[i] = values[(out0 + i) * C + k];
            }
            softmax(logits, prob);
            let label = class_label(row[nin], nout).unwrap_or(usize::MAX);
            if natural {
                for i in 0..nout {
                    let t = if i == label { 1.0 } else { 0.0 };
                    e += safe_cross_entropy(t, prob[i]);
                    derror[(out0 + i) * C + k] = prob[i] - t;
                }
            } else {
                let mut s = 0.0;
                for i in 0..nout {
                    let t = if i == label { 1.0 } else { 0.0 };
                    let v = prob[i] - t;
                    e += 0.5 * v * v;
                    s += v * prob[i];
                }
                for i in 0..nout {
                    let t = if i == label { 1.0 } else { 0.0 };
                    derror[(out0 + i) * C + k] = prob[i] * (prob[i] - t - s);
                }
            }
        } else {
            for i in 0..nout {
                let sigma = p.sigmas[nin + i];
                let y = values[(out0 + i) * C + k] * sigma + p.means[nin + i];
                let v = y - row[nin + i];
                e += 0.5 * v * v;
                derror[(out0 + i) * C + k] = v * sigma;
            }
        }
    }

    // backward
    for (i, kind) in table.iter().enumerate().rev() {
        match *kind {
            NeuronKind::Activation { source, .. } => {
                let (lo, hi) = derror.split_at_mut(i * C);
                let src = &mut lo[source * C..source * C + C];
                let d = &hi[..C];
                let df = &dfdnet[i * C..i * C + C];
                for k in 0..len {
                    src[k] += d[k] * df[k];
                }
            }
            NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            } => {
                let (lo, hi) = derror.split_at_mut(i * C);
                let d = &hi[..C];
                for j in 0..fan_in {
                    let n = first_source + j;
                    let v = &values[n * C..n * C + C];
                    let mut g = 0.0;
                    for k in 0..len {
                        g += d[k] * v[k];
                    }
                    grad[first_weight + j] += g;

                    let w = p.weights[first_weight + j];
                    let src = &mut lo[n * C..n * C + C];
                    for k in 0..len {
                        src[k] += w * d[k];
                    }
                }
            }
            NeuronKind::Input | NeuronKind::Bias | NeuronKind::Zero => {}
        }
    }
    e
}

impl Network {
    fn check_sample(&self, x: &[f64], desired: &[f64], ws: &Workspace, grad: &[f64]) -> Result<()> {
        ensure_len("input", x.len(), self.input_count())?;
        ensure_len("desired", desired.len(), self.output_count())?;
        ensure_len("gradient", grad.len(), self.weight_count())?;
        if !ws.fits(&self.topology) {
            return Err(Error::InvalidShape(
                "workspace was built for a different topology".to_owned(),
            ));
        }
        Ok(())
    }

    /// Least-squares error of one sample and its gradient (written into `grad`).
    ///
    /// For classifiers `desired` is a probability vector (typically one-hot).
    pub fn grad(&self, x: &[f64], desired: &[f64], ws: &mut Workspace, grad: &mut [f64]) -> Result<f64> {
        self.check_sample(x, desired, ws, grad)?;
        Ok(sample_gradient(self.params(), x, desired, ws, grad, false))
    }

    /// Natural error of one sample and its gradient (written into `grad`).
    pub fn grad_natural(
        &self,
        x: &[f64],
        desired: &[f64],
        ws: &mut Workspace,
        grad: &mut [f64],
    ) -> Result<f64> {
        self.check_sample(x, desired, ws, grad)?;
        Ok(sample_gradient(self.params(), x, desired, ws, grad, true))
    }

    fn check_batch(&self, data: &Dataset, ws: &Workspace, grad: &[f64]) -> Result<()> {
        data.validate_for(&self.topology)?;
        ensure_len("gradient", grad.len(), self.weight_count())?;
        if !ws.fits(&self.topology) {
            return Err(Error::InvalidShape(
                "workspace was built for a different topology".to_owned(),
            ));
        }
        Ok(())
    }

    /// Summed least-squares error and gradient over a training matrix.
    pub fn grad_batch(&self, data: &Dataset, ws: &mut Workspace, grad: &mut [f64]) -> Result<f64> {
        self.check_batch(data, ws, grad)?;
        Ok(batch_gradient(self.params(), data, ws, grad, false))
    }

    /// Summed natural error and gradient over a training matrix.
    pub fn grad_natural_batch(
        &self,
        data: &Dataset,
        ws: &mut Workspace,
        grad: &mut [f64],
    ) -> Result<f64> {
        self.check_batch(data, ws, grad)?;
        Ok(batch_gradient(self.params(), data, ws, grad, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkBuilder, OutputKind};

    fn assert_close(analytic: f64, numeric: f64, rel_tol: f64) {
        let scale = analytic.abs().max(numeric.abs()).max(1.0);
        let diff = (analytic - numeric).abs();
        assert!(
            diff <= rel_tol * scale,
            "analytic={analytic} numeric={numeric} diff={diff}"
        );
    }

    fn numeric_check(net: &Network, x: &[f64], desired: &[f64], natural: bool) {
        let mut ws = net.workspace();
        let mut grad = vec![0.0; net.weight_count()];
        let mut scratch = vec![0.0; net.weight_count()];
        if natural {
            net.grad_natural(x, desired, &mut ws, &mut grad).unwrap();
        } else {
            net.grad(x, desired, &mut ws, &mut grad).unwrap();
        }

        let eps = 1e-6;
        for i in 0..net.weight_count() {
            let mut plus = net.clone();
            plus.weights[i] += eps;
            let mut minus = net.clone();
            minus.weights[i] -= eps;
            let (ep, em) = if natural {
                (
                    plus.grad_natural(x, desired, &mut ws, &mut scratch).unwrap(),
                    minus.grad_natural(x, desired, &mut ws, &mut scratch).unwrap(),
                )
            } else {
                (
                    plus.grad(x, desired, &mut ws, &mut scratch).unwrap(),
                    minus.grad(x, desired, &mut ws, &mut scratch).unwrap(),
                )
            };
            assert_close(grad[i], (ep - em) / (2.0 * eps), 1e-4);
        }
    }

    #[test]
    fn regression_gradient_matches_numeric() {
        let mut net = NetworkBuilder::new(2, 1)
            .unwrap()
            .hidden(3)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        net.set_input_scaling(1, 0.5, 2.0).unwrap();
        net.set_output_scaling(0, 1.0, 3.0).unwrap();
        numeric_check(&net, &[0.3, -0.7], &[0.9], false);
        numeric_check(&net, &[0.3, -0.7], &[0.9], true);
    }

    #[test]
    fn bounded_two_hidden_gradient_matches_numeric() {
        let net = NetworkBuilder::new(3, 2)
            .unwrap()
            .hidden(4)
            .unwrap()
            .hidden(3)
            .unwrap()
            .output(OutputKind::Bounded { b: -1.0, d: 1.0 })
            .unwrap()
            .build_with_seed(5)
            .unwrap();
        numeric_check(&net, &[1.0, -0.5, 0.25], &[0.5, 2.0], false);
    }

    #[test]
    fn classifier_gradients_match_numeric() {
        let net = NetworkBuilder::new(2, 3)
            .unwrap()
            .hidden(4)
            .unwrap()
            .output(OutputKind::Classifier)
            .unwrap()
            .build_with_seed(3)
            .unwrap();
        let x = [0.4, -1.2];
        numeric_check(&net, &x, &[0.0, 1.0, 0.0], false);
        numeric_check(&net, &x, &[0.0, 1.0, 0.0], true);
        // soft targets summing to less than one
        numeric_check(&net, &x, &[0.2, 0.3, 0.1], true);
    }

    fn batch_matches_per_sample(net: &Network, data: &Dataset, natural: bool) {
        let mut ws = net.workspace();
        let mut batch = vec![0.0; net.weight_count()];
        let e_batch = if natural {
            net.grad_natural_batch(data, &mut ws, &mut batch).unwrap()
        } else {
            net.grad_batch(data, &mut ws, &mut batch).unwrap()
        };

        let nin = net.input_count();
        let nout = net.output_count();
        let mut sum = vec![0.0; net.weight_count()];
        let mut g = vec![0.0; net.weight_count()];
        let mut e_sum = 0.0;
        for r in 0..data.len() {
            let row = data.row(r);
            let desired: Vec<f64> = if net.is_softmax() {
                let label = row[nin].round() as usize;
                (0..nout).map(|i| if i == label { 1.0 } else { 0.0 }).collect()
            } else {
                row[nin..].to_vec()
            };
            e_sum += if natural {
                net.grad_natural(&row[..nin], &desired, &mut ws, &mut g).unwrap()
            } else {
                net.grad(&row[..nin], &desired, &mut ws, &mut g).unwrap()
            };
            for (s, gi) in sum.iter_mut().zip(&g) {
                *s += gi;
            }
        }
        assert_close(e_batch, e_sum, 1e-10);
        for (a, b) in batch.iter().zip(&sum) {
            assert_close(*a, *b, 1e-10);
        }
    }

    #[test]
    fn chunked_batch_equals_sum_of_samples() {
        let reg = NetworkBuilder::new(2, 2)
            .unwrap()
            .hidden(3)
            .unwrap()
            .build_with_seed(1)
            .unwrap();
        let rows: Vec<Vec<f64>> = (0..70)
            .map(|i| {
                let t = i as f64 * 0.1;
                vec![t.sin(), t.cos(), t, 1.0 - t]
            })
            .collect();
        let data = Dataset::from_rows(&rows).unwrap();
        batch_matches_per_sample(&reg, &data, false);
        batch_matches_per_sample(&reg, &data, true);

        let cls = NetworkBuilder::new(2, 3)
            .unwrap()
            .hidden(3)
            .unwrap()
            .output(OutputKind::Classifier)
            .unwrap()
            .build_with_seed(2)
            .unwrap();
        let rows: Vec<Vec<f64>> = (0..45)
            .map(|i| {
                let t = i as f64 * 0.3;
                vec![t.sin(), t.cos(), (i % 3) as f64]
            })
            .collect();
        let data = Dataset::from_rows(&rows).unwrap();
        batch_matches_per_sample(&cls, &data, false);
        batch_matches_per_sample(&cls, &data, true);
    }

    #[test]
    fn batch_rejects_bad_labels_and_shapes() {
        let cls = NetworkBuilder::new(1, 2)
            .unwrap()
            .output(OutputKind::Classifier)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        let mut ws = cls.workspace();
        let mut g = vec![0.0; cls.weight_count()];
        let bad = Dataset::from_rows(&[vec![0.0, 2.0]]).unwrap();
        assert!(matches!(
            cls.grad_batch(&bad, &mut ws, &mut g),
            Err(Error::InvalidData(_))
        ));
        let wide = Dataset::from_rows(&[vec![0.0, 1.0, 0.0]]).unwrap();
        assert!(matches!(
            cls.grad_batch(&wide, &mut ws, &mut g),
            Err(Error::InvalidShape(_))
        ));
    }
}
