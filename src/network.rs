//! The network entity and its forward pass.
//!
//! A [`Network`] owns a validated [`Topology`], a flat weight vector and a
//! mean/sigma pair for every scaled column (inputs, plus outputs for regression).
//!
//! Processing a sample:
//!
//! 1. inputs are standardized: `(x - mean) / sigma` (or `x - mean` if `sigma == 0`),
//! 2. the neuron table is walked in order,
//! 3. the last `nout` neurons are post-processed: softmax for classifiers,
//!    `y * sigma + mean` otherwise.
//!
//! The forward walk is a free function over borrowed parameters so that
//! ensembles run their members through exactly the same code.

use rand::Rng;

use crate::data::Dataset;
use crate::layers::LayerIndex;
use crate::topology::{NeuronKind, Topology};
use crate::util::{dot, ensure_finite, ensure_len, sign};
use crate::{ActivationFn, Error, Result, Workspace};

/// Borrowed view of everything a forward pass reads.
#[derive(Clone, Copy)]
pub(crate) struct Params<'a> {
    pub(crate) topology: &'a Topology,
    pub(crate) weights: &'a [f64],
    pub(crate) means: &'a [f64],
    pub(crate) sigmas: &'a [f64],
}

/// Run one sample through the network, filling `neurons`, `dfdnet` and `y`.
pub(crate) fn forward_pass(
    p: Params<'_>,
    x: &[f64],
    neurons: &mut [f64],
    dfdnet: &mut [f64],
    y: &mut [f64],
) {
    let topo = p.topology;
    let nin = topo.input_count();
    let nout = topo.output_count();
    debug_assert_eq!(x.len(), nin);
    debug_assert_eq!(neurons.len(), topo.neuron_count());
    debug_assert_eq!(y.len(), nout);

    for i in 0..nin {
        let s = p.sigmas[i];
        neurons[i] = if s != 0.0 {
            (x[i] - p.means[i]) / s
        } else {
            x[i] - p.means[i]
        };
        dfdnet[i] = 0.0;
    }

    for (i, kind) in topo.neurons().iter().enumerate().skip(nin) {
        match *kind {
            NeuronKind::Activation { func, source } => {
                let d = func.eval(neurons[source]);
                neurons[i] = d.f;
                dfdnet[i] = d.df;
            }
            NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            } => {
                let (before, rest) = neurons.split_at_mut(i);
                rest[0] = dot(
                    &p.weights[first_weight..first_weight + fan_in],
                    &before[first_source..first_source + fan_in],
                );
                dfdnet[i] = 1.0;
            }
            NeuronKind::Bias => {
                neurons[i] = -1.0;
                dfdnet[i] = 0.0;
            }
            NeuronKind::Zero | NeuronKind::Input => {
                neurons[i] = 0.0;
                dfdnet[i] = 0.0;
            }
        }
    }

    let out = &neurons[topo.output_start()..];
    if topo.is_classifier() {
        softmax(out, y);
    } else {
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = out[i] * p.sigmas[nin + i] + p.means[nin + i];
        }
    }
}

/// Softmax with max subtraction.
pub(crate) fn softmax(z: &[f64], p: &mut [f64]) {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for (pi, &zi) in p.iter_mut().zip(z) {
        *pi = (zi - max).exp();
        sum += *pi;
    }
    for pi in p.iter_mut() {
        *pi /= sum;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub(crate) topology: Topology,
    pub(crate) layers: Option<LayerIndex>,
    pub(crate) weights: Vec<f64>,
    pub(crate) means: Vec<f64>,
    pub(crate) sigmas: Vec<f64>,
}

impl Network {
    /// Wrap a topology with random weights in `[-0.5, 0.5]` and identity scaling.
    pub fn from_topology<R: Rng + ?Sized>(topology: Topology, rng: &mut R) -> Self {
        let ccount = topology.scaling_count();
        let layers = LayerIndex::infer(&topology);
        let mut net = Self {
            weights: vec![0.0; topology.weight_count()],
            means: vec![0.0; ccount],
            sigmas: vec![1.0; ccount],
            layers,
            topology,
        };
        net.randomize(rng);
        net
    }

    /// Assemble a network from stored parameters.
    ///
    /// Zero sigmas are replaced by 1.
    pub(crate) fn from_parts(
        topology: Topology,
        weights: Vec<f64>,
        means: Vec<f64>,
        mut sigmas: Vec<f64>,
    ) -> Result<Self> {
        ensure_len("weights", weights.len(), topology.weight_count())?;
        ensure_len("means", means.len(), topology.scaling_count())?;
        ensure_len("sigmas", sigmas.len(), topology.scaling_count())?;
        if weights.iter().chain(&means).chain(&sigmas).any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "network parameters must be finite".to_owned(),
            ));
        }
        for s in &mut sigmas {
            if *s == 0.0 {
                *s = 1.0;
            }
        }
        let layers = LayerIndex::infer(&topology);
        Ok(Self {
            topology,
            layers,
            weights,
            means,
            sigmas,
        })
    }

    #[inline]
    pub(crate) fn params(&self) -> Params<'_> {
        Params {
            topology: &self.topology,
            weights: &self.weights,
            means: &self.means,
            sigmas: &self.sigmas,
        }
    }

    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[inline]
    pub fn input_count(&self) -> usize {
        self.topology.input_count()
    }

    #[inline]
    pub fn output_count(&self) -> usize {
        self.topology.output_count()
    }

    #[inline]
    pub fn weight_count(&self) -> usize {
        self.topology.weight_count()
    }

    /// True if the outputs are softmax class probabilities.
    #[inline]
    pub fn is_softmax(&self) -> bool {
        self.topology.is_classifier()
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Replace the whole weight vector.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        ensure_len("weights", weights.len(), self.weight_count())?;
        if weights.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData("weights must be finite".to_owned()));
        }
        self.weights.copy_from_slice(weights);
        Ok(())
    }

    /// Allocate buffers for [`Network::forward`] and the gradient routines.
    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.topology)
    }

    /// Forward pass for a single sample; returns the post-processed outputs.
    ///
    /// Shape contract:
    /// - `x.len() == self.input_count()`
    /// - `ws` must be built for this network's topology
    pub fn forward<'a>(&self, x: &[f64], ws: &'a mut Workspace) -> &'a [f64] {
        assert_eq!(
            x.len(),
            self.input_count(),
            "input len {} does not match network input count {}",
            x.len(),
            self.input_count()
        );
        assert!(
            ws.fits(&self.topology),
            "workspace was built for a different topology"
        );
        forward_pass(self.params(), x, &mut ws.neurons, &mut ws.dfdnet, &mut ws.y);
        &ws.y
    }

    /// Shape-checked inference into a caller buffer.
    pub fn process(&self, x: &[f64], ws: &mut Workspace, y: &mut [f64]) -> Result<()> {
        ensure_len("input", x.len(), self.input_count())?;
        ensure_len("output", y.len(), self.output_count())?;
        if !ws.fits(&self.topology) {
            return Err(Error::InvalidShape(
                "workspace was built for a different topology".to_owned(),
            ));
        }
        y.copy_from_slice(self.forward(x, ws));
        Ok(())
    }

    /// Allocating convenience wrapper around [`Network::process`].
    pub fn process_vec(&self, x: &[f64]) -> Result<Vec<f64>> {
        let mut ws = self.workspace();
        let mut y = vec![0.0; self.output_count()];
        self.process(x, &mut ws, &mut y)?;
        Ok(y)
    }

    /// Draw every weight uniformly from `[-0.5, 0.5]`.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for w in &mut self.weights {
            *w = rng.gen_range(-0.5..=0.5);
        }
    }

    /// Randomize weights and the scaling of inputs and (regression) outputs.
    pub fn randomize_full<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.randomize(rng);
        let nin = self.input_count();
        for i in 0..nin {
            self.means[i] = rng.gen_range(-1.0..=1.0);
            self.sigmas[i] = rng.gen_range(0.5..=2.0);
        }
        if self.is_softmax() {
            return;
        }
        for i in 0..self.output_count() {
            let c = nin + i;
            match self.output_activation(i) {
                Some(ActivationFn::Linear) => {
                    self.means[c] = rng.gen_range(-1.0..=1.0);
                    self.sigmas[c] = sign(self.sigmas[c]) * rng.gen_range(0.5..=2.0);
                }
                Some(ActivationFn::Ex) => {
                    self.sigmas[c] = sign(self.sigmas[c]) * rng.gen_range(0.5..=2.0);
                }
                _ => {}
            }
        }
    }

    /// Activation applied by output neuron `i`, if it is an activation neuron.
    pub(crate) fn output_activation(&self, i: usize) -> Option<ActivationFn> {
        match self.topology.neurons()[self.topology.output_start() + i] {
            NeuronKind::Activation { func, .. } => Some(func),
            _ => None,
        }
    }

    /// Set input (and regression output) scaling from column statistics of `data`.
    ///
    /// Inputs get the column mean and standard deviation (1 for constant
    /// columns). Linear outputs are standardized the same way. Bounded (`Ex`)
    /// outputs keep their lower bound and rescale by the distance from the
    /// column mean to that bound, preserving the sign of the existing sigma.
    pub fn init_preprocessor(&mut self, data: &Dataset) -> Result<()> {
        data.validate_for(&self.topology)?;
        if data.is_empty() {
            return Err(Error::InvalidData(
                "cannot initialize scaling from an empty dataset".to_owned(),
            ));
        }
        let nin = self.input_count();
        let (means, sigmas) = data.column_stats(self.topology.scaling_count());

        for i in 0..nin {
            self.means[i] = means[i];
            self.sigmas[i] = if sigmas[i] == 0.0 { 1.0 } else { sigmas[i] };
        }
        if self.is_softmax() {
            return Ok(());
        }

        for i in 0..self.output_count() {
            let c = nin + i;
            match self.output_activation(i) {
                Some(ActivationFn::Linear) => {
                    self.means[c] = means[c];
                    self.sigmas[c] = if sigmas[c] == 0.0 { 1.0 } else { sigmas[c] };
                }
                Some(ActivationFn::Ex) => {
                    let mut s = self.means[c] - means[c];
                    if s == 0.0 {
                        s = sign(self.sigmas[c]);
                    }
                    if s == 0.0 {
                        s = 1.0;
                    }
                    let sigma = sign(self.sigmas[c]) * s.abs();
                    self.sigmas[c] = if sigma == 0.0 { 1.0 } else { sigma };
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Mean and sigma applied to input `i`.
    pub fn input_scaling(&self, i: usize) -> Result<(f64, f64)> {
        if i >= self.input_count() {
            return Err(Error::NotFound(format!(
                "input {i} (network has {})",
                self.input_count()
            )));
        }
        Ok((self.means[i], self.sigmas[i]))
    }

    /// Set the standardization of input `i`. A zero sigma is stored as 1.
    pub fn set_input_scaling(&mut self, i: usize, mean: f64, sigma: f64) -> Result<()> {
        if i >= self.input_count() {
            return Err(Error::NotFound(format!(
                "input {i} (network has {})",
                self.input_count()
            )));
        }
        ensure_finite("mean", mean)?;
        ensure_finite("sigma", sigma)?;
        self.means[i] = mean;
        self.sigmas[i] = if sigma == 0.0 { 1.0 } else { sigma };
        Ok(())
    }

    /// Mean and sigma applied to output `i`; `(0, 1)` for classifiers.
    pub fn output_scaling(&self, i: usize) -> Result<(f64, f64)> {
        if i >= self.output_count() {
            return Err(Error::NotFound(format!(
                "output {i} (network has {})",
                self.output_count()
            )));
        }
        if self.is_softmax() {
            return Ok((0.0, 1.0));
        }
        let c = self.input_count() + i;
        Ok((self.means[c], self.sigmas[c]))
    }

    /// Set the de-standardization of output `i`. A zero sigma is stored as 1.
    ///
    /// Classifier outputs are probabilities and accept only `(0, 1)`.
    pub fn set_output_scaling(&mut self, i: usize, mean: f64, sigma: f64) -> Result<()> {
        if i >= self.output_count() {
            return Err(Error::NotFound(format!(
                "output {i} (network has {})",
                self.output_count()
            )));
        }
        ensure_finite("mean", mean)?;
        ensure_finite("sigma", sigma)?;
        let sigma = if sigma == 0.0 { 1.0 } else { sigma };
        if self.is_softmax() {
            if mean != 0.0 || sigma != 1.0 {
                return Err(Error::InvalidConfig(format!(
                    "softmax outputs cannot be rescaled (got mean {mean}, sigma {sigma})"
                )));
            }
            return Ok(());
        }
        let c = self.input_count() + i;
        self.means[c] = mean;
        self.sigmas[c] = sigma;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkBuilder, OutputKind};
    use rand::SeedableRng;

    #[test]
    fn linear_network_computes_affine_map() {
        let mut net = NetworkBuilder::new(2, 1)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        // y = 2*x0 - x1 - 0.5 (bias neuron emits -1)
        net.set_weights(&[2.0, -1.0, 0.5]).unwrap();
        let y = net.process_vec(&[1.0, 3.0]).unwrap();
        assert!((y[0] - (2.0 - 3.0 - 0.5)).abs() < 1e-12);

        net.set_input_scaling(0, 1.0, 2.0).unwrap();
        net.set_output_scaling(0, 10.0, 3.0).unwrap();
        let y = net.process_vec(&[5.0, 0.0]).unwrap();
        // x0 -> (5-1)/2 = 2, z = 4 - 0 - 0.5 = 3.5, y = 3.5*3 + 10
        assert!((y[0] - 20.5).abs() < 1e-12);
    }

    #[test]
    fn softmax_sums_to_one_for_large_inputs() {
        let net = NetworkBuilder::new(3, 4)
            .unwrap()
            .hidden(5)
            .unwrap()
            .output(OutputKind::Classifier)
            .unwrap()
            .build_with_seed(11)
            .unwrap();
        for x in [[1e6, -1e6, 3e5], [0.0, 0.0, 0.0], [-700.0, 900.0, 1.0]] {
            let y = net.process_vec(&x).unwrap();
            let sum: f64 = y.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "sum {sum}");
            assert!(y.iter().all(|p| p.is_finite() && *p >= 0.0));
        }
    }

    #[test]
    fn zero_sigma_is_stored_as_one() {
        let mut net = NetworkBuilder::new(1, 1).unwrap().build_with_seed(0).unwrap();
        net.set_input_scaling(0, 0.5, 0.0).unwrap();
        assert_eq!(net.input_scaling(0).unwrap(), (0.5, 1.0));
        assert!(net.set_input_scaling(0, f64::NAN, 1.0).is_err());
        assert!(matches!(
            net.input_scaling(1).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn classifier_output_scaling_is_fixed() {
        let mut net = NetworkBuilder::new(2, 3)
            .unwrap()
            .output(OutputKind::Classifier)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        assert_eq!(net.output_scaling(2).unwrap(), (0.0, 1.0));
        assert!(net.set_output_scaling(0, 0.0, 1.0).is_ok());
        assert!(net.set_output_scaling(0, 1.0, 1.0).is_err());
        assert!(net.set_output_scaling(0, 0.0, 2.0).is_err());
    }

    #[test]
    fn init_preprocessor_standardizes_columns() {
        let mut net = NetworkBuilder::new(1, 1).unwrap().build_with_seed(3).unwrap();
        let data = Dataset::from_rows(&[vec![1.0, 10.0], vec![3.0, 14.0]]).unwrap();
        net.init_preprocessor(&data).unwrap();
        assert_eq!(net.input_scaling(0).unwrap(), (2.0, 1.0));
        assert_eq!(net.output_scaling(0).unwrap(), (12.0, 2.0));
    }

    #[test]
    fn init_preprocessor_keeps_bounded_output_bound() {
        let mut net = NetworkBuilder::new(1, 1)
            .unwrap()
            .output(OutputKind::Bounded { b: 1.0, d: -1.0 })
            .unwrap()
            .build_with_seed(3)
            .unwrap();
        let data = Dataset::from_rows(&[vec![0.0, -3.0], vec![1.0, -1.0]]).unwrap();
        net.init_preprocessor(&data).unwrap();
        // mean of targets is -2, bound stays 1, sigma keeps its negative sign
        assert_eq!(net.output_scaling(0).unwrap(), (1.0, -3.0));
    }

    #[test]
    fn randomize_full_keeps_sigma_signs() {
        let mut net = NetworkBuilder::new(2, 1)
            .unwrap()
            .output(OutputKind::Bounded { b: 0.0, d: -1.0 })
            .unwrap()
            .build_with_seed(1)
            .unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        net.randomize_full(&mut rng);
        let (_, s) = net.output_scaling(0).unwrap();
        assert!((-2.0..=-0.5).contains(&s));
        for i in 0..2 {
            let (m, s) = net.input_scaling(i).unwrap();
            assert!((-1.0..=1.0).contains(&m));
            assert!((0.5..=2.0).contains(&s));
        }
    }
}
