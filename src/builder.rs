//! Network builder.
//!
//! `NetworkBuilder` is the recommended way to create a network. It assembles the
//! standard archetypes from the [`TopologyBuilder`] primitives:
//!
//! - zero, one or two `tanh` hidden layers,
//! - an output layer chosen by [`OutputKind`].
//!
//! Weights start uniform in `[-0.5, 0.5]`, inputs start unscaled (mean 0,
//! sigma 1), and outputs get whatever scaling their kind prescribes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::topology::TopologyBuilder;
use crate::util::ensure_finite;
use crate::{ActivationFn, Error, Network, Result};

/// Maximum number of hidden layers supported by the archetypes.
pub const MAX_HIDDEN_LAYERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
/// What the output layer computes.
pub enum OutputKind {
    /// Unbounded linear outputs.
    #[default]
    Linear,
    /// Outputs bounded on one side: `y >= b` if `d >= 0`, `y <= b` otherwise.
    Bounded { b: f64, d: f64 },
    /// Outputs inside the open interval between `a` and `b`.
    Ranged { a: f64, b: f64 },
    /// Softmax class probabilities over `nout >= 2` classes.
    Classifier,
}

impl OutputKind {
    pub fn validate(self, outputs: usize) -> Result<()> {
        match self {
            OutputKind::Linear => Ok(()),
            OutputKind::Bounded { b, d } => {
                ensure_finite("bounded output b", b)?;
                ensure_finite("bounded output d", d)
            }
            OutputKind::Ranged { a, b } => {
                ensure_finite("ranged output a", a)?;
                ensure_finite("ranged output b", b)?;
                if a == b {
                    return Err(Error::InvalidConfig(format!(
                        "ranged output needs a != b, got a = b = {a}"
                    )));
                }
                Ok(())
            }
            OutputKind::Classifier => {
                if outputs < 2 {
                    return Err(Error::InvalidConfig(format!(
                        "a classifier needs at least 2 outputs, got {outputs}"
                    )));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Builder for a [`Network`].
///
/// Example:
///
/// ```rust
/// use rust_mlpe::{NetworkBuilder, OutputKind};
///
/// # fn main() -> rust_mlpe::Result<()> {
/// let net = NetworkBuilder::new(4, 3)?
///     .hidden(8)?
///     .output(OutputKind::Classifier)?
///     .build_with_seed(0)?;
/// assert!(net.is_softmax());
/// # Ok(())
/// # }
/// ```
pub struct NetworkBuilder {
    inputs: usize,
    outputs: usize,
    hidden: Vec<usize>,
    output: OutputKind,
}

impl NetworkBuilder {
    /// Start building a network with `inputs` inputs and `outputs` outputs.
    pub fn new(inputs: usize, outputs: usize) -> Result<Self> {
        if inputs == 0 || outputs == 0 {
            return Err(Error::InvalidConfig(format!(
                "inputs and outputs must be > 0, got {inputs} and {outputs}"
            )));
        }
        Ok(Self {
            inputs,
            outputs,
            hidden: Vec::new(),
            output: OutputKind::Linear,
        })
    }

    /// Add a `tanh` hidden layer of `size` neurons.
    pub fn hidden(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig(
                "hidden layer size must be > 0".to_owned(),
            ));
        }
        if self.hidden.len() == MAX_HIDDEN_LAYERS {
            return Err(Error::InvalidConfig(format!(
                "at most {MAX_HIDDEN_LAYERS} hidden layers are supported"
            )));
        }
        self.hidden.push(size);
        Ok(self)
    }

    /// Choose the output layer.
    pub fn output(mut self, kind: OutputKind) -> Result<Self> {
        kind.validate(self.outputs)?;
        self.output = kind;
        Ok(self)
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(&self, seed: u64) -> Result<Network> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Network> {
        self.output.validate(self.outputs)?;

        let mut layers = TopologyBuilder::new(self.inputs)?;
        for &size in &self.hidden {
            layers = layers.biased_summator(size)?.activation(ActivationFn::Tanh);
        }

        let classifier = self.output == OutputKind::Classifier;
        layers = match self.output {
            OutputKind::Linear => layers
                .biased_summator(self.outputs)?
                .activation(ActivationFn::Linear),
            OutputKind::Bounded { .. } => layers
                .biased_summator(self.outputs)?
                .activation(ActivationFn::Ex),
            OutputKind::Ranged { .. } => layers
                .biased_summator(self.outputs)?
                .activation(ActivationFn::Tanh),
            // The last logit is pinned to zero.
            OutputKind::Classifier => layers.biased_summator(self.outputs - 1)?.zero(),
        };
        let topology = layers.build(self.outputs, classifier)?;

        let mut net = Network::from_topology(topology, rng);
        let nin = self.inputs;
        match self.output {
            OutputKind::Bounded { b, d } => {
                let sigma = if d >= 0.0 { 1.0 } else { -1.0 };
                for i in 0..self.outputs {
                    net.means[nin + i] = b;
                    net.sigmas[nin + i] = sigma;
                }
            }
            OutputKind::Ranged { a, b } => {
                for i in 0..self.outputs {
                    net.means[nin + i] = 0.5 * (a + b);
                    net.sigmas[nin + i] = 0.5 * (a - b);
                }
            }
            OutputKind::Linear | OutputKind::Classifier => {}
        }
        Ok(net)
    }
}
