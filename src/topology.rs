//! Network topology: a flat, ordered table of neurons.
//!
//! A network is a sequence of neurons where every neuron only reads neurons
//! with a smaller index. Processing is a single forward walk over the table,
//! backpropagation a single backward walk.
//!
//! The table is built from *layers* with [`TopologyBuilder`]:
//!
//! - an input layer (`Input` neurons, always first),
//! - biased summator layers (a one-neuron `Bias` layer emitting `-1`, followed by
//!   summators reading the previous layer and the bias),
//! - activation layers (one activation neuron per neuron of the previous layer),
//! - zero layers (a single neuron emitting `0`, used as the fixed last logit of a
//!   softmax classifier).
//!
//! Summators own a contiguous run of weights; the weights of all summators are
//! laid out in neuron order, so the weight vector has no gaps.

use crate::{ActivationFn, Error, Result};

/// One entry of the neuron table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NeuronKind {
    /// Standardized network input.
    Input,
    /// Constant `-1`; its weight acts as a threshold.
    Bias,
    /// Constant `0`.
    Zero,
    /// `sum_j w[first_weight + j] * neuron[first_source + j]` for `j < fan_in`.
    Summator {
        first_source: usize,
        fan_in: usize,
        first_weight: usize,
    },
    /// `func(neuron[source])`.
    Activation { func: ActivationFn, source: usize },
}

impl NeuronKind {
    pub(crate) const INPUT_CODE: i64 = -2;
    pub(crate) const BIAS_CODE: i64 = -3;
    pub(crate) const ZERO_CODE: i64 = -4;
    pub(crate) const SUMMATOR_CODE: i64 = 0;

    /// Four-integer record `(kind, fan_in, source, weight_offset)`.
    pub(crate) fn to_record(self) -> [i64; 4] {
        match self {
            NeuronKind::Input => [Self::INPUT_CODE, 0, 0, 0],
            NeuronKind::Bias => [Self::BIAS_CODE, 0, 0, 0],
            NeuronKind::Zero => [Self::ZERO_CODE, 0, 0, 0],
            NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            } => [
                Self::SUMMATOR_CODE,
                fan_in as i64,
                first_source as i64,
                first_weight as i64,
            ],
            NeuronKind::Activation { func, source } => [func.code(), 1, source as i64, -1],
        }
    }

    pub(crate) fn from_record(record: [i64; 4]) -> Result<Self> {
        let [kind, fan_in, source, weight] = record;
        let to_usize = |v: i64, what: &str| -> Result<usize> {
            usize::try_from(v)
                .map_err(|_| Error::InvalidData(format!("negative {what} {v} in neuron record")))
        };
        Ok(match kind {
            Self::INPUT_CODE => NeuronKind::Input,
            Self::BIAS_CODE => NeuronKind::Bias,
            Self::ZERO_CODE => NeuronKind::Zero,
            Self::SUMMATOR_CODE => NeuronKind::Summator {
                first_source: to_usize(source, "source")?,
                fan_in: to_usize(fan_in, "fan-in")?,
                first_weight: to_usize(weight, "weight offset")?,
            },
            code => NeuronKind::Activation {
                func: ActivationFn::from_code(code)
                    .map_err(|e| Error::InvalidData(e.to_string()))?,
                source: to_usize(source, "source")?,
            },
        })
    }
}

/// Validated neuron table plus the network geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    inputs: usize,
    outputs: usize,
    classifier: bool,
    neurons: Vec<NeuronKind>,
    weight_count: usize,
}

impl Topology {
    /// Validate and wrap a neuron table.
    ///
    /// The outputs are the last `outputs` neurons. A classifier applies softmax to
    /// them, needs at least two outputs and ends with a [`NeuronKind::Zero`] logit.
    pub fn new(
        inputs: usize,
        outputs: usize,
        classifier: bool,
        neurons: Vec<NeuronKind>,
    ) -> Result<Self> {
        if inputs == 0 || outputs == 0 {
            return Err(Error::InvalidConfig(format!(
                "inputs and outputs must be > 0, got {inputs} and {outputs}"
            )));
        }
        if classifier && outputs < 2 {
            return Err(Error::InvalidConfig(format!(
                "a softmax classifier needs at least 2 outputs, got {outputs}"
            )));
        }
        if neurons.len() < inputs + outputs {
            return Err(Error::InvalidConfig(format!(
                "{} neurons cannot hold {inputs} inputs and {outputs} outputs",
                neurons.len()
            )));
        }
        if classifier && neurons.last() != Some(&NeuronKind::Zero) {
            return Err(Error::InvalidConfig(
                "the last output of a softmax classifier must be a zero neuron".to_owned(),
            ));
        }

        let mut weight_count = 0usize;
        for (i, neuron) in neurons.iter().enumerate() {
            let is_input = matches!(neuron, NeuronKind::Input);
            if is_input != (i < inputs) {
                return Err(Error::InvalidConfig(format!(
                    "input neurons must occupy exactly the first {inputs} slots (neuron {i})"
                )));
            }
            match *neuron {
                NeuronKind::Summator {
                    first_source,
                    fan_in,
                    first_weight,
                } => {
                    if fan_in == 0 || first_source + fan_in > i {
                        return Err(Error::InvalidConfig(format!(
                            "summator {i} reads neurons {first_source}..{} which are not before it",
                            first_source + fan_in
                        )));
                    }
                    if first_weight != weight_count {
                        return Err(Error::InvalidConfig(format!(
                            "summator {i} weight offset {first_weight}, expected {weight_count}"
                        )));
                    }
                    weight_count += fan_in;
                }
                NeuronKind::Activation { source, .. } => {
                    if source >= i {
                        return Err(Error::InvalidConfig(format!(
                            "activation {i} reads neuron {source} which is not before it"
                        )));
                    }
                }
                NeuronKind::Input | NeuronKind::Bias | NeuronKind::Zero => {}
            }
        }
        if weight_count == 0 {
            return Err(Error::InvalidConfig(
                "topology has no weights".to_owned(),
            ));
        }

        Ok(Self {
            inputs,
            outputs,
            classifier,
            neurons,
            weight_count,
        })
    }

    #[inline]
    pub fn input_count(&self) -> usize {
        self.inputs
    }

    #[inline]
    pub fn output_count(&self) -> usize {
        self.outputs
    }

    #[inline]
    pub fn is_classifier(&self) -> bool {
        self.classifier
    }

    #[inline]
    pub fn neuron_count(&self) -> usize {
        self.neurons.len()
    }

    #[inline]
    pub fn weight_count(&self) -> usize {
        self.weight_count
    }

    #[inline]
    pub fn neurons(&self) -> &[NeuronKind] {
        &self.neurons
    }

    /// Index of the first output neuron.
    #[inline]
    pub fn output_start(&self) -> usize {
        self.neurons.len() - self.outputs
    }

    /// Number of columns with a mean/sigma pair: inputs, plus outputs for regression.
    #[inline]
    pub fn scaling_count(&self) -> usize {
        if self.classifier {
            self.inputs
        } else {
            self.inputs + self.outputs
        }
    }

    /// Width of a training-matrix row: inputs plus a class label, or inputs plus targets.
    #[inline]
    pub fn row_width(&self) -> usize {
        if self.classifier {
            self.inputs + 1
        } else {
            self.inputs + self.outputs
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LayerKind {
    Input,
    Bias,
    Summator,
    Activation(ActivationFn),
    Zero,
}

#[derive(Debug, Clone, Copy)]
struct LayerSpec {
    size: usize,
    kind: LayerKind,
    // Inclusive range of layers this layer reads from.
    connect: Option<(usize, usize)>,
}

/// Composes a [`Topology`] from layer primitives.
///
/// ```rust
/// use rust_mlpe::{ActivationFn, TopologyBuilder};
///
/// # fn main() -> rust_mlpe::Result<()> {
/// // 2 inputs -> 3 tanh -> 1 linear output
/// let topology = TopologyBuilder::new(2)?
///     .biased_summator(3)?
///     .activation(ActivationFn::Tanh)
///     .biased_summator(1)?
///     .activation(ActivationFn::Linear)
///     .build(1, false)?;
/// assert_eq!(topology.weight_count(), 3 * 3 + 4);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    layers: Vec<LayerSpec>,
}

impl TopologyBuilder {
    /// Start with an input layer of `inputs` neurons.
    pub fn new(inputs: usize) -> Result<Self> {
        if inputs == 0 {
            return Err(Error::InvalidConfig("inputs must be > 0".to_owned()));
        }
        Ok(Self {
            layers: vec![LayerSpec {
                size: inputs,
                kind: LayerKind::Input,
                connect: None,
            }],
        })
    }

    fn last(&self) -> usize {
        self.layers.len() - 1
    }

    /// Append a bias layer and `size` summators reading the previous layer and the bias.
    pub fn biased_summator(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig(
                "summator layer size must be > 0".to_owned(),
            ));
        }
        let prev = self.last();
        self.layers.push(LayerSpec {
            size: 1,
            kind: LayerKind::Bias,
            connect: None,
        });
        self.layers.push(LayerSpec {
            size,
            kind: LayerKind::Summator,
            connect: Some((prev, prev + 1)),
        });
        Ok(self)
    }

    /// Append one `func` neuron per neuron of the previous layer.
    pub fn activation(mut self, func: ActivationFn) -> Self {
        let prev = self.last();
        self.layers.push(LayerSpec {
            size: self.layers[prev].size,
            kind: LayerKind::Activation(func),
            connect: Some((prev, prev)),
        });
        self
    }

    /// Append a single constant-zero neuron.
    pub fn zero(mut self) -> Self {
        self.layers.push(LayerSpec {
            size: 1,
            kind: LayerKind::Zero,
            connect: None,
        });
        self
    }

    /// Flatten the layers into a neuron table.
    pub fn build(self, outputs: usize, classifier: bool) -> Result<Topology> {
        let mut starts = Vec::with_capacity(self.layers.len());
        let mut total = 0usize;
        for (k, layer) in self.layers.iter().enumerate() {
            if layer.size == 0 {
                return Err(Error::InvalidConfig(format!("layer {k} has size 0")));
            }
            if let Some((first, last)) = layer.connect {
                if first > last || last >= k {
                    return Err(Error::InvalidConfig(format!(
                        "layer {k} connects to layers {first}..={last}, which are not before it"
                    )));
                }
            }
            starts.push(total);
            total += layer.size;
        }

        let mut neurons = Vec::with_capacity(total);
        let mut weights = 0usize;
        for layer in &self.layers {
            match layer.kind {
                LayerKind::Input => {
                    neurons.extend(std::iter::repeat_n(NeuronKind::Input, layer.size))
                }
                LayerKind::Bias => {
                    neurons.extend(std::iter::repeat_n(NeuronKind::Bias, layer.size))
                }
                LayerKind::Zero => {
                    neurons.extend(std::iter::repeat_n(NeuronKind::Zero, layer.size))
                }
                LayerKind::Summator => {
                    let (first, last) = layer.connect.unwrap_or((0, 0));
                    let fan_in: usize = self.layers[first..=last].iter().map(|l| l.size).sum();
                    for _ in 0..layer.size {
                        neurons.push(NeuronKind::Summator {
                            first_source: starts[first],
                            fan_in,
                            first_weight: weights,
                        });
                        weights += fan_in;
                    }
                }
                LayerKind::Activation(func) => {
                    let (first, _) = layer.connect.unwrap_or((0, 0));
                    for j in 0..layer.size {
                        neurons.push(NeuronKind::Activation {
                            func,
                            source: starts[first] + j,
                        });
                    }
                }
            }
        }

        Topology::new(self.layers[0].size, outputs, classifier, neurons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_layer_regression_table() {
        let t = TopologyBuilder::new(2)
            .unwrap()
            .biased_summator(1)
            .unwrap()
            .activation(ActivationFn::Linear)
            .build(1, false)
            .unwrap();
        assert_eq!(
            t.neurons(),
            &[
                NeuronKind::Input,
                NeuronKind::Input,
                NeuronKind::Bias,
                NeuronKind::Summator {
                    first_source: 0,
                    fan_in: 3,
                    first_weight: 0
                },
                NeuronKind::Activation {
                    func: ActivationFn::Linear,
                    source: 3
                },
            ]
        );
        assert_eq!(t.weight_count(), 3);
        assert_eq!(t.output_start(), 4);
        assert_eq!(t.scaling_count(), 3);
    }

    #[test]
    fn hidden_layer_sources_skip_summators() {
        let t = TopologyBuilder::new(1)
            .unwrap()
            .biased_summator(2)
            .unwrap()
            .activation(ActivationFn::Tanh)
            .biased_summator(1)
            .unwrap()
            .activation(ActivationFn::Linear)
            .build(1, false)
            .unwrap();
        // in, bias, s, s, a, a, bias, s, a
        assert_eq!(t.neuron_count(), 9);
        assert_eq!(
            t.neurons()[7],
            NeuronKind::Summator {
                first_source: 4,
                fan_in: 3,
                first_weight: 4
            }
        );
        assert_eq!(t.weight_count(), 7);
    }

    #[test]
    fn classifier_needs_two_outputs() {
        let b = TopologyBuilder::new(2).unwrap().biased_summator(1).unwrap().zero();
        assert!(b.clone().build(1, true).is_err());
        let t = b.build(2, true).unwrap();
        assert_eq!(t.scaling_count(), 2);
        assert_eq!(t.row_width(), 3);
    }

    #[test]
    fn classifier_ends_with_a_zero_neuron() {
        let free = TopologyBuilder::new(2).unwrap().biased_summator(3).unwrap();
        assert!(matches!(free.clone().build(3, true), Err(Error::InvalidConfig(_))));
        assert!(free.build(3, false).is_ok());

        let mut neurons = TopologyBuilder::new(2)
            .unwrap()
            .biased_summator(1)
            .unwrap()
            .zero()
            .build(2, true)
            .unwrap()
            .neurons()
            .to_vec();
        assert!(Topology::new(2, 2, true, neurons.clone()).is_ok());
        neurons.pop();
        neurons.push(NeuronKind::Bias);
        assert!(Topology::new(2, 2, true, neurons).is_err());
    }

    #[test]
    fn rejects_zero_sized_layers() {
        assert!(TopologyBuilder::new(0).is_err());
        assert!(TopologyBuilder::new(1).unwrap().biased_summator(0).is_err());
    }

    #[test]
    fn rejects_forward_references_and_gaps() {
        let bad = vec![
            NeuronKind::Input,
            NeuronKind::Activation {
                func: ActivationFn::Tanh,
                source: 1,
            },
        ];
        assert!(Topology::new(1, 1, false, bad).is_err());

        let gap = vec![
            NeuronKind::Input,
            NeuronKind::Bias,
            NeuronKind::Summator {
                first_source: 0,
                fan_in: 2,
                first_weight: 1,
            },
        ];
        assert!(Topology::new(1, 1, false, gap).is_err());
    }

    #[test]
    fn records_roundtrip() {
        let kinds = [
            NeuronKind::Input,
            NeuronKind::Bias,
            NeuronKind::Zero,
            NeuronKind::Summator {
                first_source: 3,
                fan_in: 4,
                first_weight: 10,
            },
            NeuronKind::Activation {
                func: ActivationFn::Ex,
                source: 7,
            },
        ];
        for k in kinds {
            assert_eq!(NeuronKind::from_record(k.to_record()).unwrap(), k);
        }
        assert!(NeuronKind::from_record([9, 1, 0, -1]).is_err());
        assert!(NeuronKind::from_record([0, -1, 0, 0]).is_err());
    }
}
