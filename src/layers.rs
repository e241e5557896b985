//! Layer-level view of a network.
//!
//! The neuron table does not know about layers. This module recovers the
//! `(layer, neuron)` structure of networks shaped like the builder archetypes
//! (input layer, then bias + summators + activations repeated, optionally ending
//! in bias + summators + zero for a classifier) and answers questions like "which
//! weight connects neuron `i0` of layer `k0` to neuron `i1` of layer `k1`".
//!
//! Both lookup tables are sorted by their composite key and searched with
//! binary search.

use crate::topology::{NeuronKind, Topology};
use crate::{ActivationFn, Error, Network, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
struct NeuronEntry {
    key: (usize, usize),
    /// Index of the activation neuron in the table.
    activation: Option<usize>,
    /// Index of the threshold (bias) weight.
    threshold: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ConnectionEntry {
    key: (usize, usize, usize, usize),
    weight: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LayerIndex {
    sizes: Vec<usize>,
    neurons: Vec<NeuronEntry>,
    connections: Vec<ConnectionEntry>,
}

impl LayerIndex {
    /// Recover the layer structure, or `None` for tables not shaped like the archetypes.
    pub(crate) fn infer(topology: &Topology) -> Option<Self> {
        let table = topology.neurons();
        let nin = topology.input_count();

        let mut sizes = vec![nin];
        let mut neurons: Vec<NeuronEntry> = (0..nin)
            .map(|i| NeuronEntry {
                key: (0, i),
                activation: None,
                threshold: None,
            })
            .collect();
        let mut connections = Vec::new();

        // Neuron indices forming the visible outputs of the previous layer.
        let mut prev_start = 0usize;
        let mut prev_len = nin;
        let mut pos = nin;
        let mut saw_zero = false;

        while pos < table.len() {
            if saw_zero || table[pos] != NeuronKind::Bias || pos != prev_start + prev_len {
                return None;
            }
            pos += 1;
            let k = sizes.len();

            let sum_start = pos;
            let mut weights = Vec::new();
            while let Some(NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            }) = table.get(pos).copied()
            {
                if first_source != prev_start || fan_in != prev_len + 1 {
                    return None;
                }
                weights.push(first_weight);
                pos += 1;
            }
            let m = weights.len();
            if m == 0 {
                return None;
            }

            let has_activation = (0..m).all(|j| {
                matches!(table.get(pos + j), Some(NeuronKind::Activation { source, .. }) if *source == sum_start + j)
            });
            let layer_len = if has_activation {
                for (j, &w) in weights.iter().enumerate() {
                    neurons.push(NeuronEntry {
                        key: (k, j),
                        activation: Some(pos + j),
                        threshold: Some(w + prev_len),
                    });
                }
                prev_start = pos;
                pos += m;
                m
            } else if table.get(pos) == Some(&NeuronKind::Zero) && pos + 1 == table.len() {
                for (j, &w) in weights.iter().enumerate() {
                    neurons.push(NeuronEntry {
                        key: (k, j),
                        activation: None,
                        threshold: Some(w + prev_len),
                    });
                }
                neurons.push(NeuronEntry {
                    key: (k, m),
                    activation: None,
                    threshold: None,
                });
                saw_zero = true;
                prev_start = sum_start;
                pos += 1;
                m + 1
            } else {
                return None;
            };

            for i in 0..prev_len {
                for (j, &w) in weights.iter().enumerate() {
                    connections.push(ConnectionEntry {
                        key: (k - 1, i, k, j),
                        weight: w + i,
                    });
                }
            }
            sizes.push(layer_len);
            prev_len = layer_len;
        }

        if sizes.len() < 2
            || prev_len != topology.output_count()
            || saw_zero != topology.is_classifier()
        {
            return None;
        }
        debug_assert!(neurons.windows(2).all(|w| w[0].key < w[1].key));
        debug_assert!(connections.windows(2).all(|w| w[0].key < w[1].key));

        Some(Self {
            sizes,
            neurons,
            connections,
        })
    }

    fn neuron(&self, layer: usize, i: usize) -> Result<&NeuronEntry> {
        self.neurons
            .binary_search_by_key(&(layer, i), |e| e.key)
            .map(|pos| &self.neurons[pos])
            .map_err(|_| Error::NotFound(format!("neuron {i} of layer {layer}")))
    }

    fn connection(&self, key: (usize, usize, usize, usize)) -> Option<usize> {
        self.connections
            .binary_search_by_key(&key, |e| e.key)
            .ok()
            .map(|pos| self.connections[pos].weight)
    }

    fn check_neuron(&self, layer: usize, i: usize) -> Result<()> {
        match self.sizes.get(layer) {
            Some(&size) if i < size => Ok(()),
            Some(&size) => Err(Error::NotFound(format!(
                "neuron {i} of layer {layer} (layer has {size})"
            ))),
            None => Err(Error::NotFound(format!(
                "layer {layer} (network has {})",
                self.sizes.len()
            ))),
        }
    }
}

impl Network {
    fn layer_index(&self) -> Result<&LayerIndex> {
        self.layers.as_ref().ok_or_else(|| {
            Error::InvalidConfig("network topology has no layer structure".to_owned())
        })
    }

    /// Number of layers, counting the input and output layers.
    pub fn layer_count(&self) -> Result<usize> {
        Ok(self.layer_index()?.sizes.len())
    }

    /// Number of neurons in layer `k`.
    pub fn layer_size(&self, k: usize) -> Result<usize> {
        let index = self.layer_index()?;
        index.sizes.get(k).copied().ok_or_else(|| {
            Error::NotFound(format!("layer {k} (network has {})", index.sizes.len()))
        })
    }

    /// Activation function and threshold of neuron `i` in layer `k`.
    ///
    /// Neurons without an activation report `None`; neurons without a threshold report 0.
    pub fn neuron_info(&self, k: usize, i: usize) -> Result<(Option<ActivationFn>, f64)> {
        let index = self.layer_index()?;
        index.check_neuron(k, i)?;
        let entry = index.neuron(k, i)?;
        let func = entry.activation.and_then(|a| match self.topology.neurons()[a] {
            NeuronKind::Activation { func, .. } => Some(func),
            _ => None,
        });
        let threshold = entry.threshold.map_or(0.0, |w| self.weights[w]);
        Ok((func, threshold))
    }

    /// Set the activation function and threshold of neuron `i` in layer `k`.
    ///
    /// A neuron without an activation accepts only `None`; a neuron with one
    /// requires `Some`. A neuron without a threshold accepts only 0.
    pub fn set_neuron_info(
        &mut self,
        k: usize,
        i: usize,
        func: Option<ActivationFn>,
        threshold: f64,
    ) -> Result<()> {
        if !threshold.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "threshold must be finite, got {threshold}"
            )));
        }
        let index = self.layer_index()?;
        index.check_neuron(k, i)?;
        let entry = *index.neuron(k, i)?;

        match (entry.activation, func) {
            (Some(_), None) => {
                return Err(Error::InvalidConfig(format!(
                    "neuron {i} of layer {k} has an activation slot; pass the function"
                )))
            }
            (None, Some(f)) => {
                return Err(Error::InvalidConfig(format!(
                    "neuron {i} of layer {k} has no activation slot, cannot set {f:?}"
                )))
            }
            _ => {}
        }
        if entry.threshold.is_none() && threshold != 0.0 {
            return Err(Error::InvalidConfig(format!(
                "neuron {i} of layer {k} has no threshold, cannot set {threshold}"
            )));
        }

        if let (Some(a), Some(f)) = (entry.activation, func) {
            let mut neurons = self.topology.neurons().to_vec();
            if let NeuronKind::Activation { source, .. } = neurons[a] {
                neurons[a] = NeuronKind::Activation { func: f, source };
            }
            self.topology = Topology::new(
                self.topology.input_count(),
                self.topology.output_count(),
                self.topology.is_classifier(),
                neurons,
            )?;
        }
        if let Some(w) = entry.threshold {
            self.weights[w] = threshold;
        }
        Ok(())
    }

    /// Weight from neuron `i0` of layer `k0` to neuron `i1` of layer `k1`; 0 if unconnected.
    pub fn weight(&self, k0: usize, i0: usize, k1: usize, i1: usize) -> Result<f64> {
        let index = self.layer_index()?;
        index.check_neuron(k0, i0)?;
        index.check_neuron(k1, i1)?;
        Ok(index
            .connection((k0, i0, k1, i1))
            .map_or(0.0, |w| self.weights[w]))
    }

    /// Set the weight from neuron `i0` of layer `k0` to neuron `i1` of layer `k1`.
    ///
    /// Unconnected pairs accept only 0.
    pub fn set_weight(&mut self, k0: usize, i0: usize, k1: usize, i1: usize, w: f64) -> Result<()> {
        if !w.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "weight must be finite, got {w}"
            )));
        }
        let index = self.layer_index()?;
        index.check_neuron(k0, i0)?;
        index.check_neuron(k1, i1)?;
        match index.connection((k0, i0, k1, i1)) {
            Some(slot) => {
                self.weights[slot] = w;
                Ok(())
            }
            None if w == 0.0 => Ok(()),
            None => Err(Error::InvalidConfig(format!(
                "no connection from ({k0},{i0}) to ({k1},{i1}); cannot set weight {w}"
            ))),
        }
    }
}
