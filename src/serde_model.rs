//! JSON mirror of the flat network format (feature: `serde`).
//!
//! The JSON shape is defined by [`SerializedNetwork`], not by the internal
//! `Network`/`Topology` structs, so it stays stable if those change. Loading
//! re-validates the neuron table and all parameters.

use serde::{Deserialize, Serialize};

use crate::serialize::NETWORK_FORMAT_VERSION;
use crate::topology::{NeuronKind, Topology};
use crate::{ActivationFn, Error, Network, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNetwork {
    pub format_version: i64,
    pub inputs: usize,
    pub outputs: usize,
    pub classifier: bool,
    pub neurons: Vec<SerializedNeuron>,
    pub weights: Vec<f64>,
    pub means: Vec<f64>,
    pub sigmas: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedNeuron {
    Input,
    Bias,
    Zero,
    Summator {
        first_source: usize,
        fan_in: usize,
        first_weight: usize,
    },
    Activation {
        function: ActivationFn,
        source: usize,
    },
}

impl From<NeuronKind> for SerializedNeuron {
    fn from(kind: NeuronKind) -> Self {
        match kind {
            NeuronKind::Input => SerializedNeuron::Input,
            NeuronKind::Bias => SerializedNeuron::Bias,
            NeuronKind::Zero => SerializedNeuron::Zero,
            NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            } => SerializedNeuron::Summator {
                first_source,
                fan_in,
                first_weight,
            },
            NeuronKind::Activation { func, source } => SerializedNeuron::Activation {
                function: func,
                source,
            },
        }
    }
}

impl From<SerializedNeuron> for NeuronKind {
    fn from(value: SerializedNeuron) -> Self {
        match value {
            SerializedNeuron::Input => NeuronKind::Input,
            SerializedNeuron::Bias => NeuronKind::Bias,
            SerializedNeuron::Zero => NeuronKind::Zero,
            SerializedNeuron::Summator {
                first_source,
                fan_in,
                first_weight,
            } => NeuronKind::Summator {
                first_source,
                fan_in,
                first_weight,
            },
            SerializedNeuron::Activation { function, source } => NeuronKind::Activation {
                func: function,
                source,
            },
        }
    }
}

impl From<&Network> for SerializedNetwork {
    fn from(network: &Network) -> Self {
        let topology = network.topology();
        Self {
            format_version: NETWORK_FORMAT_VERSION,
            inputs: topology.input_count(),
            outputs: topology.output_count(),
            classifier: topology.is_classifier(),
            neurons: topology.neurons().iter().map(|&n| n.into()).collect(),
            weights: network.weights.clone(),
            means: network.means.clone(),
            sigmas: network.sigmas.clone(),
        }
    }
}

impl TryFrom<SerializedNetwork> for Network {
    type Error = Error;

    fn try_from(value: SerializedNetwork) -> std::result::Result<Self, Self::Error> {
        if value.format_version != NETWORK_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported network format_version {}; expected {NETWORK_FORMAT_VERSION}",
                value.format_version
            )));
        }
        let neurons = value.neurons.into_iter().map(NeuronKind::from).collect();
        let topology = Topology::new(value.inputs, value.outputs, value.classifier, neurons)
            .map_err(|e| Error::InvalidData(format!("corrupt structure: {e}")))?;
        Network::from_parts(topology, value.weights, value.means, value.sigmas)
            .map_err(|e| Error::InvalidData(e.to_string()))
    }
}

impl Network {
    /// Serialize the network to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(&SerializedNetwork::from(self))
            .map_err(|e| Error::InvalidData(format!("failed to serialize network: {e}")))
    }

    /// Serialize the network to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(&SerializedNetwork::from(self))
            .map_err(|e| Error::InvalidData(format!("failed to serialize network: {e}")))
    }

    /// Parse a network from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let ser: SerializedNetwork = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse network json: {e}")))?;
        ser.try_into()
    }
}
