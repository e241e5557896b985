//! Reusable per-caller buffers.
//!
//! Networks and ensembles are immutable during inference. Everything a forward
//! or backward pass writes lives in a [`Workspace`], so several threads can
//! share one network as long as each brings its own workspace.

use crate::topology::Topology;

/// Samples per chunk in batch gradient computation.
pub(crate) const CHUNK_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct Workspace {
    /// Neuron outputs of the most recent pass.
    pub(crate) neurons: Vec<f64>,
    /// `d(neuron) / d(net)` of the most recent pass.
    pub(crate) dfdnet: Vec<f64>,
    /// `dE / d(neuron)` of the most recent backward pass.
    pub(crate) derror: Vec<f64>,
    /// Post-processed outputs of the most recent pass.
    pub(crate) y: Vec<f64>,
    /// Desired outputs of the current sample (one-hot for classifiers).
    pub(crate) desired: Vec<f64>,
    /// Output-sized scratch (softmax probabilities, ensemble member outputs).
    pub(crate) tmp: Vec<f64>,
    /// Chunk matrix: neuron, dfdnet and derror rows, `CHUNK_SIZE` columns each.
    pub(crate) chunk: Vec<f64>,
}

impl Workspace {
    pub fn new(topology: &Topology) -> Self {
        let ntotal = topology.neuron_count();
        let nout = topology.output_count();
        Self {
            neurons: vec![0.0; ntotal],
            dfdnet: vec![0.0; ntotal],
            derror: vec![0.0; ntotal],
            y: vec![0.0; nout],
            desired: vec![0.0; nout],
            tmp: vec![0.0; nout],
            chunk: vec![0.0; 3 * ntotal * CHUNK_SIZE],
        }
    }

    #[inline]
    pub(crate) fn fits(&self, topology: &Topology) -> bool {
        self.neurons.len() == topology.neuron_count() && self.y.len() == topology.output_count()
    }

    /// Outputs of the most recent forward pass.
    #[inline]
    pub fn output(&self) -> &[f64] {
        &self.y
    }
}
