//! A feed-forward neural network engine with second-order training.
//!
//! `rust-mlpe` stores a network as a flat neuron table: inputs, biased
//! summators, one-to-one activations, bias and zero pseudo-neurons. On top of
//! that table it provides forward inference, exact gradients, exact Hessians
//! (Pearlmutter's R-algorithm), batch trainers (L-BFGS and a hybrid
//! Levenberg-Marquardt) and bagged ensembles with out-of-bag error estimates.
//!
//! # Panics vs `Result`
//!
//! - Low-level hot path (panics on misuse): [`Network::forward`] and
//!   [`Ensemble::forward`]. Shape mismatches are programmer errors and panic
//!   via `assert!`.
//! - Everything else validates its inputs and returns [`Result`].
//!
//! # Data layout
//!
//! - Scalars are `f64`.
//! - A [`Dataset`] is row-major. A regression row holds `nin` inputs followed
//!   by `nout` targets; a classifier row holds `nin` inputs followed by one
//!   class label in `0..nout`.
//! - Inference and gradients write into a caller-owned [`Workspace`], so the
//!   per-sample path does not allocate and several threads can share one
//!   network.
//!
//! # Quick start
//!
//! ```rust
//! use rust_mlpe::{Algorithm, Dataset, LmConfig, NetworkBuilder};
//! use rand::SeedableRng;
//!
//! # fn main() -> rust_mlpe::Result<()> {
//! let rows: Vec<Vec<f64>> = (0..20)
//!     .map(|i| {
//!         let x = i as f64 / 10.0 - 1.0;
//!         vec![x, 2.0 * x + 1.0]
//!     })
//!     .collect();
//! let data = Dataset::from_rows(&rows)?;
//!
//! let mut net = NetworkBuilder::new(1, 1)?.hidden(3)?.build_with_seed(0)?;
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//! let report = net.train(&data, &Algorithm::Lm(LmConfig::default()), &mut rng)?;
//! assert!(report.nhess > 0);
//!
//! let y = net.process_vec(&[0.5])?;
//! assert!((y[0] - 2.0).abs() < 0.1);
//! # Ok(())
//! # }
//! ```
//!
//! # Allocation-free inference and gradients
//!
//! ```rust
//! use rust_mlpe::{NetworkBuilder, OutputKind};
//!
//! # fn main() -> rust_mlpe::Result<()> {
//! let net = NetworkBuilder::new(3, 2)?
//!     .hidden(8)?
//!     .output(OutputKind::Classifier)?
//!     .build_with_seed(0)?;
//!
//! let mut ws = net.workspace();
//! let mut grad = vec![0.0; net.weight_count()];
//! let x = [0.1, -0.2, 0.3];
//!
//! let p = net.forward(&x, &mut ws);
//! assert!((p[0] + p[1] - 1.0).abs() < 1e-12);
//! let _ce = net.grad_natural(&x, &[1.0, 0.0], &mut ws, &mut grad)?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod builder;
pub mod data;
pub mod discretize;
pub mod ensemble;
pub mod error;
pub mod gradient;
pub mod hessian;
pub mod layers;
pub mod linalg;
pub mod metrics;
pub mod network;
pub mod optim;
pub mod serialize;
pub mod topology;
pub mod train;
pub(crate) mod util;
pub mod workspace;

#[cfg(feature = "serde")]
pub mod serde_model;

pub use activation::{ActivationFn, Derivatives};
pub use builder::{NetworkBuilder, OutputKind, MAX_HIDDEN_LAYERS};
pub use data::Dataset;
pub use discretize::{calculate_classes, calculate_ranges, detect_class};
pub use ensemble::Ensemble;
pub use error::{Error, Result};
pub use linalg::Matrix;
pub use metrics::{CvReport, ErrorAccumulator, Task};
pub use network::Network;
pub use optim::{Lbfgs, LbfgsReport, StoppingCriteria, Termination};
pub use serialize::{ENSEMBLE_FORMAT_VERSION, NETWORK_FORMAT_VERSION};
pub use topology::{NeuronKind, Topology, TopologyBuilder};
pub use train::{
    kfold_cv, Algorithm, EarlyStoppingConfig, LbfgsConfig, LmConfig, TrainReport, MIN_DECAY,
};
pub use util::safe_cross_entropy;
pub use workspace::Workspace;

#[cfg(feature = "serde")]
pub use serde_model::{SerializedNetwork, SerializedNeuron};
