//! Bagged ensembles of networks sharing one topology.
//!
//! An [`Ensemble`] stores one weight vector and one set of scaling
//! coefficients per member, laid out back to back, plus a seed network that
//! supplies the topology and the initial scaling of new members. Inference
//! averages the members' post-processed outputs with equal weights.
//!
//! Training draws one RNG seed per member from the caller's RNG before any
//! work starts, so results do not depend on whether members are trained in
//! parallel (`rayon` feature).

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::metrics::{accumulate_errors, ErrorAccumulator, Predictor, Task};
use crate::network::{forward_pass, Params};
use crate::topology::Topology;
use crate::util::ensure_len;
use crate::{
    Algorithm, CvReport, Dataset, EarlyStoppingConfig, Error, Network, NetworkBuilder, Result,
    TrainReport, Workspace,
};

/// Fraction of rows that goes to the training half of an early-stopping split.
const ES_TRAIN_FRACTION: f64 = 0.66;

#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    pub(crate) seed: Network,
    pub(crate) size: usize,
    pub(crate) weights: Vec<f64>,
    pub(crate) means: Vec<f64>,
    pub(crate) sigmas: Vec<f64>,
    pub(crate) postprocessing: bool,
}

/// A trained member before it is stored: the network and its bookkeeping.
struct TrainedMember {
    network: Network,
    report: TrainReport,
    /// Rows the member never saw during training.
    out_of_bag: Vec<usize>,
}

impl Ensemble {
    /// `size` members shaped like `network`, each with random weights in
    /// `[-0.5, 0.5]` and `network`'s scaling coefficients.
    pub fn from_network<R: Rng + ?Sized>(network: &Network, size: usize, rng: &mut R) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("ensemble size must be > 0".to_owned()));
        }
        let wc = network.weight_count();
        let mut ensemble = Self {
            seed: network.clone(),
            size,
            weights: vec![0.0; size * wc],
            means: network.means.repeat(size),
            sigmas: network.sigmas.repeat(size),
            postprocessing: false,
        };
        ensemble.randomize(rng);
        Ok(ensemble)
    }

    /// Build the seed network with `builder` and wrap it in `size` members.
    pub fn from_builder<R: Rng + ?Sized>(
        builder: &NetworkBuilder,
        size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let network = builder.build_with_rng(rng)?;
        Self::from_network(&network, size, rng)
    }

    pub(crate) fn from_parts(
        seed: Network,
        size: usize,
        weights: Vec<f64>,
        means: Vec<f64>,
        sigmas: Vec<f64>,
        postprocessing: bool,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidData("ensemble size must be > 0".to_owned()));
        }
        let topology = &seed.topology;
        ensure_len("ensemble weights", weights.len(), size * topology.weight_count())?;
        ensure_len("ensemble means", means.len(), size * topology.scaling_count())?;
        ensure_len("ensemble sigmas", sigmas.len(), size * topology.scaling_count())?;
        if weights.iter().chain(&means).chain(&sigmas).any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "ensemble parameters must be finite".to_owned(),
            ));
        }
        Ok(Self {
            seed,
            size,
            weights,
            means,
            sigmas,
            postprocessing,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.seed.topology
    }

    #[inline]
    pub fn input_count(&self) -> usize {
        self.seed.input_count()
    }

    #[inline]
    pub fn output_count(&self) -> usize {
        self.seed.output_count()
    }

    #[inline]
    pub fn weight_count(&self) -> usize {
        self.seed.weight_count()
    }

    #[inline]
    pub fn is_softmax(&self) -> bool {
        self.seed.is_softmax()
    }

    /// Re-draw every member's weights from `[-0.5, 0.5]`.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for w in &mut self.weights {
            *w = rng.gen_range(-0.5..=0.5);
        }
    }

    fn member_params(&self, k: usize) -> Params<'_> {
        let wc = self.weight_count();
        let cc = self.topology().scaling_count();
        Params {
            topology: &self.seed.topology,
            weights: &self.weights[k * wc..(k + 1) * wc],
            means: &self.means[k * cc..(k + 1) * cc],
            sigmas: &self.sigmas[k * cc..(k + 1) * cc],
        }
    }

    /// Member `k` as a standalone network.
    pub fn member(&self, k: usize) -> Result<Network> {
        if k >= self.size {
            return Err(Error::NotFound(format!(
                "member {k} of an ensemble of {}",
                self.size
            )));
        }
        let p = self.member_params(k);
        Network::from_parts(
            self.seed.topology.clone(),
            p.weights.to_vec(),
            p.means.to_vec(),
            p.sigmas.to_vec(),
        )
    }

    fn store_member(&mut self, k: usize, network: &Network) {
        let wc = self.weight_count();
        let cc = self.topology().scaling_count();
        self.weights[k * wc..(k + 1) * wc].copy_from_slice(&network.weights);
        self.means[k * cc..(k + 1) * cc].copy_from_slice(&network.means);
        self.sigmas[k * cc..(k + 1) * cc].copy_from_slice(&network.sigmas);
    }

    /// Unwrap per-member training results, then store every member.
    ///
    /// Nothing is stored unless all members trained; an error carries the
    /// counters of the members before it.
    fn install_members<T>(
        &mut self,
        trained: Vec<Result<T>>,
        parts: impl Fn(&T) -> (&Network, TrainReport),
    ) -> Result<(Vec<T>, TrainReport)> {
        let mut report = TrainReport::default();
        let mut members = Vec::with_capacity(trained.len());
        for member in trained {
            let member = member.map_err(|e| e.with_earlier_report(report))?;
            report += parts(&member).1;
            members.push(member);
        }
        for (k, member) in members.iter().enumerate() {
            self.store_member(k, parts(member).0);
        }
        Ok((members, report))
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.topology())
    }

    /// Averaged outputs of all members for one sample.
    ///
    /// Panics on shape mismatches, like [`Network::forward`].
    pub fn forward<'a>(&self, x: &[f64], ws: &'a mut Workspace) -> &'a [f64] {
        assert_eq!(
            x.len(),
            self.input_count(),
            "input len {} does not match ensemble input count {}",
            x.len(),
            self.input_count()
        );
        assert!(
            ws.fits(self.topology()),
            "workspace was built for a different topology"
        );
        let v = 1.0 / self.size as f64;
        ws.y.fill(0.0);
        for k in 0..self.size {
            forward_pass(
                self.member_params(k),
                x,
                &mut ws.neurons,
                &mut ws.dfdnet,
                &mut ws.tmp,
            );
            for (y, t) in ws.y.iter_mut().zip(&ws.tmp) {
                *y += v * t;
            }
        }
        &ws.y
    }

    pub fn process(&self, x: &[f64], ws: &mut Workspace, y: &mut [f64]) -> Result<()> {
        ensure_len("input", x.len(), self.input_count())?;
        ensure_len("output", y.len(), self.output_count())?;
        if !ws.fits(self.topology()) {
            return Err(Error::InvalidShape(
                "workspace was built for a different topology".to_owned(),
            ));
        }
        y.copy_from_slice(self.forward(x, ws));
        Ok(())
    }

    pub fn process_vec(&self, x: &[f64]) -> Result<Vec<f64>> {
        let mut ws = self.workspace();
        let mut y = vec![0.0; self.output_count()];
        self.process(x, &mut ws, &mut y)?;
        Ok(y)
    }

    pub fn all_errors(&self, data: &Dataset) -> Result<CvReport> {
        Ok(accumulate_errors(self, data)?.finish())
    }

    pub fn relative_classification_error(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.rel_cls_error)
    }

    /// Bits per sample; 0 for regression ensembles.
    pub fn avg_cross_entropy(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.avg_ce)
    }

    pub fn rms_error(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.rms_error)
    }

    pub fn avg_error(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.avg_error)
    }

    pub fn avg_relative_error(&self, data: &Dataset) -> Result<f64> {
        Ok(self.all_errors(data)?.avg_rel_error)
    }

    /// Train every member on a bootstrap resample of `data`.
    ///
    /// Returns the summed work counters and the out-of-bag error estimate:
    /// each row is scored by the average of the members that never drew it.
    /// Rows drawn by every member do not contribute.
    pub fn bagging<R: Rng + ?Sized>(
        &mut self,
        data: &Dataset,
        algorithm: &Algorithm,
        rng: &mut R,
    ) -> Result<(TrainReport, CvReport)> {
        algorithm.validate()?;
        self.seed.check_training_set(data)?;
        let seeds: Vec<u64> = (0..self.size).map(|_| rng.gen()).collect();

        let train_one = |seed: u64| -> Result<TrainedMember> {
            let mut rng = StdRng::seed_from_u64(seed);
            let n = data.len();
            let mut drawn = vec![false; n];
            let rows: Vec<usize> = (0..n)
                .map(|_| {
                    let i = rng.gen_range(0..n);
                    drawn[i] = true;
                    i
                })
                .collect();
            let mut network = self.seed.clone();
            let report = network.train(&data.select(&rows), algorithm, &mut rng)?;
            let out_of_bag = (0..n).filter(|&i| !drawn[i]).collect();
            Ok(TrainedMember {
                network,
                report,
                out_of_bag,
            })
        };

        #[cfg(feature = "rayon")]
        let trained: Vec<Result<TrainedMember>> = seeds.par_iter().map(|&s| train_one(s)).collect();
        #[cfg(not(feature = "rayon"))]
        let trained: Vec<Result<TrainedMember>> = seeds.iter().map(|&s| train_one(s)).collect();

        let (members, report) = self.install_members(trained, |m| (&m.network, m.report))?;

        let nin = self.input_count();
        let nout = self.output_count();
        let mut oob_sum = vec![0.0; data.len() * nout];
        let mut oob_count = vec![0usize; data.len()];
        let mut ws = self.workspace();
        for (k, member) in members.iter().enumerate() {
            for &i in &member.out_of_bag {
                let y = member.network.forward(&data.row(i)[..nin], &mut ws);
                for (s, v) in oob_sum[i * nout..(i + 1) * nout].iter_mut().zip(y) {
                    *s += v;
                }
                oob_count[i] += 1;
            }
            debug!(
                "bagging member {k}: {} out-of-bag rows, {} gradient evaluations",
                member.out_of_bag.len(),
                member.report.ngrad
            );
        }

        let mut acc = ErrorAccumulator::new(Task::of(self.topology()))?;
        let mut y = vec![0.0; nout];
        for (i, &count) in oob_count.iter().enumerate() {
            if count == 0 {
                continue;
            }
            for (yj, s) in y.iter_mut().zip(&oob_sum[i * nout..(i + 1) * nout]) {
                *yj = s / count as f64;
            }
            acc.accumulate(&y, &data.row(i)[nin..]);
        }
        Ok((report, acc.finish()))
    }

    /// Train every member with early stopping on its own random split of
    /// `data` (about two thirds for training, the rest for validation).
    pub fn train_es<R: Rng + ?Sized>(
        &mut self,
        data: &Dataset,
        cfg: &EarlyStoppingConfig,
        rng: &mut R,
    ) -> Result<TrainReport> {
        cfg.validate()?;
        self.seed.check_training_set(data)?;
        if data.len() < 2 {
            return Err(Error::InvalidData(
                "early stopping needs at least two rows".to_owned(),
            ));
        }
        let seeds: Vec<u64> = (0..self.size).map(|_| rng.gen()).collect();

        let train_one = |seed: u64| -> Result<(Network, TrainReport)> {
            let mut rng = StdRng::seed_from_u64(seed);
            let (train, validation) = loop {
                let (mut train, mut validation) = (Vec::new(), Vec::new());
                for i in 0..data.len() {
                    if rng.gen::<f64>() < ES_TRAIN_FRACTION {
                        train.push(i);
                    } else {
                        validation.push(i);
                    }
                }
                if !train.is_empty() && !validation.is_empty() {
                    break (train, validation);
                }
            };
            let mut network = self.seed.clone();
            let report = network.train_es(
                &data.select(&train),
                &data.select(&validation),
                cfg,
                &mut rng,
            )?;
            Ok((network, report))
        };

        #[cfg(feature = "rayon")]
        let trained: Vec<Result<(Network, TrainReport)>> =
            seeds.par_iter().map(|&s| train_one(s)).collect();
        #[cfg(not(feature = "rayon"))]
        let trained: Vec<Result<(Network, TrainReport)>> =
            seeds.iter().map(|&s| train_one(s)).collect();

        let (members, report) = self.install_members(trained, |m| (&m.0, m.1))?;
        for (k, (_, member_report)) in members.iter().enumerate() {
            debug!("early stopping member {k}: {} gradient evaluations", member_report.ngrad);
        }
        Ok(report)
    }
}

impl Predictor for Ensemble {
    fn topology(&self) -> &Topology {
        Ensemble::topology(self)
    }

    fn workspace(&self) -> Workspace {
        Ensemble::workspace(self)
    }

    fn predict(&self, x: &[f64], ws: &mut Workspace) {
        self.forward(x, ws);
    }
}
