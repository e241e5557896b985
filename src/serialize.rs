//! Flat `f64` formats for networks and ensembles.
//!
//! Every value, integers included, is stored as an `f64`, and every array
//! starts with its own total length and a format version.
//!
//! Network (version 7):
//!
//! ```text
//! [0] total length   [1] version   [2] structure length
//! structure, weights[weight_count], means[c], sigmas[c]
//! ```
//!
//! where `c` is `nin` for classifiers and `nin + nout` otherwise. The
//! structure is a 7-field header `(length, nin, nout, neurons, weights,
//! table start, classifier)` followed by one 4-field record per neuron.
//!
//! Ensemble (version 9): a 13-field header `(total length, version, size, nin,
//! nout, weights, classifier, postprocessing, structure length, neurons, c,
//! data offset, seed length)`, then the structure, all member weights, all
//! member means, all member sigmas and the serialized seed network.

use crate::topology::{NeuronKind, Topology};
use crate::{Ensemble, Error, Network, Result};

pub const NETWORK_FORMAT_VERSION: i64 = 7;
pub const ENSEMBLE_FORMAT_VERSION: i64 = 9;

const STRUCTURE_HEADER_LEN: usize = 7;
const RECORD_LEN: usize = 4;
const ENSEMBLE_HEADER_LEN: usize = 13;

/// Bounds-checked cursor over a flat array.
struct Reader<'a> {
    data: &'a [f64],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [f64]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [f64]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::InvalidData(format!(
                    "truncated array: {what} needs {n} values at offset {}, {} available",
                    self.pos,
                    self.data.len().saturating_sub(self.pos)
                ))
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn int(&mut self, what: &str) -> Result<i64> {
        let v = self.take(1, what)?[0];
        if !v.is_finite() || v.fract() != 0.0 || v.abs() > 1e15 {
            return Err(Error::InvalidData(format!("{what} is not an integer: {v}")));
        }
        Ok(v as i64)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let v = self.int(what)?;
        usize::try_from(v).map_err(|_| Error::InvalidData(format!("{what} is negative: {v}")))
    }

    fn flag(&mut self, what: &str) -> Result<bool> {
        match self.int(what)? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(Error::InvalidData(format!("{what} must be 0 or 1, got {v}"))),
        }
    }

    fn finish(&self, what: &str) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(Error::InvalidData(format!(
                "{what} has {} trailing values",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn expect_eq(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::InvalidData(format!(
            "{what} is {got}, expected {expected}"
        )));
    }
    Ok(())
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StructureHeader {
    len: usize,
    inputs: usize,
    outputs: usize,
    neurons: usize,
    weights: usize,
    table_start: usize,
    classifier: bool,
}

impl StructureHeader {
    fn of(topology: &Topology) -> Self {
        Self {
            len: STRUCTURE_HEADER_LEN + RECORD_LEN * topology.neuron_count(),
            inputs: topology.input_count(),
            outputs: topology.output_count(),
            neurons: topology.neuron_count(),
            weights: topology.weight_count(),
            table_start: STRUCTURE_HEADER_LEN,
            classifier: topology.is_classifier(),
        }
    }

    fn write(&self, out: &mut Vec<f64>) {
        out.extend_from_slice(&[
            self.len as f64,
            self.inputs as f64,
            self.outputs as f64,
            self.neurons as f64,
            self.weights as f64,
            self.table_start as f64,
            flag(self.classifier),
        ]);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let header = Self {
            len: r.count("structure length")?,
            inputs: r.count("input count")?,
            outputs: r.count("output count")?,
            neurons: r.count("neuron count")?,
            weights: r.count("weight count")?,
            table_start: r.count("neuron table offset")?,
            classifier: r.flag("classifier flag")?,
        };
        expect_eq("neuron table offset", header.table_start, STRUCTURE_HEADER_LEN)?;
        let expected_len = header
            .neurons
            .checked_mul(RECORD_LEN)
            .and_then(|n| n.checked_add(STRUCTURE_HEADER_LEN))
            .ok_or_else(|| Error::InvalidData("neuron count overflows".to_owned()))?;
        expect_eq("structure length", header.len, expected_len)?;
        Ok(header)
    }
}

fn write_structure(topology: &Topology, out: &mut Vec<f64>) {
    StructureHeader::of(topology).write(out);
    for neuron in topology.neurons() {
        out.extend(neuron.to_record().iter().map(|&v| v as f64));
    }
}

fn read_structure(r: &mut Reader<'_>) -> Result<Topology> {
    let header = StructureHeader::read(r)?;
    if r.remaining() < header.len - STRUCTURE_HEADER_LEN {
        return Err(Error::InvalidData(format!(
            "truncated array: {} neuron records need {} values, {} available",
            header.neurons,
            header.len - STRUCTURE_HEADER_LEN,
            r.remaining()
        )));
    }
    let mut neurons = Vec::with_capacity(header.neurons);
    for i in 0..header.neurons {
        let mut record = [0i64; RECORD_LEN];
        for (j, field) in record.iter_mut().enumerate() {
            *field = r.int(&format!("neuron {i} field {j}"))?;
        }
        neurons.push(NeuronKind::from_record(record)?);
    }
    let topology = Topology::new(header.inputs, header.outputs, header.classifier, neurons)
        .map_err(|e| Error::InvalidData(format!("corrupt structure: {e}")))?;
    expect_eq("weight count", topology.weight_count(), header.weights)?;
    Ok(topology)
}

fn check_version(r: &mut Reader<'_>, what: &str, expected: i64) -> Result<()> {
    let version = r.int("format version")?;
    if version != expected {
        return Err(Error::InvalidData(format!(
            "unsupported {what} format version {version}; expected {expected}"
        )));
    }
    Ok(())
}

fn read_network(r: &mut Reader<'_>) -> Result<Network> {
    let start = r.pos;
    let total = r.count("network length")?;
    check_version(r, "network", NETWORK_FORMAT_VERSION)?;
    let structure_len = r.count("structure length")?;
    let structure_start = r.pos;
    let topology = read_structure(r)?;
    expect_eq("structure length", r.pos - structure_start, structure_len)?;

    let cc = topology.scaling_count();
    let weights = r.take(topology.weight_count(), "weights")?.to_vec();
    let means = r.take(cc, "means")?.to_vec();
    let sigmas = r.take(cc, "sigmas")?.to_vec();
    expect_eq("network length", r.pos - start, total)?;
    Network::from_parts(topology, weights, means, sigmas)
        .map_err(|e| Error::InvalidData(e.to_string()))
}

impl Network {
    /// Flat array in the version 7 format.
    pub fn serialize(&self) -> Vec<f64> {
        let mut out = vec![0.0, NETWORK_FORMAT_VERSION as f64, 0.0];
        write_structure(&self.topology, &mut out);
        out[2] = (out.len() - 3) as f64;
        out.extend_from_slice(&self.weights);
        out.extend_from_slice(&self.means);
        out.extend_from_slice(&self.sigmas);
        out[0] = out.len() as f64;
        out
    }

    /// Restore a network written by [`Network::serialize`].
    pub fn deserialize(data: &[f64]) -> Result<Self> {
        let mut r = Reader::new(data);
        let network = read_network(&mut r)?;
        r.finish("serialized network")?;
        Ok(network)
    }
}

impl Ensemble {
    /// Flat array in the version 9 format.
    pub fn serialize(&self) -> Vec<f64> {
        let topology = self.topology();
        let seed = self.seed.serialize();
        let mut out = Vec::with_capacity(
            ENSEMBLE_HEADER_LEN
                + STRUCTURE_HEADER_LEN
                + RECORD_LEN * topology.neuron_count()
                + self.weights.len()
                + self.means.len()
                + self.sigmas.len()
                + seed.len(),
        );
        let structure_len = STRUCTURE_HEADER_LEN + RECORD_LEN * topology.neuron_count();
        out.extend_from_slice(&[
            0.0,
            ENSEMBLE_FORMAT_VERSION as f64,
            self.size as f64,
            topology.input_count() as f64,
            topology.output_count() as f64,
            topology.weight_count() as f64,
            flag(topology.is_classifier()),
            flag(self.postprocessing),
            structure_len as f64,
            topology.neuron_count() as f64,
            topology.scaling_count() as f64,
            ENSEMBLE_HEADER_LEN as f64,
            seed.len() as f64,
        ]);
        write_structure(topology, &mut out);
        out.extend_from_slice(&self.weights);
        out.extend_from_slice(&self.means);
        out.extend_from_slice(&self.sigmas);
        out.extend_from_slice(&seed);
        out[0] = out.len() as f64;
        out
    }

    /// Restore an ensemble written by [`Ensemble::serialize`].
    pub fn deserialize(data: &[f64]) -> Result<Self> {
        let mut r = Reader::new(data);
        let total = r.count("ensemble length")?;
        check_version(&mut r, "ensemble", ENSEMBLE_FORMAT_VERSION)?;
        let size = r.count("ensemble size")?;
        let inputs = r.count("input count")?;
        let outputs = r.count("output count")?;
        let weight_count = r.count("weight count")?;
        let classifier = r.flag("classifier flag")?;
        let postprocessing = r.flag("postprocessing flag")?;
        let structure_len = r.count("structure length")?;
        let neurons = r.count("neuron count")?;
        let cc = r.count("coefficient count")?;
        let offset = r.count("data offset")?;
        let seed_len = r.count("seed length")?;
        expect_eq("data offset", offset, ENSEMBLE_HEADER_LEN)?;
        expect_eq("ensemble length", total, data.len())?;

        let topology = read_structure(&mut r)?;
        expect_eq("structure length", r.pos - ENSEMBLE_HEADER_LEN, structure_len)?;
        expect_eq("input count", topology.input_count(), inputs)?;
        expect_eq("output count", topology.output_count(), outputs)?;
        expect_eq("weight count", topology.weight_count(), weight_count)?;
        expect_eq("neuron count", topology.neuron_count(), neurons)?;
        expect_eq("coefficient count", topology.scaling_count(), cc)?;
        if topology.is_classifier() != classifier {
            return Err(Error::InvalidData(
                "classifier flag does not match the structure".to_owned(),
            ));
        }

        let members = |n: usize, what: &str| {
            size.checked_mul(n)
                .ok_or_else(|| Error::InvalidData(format!("{what} size overflows")))
        };
        let weights = r.take(members(weight_count, "weights")?, "member weights")?.to_vec();
        let means = r.take(members(cc, "means")?, "member means")?.to_vec();
        let sigmas = r.take(members(cc, "sigmas")?, "member sigmas")?.to_vec();

        let seed_start = r.pos;
        let seed = read_network(&mut r)?;
        expect_eq("seed length", r.pos - seed_start, seed_len)?;
        r.finish("serialized ensemble")?;
        if seed.topology != topology {
            return Err(Error::InvalidData(
                "seed network topology does not match the ensemble".to_owned(),
            ));
        }

        Ensemble::from_parts(seed, size, weights, means, sigmas, postprocessing)
            .map_err(|e| Error::InvalidData(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkBuilder, OutputKind};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn classifier() -> Network {
        NetworkBuilder::new(3, 4)
            .unwrap()
            .hidden(5)
            .unwrap()
            .output(OutputKind::Classifier)
            .unwrap()
            .build_with_seed(0)
            .unwrap()
    }

    #[test]
    fn network_layout() {
        let net = classifier();
        let flat = net.serialize();
        assert_eq!(flat[0] as usize, flat.len());
        assert_eq!(flat[1] as i64, NETWORK_FORMAT_VERSION);
        let slen = flat[2] as usize;
        assert_eq!(slen, 7 + 4 * net.topology().neuron_count());
        assert_eq!(flat[3] as usize, slen);
        assert_eq!(flat[3 + 6], 1.0);
        assert_eq!(flat.len(), 3 + slen + net.weight_count() + 2 * 3);
    }

    #[test]
    fn network_roundtrip_is_exact() {
        let mut net = NetworkBuilder::new(2, 2)
            .unwrap()
            .hidden(3)
            .unwrap()
            .hidden(2)
            .unwrap()
            .output(OutputKind::Ranged { a: -1.0, b: 3.0 })
            .unwrap()
            .build_with_seed(1)
            .unwrap();
        net.randomize_full(&mut StdRng::seed_from_u64(2));
        let back = Network::deserialize(&net.serialize()).unwrap();
        assert_eq!(back, net);
        assert_eq!(back.layer_count().unwrap(), net.layer_count().unwrap());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut flat = classifier().serialize();
        flat[1] = 6.0;
        let err = Network::deserialize(&flat).unwrap_err();
        assert!(matches!(err, Error::InvalidData(msg) if msg.contains("version")));
    }

    #[test]
    fn truncated_and_padded_arrays_are_rejected() {
        let flat = classifier().serialize();
        assert!(Network::deserialize(&flat[..flat.len() - 1]).is_err());
        assert!(Network::deserialize(&flat[..2]).is_err());
        let mut padded = flat.clone();
        padded.push(0.0);
        assert!(Network::deserialize(&padded).is_err());
    }

    #[test]
    fn corrupt_record_is_rejected() {
        let mut flat = classifier().serialize();
        // first non-input neuron's kind field
        let record = 3 + 7 + 4 * 3;
        flat[record] = 42.0;
        assert!(matches!(
            Network::deserialize(&flat),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn ensemble_roundtrip() {
        let mut rng = StdRng::seed_from_u64(3);
        let ensemble = Ensemble::from_network(&classifier(), 3, &mut rng).unwrap();
        let flat = ensemble.serialize();
        assert_eq!(flat[0] as usize, flat.len());
        assert_eq!(flat[1] as i64, ENSEMBLE_FORMAT_VERSION);
        assert_eq!(flat[7], 0.0);
        let back = Ensemble::deserialize(&flat).unwrap();
        assert_eq!(back, ensemble);
        let x = [0.1, 0.2, 0.3];
        assert_eq!(back.process_vec(&x).unwrap(), ensemble.process_vec(&x).unwrap());
    }

    #[test]
    fn ensemble_header_mismatch_is_rejected() {
        let mut rng = StdRng::seed_from_u64(4);
        let ensemble = Ensemble::from_network(&classifier(), 2, &mut rng).unwrap();
        let mut flat = ensemble.serialize();
        flat[3] = 4.0;
        assert!(Ensemble::deserialize(&flat).is_err());
        let mut flat = ensemble.serialize();
        flat[1] = NETWORK_FORMAT_VERSION as f64;
        assert!(Ensemble::deserialize(&flat).is_err());
    }
}
