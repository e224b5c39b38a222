//! Profilers
//!
//! A profiler estimates, from a dataset with a **known key**, the leakage
//! distribution of each of the 256 intermediate-value classes: a `2 × 256`
//! matrix whose row 0 holds per-class means and row 1 per-class standard
//! deviations, measured at the single most informative sample.
//!
//! Only the (fixed key, single-byte S-Box) configuration is supported; the
//! class label of trace `t` is the identity intermediate
//! `y_t = S(p_t[byte] ⊕ key)`.

#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::debug;

use crate::args::{names, ArgBag};
use crate::crypto;
use crate::dataset::{EncryptionAlgorithm, KeyMode, TraceDataset};
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::numerics;
use crate::KEY_CLASSES;

/// A profiler plugin.
pub trait Profiler {
    fn init(&mut self, args: &ArgBag) -> Result<()>;
    /// `2 × 256` profile: row 0 class means, row 1 class standard deviations.
    fn profile(&mut self) -> Result<Matrix<f64>>;
}

/// The standard known-key gaussian profiler.
#[derive(Default)]
pub struct StandardProfiler {
    dataset: Option<Arc<TraceDataset>>,
    byte_index: usize,
    known_key: u8,
}

impl Profiler for StandardProfiler {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        let dataset = args.dataset_required(names::DATASET)?;
        let header = dataset.header();
        if header.algorithm != EncryptionAlgorithm::SBox {
            return Err(Error::UnsupportedOperation(
                "the standard profiler only supports the single-byte s-box target".into(),
            ));
        }
        if header.key_mode != KeyMode::Fixed {
            return Err(Error::UnsupportedOperation(
                "the standard profiler requires a fixed key".into(),
            ));
        }
        let byte_index = args.u32_opt(names::BYTE_INDEX)?.unwrap_or(0) as usize;
        if byte_index >= header.plaintext_size as usize {
            return Err(Error::InvalidArgument(format!(
                "byte index {byte_index} outside plaintext width {}",
                header.plaintext_size
            )));
        }
        self.known_key = args.u8_required(names::KNOWN_KEY)?;
        self.byte_index = byte_index;
        self.dataset = Some(dataset);
        Ok(())
    }

    fn profile(&mut self) -> Result<Matrix<f64>> {
        let dataset = self.dataset.as_ref().ok_or(Error::MissingArgument(names::DATASET))?;
        let header = dataset.header();
        let trace_count = header.num_traces as usize;
        let sample_count = header.num_samples as usize;

        // Class label of every trace under the known key.
        let labels: Vec<u8> = (0..trace_count)
            .map(|t| crypto::sbox(dataset.plaintext(t)[self.byte_index] ^ self.known_key))
            .collect();

        // Point of interest: the sample best correlated with the labels.
        let correlations: Vec<f64> = (0..sample_count)
            .map(|s| numerics::pearson(&labels, dataset.sample(s)).abs())
            .collect();
        let poi = numerics::argmax(&correlations);
        debug!(poi, correlation = correlations[poi], "profiler selected point of interest");

        // Bucket that sample's values by class, then summarize each bucket.
        let mut classes: Vec<Vec<i32>> = vec![Vec::new(); KEY_CLASSES];
        let best_sample = dataset.sample(poi);
        for (t, &label) in labels.iter().enumerate() {
            classes[label as usize].push(best_sample[t]);
        }

        let mut out = Matrix::new(KEY_CLASSES, 2);
        for (k, bucket) in classes.iter().enumerate() {
            let mean = numerics::mean(bucket);
            let std = numerics::std_dev(bucket, mean);
            out.set(0, k, mean);
            out.set(1, k, std);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgValue;
    use crate::dataset::{PlaintextMode, TraceDatasetBuilder};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Two-sample dataset: sample 0 is pure noise, sample 1 leaks the
    /// identity intermediate exactly.
    fn identity_leak_dataset(traces: u32, key: u8, seed: u64) -> Arc<TraceDataset> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Random);
        builder.num_traces = traces;
        builder.num_samples = 2;
        for _ in 0..traces {
            let p: u8 = rng.gen();
            let leak = i32::from(crypto::sbox(p ^ key));
            builder.add_trace(&[rng.gen_range(-100..100), leak]);
            builder.add_plaintext(&[p]);
        }
        builder.add_key(&[key]);
        builder.build().unwrap()
    }

    fn profiler_args(dataset: Arc<TraceDataset>, key: u8) -> ArgBag {
        let mut args = ArgBag::new();
        args.set(names::DATASET, ArgValue::Dataset(dataset));
        args.set(names::KNOWN_KEY, ArgValue::U8(key));
        args
    }

    #[test]
    fn profile_recovers_class_means_at_the_leaky_sample() {
        let key = 0x2a;
        let dataset = identity_leak_dataset(2048, key, 3);
        let mut profiler = StandardProfiler::default();
        profiler.init(&profiler_args(dataset.clone(), key)).unwrap();
        let profile = profiler.profile().unwrap();
        assert_eq!(profile.height(), 2);
        assert_eq!(profile.width(), 256);

        // The leak is exactly the class value, so every populated class has
        // mean == class and std == 0.
        let mut populated = 0;
        for t in 0..2048 {
            let label = crypto::sbox(dataset.plaintext(t)[0] ^ key) as usize;
            assert_eq!(profile.get(0, label), label as f64);
            assert_eq!(profile.get(1, label), 0.0);
            populated += 1;
        }
        assert!(populated > 0);
    }

    #[test]
    fn empty_classes_profile_as_zero() {
        // A single trace populates exactly one class.
        let dataset = identity_leak_dataset(1, 0x00, 5);
        let label = crypto::sbox(dataset.plaintext(0)[0]) as usize;
        let mut profiler = StandardProfiler::default();
        profiler.init(&profiler_args(dataset, 0x00)).unwrap();
        let profile = profiler.profile().unwrap();
        for k in 0..256 {
            if k != label {
                assert_eq!(profile.get(0, k), 0.0);
                assert_eq!(profile.get(1, k), 0.0);
            }
        }
    }

    #[test]
    fn aes_datasets_are_unsupported() {
        let mut builder =
            TraceDatasetBuilder::new(EncryptionAlgorithm::Aes128, PlaintextMode::Random);
        builder.num_traces = 1;
        builder.num_samples = 1;
        builder.add_trace(&[0]);
        builder.add_plaintext(&[0u8; 16]);
        builder.add_key(&[0u8; 16]);
        let dataset = builder.build().unwrap();

        let mut profiler = StandardProfiler::default();
        let err = profiler.init(&profiler_args(dataset, 0x00)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }

    #[test]
    fn known_key_is_required() {
        let dataset = identity_leak_dataset(4, 0x11, 9);
        let mut args = ArgBag::new();
        args.set(names::DATASET, ArgValue::Dataset(dataset));
        let mut profiler = StandardProfiler::default();
        assert!(matches!(
            profiler.init(&args),
            Err(Error::MissingArgument(names::KNOWN_KEY))
        ));
    }
}
