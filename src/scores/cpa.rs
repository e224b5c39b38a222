//! CPA score engine
//!
//! Drives the configured distinguisher once per key byte and reduces every
//! step's `256 × window` correlation matrix to a 256-vector of log-scores:
//! the natural log of the row-wise maximum of `|ρ|`. The log keeps the
//! scores additive for the key enumerator, which ranks full keys by summed
//! per-byte scores.

#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::debug;

use crate::args::{names, ArgBag};
use crate::dataset::TraceDataset;
use crate::distinguisher::{AttackBounds, Distinguisher};
use crate::error::{Error, Result};
use crate::numerics;
use crate::plugin;
use crate::scores::{ScoreEngine, ScoreSteps};
use crate::KEY_CLASSES;

/// Correlation-maximum score engine (`cpa`).
#[derive(Default)]
pub struct CpaScore {
    dataset: Option<Arc<TraceDataset>>,
    distinguisher: Option<Box<dyn Distinguisher>>,
    bounds: Option<AttackBounds>,
}

impl ScoreEngine for CpaScore {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        let dataset = args.dataset_required(names::DATASET)?;
        let bounds = AttackBounds::from_args(args, dataset.header())?;
        bounds.require_step_below_count()?;

        let name = args.str_required(names::DISTINGUISHER)?;
        let distinguisher = plugin::registry().construct_distinguisher(&name, args)?;

        self.dataset = Some(dataset);
        self.distinguisher = Some(distinguisher);
        self.bounds = Some(bounds);
        Ok(())
    }

    fn compute_scores(&mut self) -> Result<ScoreSteps> {
        let dataset = self.dataset.as_ref().ok_or(Error::MissingArgument(names::DATASET))?;
        let bounds = self.bounds.ok_or(Error::MissingArgument(names::TRACE_COUNT))?;
        let distinguisher = self
            .distinguisher
            .as_mut()
            .ok_or(Error::MissingArgument(names::DISTINGUISHER))?;

        let byte_count = dataset.header().key_size as usize;
        let steps = bounds.steps();
        let mut scores: ScoreSteps =
            steps.iter().map(|&count| (count, Vec::with_capacity(byte_count))).collect();

        for byte in 0..byte_count {
            debug!(byte, "running distinguisher for key byte");
            distinguisher.set_model_byte_index(byte);
            let correlations = distinguisher.distinguish()?;
            if correlations.len() != steps.len() {
                return Err(Error::InvalidData(format!(
                    "distinguisher produced {} steps, expected {}",
                    correlations.len(),
                    steps.len()
                )));
            }
            for (step_index, (_, matrix)) in correlations.iter().enumerate() {
                let mut best = [0.0f64; KEY_CLASSES];
                for (k, slot) in best.iter_mut().enumerate() {
                    *slot = numerics::max(matrix.row(k)).ln();
                }
                scores[step_index].1.push(best);
            }
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgValue;
    use crate::crypto;
    use crate::dataset::{EncryptionAlgorithm, PlaintextMode, TraceDatasetBuilder};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn leaky_dataset(traces: u32, key: u8, seed: u64) -> Arc<TraceDataset> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Random);
        builder.num_traces = traces;
        builder.num_samples = 2;
        for _ in 0..traces {
            let p: u8 = rng.gen();
            let leak = crypto::hamming_weight(crypto::sbox(p ^ key));
            builder.add_trace(&[rng.gen_range(-20..20), leak * 4 + rng.gen_range(-2..=2)]);
            builder.add_plaintext(&[p]);
        }
        builder.add_key(&[key]);
        builder.build().unwrap()
    }

    #[test]
    fn cpa_scores_rank_the_true_key_first() {
        let key = 0x42;
        let dataset = leaky_dataset(768, key, 21);
        let mut args = ArgBag::new();
        args.set(names::DATASET, ArgValue::Dataset(dataset));
        args.set(names::DISTINGUISHER, ArgValue::Str("pearson".into()));
        args.set(names::MODEL, ArgValue::Str("hamming_weight".into()));
        args.set(names::TRACE_STEP, ArgValue::U32(256));

        let mut engine = CpaScore::default();
        engine.init(&args).unwrap();
        let scores = engine.compute_scores().unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0].0, 256);
        assert_eq!(scores[2].0, 768);

        let (_, final_bytes) = scores.last().unwrap();
        assert_eq!(final_bytes.len(), 1);
        assert_eq!(numerics::argmax(&final_bytes[0]), key as usize);
        // Log of a |ρ| maximum is never positive.
        assert!(final_bytes[0][key as usize] <= 0.0);
    }

    #[test]
    fn step_must_stay_below_trace_count() {
        let dataset = leaky_dataset(64, 0x00, 5);
        let mut args = ArgBag::new();
        args.set(names::DATASET, ArgValue::Dataset(dataset));
        args.set(names::DISTINGUISHER, ArgValue::Str("pearson".into()));
        args.set(names::MODEL, ArgValue::Str("hamming_weight".into()));
        args.set(names::TRACE_STEP, ArgValue::U32(64));

        let mut engine = CpaScore::default();
        assert!(matches!(engine.init(&args), Err(Error::InvalidArgument(_))));
    }
}
