//! Distinguishers
//!
//! A distinguisher turns `(dataset, power model, sample window, step
//! schedule)` into per-key confidence: one `256 × window` matrix of
//! correlation magnitudes per trace-count step.
//!
//! ## Step schedule & monotone accumulators
//! With `trace_step > 0` the schedule is `step, 2·step, … ≤ trace_count`;
//! otherwise the single entry `{trace_count}`. The Pearson accumulators for
//! step `i + 1` **continue from step `i`'s state** — each boundary only
//! folds in the traces of its own slice, so the whole schedule costs
//! O(trace_count · 256 · window) amortized instead of quadratic in the step
//! count.
//!
//! ## Degeneracy
//! A fixed-plaintext dataset makes the modeled value constant under every
//! hypothesis and Pearson's denominator ill-defined; initialization refuses
//! that configuration outright. A near-zero denominator on an individual
//! `(hypothesis, step)` cell emits one warning for the whole run and writes
//! NaN, which downstream score combiners rank as the worst score.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::args::{names, ArgBag};
use crate::dataset::{DatasetHeader, PlaintextMode, TraceDataset};
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::model::PowerModel;
use crate::numerics;
use crate::parallel;
use crate::plugin;
use crate::KEY_CLASSES;

/// Denominator magnitude below which a Pearson cell is treated as degenerate.
const DEGENERATE_DIVISOR: f64 = 1e-9;

/// Per-step correlation output: `(trace_count, 256 × window |ρ| matrix)`.
pub type CorrelationSteps = Vec<(u32, Matrix<f64>)>;

/// A distinguisher plugin.
pub trait Distinguisher {
    fn init(&mut self, args: &ArgBag) -> Result<()>;
    /// Re-target the underlying model's key byte (used by score engines).
    fn set_model_byte_index(&mut self, byte_index: usize);
    fn distinguish(&mut self) -> Result<CorrelationSteps>;
}

// ============================================================================
// Shared window/schedule parameters
// ============================================================================

/// Sample window and trace schedule shared by distinguishers, score engines
/// and the t-test metric.
#[derive(Debug, Clone, Copy)]
pub struct AttackBounds {
    pub sample_start: usize,
    pub sample_count: usize,
    pub trace_count: u32,
    pub trace_step: u32,
}

impl AttackBounds {
    /// Read window and schedule arguments, defaulting to the whole dataset,
    /// and validate them against its header.
    pub fn from_args(args: &ArgBag, header: &DatasetHeader) -> Result<Self> {
        let trace_count = args.u32_opt(names::TRACE_COUNT)?.unwrap_or(header.num_traces);
        let trace_step = args.u32_opt(names::TRACE_STEP)?.unwrap_or(0);
        let sample_start = args.u32_opt(names::SAMPLE_START)?.unwrap_or(0) as usize;
        let sample_end =
            args.u32_opt(names::SAMPLE_END)?.unwrap_or(header.num_samples) as usize;

        let sample_count = sample_end.saturating_sub(sample_start);
        if sample_count == 0 {
            return Err(Error::InvalidArgument(format!(
                "empty sample window [{sample_start}, {sample_end})"
            )));
        }
        if sample_start + sample_count > header.num_samples as usize {
            return Err(Error::InvalidArgument(format!(
                "sample window [{sample_start}, {sample_end}) outside 0..{}",
                header.num_samples
            )));
        }
        if trace_count == 0 {
            return Err(Error::InvalidArgument("trace count must be at least 1".into()));
        }
        if trace_count > header.num_traces {
            return Err(Error::InvalidArgument(format!(
                "trace count {trace_count} exceeds dataset size {}",
                header.num_traces
            )));
        }
        Ok(Self { sample_start, sample_count, trace_count, trace_step })
    }

    /// The inclusive trace-count schedule.
    pub fn steps(&self) -> Vec<u32> {
        if self.trace_step > 0 {
            numerics::arange(self.trace_step, self.trace_count + 1, self.trace_step)
        } else {
            vec![self.trace_count]
        }
    }

    /// Score engines additionally require the step to stay below the count.
    pub fn require_step_below_count(&self) -> Result<()> {
        if self.trace_step >= self.trace_count && self.trace_step != 0 {
            return Err(Error::InvalidArgument(format!(
                "trace step {} must be smaller than trace count {}",
                self.trace_step, self.trace_count
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Pearson CPA
// ============================================================================

/// Correlation power analysis via the Pearson coefficient.
#[derive(Default)]
pub struct PearsonDistinguisher {
    dataset: Option<Arc<TraceDataset>>,
    model: Option<Box<dyn PowerModel>>,
    bounds: Option<AttackBounds>,
}

impl PearsonDistinguisher {
    fn parts(&mut self) -> Result<(&Arc<TraceDataset>, &mut Box<dyn PowerModel>, AttackBounds)> {
        let dataset = self.dataset.as_ref().ok_or(Error::MissingArgument(names::DATASET))?;
        let bounds = self.bounds.ok_or(Error::MissingArgument(names::TRACE_COUNT))?;
        let model = self.model.as_mut().ok_or(Error::MissingArgument(names::MODEL))?;
        Ok((dataset, model, bounds))
    }
}

impl Distinguisher for PearsonDistinguisher {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        let dataset = args.dataset_required(names::DATASET)?;
        let model_name = args.str_required(names::MODEL)?;
        let model = plugin::registry().construct_power_model(&model_name, args)?;
        let bounds = AttackBounds::from_args(args, dataset.header())?;

        // A fixed plaintext keeps the modeled value constant across traces
        // under any fixed key, so the correlation denominator is zero
        // everywhere. Refuse instead of emitting a matrix of NaN.
        if dataset.header().plaintext_mode == PlaintextMode::Fixed {
            return Err(Error::UnsupportedOperation(
                "pearson correlation is ill-defined for fixed-plaintext datasets".into(),
            ));
        }

        self.dataset = Some(dataset);
        self.model = Some(model);
        self.bounds = Some(bounds);
        Ok(())
    }

    fn set_model_byte_index(&mut self, byte_index: usize) {
        if let Some(model) = self.model.as_mut() {
            model.set_byte_index(byte_index);
        }
    }

    fn distinguish(&mut self) -> Result<CorrelationSteps> {
        let (dataset, model, bounds) = self.parts()?;
        let model_matrix = model.compute()?;
        let steps = bounds.steps();
        let warned = AtomicBool::new(false);

        // One fully independent column of results per window sample; the
        // scatter into per-step matrices happens after the join.
        let per_sample: Vec<Vec<[f64; KEY_CLASSES]>> = parallel::parallel_map(
            bounds.sample_start..bounds.sample_start + bounds.sample_count,
            Some("pearson"),
            |s| {
                let sample = dataset.sample(s);
                let mut columns = vec![[0.0f64; KEY_CLASSES]; steps.len()];
                for k in 0..KEY_CLASSES {
                    let model_row = model_matrix.row(k);
                    let mut sum_mt = 0.0;
                    let mut sum_m = 0.0;
                    let mut sum_t = 0.0;
                    let mut sum_m2 = 0.0;
                    let mut sum_t2 = 0.0;
                    let mut from = 0usize;
                    for (step_index, &step_count) in steps.iter().enumerate() {
                        for t in from..step_count as usize {
                            let ts = f64::from(sample[t]);
                            let m = f64::from(model_row[t]);
                            sum_mt += m * ts;
                            sum_m += m;
                            sum_t += ts;
                            sum_m2 += m * m;
                            sum_t2 += ts * ts;
                        }
                        let n = f64::from(step_count);
                        let divisor = (n * sum_t2 - sum_t * sum_t).sqrt()
                            * (n * sum_m2 - sum_m * sum_m).sqrt();
                        let rho = (n * sum_mt - sum_m * sum_t) / divisor;
                        if divisor <= DEGENERATE_DIVISOR && !warned.swap(true, Ordering::Relaxed)
                        {
                            warn!(
                                sample = s,
                                hypothesis = k,
                                "near-zero variance in pearson denominator, emitting NaN"
                            );
                        }
                        columns[step_index][k] = rho.abs();
                        from = step_count as usize;
                    }
                }
                columns
            },
        );

        let mut result: CorrelationSteps = steps
            .iter()
            .map(|&count| (count, Matrix::new(bounds.sample_count, KEY_CLASSES)))
            .collect();
        for (offset, columns) in per_sample.iter().enumerate() {
            for (step_index, column) in columns.iter().enumerate() {
                let matrix = &mut result[step_index].1;
                for (k, &value) in column.iter().enumerate() {
                    matrix.set(k, offset, value);
                }
            }
        }
        Ok(result)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgValue;
    use crate::crypto;
    use crate::dataset::{EncryptionAlgorithm, TraceDatasetBuilder};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Single-sample S-Box dataset leaking `HW(S(p ⊕ key))` plus noise in
    /// `{-amplitude, …, amplitude}`.
    fn leaky_dataset(traces: u32, key: u8, amplitude: i32, seed: u64) -> Arc<TraceDataset> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Random);
        builder.num_traces = traces;
        builder.num_samples = 1;
        for _ in 0..traces {
            let p: u8 = rng.gen();
            let leak = crypto::hamming_weight(crypto::sbox(p ^ key));
            let noise = if amplitude > 0 { rng.gen_range(-amplitude..=amplitude) } else { 0 };
            builder.add_trace(&[leak + noise]);
            builder.add_plaintext(&[p]);
        }
        builder.add_key(&[key]);
        builder.build().unwrap()
    }

    fn pearson_args(dataset: Arc<TraceDataset>, step: u32) -> ArgBag {
        let mut args = ArgBag::new();
        args.set(names::DATASET, ArgValue::Dataset(dataset));
        args.set(names::MODEL, ArgValue::Str("hamming_weight".into()));
        args.set(names::TRACE_STEP, ArgValue::U32(step));
        args
    }

    #[test]
    fn trivial_cpa_recovers_the_key() {
        let key = 0x2a;
        let dataset = leaky_dataset(1024, key, 1, 42);
        let mut distinguisher = PearsonDistinguisher::default();
        distinguisher.init(&pearson_args(dataset, 128)).unwrap();
        let result = distinguisher.distinguish().unwrap();
        assert_eq!(result.len(), 8);

        let mut previous = 0.0f64;
        for (count, matrix) in &result {
            let correct = matrix.get(key as usize, 0);
            // The correct-key correlation climbs as traces accumulate
            // (slack for estimator noise on early steps).
            assert!(
                correct >= previous - 0.05,
                "correlation regressed at step {count}: {correct} < {previous}"
            );
            previous = correct;
        }

        let (final_count, final_matrix) = result.last().unwrap();
        assert_eq!(*final_count, 1024);
        let per_key: Vec<f64> = (0..KEY_CLASSES).map(|k| final_matrix.get(k, 0)).collect();
        assert_eq!(numerics::argmax(&per_key), key as usize);
        // HW leakage against ±1 uniform noise correlates at √(2/(2+2/3)).
        assert!(per_key[key as usize] > 0.8);
    }

    #[test]
    fn stepped_accumulators_match_from_scratch_recomputation() {
        let key = 0x51;
        let dataset = leaky_dataset(256, key, 2, 7);
        let mut distinguisher = PearsonDistinguisher::default();
        distinguisher.init(&pearson_args(dataset.clone(), 64)).unwrap();
        let stepped = distinguisher.distinguish().unwrap();

        let mut model = crate::model::HammingWeightModel::default();
        model.set_dataset(dataset.clone());
        let model_matrix = model.compute().unwrap();

        for (count, matrix) in &stepped {
            let prefix = *count as usize;
            for k in (0..KEY_CLASSES).step_by(17) {
                let expected =
                    numerics::pearson(&model_matrix.row(k)[..prefix], &dataset.sample(0)[..prefix])
                        .abs();
                let got = matrix.get(k, 0);
                assert!(
                    (got - expected).abs() < 1e-12,
                    "key {k} step {count}: {got} != {expected}"
                );
            }
        }
    }

    #[test]
    fn zero_step_yields_single_schedule_entry() {
        let dataset = leaky_dataset(100, 0x00, 0, 1);
        let mut distinguisher = PearsonDistinguisher::default();
        distinguisher.init(&pearson_args(dataset, 0)).unwrap();
        let result = distinguisher.distinguish().unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, 100);
    }

    #[test]
    fn fixed_plaintext_mode_is_refused_at_init() {
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Fixed);
        builder.num_traces = 4;
        builder.num_samples = 1;
        for v in 0..4 {
            builder.add_trace(&[v]);
        }
        builder.add_plaintext(&[0x00]);
        builder.add_key(&[0x00]);
        let dataset = builder.build().unwrap();

        let mut distinguisher = PearsonDistinguisher::default();
        let err = distinguisher.init(&pearson_args(dataset, 0)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }

    #[test]
    fn bounds_validation_rejects_bad_windows() {
        let dataset = leaky_dataset(16, 0x00, 0, 2);
        let header = *dataset.header();

        let mut args = ArgBag::new();
        args.set(names::SAMPLE_START, ArgValue::U32(1));
        args.set(names::SAMPLE_END, ArgValue::U32(1));
        assert!(AttackBounds::from_args(&args, &header).is_err());

        let mut args = ArgBag::new();
        args.set(names::TRACE_COUNT, ArgValue::U32(17));
        assert!(AttackBounds::from_args(&args, &header).is_err());

        let mut args = ArgBag::new();
        args.set(names::SAMPLE_END, ArgValue::U32(2));
        assert!(AttackBounds::from_args(&args, &header).is_err());
    }

    #[test]
    fn schedule_is_inclusive_of_the_final_count() {
        let bounds = AttackBounds {
            sample_start: 0,
            sample_count: 1,
            trace_count: 1024,
            trace_step: 128,
        };
        let steps = bounds.steps();
        assert_eq!(steps.first(), Some(&128));
        assert_eq!(steps.last(), Some(&1024));
        assert_eq!(steps.len(), 8);

        let uneven = AttackBounds {
            sample_start: 0,
            sample_count: 1,
            trace_count: 1000,
            trace_step: 300,
        };
        assert_eq!(uneven.steps(), vec![300, 600, 900]);
    }
}
