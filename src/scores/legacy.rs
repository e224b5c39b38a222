//! Legacy Bayesian engine
//!
//! The older single-dataset variant of the template attack, kept for
//! comparison runs. Instead of a separate profiling dataset it groups the
//! traces of the attack dataset itself **by the model's expected value
//! under the dataset's known key**, estimates per-class window averages,
//! and selects points of interest by the maximum pairwise gap between
//! class means. The covariance is taken around the class means and shared
//! by all hypotheses; the log-score of hypothesis `k` accumulates
//! `−½ · rᵀ Σ⁻¹ r` over per-trace residuals against the class the model
//! predicts under `k`.
//!
//! Behavior choices this implementation pins down (the upstream lineage of
//! this engine left them fuzzy):
//! - expected values outside `0..=255` skip the trace, with one warning for
//!   the run;
//! - a trace whose predicted class is empty under the known key is skipped;
//! - a hypothesis that scores no trace at all gets NaN.
//!
//! Its behavior on fixed-plaintext datasets is not established; prefer the
//! two-dataset template attack for real evaluations.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::args::{names, ArgBag};
use crate::dataset::TraceDataset;
use crate::distinguisher::AttackBounds;
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::model::PowerModel;
use crate::parallel;
use crate::plugin;
use crate::scores::template::condition_covariance;
use crate::scores::{ScoreEngine, ScoreSteps};
use crate::KEY_CLASSES;

/// Duplicate-row threshold (tighter than the template engine's).
const COV_DUPLICATE_CORRELATION: f64 = 0.99;

/// The legacy grouped Bayesian engine (`old_bayesian`).
#[derive(Default)]
pub struct LegacyBayesianScore {
    dataset: Option<Arc<TraceDataset>>,
    model: Option<Box<dyn PowerModel>>,
    bounds: Option<AttackBounds>,
    poi_count: usize,
}

impl ScoreEngine for LegacyBayesianScore {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        let dataset = args.dataset_required(names::DATASET)?;
        let bounds = AttackBounds::from_args(args, dataset.header())?;
        bounds.require_step_below_count()?;

        let model_name = args.str_required(names::MODEL)?;
        let model = plugin::registry().construct_power_model(&model_name, args)?;

        let poi_count = args.u32_required(names::SAMPLE_FILTER)? as usize;
        if poi_count == 0 || poi_count > bounds.sample_count {
            return Err(Error::InvalidArgument(format!(
                "poi count {poi_count} outside 1..={}",
                bounds.sample_count
            )));
        }

        self.dataset = Some(dataset);
        self.model = Some(model);
        self.bounds = Some(bounds);
        self.poi_count = poi_count;
        Ok(())
    }

    fn compute_scores(&mut self) -> Result<ScoreSteps> {
        let dataset = self.dataset.clone().ok_or(Error::MissingArgument(names::DATASET))?;
        let bounds = self.bounds.ok_or(Error::MissingArgument(names::TRACE_COUNT))?;
        let model = self.model.as_mut().ok_or(Error::MissingArgument(names::MODEL))?;
        let byte_count = dataset.header().key_size as usize;

        model.set_dataset(dataset.clone());
        let mut models = Vec::with_capacity(byte_count);
        for byte in 0..byte_count {
            model.set_byte_index(byte);
            models.push(model.compute()?);
        }

        // Group traces by the expected value under the dataset's own key.
        let out_of_range_warned = AtomicBool::new(false);
        let groups: Vec<Vec<Vec<usize>>> = parallel::parallel_map(0..byte_count, None, |byte| {
            let mut classes: Vec<Vec<usize>> = vec![Vec::new(); KEY_CLASSES];
            for t in 0..bounds.trace_count as usize {
                let key_byte = dataset.key(t)[byte] as usize;
                let expected = models[byte].get(key_byte, t);
                if !(0..KEY_CLASSES as i32).contains(&expected) {
                    if !out_of_range_warned.swap(true, Ordering::Relaxed) {
                        warn!(byte, expected, "model output outside class range, skipping trace");
                    }
                    continue;
                }
                classes[expected as usize].push(t);
            }
            classes
        });
        debug!("legacy bayesian: grouped traces, starting attack");

        let steps = bounds.steps();
        let slots = parallel::parallel_map(
            0..steps.len() * byte_count,
            Some("legacy bayesian"),
            |index| {
                let step_index = index / byte_count;
                let byte_index = index % byte_count;
                score_groups(
                    &dataset,
                    &models[byte_index],
                    &groups[byte_index],
                    bounds,
                    steps[step_index] as usize,
                    self.poi_count,
                )
            },
        );

        let mut scores: ScoreSteps =
            steps.iter().map(|&count| (count, Vec::with_capacity(byte_count))).collect();
        for (index, slot) in slots.into_iter().enumerate() {
            scores[index / byte_count].1.push(slot);
        }
        Ok(scores)
    }
}

/// Score all hypotheses for one `(step, byte)` cell.
fn score_groups(
    dataset: &Arc<TraceDataset>,
    model: &Matrix<i32>,
    groups: &[Vec<usize>],
    bounds: AttackBounds,
    tau: usize,
    poi_count: usize,
) -> [f64; KEY_CLASSES] {
    let window = bounds.sample_count;
    let start = bounds.sample_start;

    // Per-class window averages over the first τ traces.
    let mut averages: Vec<Vec<f64>> = vec![vec![f64::NAN; window]; KEY_CLASSES];
    let mut populated = [false; KEY_CLASSES];
    for (class, members) in groups.iter().enumerate() {
        let in_step: Vec<usize> = members.iter().copied().filter(|&t| t < tau).collect();
        if in_step.is_empty() {
            continue;
        }
        populated[class] = true;
        let avg = &mut averages[class];
        for slot in avg.iter_mut() {
            *slot = 0.0;
        }
        for &t in &in_step {
            for (offset, slot) in avg.iter_mut().enumerate() {
                *slot += f64::from(dataset.sample(start + offset)[t]);
            }
        }
        for slot in avg.iter_mut() {
            *slot /= in_step.len() as f64;
        }
    }

    // Points of interest: window samples with the widest gap between any
    // two class means.
    let mut best_gap = vec![0.0f64; window];
    for i in 0..KEY_CLASSES {
        if !populated[i] {
            continue;
        }
        for j in i + 1..KEY_CLASSES {
            if !populated[j] {
                continue;
            }
            for (offset, gap) in best_gap.iter_mut().enumerate() {
                let diff = (averages[i][offset] - averages[j][offset]).abs();
                if diff > *gap {
                    *gap = diff;
                }
            }
        }
    }
    let mut order: Vec<usize> = (0..window).collect();
    order.sort_by(|&a, &b| {
        best_gap[b].partial_cmp(&best_gap[a]).unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(poi_count);
    let selected = order;

    // Covariance around the class means, pooled over every populated class.
    let m = selected.len();
    let mut covariance = Matrix::new(m, m);
    let mut pooled = 0usize;
    for (class, members) in groups.iter().enumerate() {
        if !populated[class] {
            continue;
        }
        for &t in members.iter().filter(|&&t| t < tau) {
            pooled += 1;
            for row in 0..m {
                let u = f64::from(dataset.sample(start + selected[row])[t])
                    - averages[class][selected[row]];
                for col in 0..m {
                    let v = f64::from(dataset.sample(start + selected[col])[t])
                        - averages[class][selected[col]];
                    let prev = covariance.get(row, col);
                    covariance.set(row, col, prev + u * v);
                }
            }
        }
    }
    if pooled < 2 {
        return [f64::NAN; KEY_CLASSES];
    }
    for row in 0..m {
        for col in 0..m {
            let v = covariance.get(row, col) / (pooled - 1) as f64;
            covariance.set(row, col, v);
        }
    }

    let retained = condition_covariance(&covariance, COV_DUPLICATE_CORRELATION);
    if retained.is_empty() {
        return [f64::NAN; KEY_CLASSES];
    }
    let mut reduced = Matrix::new(retained.len(), retained.len());
    for (ri, &i) in retained.iter().enumerate() {
        for (rj, &j) in retained.iter().enumerate() {
            reduced.set(ri, rj, covariance.get(i, j));
        }
    }
    let inverse = reduced.cholesky_inverse();

    // Accumulate the quadratic form over per-trace residuals against the
    // class each hypothesis predicts.
    let mut out = [f64::NAN; KEY_CLASSES];
    for (hypothesis, slot) in out.iter_mut().enumerate() {
        let model_row = model.row(hypothesis);
        let mut quadratic = 0.0;
        let mut scored_traces = 0usize;
        for t in 0..tau {
            let expected = model_row[t];
            if !(0..KEY_CLASSES as i32).contains(&expected) || !populated[expected as usize] {
                continue;
            }
            let avg = &averages[expected as usize];
            scored_traces += 1;
            for (ri, &i) in retained.iter().enumerate() {
                let u = f64::from(dataset.sample(start + selected[i])[t]) - avg[selected[i]];
                for (rj, &j) in retained.iter().enumerate() {
                    let v =
                        f64::from(dataset.sample(start + selected[j])[t]) - avg[selected[j]];
                    quadratic += u * inverse.get(ri, rj) * v;
                }
            }
        }
        if scored_traces > 0 {
            *slot = -0.5 * quadratic;
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
