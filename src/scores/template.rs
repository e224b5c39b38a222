//! Bayesian template attack
//!
//! Two-phase engine over a **profiling** dataset and an **attack** dataset
//! of the same shape, algorithm and fixed key width.
//!
//! ## Profiling phase (per key byte)
//! 1. Run the power model on the profiling dataset.
//! 2. For every window sample, correlate the modeled leakage of the known
//!    key with the measured sample across all profiling traces; the `m`
//!    best-correlated samples become the byte's points of interest.
//! 3. Derive one additive **bias** per window sample: the residual
//!    `u − model(key, t)` averaged across traces and bytes, for samples
//!    that appear in any byte's POI set (zero elsewhere).
//!
//! ## Attack phase (per step τ, byte, key hypothesis)
//! Build the mean residual vector over the byte's POIs from the first τ
//! attack traces (bias-corrected), and the `m × m` covariance of those
//! residuals. Before inversion the covariance is conditioned: rows whose
//! diagonal variance is near zero, or whose correlation with an already
//! retained row is near ±1, are dropped so the matrix stays full-rank. The
//! log-score is `−½ · rᵀ Σ⁻¹ r` with `Σ⁻¹` from the Cholesky inverse.
//!
//! A hypothesis whose covariance loses every row scores NaN (with one
//! warning for the whole run), never a hard error.

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
use crate::scores::{ScoreEngine, ScoreSteps};
use crate::KEY_CLASSES;

/// A POI row whose residual variance falls below this is dropped.
const COV_DIAGONAL_EPSILON: f64 = 1e-2;
/// A POI row correlated beyond this with a retained row is dropped.
const COV_DUPLICATE_CORRELATION: f64 = 0.98;

/// Per-byte points of interest plus the per-sample additive bias.
struct ProfiledTemplates {
    /// Absolute sample indices, `m` per key byte.
    pois: Vec<Vec<usize>>,
    /// One additive bias per window sample.
    bias: Vec<f64>,
}

/// The Bayesian template attack engine (`bayesian`).
#[derive(Default)]
pub struct TemplateAttackScore {
    attack: Option<Arc<TraceDataset>>,
    profiling: Option<Arc<TraceDataset>>,
    model: Option<Box<dyn PowerModel>>,
    bounds: Option<AttackBounds>,
    poi_count: usize,
}

impl ScoreEngine for TemplateAttackScore {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        let attack = args.dataset_required(names::DATASET)?;
        let profiling = args.dataset_required(names::TRAINING_DATASET)?;
        let bounds = AttackBounds::from_args(args, attack.header())?;
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

        let (a, p) = (attack.header(), profiling.header());
        if a.num_samples != p.num_samples
            || a.key_size != p.key_size
            || a.plaintext_size != p.plaintext_size
            || a.algorithm != p.algorithm
        {
            return Err(Error::InvalidArgument(
                "profiling and attack datasets must share shape and algorithm".into(),
            ));
        }

        self.attack = Some(attack);
        self.profiling = Some(profiling);
        self.model = Some(model);
        self.bounds = Some(bounds);
        self.poi_count = poi_count;
        Ok(())
    }

    fn compute_scores(&mut self) -> Result<ScoreSteps> {
        let attack = self.attack.clone().ok_or(Error::MissingArgument(names::DATASET))?;
        let profiling =
            self.profiling.clone().ok_or(Error::MissingArgument(names::TRAINING_DATASET))?;
        let bounds = self.bounds.ok_or(Error::MissingArgument(names::TRACE_COUNT))?;
        let model = self.model.as_mut().ok_or(Error::MissingArgument(names::MODEL))?;
        let byte_count = attack.header().key_size as usize;

        debug!("template attack: profiling phase");
        let profiling_models = model_every_byte(model, &profiling, byte_count)?;
        let templates = profile(&profiling, &profiling_models, bounds, self.poi_count);

        debug!("template attack: attack phase");
        let attack_models = model_every_byte(model, &attack, byte_count)?;
        let steps = bounds.steps();
        let degenerate_warned = AtomicBool::new(false);

        let slots = parallel::parallel_map(
            0..steps.len() * byte_count,
            Some("template attack"),
            |index| {
                let step_index = index / byte_count;
                let byte_index = index % byte_count;
                score_hypotheses(
                    &attack,
                    &attack_models[byte_index],
                    &templates.pois[byte_index],
                    &templates.bias,
                    bounds.sample_start,
                    steps[step_index] as usize,
                    &degenerate_warned,
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

/// Run the model once per key byte against `dataset`.
fn model_every_byte(
    model: &mut Box<dyn PowerModel>,
    dataset: &Arc<TraceDataset>,
    byte_count: usize,
) -> Result<Vec<Matrix<i32>>> {
    model.set_dataset(dataset.clone());
    let mut models = Vec::with_capacity(byte_count);
    for byte in 0..byte_count {
        model.set_byte_index(byte);
        models.push(model.compute()?);
    }
    Ok(models)
}

/// Profiling phase: POI selection and per-sample bias.
fn profile(
    profiling: &Arc<TraceDataset>,
    models: &[Matrix<i32>],
    bounds: AttackBounds,
    poi_count: usize,
) -> ProfiledTemplates {
    let trace_count = profiling.header().num_traces as usize;
    let window = bounds.sample_count;
    let start = bounds.sample_start;
    let byte_count = models.len();

    // POIs: per byte, the window samples best correlated with the modeled
    // leakage of the dataset's own key.
    let pois: Vec<Vec<usize>> =
        parallel::parallel_map(0..byte_count, Some("selecting points of interest"), |byte| {
            let correlations: Vec<f64> = (0..window)
                .map(|offset| {
                    let sample = profiling.sample(start + offset);
                    let mut sum_x = 0.0;
                    let mut sum_x2 = 0.0;
                    let mut sum_y = 0.0;
                    let mut sum_y2 = 0.0;
                    let mut sum_xy = 0.0;
                    for t in 0..trace_count {
                        let x = f64::from(sample[t]);
                        let key_byte = profiling.key(t)[byte] as usize;
                        let y = f64::from(models[byte].get(key_byte, t));
                        sum_x += x;
                        sum_x2 += x * x;
                        sum_y += y;
                        sum_y2 += y * y;
                        sum_xy += x * y;
                    }
                    let n = trace_count as f64;
                    (n * sum_xy - sum_x * sum_y)
                        / ((n * sum_x2 - sum_x * sum_x) * (n * sum_y2 - sum_y * sum_y)).sqrt()
                })
                .collect();

            let mut order: Vec<usize> = (0..window).collect();
            order.sort_by(|&a, &b| match (correlations[a].is_nan(), correlations[b].is_nan()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => correlations[b]
                    .partial_cmp(&correlations[a])
                    .unwrap_or(std::cmp::Ordering::Equal),
            });
            order.truncate(poi_count);
            order.into_iter().map(|offset| offset + start).collect()
        });

    // Bias: average residual across traces and bytes for POI samples.
    let bias = parallel::parallel_map(0..window, None, |offset| {
        let sample_index = start + offset;
        let mut total = 0.0;
        for (byte, byte_pois) in pois.iter().enumerate() {
            if !byte_pois.contains(&sample_index) {
                continue;
            }
            let sample = profiling.sample(sample_index);
            let mut partial = 0.0;
            for t in 0..trace_count {
                let key_byte = profiling.key(t)[byte] as usize;
                partial += f64::from(sample[t]) - f64::from(models[byte].get(key_byte, t));
            }
            total += partial / trace_count as f64;
        }
        total / byte_count as f64
    });

    ProfiledTemplates { pois, bias }
}

/// Attack phase for one `(step, byte)` cell: score all 256 hypotheses.
fn score_hypotheses(
    attack: &Arc<TraceDataset>,
    model: &Matrix<i32>,
    pois: &[usize],
    bias: &[f64],
    sample_start: usize,
    tau: usize,
    degenerate_warned: &AtomicBool,
) -> [f64; KEY_CLASSES] {
    let mut out = [f64::NAN; KEY_CLASSES];
    let m = pois.len();

    for (key, slot) in out.iter_mut().enumerate() {
        let model_row = model.row(key);

        // Mean residual per POI over the first τ traces.
        let mut residual = vec![0.0f64; m];
        for (i, &poi) in pois.iter().enumerate() {
            let sample = attack.sample(poi);
            let poi_bias = bias[poi - sample_start];
            let mut acc = 0.0;
            for t in 0..tau {
                acc += f64::from(sample[t]) - poi_bias - f64::from(model_row[t]);
            }
            residual[i] = acc / tau as f64;
        }

        // Residual covariance over the same τ traces.
        let mut covariance = Matrix::new(m, m);
        for i in 0..m {
            for j in 0..m {
                let sample_i = attack.sample(pois[i]);
                let sample_j = attack.sample(pois[j]);
                let bias_i = bias[pois[i] - sample_start];
                let bias_j = bias[pois[j] - sample_start];
                let mut sum_u = 0.0;
                let mut sum_v = 0.0;
                let mut sum_uv = 0.0;
                for t in 0..tau {
                    let u = f64::from(sample_i[t]) - bias_i - f64::from(model_row[t]);
                    let v = f64::from(sample_j[t]) - bias_j - f64::from(model_row[t]);
                    sum_u += u;
                    sum_v += v;
                    sum_uv += u * v;
                }
                let n = tau as f64;
                covariance.set(i, j, (sum_uv - sum_u * sum_v / n) / (n - 1.0));
            }
        }

        // Keep the covariance full-rank: drop degenerate and duplicate rows.
        let retained = condition_covariance(&covariance, COV_DUPLICATE_CORRELATION);
        if retained.is_empty() {
            if !degenerate_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    key,
                    "covariance lost every point of interest, scoring NaN"
                );
            }
            continue;
        }

        let mut reduced = Matrix::new(retained.len(), retained.len());
        for (ri, &i) in retained.iter().enumerate() {
            for (rj, &j) in retained.iter().enumerate() {
                reduced.set(ri, rj, covariance.get(i, j));
            }
        }
        let inverse = reduced.cholesky_inverse();

        let mut quadratic = 0.0;
        for (ri, &i) in retained.iter().enumerate() {
            for (rj, &j) in retained.iter().enumerate() {
                quadratic += residual[i] * inverse.get(ri, rj) * residual[j];
            }
        }
        *slot = -0.5 * quadratic;
    }
    out
}

/// Indices of covariance rows that survive the degeneracy and duplicate
/// filters, in ascending order. Shared with the legacy engine, which uses a
/// slightly tighter duplicate threshold.
pub(crate) fn condition_covariance(
    covariance: &Matrix<f64>,
    duplicate_threshold: f64,
) -> Vec<usize> {
    let m = covariance.width();
    let mut retained: Vec<usize> = Vec::with_capacity(m);
    for i in 0..m {
        if covariance.get(i, i) < COV_DIAGONAL_EPSILON {
            continue;
        }
        let duplicate = retained.iter().any(|&j| {
            let correlation = covariance.get(i, j)
                / (covariance.get(i, i) * covariance.get(j, j)).sqrt();
            correlation.abs() > duplicate_threshold
        });
        if !duplicate {
            retained.push(i);
        }
    }
    retained
}

// ============================================================================
// Tests
// ============================================================================
