//! Mutual information metric
//!
//! Treats the profiled per-class leakage distributions as gaussians and
//! evaluates the mutual information between the intermediate value and the
//! leakage:
//!
//! `MI = 8 + (1/256) · Σ_k ∫ p_k(x) · log₂(p_k(x) / Σ_j p_j(x)) dx`
//!
//! The integral is truncated to `[μ_min − 4σ_min, μ_max + 4σ_max]` and
//! sampled so the narrowest class gets about 100 evaluation points, capped
//! at 99 999 and forced odd for Simpson quadrature. User-supplied bounds or
//! sample counts are honored after a warning naming the computed optimum.
//!
//! Output: one row `mi, avg_sigma`.

#![forbid(unsafe_code)]

use tracing::warn;

use crate::args::{names, ArgBag};
use crate::error::{Error, Result};
use crate::metrics::Metric;
use crate::numerics::{self, MAX_INTEGRATION_SAMPLES};
use crate::plugin;
use crate::profiler::Profiler;
use crate::sink::RowSink;
use crate::KEY_CLASSES;

/// Integration half-width per class, in standard deviations.
const STD_WIDTH_FACTOR: f64 = 4.0;
/// Evaluation points across the narrowest class.
const SAMPLES_PER_NARROWEST_CLASS: f64 = 100.0;

#[derive(Default)]
pub struct MiMetric {
    profiler: Option<Box<dyn Profiler>>,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
    sample_count: Option<u32>,
    sigma: f64,
}

impl Metric for MiMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        // The dataset is consumed through the profiler, which reads it from
        // the same bag.
        args.dataset_required(names::DATASET)?;
        let profiler_name = args.str_required(names::PROFILER)?;
        self.profiler = Some(plugin::registry().construct_profiler(&profiler_name, args)?);
        self.lower_bound = args.f64_opt(names::INTEGRATION_LOWER_BOUND)?;
        self.upper_bound = args.f64_opt(names::INTEGRATION_UPPER_BOUND)?;
        self.sample_count = args.u32_opt(names::INTEGRATION_SAMPLE_COUNT)?;
        self.sigma = args.f64_opt(names::SIGMA)?.unwrap_or(0.0);
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let profiler =
            self.profiler.as_mut().ok_or(Error::MissingArgument(names::PROFILER))?;
        let mut profile = profiler.profile()?;

        // A positive sigma argument overrides every profiled deviation.
        if self.sigma > 0.0 {
            profile.fill_row(1, self.sigma);
        }
        let means = profile.row(0).to_vec();
        let stds = profile.row(1).to_vec();

        // Truncation bounds from the extreme class means, widened by their
        // own deviations.
        let (min_mean, max_mean) = numerics::minmax(&means);
        let min_mean_std = stds[numerics::argmin(&means)];
        let max_mean_std = stds[numerics::argmax(&means)];
        let mut a = min_mean - STD_WIDTH_FACTOR * min_mean_std;
        let mut b = max_mean + STD_WIDTH_FACTOR * max_mean_std;

        // Sample density such that the narrowest class is well resolved.
        let min_std = numerics::min(&stds);
        let samples_per_unit =
            SAMPLES_PER_NARROWEST_CLASS / (2.0 * STD_WIDTH_FACTOR * min_std);
        let mut n = ((b - a) * samples_per_unit).round().min(f64::from(u32::MAX)) as u32;

        if let Some(lower) = self.lower_bound {
            if lower != a {
                warn!(computed = a, using = lower, "overriding integration lower bound");
            }
            a = lower;
        }
        if let Some(upper) = self.upper_bound {
            if upper != b {
                warn!(computed = b, using = upper, "overriding integration upper bound");
            }
            b = upper;
        }
        if let Some(count) = self.sample_count {
            if count != n {
                warn!(computed = n, using = count, "overriding integration sample count");
            }
            n = count;
        }
        if n == 0 {
            return Err(Error::InvalidData("integration sample count is zero".into()));
        }
        if n > MAX_INTEGRATION_SAMPLES {
            warn!(requested = n, cap = MAX_INTEGRATION_SAMPLES, "integration sample count capped");
            n = MAX_INTEGRATION_SAMPLES;
        }

        // Per-class gaussian samples on the shared grid.
        let mut class_samples: Vec<Vec<f64>> = Vec::with_capacity(KEY_CLASSES);
        let mut delta = 0.0;
        for k in 0..KEY_CLASSES {
            let (samples, step) = numerics::sample_gaussian(means[k], stds[k], a, b, n);
            class_samples.push(samples);
            delta = step;
        }
        let grid_len = class_samples[0].len();

        let mut density_sum = vec![0.0f64; grid_len];
        for samples in &class_samples {
            for (slot, &value) in density_sum.iter_mut().zip(samples) {
                *slot += value;
            }
        }

        // Σ_k ∫ p_k log₂(p_k / Σ p) via Simpson, denormals treated as zero.
        let mut mi = 8.0;
        for samples in &class_samples {
            let integrand: Vec<f64> = samples
                .iter()
                .zip(&density_sum)
                .map(|(&p, &total)| {
                    if p >= f64::MIN_POSITIVE {
                        p * (p / total).log2()
                    } else {
                        0.0
                    }
                })
                .collect();
            mi += numerics::simpson(&integrand, delta) / KEY_CLASSES as f64;
        }

        sink.write_text("mi")?;
        sink.write_text("avg_sigma")?;
        sink.end_row()?;
        sink.write_value(&mi)?;
        sink.write_value(&numerics::mean(&stds))?;
        sink.end_row()?;
        Ok(())
    }
}
