//! Perceived information metric
//!
//! Cross-dataset counterpart of mutual information: a profile estimated on
//! a **training** dataset is evaluated against the traces of a **testing**
//! dataset. The testing traces at the most informative sample are
//! partitioned by their identity intermediate `S(p[byte] ⊕ key)`, and each
//! class accumulates `log₂(g_k(x) / Σ_j g_j(x))` under the trained
//! gaussians:
//!
//! `PI = 8 + Σ_k Σ_{x ∈ class k} log₂(g_k(x) / Σ_j g_j(x)) / (256 · |class k|)`
//!
//! A model that generalizes poorly from training to testing drives PI
//! negative, which is exactly the property the metric exists to expose.
//!
//! Output: one row `pi, avg_sigma`.

#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::args::{names, ArgBag, ArgValue};
use crate::crypto;
use crate::dataset::TraceDataset;
use crate::error::{Error, Result};
use crate::metrics::Metric;
use crate::numerics;
use crate::plugin;
use crate::profiler::Profiler;
use crate::sink::RowSink;
use crate::KEY_CLASSES;

#[derive(Default)]
pub struct PiMetric {
    testing: Option<Arc<TraceDataset>>,
    profiler: Option<Box<dyn Profiler>>,
    byte_index: usize,
    known_key: u8,
    sigma: f64,
}

impl Metric for PiMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        let training = args.dataset_required(names::TRAINING_DATASET)?;
        let testing = args.dataset_required(names::TESTING_DATASET)?;
        let byte_index = args.u32_opt(names::BYTE_INDEX)?.unwrap_or(0) as usize;
        self.known_key = args.u8_required(names::KNOWN_KEY)?;
        self.sigma = args.f64_opt(names::SIGMA)?.unwrap_or(0.0);

        let (train, test) = (training.header(), testing.header());
        if train.key_size != test.key_size || train.plaintext_size != test.plaintext_size {
            return Err(Error::InvalidArgument(
                "training and testing datasets must share key and plaintext widths".into(),
            ));
        }
        if byte_index >= test.plaintext_size as usize {
            return Err(Error::InvalidArgument(format!(
                "byte index {byte_index} outside plaintext width {}",
                test.plaintext_size
            )));
        }

        // The profiler must run on the training dataset regardless of what
        // the shared bag's dataset slot holds.
        let profiler_name = args.str_required(names::PROFILER)?;
        let mut profiler_args = args.clone();
        profiler_args.set(names::DATASET, ArgValue::Dataset(training));
        self.profiler =
            Some(plugin::registry().construct_profiler(&profiler_name, &profiler_args)?);

        self.testing = Some(testing);
        self.byte_index = byte_index;
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let testing =
            self.testing.as_ref().ok_or(Error::MissingArgument(names::TESTING_DATASET))?;
        let profiler =
            self.profiler.as_mut().ok_or(Error::MissingArgument(names::PROFILER))?;
        let header = testing.header();
        let trace_count = header.num_traces as usize;
        let sample_count = header.num_samples as usize;

        // Identity intermediates of the testing traces under the known key.
        let labels: Vec<u8> = (0..trace_count)
            .map(|t| crypto::sbox(testing.plaintext(t)[self.byte_index] ^ self.known_key))
            .collect();

        // Most informative testing sample, by correlation with the labels.
        let correlations: Vec<f64> = (0..sample_count)
            .map(|s| numerics::pearson(&labels, testing.sample(s)).abs())
            .collect();
        let best_sample = testing.sample(numerics::argmax(&correlations));

        // Partition that sample's values by class.
        let mut classes: Vec<Vec<i32>> = vec![Vec::new(); KEY_CLASSES];
        for (t, &label) in labels.iter().enumerate() {
            classes[label as usize].push(best_sample[t]);
        }

        let mut profile = profiler.profile()?;
        if self.sigma > 0.0 {
            profile.fill_row(1, self.sigma);
        }
        let means = profile.row(0).to_vec();
        let stds = profile.row(1).to_vec();
        let invstds: Vec<f64> = stds.iter().map(|s| 1.0 / s).collect();

        let mut pi = 8.0;
        for (k, class) in classes.iter().enumerate() {
            if class.is_empty() {
                continue;
            }
            let mut class_sum = 0.0;
            for &value in class {
                let x = f64::from(value);
                let mut density_sum = 0.0;
                let mut own_density = 0.0;
                for j in 0..KEY_CLASSES {
                    let g = numerics::gaussian(x, means[j], invstds[j]);
                    if j == k {
                        own_density = g;
                    }
                    density_sum += g;
                }
                class_sum += (own_density / density_sum).log2();
            }
            pi += class_sum / (class.len() as f64 * KEY_CLASSES as f64);
        }

        sink.write_text("pi")?;
        sink.write_text("avg_sigma")?;
        sink.end_row()?;
        sink.write_value(&pi)?;
        sink.write_value(&numerics::mean(&stds))?;
        sink.end_row()?;
        Ok(())
    }
}
