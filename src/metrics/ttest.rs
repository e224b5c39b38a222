//! Welch t-test metric
//!
//! Fixed-vs-random leakage detection: for two equally shaped datasets, one
//! captured with fixed inputs and one with random inputs, emit the Welch t
//! statistic of every window sample at every trace-count step. Columns are
//! `trace_count, sample_<s₀>, …, sample_<s₁−1>`; a statistic beyond a few
//! standard deviations flags a leaking sample.

#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::args::{names, ArgBag};
use crate::dataset::TraceDataset;
use crate::distinguisher::AttackBounds;
use crate::error::{Error, Result};
use crate::metrics::Metric;
use crate::numerics;
use crate::sink::RowSink;

#[derive(Default)]
pub struct TTestMetric {
    fixed: Option<Arc<TraceDataset>>,
    random: Option<Arc<TraceDataset>>,
    bounds: Option<AttackBounds>,
}

impl Metric for TTestMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        let fixed = args.dataset_required(names::FIXED_DATASET)?;
        let random = args.dataset_required(names::RANDOM_DATASET)?;

        let (f, r) = (fixed.header(), random.header());
        if f.num_traces != r.num_traces || f.num_samples != r.num_samples {
            return Err(Error::InvalidArgument(
                "fixed and random datasets must have the same shape".into(),
            ));
        }
        let bounds = AttackBounds::from_args(args, f)?;

        self.fixed = Some(fixed);
        self.random = Some(random);
        self.bounds = Some(bounds);
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let fixed = self.fixed.as_ref().ok_or(Error::MissingArgument(names::FIXED_DATASET))?;
        let random =
            self.random.as_ref().ok_or(Error::MissingArgument(names::RANDOM_DATASET))?;
        let bounds = self.bounds.ok_or(Error::MissingArgument(names::TRACE_COUNT))?;
        let steps = bounds.steps();

        sink.write_text("trace_count")?;
        for s in bounds.sample_start..bounds.sample_start + bounds.sample_count {
            sink.write_text(&format!("sample_{s}"))?;
        }
        sink.end_row()?;

        for &trace_count in &steps {
            let prefix = trace_count as usize;
            sink.write_value(&trace_count)?;
            for s in bounds.sample_start..bounds.sample_start + bounds.sample_count {
                let statistic =
                    numerics::welch_t(&fixed.sample(s)[..prefix], &random.sample(s)[..prefix]);
                sink.write_value(&statistic)?;
            }
            sink.end_row()?;
        }
        Ok(())
    }
}
