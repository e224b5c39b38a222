//! Score metric
//!
//! Per step: the trace count followed by 256 columns `score_key<k>`, each
//! the window-wide maximum of `|ρ|` for key hypothesis `k`.

#![forbid(unsafe_code)]

use crate::args::{names, ArgBag};
use crate::error::{Error, Result};
use crate::metrics::{max_scores, BasicMetric, Metric};
use crate::sink::RowSink;
use crate::KEY_CLASSES;

#[derive(Default)]
pub struct ScoreMetric {
    base: Option<BasicMetric>,
}

impl Metric for ScoreMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.base = Some(BasicMetric::from_args(args)?);
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let base = self.base.as_mut().ok_or(Error::MissingArgument(names::DATASET))?;
        let steps = base.distinguisher.distinguish()?;

        sink.write_text("trace_count")?;
        for k in 0..KEY_CLASSES {
            sink.write_text(&format!("score_key{k}"))?;
        }
        sink.end_row()?;

        for (trace_count, matrix) in &steps {
            sink.write_value(trace_count)?;
            for score in max_scores(matrix) {
                sink.write_value(&score)?;
            }
            sink.end_row()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{names, ArgValue};
    use crate::metrics::tests_support::{leaky_dataset, render_metric};

    #[test]
    fn emits_one_score_row_per_step() {
        let key = 0x2a;
        let dataset = leaky_dataset(512, key, 1);
        let mut args = ArgBag::new();
        args.set(names::DATASET, ArgValue::Dataset(dataset));
        args.set(names::DISTINGUISHER, ArgValue::Str("pearson".into()));
        args.set(names::MODEL, ArgValue::Str("hamming_weight".into()));
        args.set(names::TRACE_STEP, ArgValue::U32(256));

        let mut metric = ScoreMetric::default();
        metric.init(&args).unwrap();
        let text = render_metric(&mut metric);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3); // header + two steps
        assert!(lines[0].starts_with("\"trace_count\",\"score_key0\","));
        assert!(lines[1].starts_with("256,"));
        assert!(lines[2].starts_with("512,"));
        // 1 + 256 cells, each followed by the separator.
        assert_eq!(lines[1].matches(',').count(), 257);
    }
}
