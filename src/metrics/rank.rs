//! Rank metric
//!
//! Per step: the trace count followed by 256 columns `rank_key<k>` carrying
//! every key's 1-based rank in descending max-correlation order. Rank 1
//! means the key would be guessed first.

#![forbid(unsafe_code)]

use crate::args::{names, ArgBag};
use crate::error::{Error, Result};
use crate::metrics::{max_scores, ranks, sort_keys_by_score_desc, BasicMetric, Metric};
use crate::sink::RowSink;
use crate::KEY_CLASSES;

#[derive(Default)]
pub struct RankMetric {
    base: Option<BasicMetric>,
}

impl Metric for RankMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.base = Some(BasicMetric::from_args(args)?);
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let base = self.base.as_mut().ok_or(Error::MissingArgument(names::DATASET))?;
        let steps = base.distinguisher.distinguish()?;

        sink.write_text("trace_count")?;
        for k in 0..KEY_CLASSES {
            sink.write_text(&format!("rank_key{k}"))?;
        }
        sink.end_row()?;

        for (trace_count, matrix) in &steps {
            sink.write_value(trace_count)?;
            let order = sort_keys_by_score_desc(&max_scores(matrix));
            for rank in ranks(&order) {
                sink.write_value(&rank)?;
            }
            sink.end_row()?;
        }
        Ok(())
    }
}
