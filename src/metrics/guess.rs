//! Guess metric
//!
//! Per step: the trace count followed by 256 columns `key_guess<1..=256>`
//! carrying the key values sorted by descending maximum correlation — the
//! adversary's guess order.

#![forbid(unsafe_code)]

use crate::args::{names, ArgBag};
use crate::error::{Error, Result};
use crate::metrics::{max_scores, sort_keys_by_score_desc, BasicMetric, Metric};
use crate::sink::RowSink;
use crate::KEY_CLASSES;

#[derive(Default)]
pub struct GuessMetric {
    base: Option<BasicMetric>,
}

impl Metric for GuessMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.base = Some(BasicMetric::from_args(args)?);
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let base = self.base.as_mut().ok_or(Error::MissingArgument(names::DATASET))?;
        let steps = base.distinguisher.distinguish()?;

        sink.write_text("trace_count")?;
        for i in 1..=KEY_CLASSES {
            sink.write_text(&format!("key_guess{i}"))?;
        }
        sink.end_row()?;

        for (trace_count, matrix) in &steps {
            sink.write_value(trace_count)?;
            for (key, _) in sort_keys_by_score_desc(&max_scores(matrix)) {
                sink.write_value(&key)?;
            }
            sink.end_row()?;
        }
        Ok(())
    }
}
