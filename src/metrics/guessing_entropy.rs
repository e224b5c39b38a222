//! Guessing entropy metric
//!
//! Per step: the trace count and `log₂(rank)` of the known key under the
//! adversary's descending score order (rank is 1-based, so a recovered key
//! scores 0 bits).

#![forbid(unsafe_code)]

use crate::args::{names, ArgBag};
use crate::error::{Error, Result};
use crate::metrics::{max_scores, ranks, sort_keys_by_score_desc, BasicMetric, Metric};
use crate::sink::RowSink;

#[derive(Default)]
pub struct GuessingEntropyMetric {
    base: Option<BasicMetric>,
    known_key: u8,
}

impl Metric for GuessingEntropyMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.base = Some(BasicMetric::from_args(args)?);
        self.known_key = args.u8_required(names::KNOWN_KEY)?;
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let base = self.base.as_mut().ok_or(Error::MissingArgument(names::DATASET))?;
        let steps = base.distinguisher.distinguish()?;

        sink.write_text("trace_count")?;
        sink.write_text(&format!("logrank_key{}", self.known_key))?;
        sink.end_row()?;

        for (trace_count, matrix) in &steps {
            let order = sort_keys_by_score_desc(&max_scores(matrix));
            let rank = ranks(&order)[self.known_key as usize];
            sink.write_value(trace_count)?;
            sink.write_value(&f64::from(rank).log2())?;
            sink.end_row()?;
        }
        Ok(())
    }
}
