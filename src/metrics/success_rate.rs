//! Success rate metric
//!
//! Per step: 1 if the known key's rank is within the requested order `o`
//! (default 1), else 0 — i.e. whether an adversary allowed `o` guesses
//! would succeed at that trace count.

#![forbid(unsafe_code)]

use crate::args::{names, ArgBag};
use crate::error::{Error, Result};
use crate::metrics::{max_scores, ranks, sort_keys_by_score_desc, BasicMetric, Metric};
use crate::sink::RowSink;

#[derive(Default)]
pub struct SuccessRateMetric {
    base: Option<BasicMetric>,
    known_key: u8,
    order: u8,
}

impl Metric for SuccessRateMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.base = Some(BasicMetric::from_args(args)?);
        self.known_key = args.u8_required(names::KNOWN_KEY)?;
        self.order = args.u8_opt(names::ORDER)?.unwrap_or(1);
        if self.order == 0 {
            return Err(Error::InvalidArgument("success-rate order must be positive".into()));
        }
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let base = self.base.as_mut().ok_or(Error::MissingArgument(names::DATASET))?;
        let steps = base.distinguisher.distinguish()?;

        sink.write_text("trace_count")?;
        sink.write_text(&format!("success_rate_key{}", self.known_key))?;
        sink.end_row()?;

        for (trace_count, matrix) in &steps {
            let order = sort_keys_by_score_desc(&max_scores(matrix));
            let rank = ranks(&order)[self.known_key as usize];
            sink.write_value(trace_count)?;
            sink.write_value(&u32::from(rank <= u32::from(self.order)))?;
            sink.end_row()?;
        }
        Ok(())
    }
}
