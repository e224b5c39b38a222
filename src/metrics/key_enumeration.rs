//! Key enumeration metric
//!
//! Drives a score engine, then merges its per-byte score vectors into a
//! globally ranked stream of full-key candidates (see [`crate::enumerate`])
//! and reports where the dataset's true key lands.
//!
//! The emitted table has two parts:
//! 1. a raw score dump — `trace-count, keyByte, 256 scores` per (step,
//!    byte) row;
//! 2. per step: `trace-count, rank, score` of the true key within the
//!    enumerated stream, followed by the first `output-key-count` keys as
//!    hex strings, each with its total score.
//!
//! NaN byte scores truncate the per-byte streams, so the enumerated stream
//! can run dry before `enumerated-key-count`; that case is reported with a
//! warning and a shorter row, never an error.

#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::{info, warn};

use crate::args::{names, ArgBag};
use crate::dataset::{KeyMode, TraceDataset};
use crate::enumerate::{KeyEnumerator, RankedKey};
use crate::error::{Error, Result};
use crate::metrics::Metric;
use crate::parallel;
use crate::plugin;
use crate::scores::ScoreEngine;
use crate::sink::RowSink;

#[derive(Default)]
pub struct KeyEnumerationMetric {
    dataset: Option<Arc<TraceDataset>>,
    score: Option<Box<dyn ScoreEngine>>,
    enumerated_count: usize,
    output_count: usize,
    key: Vec<u8>,
}

impl Metric for KeyEnumerationMetric {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        let dataset = args.dataset_required(names::DATASET)?;
        if dataset.header().key_mode != KeyMode::Fixed {
            return Err(Error::UnsupportedOperation(
                "key enumeration requires a fixed key across the dataset".into(),
            ));
        }

        let score_name = args.str_required(names::SCORE)?;
        info!(engine = %score_name, "constructing score engine");
        let score = plugin::registry().construct_score(&score_name, args)?;

        let enumerated_count = args.u32_required(names::ENUMERATED_KEY_COUNT)? as usize;
        let output_count = args.u32_required(names::OUTPUT_KEY_COUNT)? as usize;
        if enumerated_count == 0 {
            return Err(Error::InvalidArgument("enumerated key count must be positive".into()));
        }
        if output_count > enumerated_count {
            return Err(Error::InvalidArgument(
                "cannot output more keys than are enumerated".into(),
            ));
        }

        self.key = dataset.key(0).to_vec();
        self.dataset = Some(dataset);
        self.score = Some(score);
        self.enumerated_count = enumerated_count;
        self.output_count = output_count;
        Ok(())
    }

    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()> {
        let score = self.score.as_mut().ok_or(Error::MissingArgument(names::SCORE))?;
        let scores = score.compute_scores()?;

        // Part one: the raw per-byte score distributions.
        sink.write_text("trace-count")?;
        sink.write_text("keyByte")?;
        sink.write_text("scores...")?;
        sink.end_row()?;
        for (trace_count, byte_scores) in &scores {
            for (byte, candidates) in byte_scores.iter().enumerate() {
                sink.write_value(trace_count)?;
                sink.write_value(&byte)?;
                for candidate in candidates {
                    sink.write_value(candidate)?;
                }
                sink.end_row()?;
            }
        }

        // Part two: the enumeration itself, one stream per step.
        info!(count = self.enumerated_count, "enumerating key candidates");
        let enumerated_count = self.enumerated_count;
        let per_step: Vec<Vec<RankedKey>> =
            parallel::parallel_map(0..scores.len(), Some("key enumeration"), |step_index| {
                let mut enumerator = KeyEnumerator::new(&scores[step_index].1);
                let mut out = Vec::with_capacity(enumerated_count);
                enumerator.next_batch(&mut out, enumerated_count);
                out
            });

        sink.write_text("trace-count")?;
        sink.write_text("rank")?;
        sink.write_text("score")?;
        sink.write_text("keys/scores")?;
        sink.end_row()?;

        for (step_index, candidates) in per_step.iter().enumerate() {
            // Rank and score of the true key within the enumerated prefix.
            let mut rank = 0u64;
            let mut true_score = f64::NAN;
            for candidate in candidates {
                rank += 1;
                if candidate.bytes == self.key {
                    true_score = candidate.score;
                    break;
                }
            }

            sink.write_value(&scores[step_index].0)?;
            sink.write_value(&rank)?;
            sink.write_value(&true_score)?;

            if candidates.len() < self.output_count {
                warn!(
                    enumerated = candidates.len(),
                    requested = self.output_count,
                    "NaN scores shortened the enumerated stream"
                );
            }
            for candidate in candidates.iter().take(self.output_count) {
                sink.write_text(&hex::encode(&candidate.bytes))?;
                sink.write_value(&candidate.score)?;
            }
            sink.end_row()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgValue;
    use crate::metrics::tests_support::{leaky_dataset, render_metric};

    fn enumeration_args(key: u8, enumerated: u32, output: u32) -> ArgBag {
        let mut args = ArgBag::new();
        args.set(names::DATASET, ArgValue::Dataset(leaky_dataset(768, key, 71)));
        args.set(names::SCORE, ArgValue::Str("cpa".into()));
        args.set(names::DISTINGUISHER, ArgValue::Str("pearson".into()));
        args.set(names::MODEL, ArgValue::Str("hamming_weight".into()));
        args.set(names::ENUMERATED_KEY_COUNT, ArgValue::U32(enumerated));
        args.set(names::OUTPUT_KEY_COUNT, ArgValue::U32(output));
        args
    }

    #[test]
    fn true_key_is_enumerated_first_on_a_leaky_dataset() {
        let key = 0x2a;
        let mut metric = KeyEnumerationMetric::default();
        metric.init(&enumeration_args(key, 16, 4)).unwrap();
        let text = render_metric(&mut metric);
        let lines: Vec<&str> = text.lines().collect();

        // Score dump: header + one row for the single key byte, then the
        // enumeration header and one result row.
        assert!(lines[0].starts_with("\"trace-count\",\"keyByte\","));
        assert!(lines[1].starts_with("768,0,"));
        assert!(lines[2].starts_with("\"trace-count\",\"rank\",\"score\","));

        let result: Vec<&str> = lines[3].split(',').collect();
        assert_eq!(result[0], "768");
        assert_eq!(result[1], "1", "true key not ranked first: {}", lines[3]);
        // First enumerated key is the true key as hex.
        assert_eq!(result[3], format!("\"{:02x}\"", key));
    }

    #[test]
    fn output_count_cannot_exceed_enumerated_count() {
        let mut metric = KeyEnumerationMetric::default();
        assert!(matches!(
            metric.init(&enumeration_args(0x11, 4, 8)),
            Err(Error::InvalidArgument(_))
        ));
    }
}
