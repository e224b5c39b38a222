//! Metrics
//!
//! A metric is the outward-facing unit of computation: it owns a pipeline
//! of sub-plugins (distinguisher → model, score engine, profiler), pulls
//! data through it, and emits a CSV-style table through a [`RowSink`]: one
//! header row of column names, then one row per trace-count step.
//!
//! Metrics never open files themselves; [`run`] constructs the metric from
//! an argument bag, opens the sink on the bag's output path and drives the
//! computation. Tests drive [`Metric::compute`] against in-memory sinks.

#![forbid(unsafe_code)]

pub mod guess;
pub mod guessing_entropy;
pub mod key_enumeration;
pub mod mi;
pub mod pi;
pub mod rank;
pub mod score;
pub mod success_rate;
pub mod ttest;

pub use guess::GuessMetric;
pub use guessing_entropy::GuessingEntropyMetric;
pub use key_enumeration::KeyEnumerationMetric;
pub use mi::MiMetric;
pub use pi::PiMetric;
pub use rank::RankMetric;
pub use score::ScoreMetric;
pub use success_rate::SuccessRateMetric;
pub use ttest::TTestMetric;

use std::path::Path;
use std::sync::Arc;

use crate::args::{names, ArgBag};
use crate::dataset::TraceDataset;
use crate::distinguisher::Distinguisher;
use crate::error::Result;
use crate::matrix::Matrix;
use crate::numerics;
use crate::plugin;
use crate::sink::{CsvSink, RowSink};
use crate::KEY_CLASSES;

/// A metric plugin.
pub trait Metric {
    fn init(&mut self, args: &ArgBag) -> Result<()>;
    fn compute(&mut self, sink: &mut dyn RowSink) -> Result<()>;
}

/// Construct metric `name` from `args`, open the CSV sink on the bag's
/// output path, and run the computation.
pub fn run(name: &str, args: &ArgBag, separator: char) -> Result<()> {
    let mut metric = plugin::registry().construct_metric(name, args)?;
    let output = args.str_required(names::OUTPUT_FILE)?;
    let mut sink = CsvSink::create(Path::new(&output), separator)?;
    metric.compute(&mut sink)?;
    sink.flush()
}

// ============================================================================
// Shared distinguisher-driven base
// ============================================================================

/// Dataset plus distinguisher, the common substrate of the ordering metrics
/// (score, guess, rank, guessing entropy, success rate).
pub(crate) struct BasicMetric {
    pub dataset: Arc<TraceDataset>,
    pub distinguisher: Box<dyn Distinguisher>,
}

impl BasicMetric {
    pub fn from_args(args: &ArgBag) -> Result<Self> {
        let dataset = args.dataset_required(names::DATASET)?;
        let name = args.str_required(names::DISTINGUISHER)?;
        let distinguisher = plugin::registry().construct_distinguisher(&name, args)?;
        Ok(Self { dataset, distinguisher })
    }
}

// ============================================================================
// Ordering helpers
// ============================================================================

/// Row-wise maxima of one step's `256 × window` correlation matrix.
pub(crate) fn max_scores(matrix: &Matrix<f64>) -> [f64; KEY_CLASSES] {
    let mut out = [0.0; KEY_CLASSES];
    for (k, slot) in out.iter_mut().enumerate() {
        *slot = numerics::max(matrix.row(k));
    }
    out
}

/// Keys sorted by descending score. Stable: equal scores keep ascending key
/// order, NaN scores sort past every finite score.
pub(crate) fn sort_keys_by_score_desc(scores: &[f64; KEY_CLASSES]) -> Vec<(u32, f64)> {
    let mut order: Vec<(u32, f64)> =
        scores.iter().enumerate().map(|(k, &s)| (k as u32, s)).collect();
    order.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal),
    });
    order
}

/// 1-based rank of every key given the descending order.
pub(crate) fn ranks(order: &[(u32, f64)]) -> [u32; KEY_CLASSES] {
    let mut out = [0u32; KEY_CLASSES];
    for (position, &(key, _)) in order.iter().enumerate() {
        out[key as usize] = position as u32 + 1;
    }
    out
}

// ============================================================================
// Test fixtures shared by the metric modules
// ============================================================================
