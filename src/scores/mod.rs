//! Score engines
//!
//! A score engine produces, for each trace-count step and each key byte, a
//! 256-vector of **log-scores** over the candidate values of that byte.
//! Higher is better; NaN means "no usable statement about this candidate"
//! and ranks below every finite score downstream.
//!
//! Three engines are provided:
//! - [`CpaScore`] reduces a Pearson distinguisher run to per-key log
//!   maxima (`cpa`);
//! - [`TemplateAttackScore`] is the Bayesian template attack with POI
//!   selection and Cholesky covariance inversion (`bayesian`);
//! - [`LegacyBayesianScore`] is the older grouped variant kept for
//!   comparison runs (`old_bayesian`).

#![forbid(unsafe_code)]

pub mod cpa;
pub mod legacy;
pub mod template;

pub use cpa::CpaScore;
pub use legacy::LegacyBayesianScore;
pub use template::TemplateAttackScore;

use crate::args::ArgBag;
use crate::error::Result;
use crate::KEY_CLASSES;

/// Per-byte score vectors for one step, indexed by key byte.
pub type ByteScores = Vec<[f64; KEY_CLASSES]>;

/// Step-indexed score output: `(trace_count, per-byte scores)`.
pub type ScoreSteps = Vec<(u32, ByteScores)>;

/// A score-engine plugin.
pub trait ScoreEngine {
    fn init(&mut self, args: &ArgBag) -> Result<()>;
    fn compute_scores(&mut self) -> Result<ScoreSteps>;
}
