//! Crate root: public surface and toolkit-wide conventions
//!
//! `mysca` is a side-channel analysis toolkit: given power/EM traces
//! captured from a device running a known algorithm (single-byte S-Box or
//! AES-128), it quantifies how much of the secret key leaks and how fast an
//! adversary recovers it — Pearson CPA, Welch t-tests, gaussian template
//! attacks, MI/PI estimation, and ordered enumeration of the full key
//! space up to a cap.
//!
//! ## Architecture
//!
//! - **Datasets are immutable and shared.** A [`dataset::TraceDataset`] is
//!   built once (builder or binary loader), derives its ciphertexts at
//!   construction, and is only ever handed out as an `Arc`. No interior
//!   mutability anywhere; we **forbid unsafe** throughout the crate.
//!
//! - **Everything is a plugin.** Power models, distinguishers, profilers,
//!   score engines, metrics and loaders are constructed by name from the
//!   [`plugin::registry`] and configured through one [`args::ArgBag`] per
//!   invocation; a metric recursively constructs its sub-plugins from the
//!   same bag. The front-end only ever populates bags.
//!
//! - **Fail fast, degrade numerically.** Every fallible operation returns
//!   [`Result`] with a kind from the closed [`Error`] taxonomy. Numerical
//!   degeneracy (constant model columns, rank-deficient covariance) is not
//!   an error: it produces NaN plus a one-shot warning, and every ranking
//!   treats NaN as the worst possible score.
//!
//! - **Synchronous with opt-in data parallelism.** Metric computation runs
//!   on the caller thread and dispatches [`parallel`] regions internally;
//!   sinks are written from the caller thread only.

#![forbid(unsafe_code)]

/// Heterogeneous argument bags and the canonical key names.
pub mod args;
/// S-Box/AES reference tables and block encryption.
pub mod crypto;
/// Trace datasets: builder, derived ciphertexts, split, binary format.
pub mod dataset;
/// Pearson CPA over step-indexed trace prefixes.
pub mod distinguisher;
/// Lazy ordered merge of per-byte scores into full-key candidates.
pub mod enumerate;
/// The crate-wide error taxonomy.
pub mod error;
/// Dense 2-D matrices with Cholesky machinery and file persistence.
pub mod matrix;
/// Outward-facing metrics and their CSV emission.
pub mod metrics;
/// Leakage models (Hamming weight/distance, identity).
pub mod model;
/// Statistical kernel: moments, correlation, quadrature, ranges.
pub mod numerics;
/// Fork-join parallel driver with atomic work claiming.
pub mod parallel;
/// The plugin registry.
pub mod plugin;
/// Known-key gaussian profilers.
pub mod profiler;
/// Score engines: CPA reduction, template attack, legacy Bayesian.
pub mod scores;
/// Row-oriented output sinks.
pub mod sink;

pub use crate::error::{Error, Result};

/// Number of candidate values of one key byte; every per-byte score or
/// model table is indexed by all 256 hypotheses.
pub const KEY_CLASSES: usize = 256;
