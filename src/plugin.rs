//! Plugin factory
//!
//! All analysis components are plugins: constructed by name from a
//! process-wide registry, configured through an argument bag, composed
//! recursively (a metric constructs its score engine, which constructs its
//! power model, all from the same bag).
//!
//! Polymorphism is closed over the six known kinds — each kind has its own
//! trait and its own `name → constructor` table, so a lookup can never hand
//! back the wrong trait object. The registry is populated once with the
//! built-in plugins on first access and read-only afterwards; external
//! callers compose additional registries by value if they need private
//! plugin sets.
//!
//! `construct_*` builds a fresh instance, runs its `init(args)`, and
//! returns it — an unknown name yields `UnknownPlugin`, a failed
//! initialization propagates the plugin's own error.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::args::ArgBag;
use crate::dataset::TraceDataset;
use crate::distinguisher::{Distinguisher, PearsonDistinguisher};
use crate::error::{Error, Result};
use crate::metrics::{
    GuessMetric, GuessingEntropyMetric, KeyEnumerationMetric, Metric, MiMetric, PiMetric,
    RankMetric, ScoreMetric, SuccessRateMetric, TTestMetric,
};
use crate::model::{HammingDistanceModel, HammingWeightModel, IdentityModel, PowerModel};
use crate::profiler::{Profiler, StandardProfiler};
use crate::scores::{CpaScore, LegacyBayesianScore, ScoreEngine, TemplateAttackScore};

/// The kinds of plugins the factory can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Loader,
    PowerModel,
    Profiler,
    Distinguisher,
    Metric,
    Score,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginKind::Loader => "loader",
            PluginKind::PowerModel => "model",
            PluginKind::Profiler => "profiler",
            PluginKind::Distinguisher => "distinguisher",
            PluginKind::Metric => "metric",
            PluginKind::Score => "score",
        };
        f.write_str(name)
    }
}

/// A dataset loader plugin.
pub trait Loader {
    fn init(&mut self, args: &ArgBag) -> Result<()>;
    fn load(&self, path: &Path) -> Result<Arc<TraceDataset>>;
}

/// Built-in loader for the native binary dataset format.
#[derive(Default)]
pub struct BinLoader;

impl Loader for BinLoader {
    fn init(&mut self, _args: &ArgBag) -> Result<()> {
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Arc<TraceDataset>> {
        TraceDataset::load(path)
    }
}

macro_rules! plugin_table {
    ($field:ident, $trait_object:ty, $register:ident, $construct:ident, $kind:expr) => {
        pub fn $register(&mut self, name: &'static str, constructor: fn() -> $trait_object) {
            self.$field.insert(name, constructor);
        }

        /// Construct and initialize a plugin of this kind by name.
        pub fn $construct(&self, name: &str, args: &ArgBag) -> Result<$trait_object> {
            let constructor = self
                .$field
                .get(name)
                .ok_or_else(|| Error::UnknownPlugin(format!("{}/{}", $kind, name)))?;
            let mut plugin = constructor();
            plugin.init(args)?;
            Ok(plugin)
        }
    };
}

/// Per-kind constructor tables.
#[derive(Default)]
pub struct PluginRegistry {
    loaders: HashMap<&'static str, fn() -> Box<dyn Loader>>,
    power_models: HashMap<&'static str, fn() -> Box<dyn PowerModel>>,
    profilers: HashMap<&'static str, fn() -> Box<dyn Profiler>>,
    distinguishers: HashMap<&'static str, fn() -> Box<dyn Distinguisher>>,
    metrics: HashMap<&'static str, fn() -> Box<dyn Metric>>,
    scores: HashMap<&'static str, fn() -> Box<dyn ScoreEngine>>,
}

impl PluginRegistry {
    plugin_table!(loaders, Box<dyn Loader>, register_loader, construct_loader, PluginKind::Loader);
    plugin_table!(
        power_models,
        Box<dyn PowerModel>,
        register_power_model,
        construct_power_model,
        PluginKind::PowerModel
    );
    plugin_table!(
        profilers,
        Box<dyn Profiler>,
        register_profiler,
        construct_profiler,
        PluginKind::Profiler
    );
    plugin_table!(
        distinguishers,
        Box<dyn Distinguisher>,
        register_distinguisher,
        construct_distinguisher,
        PluginKind::Distinguisher
    );
    plugin_table!(metrics, Box<dyn Metric>, register_metric, construct_metric, PluginKind::Metric);
    plugin_table!(scores, Box<dyn ScoreEngine>, register_score, construct_score, PluginKind::Score);

    /// Registered names of one kind, sorted for stable display.
    pub fn names(&self, kind: PluginKind) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = match kind {
            PluginKind::Loader => self.loaders.keys().copied().collect(),
            PluginKind::PowerModel => self.power_models.keys().copied().collect(),
            PluginKind::Profiler => self.profilers.keys().copied().collect(),
            PluginKind::Distinguisher => self.distinguishers.keys().copied().collect(),
            PluginKind::Metric => self.metrics.keys().copied().collect(),
            PluginKind::Score => self.scores.keys().copied().collect(),
        };
        names.sort_unstable();
        names
    }

    /// A registry pre-populated with every built-in plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();

        registry.register_loader("bin", || Box::<BinLoader>::default());

        registry.register_power_model("hamming_weight", || Box::<HammingWeightModel>::default());
        registry
            .register_power_model("hamming_distance", || Box::<HammingDistanceModel>::default());
        registry.register_power_model("identity", || Box::<IdentityModel>::default());

        registry.register_profiler("standard", || Box::<StandardProfiler>::default());

        registry.register_distinguisher("pearson", || Box::<PearsonDistinguisher>::default());

        registry.register_score("cpa", || Box::<CpaScore>::default());
        registry.register_score("bayesian", || Box::<TemplateAttackScore>::default());
        registry.register_score("old_bayesian", || Box::<LegacyBayesianScore>::default());

        registry.register_metric("score", || Box::<ScoreMetric>::default());
        registry.register_metric("guess", || Box::<GuessMetric>::default());
        registry.register_metric("rank", || Box::<RankMetric>::default());
        registry.register_metric("guessing_entropy", || Box::<GuessingEntropyMetric>::default());
        registry.register_metric("success_rate", || Box::<SuccessRateMetric>::default());
        registry.register_metric("ttest", || Box::<TTestMetric>::default());
        registry.register_metric("mi", || Box::<MiMetric>::default());
        registry.register_metric("pi", || Box::<PiMetric>::default());
        registry.register_metric("key_enumeration", || Box::<KeyEnumerationMetric>::default());

        registry
    }
}

/// The process-wide registry, built on first use and read-only afterwards.
pub fn registry() -> &'static PluginRegistry {
    static REGISTRY: OnceLock<PluginRegistry> = OnceLock::new();
    REGISTRY.get_or_init(PluginRegistry::with_builtins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{names, ArgValue};
    use crate::dataset::{EncryptionAlgorithm, PlaintextMode, TraceDatasetBuilder};

    fn dataset_args() -> ArgBag {
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Fixed);
        builder.num_traces = 2;
        builder.num_samples = 1;
        builder.add_trace(&[1]);
        builder.add_trace(&[2]);
        builder.add_plaintext(&[0x00]);
        builder.add_key(&[0x00]);
        let mut args = ArgBag::new();
        args.set(names::DATASET, ArgValue::Dataset(builder.build().unwrap()));
        args
    }

    #[test]
    fn builtin_names_are_registered_per_kind() {
        let registry = registry();
        assert_eq!(registry.names(PluginKind::Distinguisher), vec!["pearson"]);
        assert_eq!(
            registry.names(PluginKind::PowerModel),
            vec!["hamming_distance", "hamming_weight", "identity"]
        );
        assert_eq!(registry.names(PluginKind::Score), vec!["bayesian", "cpa", "old_bayesian"]);
        assert_eq!(registry.names(PluginKind::Loader), vec!["bin"]);
        assert_eq!(registry.names(PluginKind::Metric).len(), 9);
    }

    #[test]
    fn constructed_plugins_are_initialized() {
        let model = registry().construct_power_model("hamming_weight", &dataset_args()).unwrap();
        let matrix = model.compute().unwrap();
        assert_eq!(matrix.height(), 256);
        assert_eq!(matrix.width(), 2);
    }

    #[test]
    fn unknown_names_are_reported_with_their_kind() {
        let err = registry().construct_power_model("nonexistent", &ArgBag::new()).unwrap_err();
        match err {
            Error::UnknownPlugin(name) => assert_eq!(name, "model/nonexistent"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn failed_init_propagates_the_plugin_error() {
        // Missing dataset argument.
        let err = registry().construct_power_model("identity", &ArgBag::new()).unwrap_err();
        assert!(matches!(err, Error::MissingArgument(names::DATASET)));
    }
}
