//! Argument bags
//!
//! Every plugin is configured through an [`ArgBag`]: a string-keyed
//! heterogeneous map with typed accessors. A metric's initializer and all
//! the sub-plugins it constructs read from the **same** bag, so one bag
//! describes one complete pipeline invocation.
//!
//! Accessors come in two flavors:
//! - `*_opt` returns `Ok(None)` when the key is absent and
//!   `Err(InvalidArgument)` when it is present with the wrong type;
//! - `*_required` additionally turns absence into `Err(MissingArgument)`.
//!
//! The canonical key names are collected in [`names`]; plugins never invent
//! ad-hoc key strings.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use crate::dataset::TraceDataset;
use crate::error::{Error, Result};

/// Canonical argument key names.
///
/// The string values are the exact spellings the shell grammar uses; the
/// constant names are the concepts the library documents.
pub mod names {
    pub const SAMPLE_START: &str = "start";
    pub const SAMPLE_END: &str = "end";
    pub const SAMPLE_TUPLE: &str = "start:end";
    pub const DATASET: &str = "dataset";
    pub const MODEL: &str = "model";
    pub const DISTINGUISHER: &str = "distinguisher";
    pub const PROFILER: &str = "profiler";
    pub const SCORE: &str = "score";
    pub const TRACE_COUNT: &str = "traces";
    pub const TRACE_STEP: &str = "step";
    pub const BYTE_INDEX: &str = "byte";
    pub const KNOWN_KEY: &str = "key";
    pub const OUTPUT_FILE: &str = "out";
    pub const ORDER: &str = "order";
    pub const SIGMA: &str = "sigma";
    pub const INTEGRATION_LOWER_BOUND: &str = "lower";
    pub const INTEGRATION_UPPER_BOUND: &str = "upper";
    pub const INTEGRATION_SAMPLE_COUNT: &str = "samples";
    pub const TRAINING_DATASET: &str = "training";
    pub const TESTING_DATASET: &str = "testing";
    pub const FIXED_DATASET: &str = "fixed";
    pub const RANDOM_DATASET: &str = "random";
    pub const ENUMERATED_KEY_COUNT: &str = "enumerated-key-count";
    pub const OUTPUT_KEY_COUNT: &str = "output-key-count";
    pub const SAMPLE_FILTER: &str = "sample-filter";
    pub const SUBKEY: &str = "subkey";
    pub const BIN_SIZE: &str = "bin-size";
}

/// One tagged value inside an [`ArgBag`].
#[derive(Clone)]
pub enum ArgValue {
    U8(u8),
    I32(i32),
    U32(u32),
    Bool(bool),
    F64(f64),
    Str(String),
    Dataset(Arc<TraceDataset>),
    TupleU32(u32, u32),
    Bag(ArgBag),
}

impl ArgValue {
    fn type_name(&self) -> &'static str {
        match self {
            ArgValue::U8(_) => "u8",
            ArgValue::I32(_) => "i32",
            ArgValue::U32(_) => "u32",
            ArgValue::Bool(_) => "bool",
            ArgValue::F64(_) => "f64",
            ArgValue::Str(_) => "string",
            ArgValue::Dataset(_) => "dataset",
            ArgValue::TupleU32(_, _) => "(u32, u32)",
            ArgValue::Bag(_) => "argument bag",
        }
    }
}

/// String-keyed heterogeneous argument map.
#[derive(Clone, Default)]
pub struct ArgBag {
    values: HashMap<String, ArgValue>,
}

macro_rules! typed_accessors {
    ($opt:ident, $required:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $opt(&self, name: &str) -> Result<Option<$ty>> {
            match self.values.get(name) {
                None => Ok(None),
                Some(ArgValue::$variant(v)) => Ok(Some(v.clone())),
                Some(other) => Err(Error::InvalidArgument(format!(
                    "argument `{name}` has type {}, expected {}",
                    other.type_name(),
                    $expected
                ))),
            }
        }

        pub fn $required(&self, name: &'static str) -> Result<$ty> {
            self.$opt(name)?.ok_or(Error::MissingArgument(name))
        }
    };
}

impl ArgBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn set(&mut self, name: impl Into<String>, value: ArgValue) {
        self.values.insert(name.into(), value);
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    typed_accessors!(u8_opt, u8_required, U8, u8, "u8");
    typed_accessors!(i32_opt, i32_required, I32, i32, "i32");
    typed_accessors!(u32_opt, u32_required, U32, u32, "u32");
    typed_accessors!(bool_opt, bool_required, Bool, bool, "bool");
    typed_accessors!(f64_opt, f64_required, F64, f64, "f64");
    typed_accessors!(str_opt, str_required, Str, String, "string");
    typed_accessors!(dataset_opt, dataset_required, Dataset, Arc<TraceDataset>, "dataset");
    typed_accessors!(bag_opt, bag_required, Bag, ArgBag, "argument bag");

    pub fn tuple_u32_opt(&self, name: &str) -> Result<Option<(u32, u32)>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ArgValue::TupleU32(a, b)) => Ok(Some((*a, *b))),
            Some(other) => Err(Error::InvalidArgument(format!(
                "argument `{name}` has type {}, expected (u32, u32)",
                other.type_name()
            ))),
        }
    }

    pub fn tuple_u32_required(&self, name: &'static str) -> Result<(u32, u32)> {
        self.tuple_u32_opt(name)?.ok_or(Error::MissingArgument(name))
    }
}
