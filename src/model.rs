//! Power models
//!
//! A power model maps `(trace, key hypothesis)` to the leakage an attacker
//! expects the device to produce, for one target key byte. The output is a
//! `256 × T` integer matrix: row `k` is the modeled leakage of every trace
//! under key hypothesis `k`.
//!
//! Models are stateful in `(dataset, byte_index)`, both set before
//! [`PowerModel::compute`] is invoked — score engines re-target the same
//! model instance across key bytes and across profiling/attack datasets.
//!
//! Per algorithm the models are:
//!
//! | model | single-byte S-Box | AES-128 |
//! |---|---|---|
//! | hamming_weight | `HW(S(p[b] ⊕ k))` | `HW(S⁻¹(k ⊕ c[b]))` |
//! | hamming_distance | `HD(S(0), S(p[b] ⊕ k))` | `HD(c[SR(b)], S⁻¹(k ⊕ c[b]))` |
//! | identity | `c[0]` (degenerate, kept for symmetry) | `S⁻¹(k ⊕ c[b])` |
//!
//! The AES-128 variants model the last round from the ciphertext side, so a
//! "key hypothesis" there is a last-round-key byte.

#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::args::{names, ArgBag};
use crate::crypto;
use crate::dataset::{EncryptionAlgorithm, TraceDataset};
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::KEY_CLASSES;

/// A leakage model plugin.
pub trait PowerModel {
    fn init(&mut self, args: &ArgBag) -> Result<()>;
    /// Re-target the model at another dataset (profiling vs. attack).
    fn set_dataset(&mut self, dataset: Arc<TraceDataset>);
    /// Select the key byte the model describes.
    fn set_byte_index(&mut self, byte_index: usize);
    /// Modeled leakage, `256 × num_traces`.
    fn compute(&self) -> Result<Matrix<i32>>;
}

impl std::fmt::Debug for dyn PowerModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn PowerModel")
    }
}

/// State shared by every model implementation.
#[derive(Default)]
struct ModelState {
    dataset: Option<Arc<TraceDataset>>,
    byte_index: usize,
}

impl ModelState {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.dataset = Some(args.dataset_required(names::DATASET)?);
        self.byte_index = args.u32_opt(names::BYTE_INDEX)?.unwrap_or(0) as usize;
        Ok(())
    }

    /// Dataset plus a validated byte index.
    fn target(&self) -> Result<(&Arc<TraceDataset>, usize)> {
        let dataset = self
            .dataset
            .as_ref()
            .ok_or(Error::MissingArgument(names::DATASET))?;
        let width = dataset.header().plaintext_size as usize;
        if self.byte_index >= width {
            return Err(Error::InvalidArgument(format!(
                "byte index {} outside plaintext width {width}",
                self.byte_index
            )));
        }
        Ok((dataset, self.byte_index))
    }
}

/// Fill one model matrix from a per-(trace, hypothesis) closure.
fn fill_model(
    dataset: &TraceDataset,
    mut leakage: impl FnMut(usize, u8) -> i32,
) -> Matrix<i32> {
    let traces = dataset.header().num_traces as usize;
    let mut out = Matrix::new(traces, KEY_CLASSES);
    for k in 0..KEY_CLASSES {
        let row = out.row_mut(k);
        for (t, slot) in row.iter_mut().enumerate() {
            *slot = leakage(t, k as u8);
        }
    }
    out
}

// ============================================================================
// Hamming weight
// ============================================================================

/// Hamming weight of the targeted intermediate value.
#[derive(Default)]
pub struct HammingWeightModel {
    state: ModelState,
}

impl PowerModel for HammingWeightModel {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.state.init(args)
    }

    fn set_dataset(&mut self, dataset: Arc<TraceDataset>) {
        self.state.dataset = Some(dataset);
    }

    fn set_byte_index(&mut self, byte_index: usize) {
        self.state.byte_index = byte_index;
    }

    fn compute(&self) -> Result<Matrix<i32>> {
        let (dataset, byte) = self.state.target()?;
        match dataset.header().algorithm {
            EncryptionAlgorithm::SBox => Ok(fill_model(dataset, |t, k| {
                crypto::hamming_weight(crypto::sbox(dataset.plaintext(t)[byte] ^ k))
            })),
            EncryptionAlgorithm::Aes128 => Ok(fill_model(dataset, |t, k| {
                crypto::hamming_weight(crypto::sbox_inverse(k ^ dataset.ciphertext(t)[byte]))
            })),
            EncryptionAlgorithm::Unknown => Err(unsupported("hamming_weight")),
        }
    }
}

// ============================================================================
// Hamming distance
// ============================================================================

/// Hamming distance between the targeted intermediate and the value it
/// overwrites.
#[derive(Default)]
pub struct HammingDistanceModel {
    state: ModelState,
}

impl PowerModel for HammingDistanceModel {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.state.init(args)
    }

    fn set_dataset(&mut self, dataset: Arc<TraceDataset>) {
        self.state.dataset = Some(dataset);
    }

    fn set_byte_index(&mut self, byte_index: usize) {
        self.state.byte_index = byte_index;
    }

    fn compute(&self) -> Result<Matrix<i32>> {
        let (dataset, byte) = self.state.target()?;
        match dataset.header().algorithm {
            EncryptionAlgorithm::SBox => {
                let reference = crypto::sbox(0);
                Ok(fill_model(dataset, |t, k| {
                    crypto::hamming_distance(
                        reference,
                        crypto::sbox(dataset.plaintext(t)[byte] ^ k),
                    )
                }))
            }
            EncryptionAlgorithm::Aes128 => {
                let shifted = crypto::shift_row_index(byte);
                Ok(fill_model(dataset, |t, k| {
                    crypto::hamming_distance(
                        dataset.ciphertext(t)[shifted],
                        crypto::sbox_inverse(k ^ dataset.ciphertext(t)[byte]),
                    )
                }))
            }
            EncryptionAlgorithm::Unknown => Err(unsupported("hamming_distance")),
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// The raw intermediate value itself (no leakage assumption).
#[derive(Default)]
pub struct IdentityModel {
    state: ModelState,
}

impl PowerModel for IdentityModel {
    fn init(&mut self, args: &ArgBag) -> Result<()> {
        self.state.init(args)
    }

    fn set_dataset(&mut self, dataset: Arc<TraceDataset>) {
        self.state.dataset = Some(dataset);
    }

    fn set_byte_index(&mut self, byte_index: usize) {
        self.state.byte_index = byte_index;
    }

    fn compute(&self) -> Result<Matrix<i32>> {
        let (dataset, byte) = self.state.target()?;
        match dataset.header().algorithm {
            // Degenerate on the single-byte target: the ciphertext byte does
            // not depend on the hypothesis.
            EncryptionAlgorithm::SBox => {
                Ok(fill_model(dataset, |t, _| i32::from(dataset.ciphertext(t)[0])))
            }
            EncryptionAlgorithm::Aes128 => Ok(fill_model(dataset, |t, k| {
                i32::from(crypto::sbox_inverse(k ^ dataset.ciphertext(t)[byte]))
            })),
            EncryptionAlgorithm::Unknown => Err(unsupported("identity")),
        }
    }
}

fn unsupported(model: &str) -> Error {
    Error::UnsupportedOperation(format!(
        "model `{model}` has no mapping for the dataset's algorithm"
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{PlaintextMode, TraceDatasetBuilder};

    fn sbox_dataset(plaintexts: &[u8], key: u8) -> Arc<TraceDataset> {
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Random);
        builder.num_traces = plaintexts.len() as u32;
        builder.num_samples = 1;
        for &p in plaintexts {
            builder.add_trace(&[0]);
            builder.add_plaintext(&[p]);
        }
        builder.add_key(&[key]);
        builder.build().unwrap()
    }

    fn aes_dataset(trace_count: usize) -> Arc<TraceDataset> {
        let mut builder =
            TraceDatasetBuilder::new(EncryptionAlgorithm::Aes128, PlaintextMode::Random);
        builder.num_traces = trace_count as u32;
        builder.num_samples = 1;
        for t in 0..trace_count {
            builder.add_trace(&[0]);
            let plaintext: Vec<u8> = (0..16).map(|i| (t * 16 + i) as u8).collect();
            builder.add_plaintext(&plaintext);
        }
        builder.add_key(&[0x3cu8; 16]);
        builder.build().unwrap()
    }

    fn model_with(dataset: Arc<TraceDataset>, byte: usize, mut model: impl PowerModel) -> Matrix<i32> {
        model.set_dataset(dataset);
        model.set_byte_index(byte);
        model.compute().unwrap()
    }

    #[test]
    fn hamming_weight_sbox_matches_direct_evaluation() {
        let plaintexts = [0x00, 0x2a, 0xff, 0x13];
        let ds = sbox_dataset(&plaintexts, 0x2a);
        let out = model_with(ds, 0, HammingWeightModel::default());
        assert_eq!(out.height(), 256);
        assert_eq!(out.width(), 4);
        for k in 0..256usize {
            for (t, &p) in plaintexts.iter().enumerate() {
                let expected = crypto::hamming_weight(crypto::sbox(p ^ k as u8));
                assert_eq!(out.get(k, t), expected);
            }
        }
    }

    #[test]
    fn hamming_weight_aes_targets_the_ciphertext() {
        let ds = aes_dataset(3);
        let byte = 5;
        let out = model_with(ds.clone(), byte, HammingWeightModel::default());
        for k in 0..256usize {
            for t in 0..3 {
                let expected = crypto::hamming_weight(crypto::sbox_inverse(
                    k as u8 ^ ds.ciphertext(t)[byte],
                ));
                assert_eq!(out.get(k, t), expected);
            }
        }
    }

    #[test]
    fn hamming_distance_sbox_references_sbox_of_zero() {
        let ds = sbox_dataset(&[0x01], 0x00);
        let out = model_with(ds, 0, HammingDistanceModel::default());
        let expected = crypto::hamming_distance(crypto::sbox(0), crypto::sbox(0x01));
        assert_eq!(out.get(0, 0), expected);
    }

    #[test]
    fn hamming_distance_aes_uses_shifted_ciphertext_byte() {
        let ds = aes_dataset(2);
        let byte = 7;
        let out = model_with(ds.clone(), byte, HammingDistanceModel::default());
        let shifted = crypto::shift_row_index(byte);
        for t in 0..2 {
            let expected = crypto::hamming_distance(
                ds.ciphertext(t)[shifted],
                crypto::sbox_inverse(0x42 ^ ds.ciphertext(t)[byte]),
            );
            assert_eq!(out.get(0x42, t), expected);
        }
    }

    #[test]
    fn identity_sbox_is_constant_across_hypotheses() {
        let ds = sbox_dataset(&[0x10, 0x20], 0x2a);
        let out = model_with(ds.clone(), 0, IdentityModel::default());
        for t in 0..2 {
            let expected = i32::from(ds.ciphertext(t)[0]);
            for k in 0..256 {
                assert_eq!(out.get(k, t), expected);
            }
        }
    }

    #[test]
    fn identity_aes_inverts_the_last_round() {
        let ds = aes_dataset(1);
        let out = model_with(ds.clone(), 2, IdentityModel::default());
        let expected = i32::from(crypto::sbox_inverse(0x11 ^ ds.ciphertext(0)[2]));
        assert_eq!(out.get(0x11, 0), expected);
    }

    #[test]
    fn byte_index_out_of_range_is_rejected() {
        let ds = sbox_dataset(&[0x00], 0x00);
        let mut model = HammingWeightModel::default();
        model.set_dataset(ds);
        model.set_byte_index(1); // plaintext width is 1
        assert!(matches!(model.compute(), Err(Error::InvalidArgument(_))));
    }
}
