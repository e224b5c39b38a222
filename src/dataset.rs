//! Trace datasets
//!
//! A [`TraceDataset`] owns everything one acquisition campaign produced: the
//! trace matrix, the plaintexts, the (fixed) key, and the ciphertexts
//! **derived** from plaintexts and key at construction time. Datasets are
//! built once — by [`TraceDatasetBuilder`] or by [`TraceDataset::load`] —
//! and immutable afterwards; every analysis component holds a read-only
//! `Arc` handle and there is no interior mutability anywhere.
//!
//! ## Storage layout
//! Traces are stored **column-major by sample index**: the trace matrix has
//! `num_samples` rows of `num_traces` columns, so row `s` holds sample `s`
//! of every trace. Scanning one sample across all traces is the dominant
//! access pattern of every statistical routine and becomes a contiguous
//! slice ([`TraceDataset::sample`]).
//!
//! ## Plaintext generation modes
//! - `Fixed`: one plaintext row shared by every trace.
//! - `Random`: one plaintext row per trace.
//! - `Chained`: one **seed** row; the remaining `T − 1` rows are derived by
//!   iterating the encryption primitive (`yₜ₊₁ = S(yₜ ⊕ k)` for the
//!   single-byte S-Box, `yₜ₊₁ = AES_k(yₜ)` for AES-128 with one expanded
//!   key schedule). A split breaks the chain, so split halves of a chained
//!   dataset are re-labeled `Random`.
//!
//! ## File format
//! Little-endian, a packed header (magic, resolutions, counts, modes)
//! followed by the plaintext rows (seed only for chained), the key row and
//! the raw sample-major trace matrix. Loading rejects a wrong magic with
//! `InvalidHeader` and regenerates chained plaintexts and all ciphertexts.

#![forbid(unsafe_code)]

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::crypto::{self, Aes128Key, AES128_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::matrix::Matrix;

/// Magic value at the start of every dataset file.
const DATASET_FILE_MAGIC: u64 = 0x7265_6461_6568_7364;

/// Encryption algorithm a dataset was captured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    Unknown,
    /// Single-byte S-Box target: `c = S(p ⊕ k)`.
    SBox,
    Aes128,
}

impl EncryptionAlgorithm {
    pub fn as_u32(self) -> u32 {
        match self {
            EncryptionAlgorithm::Unknown => 0,
            EncryptionAlgorithm::SBox => 1,
            EncryptionAlgorithm::Aes128 => 2,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(EncryptionAlgorithm::Unknown),
            1 => Ok(EncryptionAlgorithm::SBox),
            2 => Ok(EncryptionAlgorithm::Aes128),
            other => Err(Error::InvalidData(format!("unknown algorithm tag {other}"))),
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptionAlgorithm::Unknown => "unknown",
            EncryptionAlgorithm::SBox => "s-box",
            EncryptionAlgorithm::Aes128 => "aes-128",
        };
        f.write_str(name)
    }
}

/// How the plaintexts of a dataset were generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaintextMode {
    Unknown,
    Fixed,
    Random,
    Chained,
}

impl PlaintextMode {
    pub fn as_u32(self) -> u32 {
        match self {
            PlaintextMode::Unknown => 0,
            PlaintextMode::Fixed => 1,
            PlaintextMode::Random => 2,
            PlaintextMode::Chained => 3,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(PlaintextMode::Unknown),
            1 => Ok(PlaintextMode::Fixed),
            2 => Ok(PlaintextMode::Random),
            3 => Ok(PlaintextMode::Chained),
            other => Err(Error::InvalidData(format!("unknown plaintext mode tag {other}"))),
        }
    }
}

impl fmt::Display for PlaintextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaintextMode::Unknown => "unknown",
            PlaintextMode::Fixed => "fixed",
            PlaintextMode::Random => "random",
            PlaintextMode::Chained => "chained",
        };
        f.write_str(name)
    }
}

/// How the keys of a dataset were generated. Only a fixed key is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Unknown,
    Fixed,
}

impl KeyMode {
    pub fn as_u32(self) -> u32 {
        match self {
            KeyMode::Unknown => 0,
            KeyMode::Fixed => 1,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(KeyMode::Unknown),
            1 => Ok(KeyMode::Fixed),
            other => Err(Error::InvalidData(format!("unknown key mode tag {other}"))),
        }
    }
}

/// Dataset metadata, shared verbatim between memory and disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetHeader {
    /// Seconds between two samples.
    pub time_resolution: f64,
    /// Current resolution of the measurements.
    pub current_resolution: f64,
    pub num_traces: u32,
    pub num_samples: u32,
    pub algorithm: EncryptionAlgorithm,
    pub plaintext_mode: PlaintextMode,
    /// Plaintext width in bytes.
    pub plaintext_size: u32,
    pub key_mode: KeyMode,
    /// Key width in bytes.
    pub key_size: u32,
}

impl DatasetHeader {
    /// Number of distinct plaintext rows stored for this mode.
    fn plaintext_count(&self) -> usize {
        match self.plaintext_mode {
            PlaintextMode::Fixed => 1,
            _ => self.num_traces as usize,
        }
    }

    /// Number of plaintext rows present in a file (chained stores the seed).
    fn plaintext_rows_on_disk(&self) -> usize {
        match self.plaintext_mode {
            PlaintextMode::Random => self.num_traces as usize,
            _ => 1,
        }
    }
}

/// An immutable, shareable trace dataset.
pub struct TraceDataset {
    header: DatasetHeader,
    /// `num_samples × num_traces`, row `s` = sample `s` of every trace.
    traces: Matrix<i32>,
    /// `plaintext_count × plaintext_size`.
    plaintexts: Matrix<u8>,
    /// `1 × key_size`.
    keys: Matrix<u8>,
    /// `plaintext_count × plaintext_size`, derived at build time.
    ciphertexts: Matrix<u8>,
}

impl TraceDataset {
    pub fn header(&self) -> &DatasetHeader {
        &self.header
    }

    /// Sample `s` of every trace, contiguous.
    #[inline]
    pub fn sample(&self, sample: usize) -> &[i32] {
        self.traces.row(sample)
    }

    /// Plaintext of trace `t`.
    #[inline]
    pub fn plaintext(&self, trace: usize) -> &[u8] {
        match self.header.plaintext_mode {
            PlaintextMode::Fixed => self.plaintexts.row(0),
            _ => self.plaintexts.row(trace),
        }
    }

    /// Key of trace `t` (fixed, so the same row for every trace).
    #[inline]
    pub fn key(&self, _trace: usize) -> &[u8] {
        self.keys.row(0)
    }

    /// Ciphertext of trace `t`.
    #[inline]
    pub fn ciphertext(&self, trace: usize) -> &[u8] {
        match self.header.plaintext_mode {
            PlaintextMode::Fixed => self.ciphertexts.row(0),
            _ => self.ciphertexts.row(trace),
        }
    }

    /// Split into two datasets, the first owning the first `n` traces.
    ///
    /// Metadata is copied; plaintext and ciphertext rows are sliced by trace
    /// index for per-trace modes and duplicated for fixed mode. Chained
    /// halves degrade to `Random` because neither half can reconstruct the
    /// chain from a single seed.
    pub fn split(&self, n: u32) -> Result<(Arc<TraceDataset>, Arc<TraceDataset>)> {
        let total = self.header.num_traces;
        if n == 0 || n >= total {
            return Err(Error::InvalidArgument(format!(
                "split index {n} outside (0, {total})"
            )));
        }
        let samples = self.header.num_samples as usize;
        let width = self.header.plaintext_size as usize;
        let (n_usize, total_usize) = (n as usize, total as usize);

        let mut first_header = self.header;
        let mut second_header = self.header;
        first_header.num_traces = n;
        second_header.num_traces = total - n;

        let first_traces = self.traces.submatrix(0, 0, samples, n_usize);
        let second_traces = self.traces.submatrix(0, n_usize, samples, total_usize);

        let (first_pt, second_pt, first_ct, second_ct) = match self.header.plaintext_mode {
            PlaintextMode::Fixed => (
                self.plaintexts.clone(),
                self.plaintexts.clone(),
                self.ciphertexts.clone(),
                self.ciphertexts.clone(),
            ),
            PlaintextMode::Random | PlaintextMode::Chained => (
                self.plaintexts.submatrix(0, 0, n_usize, width),
                self.plaintexts.submatrix(n_usize, 0, total_usize, width),
                self.ciphertexts.submatrix(0, 0, n_usize, width),
                self.ciphertexts.submatrix(n_usize, 0, total_usize, width),
            ),
            PlaintextMode::Unknown => {
                return Err(Error::UnsupportedOperation(
                    "cannot split a dataset with unknown plaintext mode".into(),
                ))
            }
        };

        if self.header.plaintext_mode == PlaintextMode::Chained {
            first_header.plaintext_mode = PlaintextMode::Random;
            second_header.plaintext_mode = PlaintextMode::Random;
        }

        let first = TraceDataset {
            header: first_header,
            traces: first_traces,
            plaintexts: first_pt,
            keys: self.keys.clone(),
            ciphertexts: first_ct,
        };
        let second = TraceDataset {
            header: second_header,
            traces: second_traces,
            plaintexts: second_pt,
            keys: self.keys.clone(),
            ciphertexts: second_ct,
        };
        Ok((Arc::new(first), Arc::new(second)))
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write the dataset in the binary dataset format.
    ///
    /// Chained mode persists only the seed plaintext; the chain and all
    /// ciphertexts are regenerated on load.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        let h = &self.header;
        let mut header = Vec::with_capacity(52);
        header.extend_from_slice(&DATASET_FILE_MAGIC.to_le_bytes());
        header.extend_from_slice(&h.time_resolution.to_le_bytes());
        header.extend_from_slice(&h.current_resolution.to_le_bytes());
        header.extend_from_slice(&h.num_traces.to_le_bytes());
        header.extend_from_slice(&h.num_samples.to_le_bytes());
        header.extend_from_slice(&h.algorithm.as_u32().to_le_bytes());
        header.extend_from_slice(&h.plaintext_mode.as_u32().to_le_bytes());
        header.extend_from_slice(&h.plaintext_size.to_le_bytes());
        header.extend_from_slice(&h.key_mode.as_u32().to_le_bytes());
        header.extend_from_slice(&h.key_size.to_le_bytes());
        file.write_all(&header)?;

        for row in 0..h.plaintext_rows_on_disk() {
            file.write_all(self.plaintexts.row(row))?;
        }
        file.write_all(self.keys.row(0))?;

        let mut body = Vec::with_capacity(
            h.num_samples as usize * h.num_traces as usize * std::mem::size_of::<i32>(),
        );
        for s in 0..h.num_samples as usize {
            for value in self.traces.row(s) {
                body.extend_from_slice(&value.to_le_bytes());
            }
        }
        file.write_all(&body)?;
        Ok(())
    }

    /// Load a dataset from the binary dataset format.
    pub fn load(path: &Path) -> Result<Arc<TraceDataset>> {
        let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(path.display().to_string()),
            _ => Error::IoFailure(e),
        })?;

        let mut raw = [0u8; 52];
        file.read_exact(&mut raw)?;
        let magic = u64::from_le_bytes(raw[0..8].try_into().expect("header slice"));
        if magic != DATASET_FILE_MAGIC {
            return Err(Error::InvalidHeader);
        }
        let header = DatasetHeader {
            time_resolution: f64::from_le_bytes(raw[8..16].try_into().expect("header slice")),
            current_resolution: f64::from_le_bytes(raw[16..24].try_into().expect("header slice")),
            num_traces: u32::from_le_bytes(raw[24..28].try_into().expect("header slice")),
            num_samples: u32::from_le_bytes(raw[28..32].try_into().expect("header slice")),
            algorithm: EncryptionAlgorithm::from_u32(u32::from_le_bytes(
                raw[32..36].try_into().expect("header slice"),
            ))?,
            plaintext_mode: PlaintextMode::from_u32(u32::from_le_bytes(
                raw[36..40].try_into().expect("header slice"),
            ))?,
            plaintext_size: u32::from_le_bytes(raw[40..44].try_into().expect("header slice")),
            key_mode: KeyMode::from_u32(u32::from_le_bytes(
                raw[44..48].try_into().expect("header slice"),
            ))?,
            key_size: u32::from_le_bytes(raw[48..52].try_into().expect("header slice")),
        };

        if header.plaintext_mode == PlaintextMode::Unknown {
            return Err(Error::InvalidData("dataset has unknown plaintext mode".into()));
        }
        if header.key_mode != KeyMode::Fixed {
            return Err(Error::InvalidData("only fixed-key datasets are supported".into()));
        }

        let width = header.plaintext_size as usize;
        let mut plaintexts = Matrix::new(width, header.plaintext_count());
        let mut row = vec![0u8; width];
        for r in 0..header.plaintext_rows_on_disk() {
            file.read_exact(&mut row)?;
            plaintexts.set_row(r, &row);
        }

        let mut keys = Matrix::new(header.key_size as usize, 1);
        let mut key_row = vec![0u8; header.key_size as usize];
        file.read_exact(&mut key_row)?;
        keys.set_row(0, &key_row);

        let samples = header.num_samples as usize;
        let trace_count = header.num_traces as usize;
        let mut traces = Matrix::new(trace_count, samples);
        let mut body = vec![0u8; trace_count * std::mem::size_of::<i32>()];
        for s in 0..samples {
            file.read_exact(&mut body)?;
            let decoded: Vec<i32> = body
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes(c.try_into().expect("i32 chunk")))
                .collect();
            traces.set_row(s, &decoded);
        }

        let mut dataset = TraceDataset {
            header,
            traces,
            plaintexts,
            keys,
            ciphertexts: Matrix::new(width, header.plaintext_count()),
        };
        if header.plaintext_mode == PlaintextMode::Chained {
            dataset.generate_chained_plaintexts()?;
        }
        dataset.generate_ciphertexts()?;
        debug!(
            traces = header.num_traces,
            samples = header.num_samples,
            algorithm = %header.algorithm,
            "loaded dataset"
        );
        Ok(Arc::new(dataset))
    }

    // ------------------------------------------------------------------
    // Derivation
    // ------------------------------------------------------------------

    /// Derive rows 1..T of the plaintext matrix by iterating the primitive
    /// on the seed stored in row 0.
    fn generate_chained_plaintexts(&mut self) -> Result<()> {
        match self.header.algorithm {
            EncryptionAlgorithm::SBox => {
                let key = self.keys.get(0, 0);
                let mut previous = self.plaintexts.get(0, 0);
                for t in 1..self.header.num_traces as usize {
                    let next = crypto::sbox_encrypt(previous, key);
                    self.plaintexts.set(t, 0, next);
                    previous = next;
                }
                Ok(())
            }
            EncryptionAlgorithm::Aes128 => {
                let schedule = Aes128Key::new(&block_from_row(self.keys.row(0))?);
                let mut previous = block_from_row(self.plaintexts.row(0))?;
                for t in 1..self.header.num_traces as usize {
                    let next = schedule.encrypt_block(previous);
                    self.plaintexts.set_row(t, &next);
                    previous = next;
                }
                Ok(())
            }
            EncryptionAlgorithm::Unknown => Err(Error::UnsupportedOperation(
                "chained plaintexts require a known algorithm".into(),
            )),
        }
    }

    /// Derive one ciphertext row per stored plaintext row.
    fn generate_ciphertexts(&mut self) -> Result<()> {
        let count = self.header.plaintext_count();
        match self.header.algorithm {
            EncryptionAlgorithm::SBox => {
                let key = self.keys.get(0, 0);
                for c in 0..count {
                    let p = self.plaintext(c)[0];
                    self.ciphertexts.set(c, 0, crypto::sbox_encrypt(p, key));
                }
                Ok(())
            }
            EncryptionAlgorithm::Aes128 => {
                let schedule = Aes128Key::new(&block_from_row(self.keys.row(0))?);
                for c in 0..count {
                    let block = block_from_row(self.plaintext(c))?;
                    let ct = schedule.encrypt_block(block);
                    self.ciphertexts.set_row(c, &ct);
                }
                Ok(())
            }
            EncryptionAlgorithm::Unknown => Err(Error::UnsupportedOperation(
                "ciphertext derivation requires a known algorithm".into(),
            )),
        }
    }
}

fn block_from_row(row: &[u8]) -> Result<[u8; AES128_BLOCK_SIZE]> {
    row.try_into().map_err(|_| {
        Error::InvalidData(format!(
            "aes-128 requires {AES128_BLOCK_SIZE}-byte rows, got {}",
            row.len()
        ))
    })
}

// ============================================================================
// Builder
// ============================================================================

/// Accumulates raw traces, plaintexts and keys and validates them into an
/// immutable [`TraceDataset`].
///
/// Callers fill the public header fields, then append:
/// - one trace per [`TraceDatasetBuilder::add_trace`] call, `num_traces`
///   calls in total, each `num_samples` long;
/// - plaintexts per the mode: exactly one for `Fixed` and `Chained` (the
///   seed), `num_traces` for `Random`;
/// - exactly one key.
#[derive(Default)]
pub struct TraceDatasetBuilder {
    pub time_resolution: f64,
    pub current_resolution: f64,
    pub num_traces: u32,
    pub num_samples: u32,
    pub algorithm: Option<EncryptionAlgorithm>,
    pub plaintext_mode: Option<PlaintextMode>,
    pub plaintext_size: u32,
    pub key_mode: Option<KeyMode>,
    pub key_size: u32,
    traces: Vec<i32>,
    plaintexts: Vec<u8>,
    keys: Vec<u8>,
}

impl TraceDatasetBuilder {
    pub fn new(algorithm: EncryptionAlgorithm, plaintext_mode: PlaintextMode) -> Self {
        Self {
            algorithm: Some(algorithm),
            plaintext_mode: Some(plaintext_mode),
            key_mode: Some(KeyMode::Fixed),
            ..Self::default()
        }
    }

    /// Append one trace of `num_samples` samples.
    pub fn add_trace(&mut self, trace: &[i32]) {
        self.traces.extend_from_slice(trace);
    }

    /// Append one plaintext row.
    pub fn add_plaintext(&mut self, plaintext: &[u8]) {
        self.plaintexts.extend_from_slice(plaintext);
    }

    /// Append the key row.
    pub fn add_key(&mut self, key: &[u8]) {
        self.keys.extend_from_slice(key);
    }

    /// Validate the accumulated data and build the dataset.
    pub fn build(mut self) -> Result<Arc<TraceDataset>> {
        let algorithm = self.algorithm.unwrap_or(EncryptionAlgorithm::Unknown);
        let plaintext_mode = self.plaintext_mode.unwrap_or(PlaintextMode::Unknown);
        let key_mode = self.key_mode.unwrap_or(KeyMode::Fixed);

        if key_mode != KeyMode::Fixed {
            return Err(Error::UnsupportedOperation(
                "only fixed-key datasets are supported".into(),
            ));
        }
        if plaintext_mode == PlaintextMode::Unknown {
            return Err(Error::InvalidData("plaintext mode must be specified".into()));
        }

        // Byte widths default from the algorithm when left at zero.
        if self.plaintext_size == 0 {
            self.plaintext_size = match algorithm {
                EncryptionAlgorithm::SBox => 1,
                EncryptionAlgorithm::Aes128 => AES128_BLOCK_SIZE as u32,
                EncryptionAlgorithm::Unknown => {
                    return Err(Error::InvalidData(
                        "plaintext size required for unknown algorithm".into(),
                    ))
                }
            };
        }
        if self.key_size == 0 {
            self.key_size = match algorithm {
                EncryptionAlgorithm::SBox => 1,
                EncryptionAlgorithm::Aes128 => AES128_BLOCK_SIZE as u32,
                EncryptionAlgorithm::Unknown => {
                    return Err(Error::InvalidData(
                        "key size required for unknown algorithm".into(),
                    ))
                }
            };
        }

        let header = DatasetHeader {
            time_resolution: self.time_resolution,
            current_resolution: self.current_resolution,
            num_traces: self.num_traces,
            num_samples: self.num_samples,
            algorithm,
            plaintext_mode,
            plaintext_size: self.plaintext_size,
            key_mode,
            key_size: self.key_size,
        };

        let trace_count = header.num_traces as usize;
        let sample_count = header.num_samples as usize;
        if trace_count * sample_count != self.traces.len() {
            return Err(Error::InvalidData(format!(
                "expected {} samples total, got {}",
                trace_count * sample_count,
                self.traces.len()
            )));
        }

        // Traces arrive trace-major; transpose into the sample-major layout.
        let mut traces = Matrix::new(trace_count, sample_count);
        for s in 0..sample_count {
            let row = traces.row_mut(s);
            for (t, slot) in row.iter_mut().enumerate() {
                *slot = self.traces[t * sample_count + s];
            }
        }

        let width = header.plaintext_size as usize;
        let appended_rows = match plaintext_mode {
            PlaintextMode::Random => trace_count,
            _ => 1,
        };
        if appended_rows * width != self.plaintexts.len() {
            return Err(Error::InvalidData(format!(
                "expected {appended_rows} plaintext row(s) of {width} byte(s), got {} bytes",
                self.plaintexts.len()
            )));
        }
        let mut plaintexts = Matrix::new(width, header.plaintext_count());
        for r in 0..appended_rows {
            plaintexts.set_row(r, &self.plaintexts[r * width..(r + 1) * width]);
        }

        let key_width = header.key_size as usize;
        if self.keys.len() != key_width {
            return Err(Error::InvalidData(format!(
                "expected exactly one key of {key_width} byte(s), got {} bytes",
                self.keys.len()
            )));
        }
        let mut keys = Matrix::new(key_width, 1);
        keys.set_row(0, &self.keys);

        let mut dataset = TraceDataset {
            header,
            traces,
            plaintexts,
            keys,
            ciphertexts: Matrix::new(width, header.plaintext_count()),
        };
        if plaintext_mode == PlaintextMode::Chained {
            dataset.generate_chained_plaintexts()?;
        }
        dataset.generate_ciphertexts()?;
        debug!(
            traces = header.num_traces,
            samples = header.num_samples,
            algorithm = %header.algorithm,
            mode = %header.plaintext_mode,
            "built dataset"
        );
        Ok(Arc::new(dataset))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_sbox_dataset(traces: u32, samples: u32, key: u8, seed: u64) -> Arc<TraceDataset> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Random);
        builder.num_traces = traces;
        builder.num_samples = samples;
        for _ in 0..traces {
            let trace: Vec<i32> = (0..samples).map(|_| rng.gen_range(-500..500)).collect();
            builder.add_trace(&trace);
            builder.add_plaintext(&[rng.gen()]);
        }
        builder.add_key(&[key]);
        builder.build().unwrap()
    }

    #[test]
    fn build_validates_shapes_and_derives_ciphertexts() {
        let ds = random_sbox_dataset(64, 5, 0x2a, 1);
        let h = *ds.header();
        assert_eq!(h.plaintext_size, 1);
        assert_eq!(h.key_size, 1);
        assert_eq!(ds.sample(0).len(), 64);
        for t in 0..64 {
            let expected = crypto::sbox_encrypt(ds.plaintext(t)[0], 0x2a);
            assert_eq!(ds.ciphertext(t)[0], expected);
        }
    }

    #[test]
    fn traces_are_stored_sample_major() {
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Fixed);
        builder.num_traces = 2;
        builder.num_samples = 3;
        builder.add_trace(&[1, 2, 3]);
        builder.add_trace(&[4, 5, 6]);
        builder.add_plaintext(&[0x00]);
        builder.add_key(&[0x00]);
        let ds = builder.build().unwrap();
        assert_eq!(ds.sample(0), &[1, 4]);
        assert_eq!(ds.sample(1), &[2, 5]);
        assert_eq!(ds.sample(2), &[3, 6]);
    }

    #[test]
    fn build_rejects_sample_count_mismatch() {
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Fixed);
        builder.num_traces = 2;
        builder.num_samples = 3;
        builder.add_trace(&[1, 2, 3]);
        builder.add_plaintext(&[0x00]);
        builder.add_key(&[0x00]);
        assert!(matches!(builder.build(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn build_rejects_plaintext_count_mismatch() {
        let mut builder = TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Random);
        builder.num_traces = 2;
        builder.num_samples = 1;
        builder.add_trace(&[1]);
        builder.add_trace(&[2]);
        builder.add_plaintext(&[0x11]); // needs two rows in random mode
        builder.add_key(&[0x00]);
        assert!(matches!(builder.build(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn chained_sbox_plaintexts_iterate_the_primitive() {
        let mut builder =
            TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Chained);
        builder.num_traces = 4;
        builder.num_samples = 1;
        for v in 0..4 {
            builder.add_trace(&[v]);
        }
        builder.add_plaintext(&[0x10]);
        builder.add_key(&[0x2a]);
        let ds = builder.build().unwrap();

        let mut expected = 0x10u8;
        assert_eq!(ds.plaintext(0)[0], expected);
        for t in 1..4 {
            expected = crypto::sbox_encrypt(expected, 0x2a);
            assert_eq!(ds.plaintext(t)[0], expected);
        }
    }

    #[test]
    fn chained_aes_reuses_one_schedule() {
        let key = [0x0fu8; 16];
        let seed = [0x35u8; 16];
        let mut builder =
            TraceDatasetBuilder::new(EncryptionAlgorithm::Aes128, PlaintextMode::Chained);
        builder.num_traces = 3;
        builder.num_samples = 2;
        for v in 0..3 {
            builder.add_trace(&[v, v + 1]);
        }
        builder.add_plaintext(&seed);
        builder.add_key(&key);
        let ds = builder.build().unwrap();

        let schedule = Aes128Key::new(&key);
        let p1 = schedule.encrypt_block(seed);
        let p2 = schedule.encrypt_block(p1);
        assert_eq!(ds.plaintext(1), &p1);
        assert_eq!(ds.plaintext(2), &p2);
        assert_eq!(ds.ciphertext(2), &schedule.encrypt_block(p2));
    }

    #[test]
    fn split_partitions_traces_and_plaintexts() {
        let ds = random_sbox_dataset(16, 3, 0x55, 7);
        let (a, b) = ds.split(10).unwrap();
        assert_eq!(a.header().num_traces, 10);
        assert_eq!(b.header().num_traces, 6);
        for s in 0..3 {
            assert_eq!(a.sample(s), &ds.sample(s)[..10]);
            assert_eq!(b.sample(s), &ds.sample(s)[10..]);
        }
        for t in 0..10 {
            assert_eq!(a.plaintext(t), ds.plaintext(t));
            assert_eq!(a.ciphertext(t), ds.ciphertext(t));
        }
        for t in 0..6 {
            assert_eq!(b.plaintext(t), ds.plaintext(10 + t));
            assert_eq!(b.ciphertext(t), ds.ciphertext(10 + t));
        }
        assert_eq!(a.key(0), ds.key(0));
        assert_eq!(b.key(0), ds.key(0));
    }

    #[test]
    fn split_of_chained_dataset_degrades_to_random() {
        let mut builder =
            TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Chained);
        builder.num_traces = 6;
        builder.num_samples = 1;
        for v in 0..6 {
            builder.add_trace(&[v]);
        }
        builder.add_plaintext(&[0x01]);
        builder.add_key(&[0x2a]);
        let ds = builder.build().unwrap();
        let (a, b) = ds.split(2).unwrap();
        assert_eq!(a.header().plaintext_mode, PlaintextMode::Random);
        assert_eq!(b.header().plaintext_mode, PlaintextMode::Random);
        // The derived rows survive the split even though the chain is broken.
        assert_eq!(b.plaintext(0), ds.plaintext(2));
    }

    #[test]
    fn split_rejects_out_of_range_index() {
        let ds = random_sbox_dataset(8, 1, 0x00, 3);
        assert!(ds.split(0).is_err());
        assert!(ds.split(8).is_err());
    }

    #[test]
    fn save_load_round_trip_random_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.bin");
        let ds = random_sbox_dataset(32, 4, 0x2a, 11);
        ds.save(&path).unwrap();
        let loaded = TraceDataset::load(&path).unwrap();
        assert_eq!(loaded.header(), ds.header());
        for s in 0..4 {
            assert_eq!(loaded.sample(s), ds.sample(s));
        }
        for t in 0..32 {
            assert_eq!(loaded.plaintext(t), ds.plaintext(t));
            assert_eq!(loaded.ciphertext(t), ds.ciphertext(t));
        }
    }

    #[test]
    fn save_load_round_trip_chained_mode_regenerates_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.bin");
        let mut builder =
            TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Chained);
        builder.num_traces = 5;
        builder.num_samples = 2;
        for v in 0..5 {
            builder.add_trace(&[v, -v]);
        }
        builder.add_plaintext(&[0x77]);
        builder.add_key(&[0x2a]);
        let ds = builder.build().unwrap();
        ds.save(&path).unwrap();
        let loaded = TraceDataset::load(&path).unwrap();
        for t in 0..5 {
            assert_eq!(loaded.plaintext(t), ds.plaintext(t));
            assert_eq!(loaded.ciphertext(t), ds.ciphertext(t));
        }
    }

    #[test]
    fn load_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, vec![0u8; 128]).unwrap();
        assert!(matches!(TraceDataset::load(&path), Err(Error::InvalidHeader)));
    }
}
