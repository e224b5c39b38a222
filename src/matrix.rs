//! Dense 2-D matrix with row views and binary persistence
//!
//! The matrix stores its data **row-major** in one contiguous allocation and
//! deliberately exposes no column accessor: every hot loop in the toolkit
//! scans rows (one sample across all traces, one key hypothesis across all
//! traces), and the storage is laid out for exactly that access pattern.
//!
//! ## Persistence
//! A matrix file is a fixed header (magic, element size, width, height, all
//! little-endian u64) followed by the raw row-major element bytes. Loading
//! fails with `InvalidHeader` on a magic mismatch, `InvalidDataType` when
//! the stored element size does not match the requested element type, and
//! `FileNotFound` when the file is absent.
//!
//! ## Numerical routines
//! Two inverses are provided and they are not interchangeable:
//! - [`Matrix::cholesky_inverse`] for symmetric positive-definite inputs
//!   (covariance matrices). O(n³) and numerically stabler than a general
//!   inverse; a non-PD input surfaces as NaN in the result, which the caller
//!   must guard.
//! - [`Matrix::inverse`] is plain Gauss–Jordan **without pivoting** and is
//!   only safe on well-conditioned inputs.

#![forbid(unsafe_code)]

use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Magic value at the start of every matrix file.
const MATRIX_FILE_MAGIC: u64 = 0x7265_6461_6568_746d;

/// Element types a matrix can persist.
///
/// The codec is little-endian and fixed-width; `SIZE` is recorded in the
/// file header so a load with the wrong element type is rejected instead of
/// reinterpreted.
pub trait Element: Copy + Default {
    const SIZE: usize;
    fn write_le(self, out: &mut [u8]);
    fn read_le(input: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(impl Element for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            #[inline]
            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }
            #[inline]
            fn read_le(input: &[u8]) -> Self {
                <$t>::from_le_bytes(input.try_into().expect("element byte width"))
            }
        })*
    };
}

impl_element! { u8, i32, u32, u64, f64 }

/// Dense `height × width` matrix of `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Copy + Default> Matrix<T> {
    /// Zero-initialized matrix of the given shape.
    pub fn new(width: usize, height: usize) -> Self {
        Self { data: vec![T::default(); width * height], width, height }
    }

    /// Build from row-major data; `data.len()` must equal `width * height`.
    pub fn from_rows(data: Vec<T>, width: usize, height: usize) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::InvalidData(format!(
                "matrix data length {} does not match shape {}x{}",
                data.len(),
                height,
                width
            )));
        }
        Ok(Self { data, width, height })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Read-only view of row `index`.
    #[inline]
    pub fn row(&self, index: usize) -> &[T] {
        assert!(index < self.height, "row {} out of range ({})", index, self.height);
        &self.data[index * self.width..(index + 1) * self.width]
    }

    /// Exclusive view of row `index`.
    #[inline]
    pub fn row_mut(&mut self, index: usize) -> &mut [T] {
        assert!(index < self.height, "row {} out of range ({})", index, self.height);
        &mut self.data[index * self.width..(index + 1) * self.width]
    }

    /// Overwrite row `index`; the row length must match the matrix width.
    pub fn set_row(&mut self, index: usize, row: &[T]) {
        assert_eq!(row.len(), self.width, "row length mismatch");
        self.row_mut(index).copy_from_slice(row);
    }

    /// Fill row `index` with a constant.
    pub fn fill_row(&mut self, index: usize, value: T) {
        self.row_mut(index).fill(value);
    }

    /// Element accessor.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        debug_assert!(row < self.height && col < self.width);
        self.data[row * self.width + col]
    }

    /// Element mutator.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        debug_assert!(row < self.height && col < self.width);
        self.data[row * self.width + col] = value;
    }

    /// Copy out the rectangle `[row_start, row_end) × [col_start, col_end)`.
    pub fn submatrix(
        &self,
        row_start: usize,
        col_start: usize,
        row_end: usize,
        col_end: usize,
    ) -> Matrix<T> {
        assert!(row_start < row_end && row_end <= self.height);
        assert!(col_start < col_end && col_end <= self.width);
        let mut result = Matrix::new(col_end - col_start, row_end - row_start);
        for r in 0..result.height {
            let src = &self.row(row_start + r)[col_start..col_end];
            result.set_row(r, src);
        }
        result
    }

    /// Transposed copy.
    pub fn transpose(&self) -> Matrix<T> {
        let mut result = Matrix::new(self.height, self.width);
        for i in 0..self.height {
            for j in 0..self.width {
                result.set(j, i, self.get(i, j));
            }
        }
        result
    }
}

impl Matrix<f64> {
    /// Square identity matrix.
    pub fn identity(dim: usize) -> Self {
        let mut result = Matrix::new(dim, dim);
        for i in 0..dim {
            result.set(i, i, 1.0);
        }
        result
    }

    /// Matrix product in O(n³); `self.width` must equal `rhs.height`.
    pub fn multiply(&self, rhs: &Matrix<f64>) -> Matrix<f64> {
        assert_eq!(self.width, rhs.height, "inner dimensions mismatch");
        let mut result = Matrix::new(rhs.width, self.height);
        for i in 0..result.height {
            for j in 0..result.width {
                let mut acc = 0.0;
                for k in 0..self.width {
                    acc += self.get(i, k) * rhs.get(k, j);
                }
                result.set(i, j, acc);
            }
        }
        result
    }

    /// Lower-triangular `L` with `L·Lᵀ = self`.
    ///
    /// Requires a square symmetric positive-definite input; anything else
    /// fails numerically (NaN entries) rather than by error, and the caller
    /// must guard the result.
    pub fn cholesky_decompose(&self) -> Matrix<f64> {
        assert_eq!(self.width, self.height, "cholesky requires a square matrix");
        let dim = self.width;
        let mut l = Matrix::new(dim, dim);
        for i in 0..dim {
            for j in 0..=i {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l.get(i, k) * l.get(j, k);
                }
                if i == j {
                    l.set(i, j, (self.get(i, i) - sum).sqrt());
                } else {
                    l.set(i, j, (self.get(i, j) - sum) / l.get(j, j));
                }
            }
        }
        l
    }

    /// Inverse of a symmetric positive-definite matrix via Cholesky.
    ///
    /// Decomposes `self = L·Lᵀ`, forward-eliminates `L·Y = I` row by row,
    /// and returns `Yᵀ·Y`. Preferred over [`Matrix::inverse`] wherever the
    /// input is a covariance matrix.
    pub fn cholesky_inverse(&self) -> Matrix<f64> {
        assert_eq!(self.width, self.height, "cholesky requires a square matrix");
        let dim = self.width;
        let mut l = self.cholesky_decompose();
        let mut l_inv = Matrix::identity(dim);
        for i in 0..dim {
            let pivot = l.get(i, i);
            for k in 0..dim {
                let v = l_inv.get(i, k) / pivot;
                l_inv.set(i, k, v);
            }
            l.set(i, i, 1.0);
            for row in i + 1..dim {
                let factor = l.get(row, i);
                for k in 0..dim {
                    let v = l_inv.get(row, k) - l_inv.get(i, k) * factor;
                    l_inv.set(row, k, v);
                }
            }
        }
        l_inv.transpose().multiply(&l_inv)
    }

    /// General inverse by Gauss–Jordan elimination with row normalization.
    ///
    /// No pivoting is performed; the input must be well-conditioned. The
    /// positive-definite covariance paths use [`Matrix::cholesky_inverse`]
    /// instead.
    pub fn inverse(&self) -> Matrix<f64> {
        assert_eq!(self.width, self.height, "inverse requires a square matrix");
        let dim = self.width;
        let mut work = self.clone();
        let mut result = Matrix::identity(dim);
        for i in 0..dim {
            let pivot = work.get(i, i);
            for j in i..dim {
                let v = work.get(i, j) / pivot;
                work.set(i, j, v);
            }
            for j in 0..dim {
                let v = result.get(i, j) / pivot;
                result.set(i, j, v);
            }
            for k in 0..dim {
                if k == i {
                    continue;
                }
                let factor = work.get(k, i);
                for j in i..dim {
                    let v = work.get(k, j) - factor * work.get(i, j);
                    work.set(k, j, v);
                }
                for j in 0..dim {
                    let v = result.get(k, j) - factor * result.get(i, j);
                    result.set(k, j, v);
                }
            }
        }
        result
    }
}

// ============================================================================
// Persistence
// ============================================================================

impl<T: Element> Matrix<T> {
    /// Write the matrix to `path` in the binary matrix format.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        let mut header = [0u8; 32];
        header[0..8].copy_from_slice(&MATRIX_FILE_MAGIC.to_le_bytes());
        header[8..16].copy_from_slice(&(T::SIZE as u64).to_le_bytes());
        header[16..24].copy_from_slice(&(self.width as u64).to_le_bytes());
        header[24..32].copy_from_slice(&(self.height as u64).to_le_bytes());
        file.write_all(&header)?;

        let mut body = vec![0u8; self.data.len() * T::SIZE];
        for (chunk, value) in body.chunks_exact_mut(T::SIZE).zip(&self.data) {
            value.write_le(chunk);
        }
        file.write_all(&body)?;
        Ok(())
    }

    /// Load a matrix of `T` from `path`, validating magic and element size.
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(path.display().to_string()),
            _ => Error::IoFailure(e),
        })?;

        let mut header = [0u8; 32];
        file.read_exact(&mut header)?;
        let magic = u64::from_le_bytes(header[0..8].try_into().expect("header slice"));
        if magic != MATRIX_FILE_MAGIC {
            return Err(Error::InvalidHeader);
        }
        let elem_size = u64::from_le_bytes(header[8..16].try_into().expect("header slice"));
        if elem_size != T::SIZE as u64 {
            return Err(Error::InvalidDataType(format!(
                "stored element size {} does not match expected {}",
                elem_size,
                T::SIZE
            )));
        }
        let width = u64::from_le_bytes(header[16..24].try_into().expect("header slice")) as usize;
        let height = u64::from_le_bytes(header[24..32].try_into().expect("header slice")) as usize;

        let mut body = vec![0u8; width * height * T::SIZE];
        file.read_exact(&mut body)?;
        let mut data = Vec::with_capacity(width * height);
        for chunk in body.chunks_exact(T::SIZE) {
            data.push(T::read_le(chunk));
        }
        Ok(Self { data, width, height })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_views_and_set_row() {
        let mut m: Matrix<i32> = Matrix::new(3, 2);
        m.set_row(0, &[1, 2, 3]);
        m.set_row(1, &[4, 5, 6]);
        assert_eq!(m.row(0), &[1, 2, 3]);
        assert_eq!(m.row(1), &[4, 5, 6]);
        assert_eq!(m.get(1, 2), 6);
        m.fill_row(0, 9);
        assert_eq!(m.row(0), &[9, 9, 9]);
    }

    #[test]
    #[should_panic(expected = "row length mismatch")]
    fn set_row_rejects_wrong_length() {
        let mut m: Matrix<i32> = Matrix::new(3, 2);
        m.set_row(0, &[1, 2]);
    }

    #[test]
    fn submatrix_extracts_rectangle() {
        let mut m: Matrix<i32> = Matrix::new(4, 3);
        for r in 0..3 {
            let row: Vec<i32> = (0..4).map(|c| (r * 4 + c) as i32).collect();
            m.set_row(r, &row);
        }
        let sub = m.submatrix(1, 1, 3, 4);
        assert_eq!(sub.height(), 2);
        assert_eq!(sub.width(), 3);
        assert_eq!(sub.row(0), &[5, 6, 7]);
        assert_eq!(sub.row(1), &[9, 10, 11]);
    }

    #[test]
    fn transpose_and_multiply() {
        let mut a = Matrix::<f64>::new(2, 3);
        a.set_row(0, &[1.0, 2.0]);
        a.set_row(1, &[3.0, 4.0]);
        a.set_row(2, &[5.0, 6.0]);
        let at = a.transpose();
        assert_eq!(at.height(), 2);
        assert_eq!(at.row(0), &[1.0, 3.0, 5.0]);

        let prod = at.multiply(&a); // 2x2 = AᵀA
        assert_eq!(prod.get(0, 0), 35.0);
        assert_eq!(prod.get(0, 1), 44.0);
        assert_eq!(prod.get(1, 1), 56.0);
    }

    #[test]
    fn identity_times_anything_is_identity_on_it() {
        let mut a = Matrix::<f64>::new(2, 2);
        a.set_row(0, &[1.5, -2.0]);
        a.set_row(1, &[0.25, 4.0]);
        let prod = Matrix::identity(2).multiply(&a);
        assert_eq!(prod, a);
    }

    fn max_abs_dev_from_identity(m: &Matrix<f64>) -> f64 {
        let mut worst: f64 = 0.0;
        for i in 0..m.height() {
            for j in 0..m.width() {
                let expect = if i == j { 1.0 } else { 0.0 };
                worst = worst.max((m.get(i, j) - expect).abs());
            }
        }
        worst
    }

    #[test]
    fn cholesky_inverse_inverts_spd_matrix() {
        // SPD by construction: AᵀA + small diagonal boost.
        let mut a = Matrix::<f64>::new(4, 4);
        let rows = [
            [4.0, 1.0, 0.5, 0.0],
            [1.0, 5.0, 1.0, 0.5],
            [0.5, 1.0, 6.0, 1.0],
            [0.0, 0.5, 1.0, 7.0],
        ];
        for (i, r) in rows.iter().enumerate() {
            a.set_row(i, r);
        }
        let inv = a.cholesky_inverse();
        let prod = inv.multiply(&a);
        assert!(max_abs_dev_from_identity(&prod) < 1e-8);
    }

    #[test]
    fn cholesky_decompose_reconstructs_input() {
        let mut a = Matrix::<f64>::new(3, 3);
        a.set_row(0, &[4.0, 2.0, 0.6]);
        a.set_row(1, &[2.0, 5.0, 1.0]);
        a.set_row(2, &[0.6, 1.0, 3.0]);
        let l = a.cholesky_decompose();
        let reconstructed = l.multiply(&l.transpose());
        for i in 0..3 {
            for j in 0..3 {
                assert!((reconstructed.get(i, j) - a.get(i, j)).abs() < 1e-12);
            }
        }
        // Upper triangle of L stays zero.
        assert_eq!(l.get(0, 2), 0.0);
    }

    #[test]
    fn cholesky_on_non_pd_input_yields_nan() {
        let mut a = Matrix::<f64>::new(2, 2);
        a.set_row(0, &[1.0, 10.0]);
        a.set_row(1, &[10.0, 1.0]);
        let l = a.cholesky_decompose();
        assert!(l.row(1).iter().any(|v| v.is_nan()));
    }

    #[test]
    fn gauss_jordan_inverse_on_well_conditioned_input() {
        let mut a = Matrix::<f64>::new(3, 3);
        a.set_row(0, &[2.0, 1.0, 0.0]);
        a.set_row(1, &[1.0, 3.0, 1.0]);
        a.set_row(2, &[0.0, 1.0, 2.0]);
        let prod = a.inverse().multiply(&a);
        assert!(max_abs_dev_from_identity(&prod) < 1e-10);
    }

    #[test]
    fn save_load_round_trip_i32() {
        // 17×31 with entries (r, c) → r·31 + c, compared element-for-element.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let mut m: Matrix<i32> = Matrix::new(31, 17);
        for r in 0..17 {
            let row: Vec<i32> = (0..31).map(|c| (r * 31 + c) as i32).collect();
            m.set_row(r, &row);
        }
        m.save(&path).unwrap();
        let loaded: Matrix<i32> = Matrix::load(&path).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn save_load_round_trip_f64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let mut m: Matrix<f64> = Matrix::new(2, 2);
        m.set_row(0, &[std::f64::consts::PI, -1.0]);
        m.set_row(1, &[0.0, f64::MAX]);
        m.save(&path).unwrap();
        let loaded: Matrix<f64> = Matrix::load(&path).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(matches!(Matrix::<i32>::load(&path), Err(Error::InvalidHeader)));
    }

    #[test]
    fn load_rejects_element_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let m: Matrix<i32> = Matrix::new(4, 4);
        m.save(&path).unwrap();
        assert!(matches!(Matrix::<f64>::load(&path), Err(Error::InvalidDataType(_))));
    }

    #[test]
    fn load_missing_file_is_file_not_found() {
        let path = Path::new("/nonexistent/mysca_matrix.bin");
        assert!(matches!(Matrix::<i32>::load(path), Err(Error::FileNotFound(_))));
    }
}
