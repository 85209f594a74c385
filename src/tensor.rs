//! # Tensor Primitives
//!
//! Vectors and matrices backing network evaluation. These are deliberately
//! plain: flat `f64` storage, elementwise arithmetic, and the concatenation /
//! splice pairs the combinator layer is built on.
//!
//! ## Layout Convention
//!
//! A [`Matrix`] is row-major with **rows as feature coordinates and columns
//! as batch samples**. Concatenating two vectors corresponds to row-stacking
//! ([`Matrix::vstack`]) the matrices that carry the same features for a whole
//! batch, and `slice`/`row_slice` are the exact inverses of those operations.
//!
//! Dimension errors inside this module are programming errors of the caller
//! (the combinator layer validates all boundaries first), so the operations
//! assert rather than return `Result`.

use rand::Rng;

/// A dense vector of `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    /// Flat storage.
    pub data: Vec<f64>,
}

impl Vector {
    /// Create a vector of zeros.
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    /// The zero-dimensional vector, used as the identity element for
    /// concatenation and the "no weights" sentinel.
    pub fn empty() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a vector from existing values.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self { data }
    }

    /// Create a vector of uniform values in `[-scale, scale)`.
    pub fn random(len: usize, rng: &mut impl Rng, scale: f64) -> Self {
        let data = (0..len)
            .map(|_| (rng.gen::<f64>() * 2.0 - 1.0) * scale)
            .collect();
        Self { data }
    }

    /// Number of coordinates.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for the zero-dimensional vector.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the coordinates.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Elementwise sum.
    pub fn add(&self, other: &Vector) -> Vector {
        assert_eq!(self.len(), other.len(), "vector length mismatch for add");
        Vector {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect(),
        }
    }

    /// Elementwise product.
    pub fn mul(&self, other: &Vector) -> Vector {
        assert_eq!(self.len(), other.len(), "vector length mismatch for mul");
        Vector {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a * b)
                .collect(),
        }
    }

    /// Concatenate `self` followed by `other`.
    pub fn concat(&self, other: &Vector) -> Vector {
        let mut data = Vec::with_capacity(self.len() + other.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Vector { data }
    }

    /// Copy out the sub-range `[offset, offset + len)`. Exact inverse of
    /// [`Vector::concat`] when applied at the concatenation boundary.
    pub fn slice(&self, offset: usize, len: usize) -> Vector {
        assert!(
            offset + len <= self.len(),
            "slice [{offset}, {}) out of bounds for vector of length {}",
            offset + len,
            self.len()
        );
        Vector {
            data: self.data[offset..offset + len].to_vec(),
        }
    }

    /// Outer product `self · otherᵀ` as a `self.len() × other.len()` matrix.
    pub fn outer(&self, other: &Vector) -> Matrix {
        let mut data = Vec::with_capacity(self.len() * other.len());
        for a in &self.data {
            for b in &other.data {
                data.push(a * b);
            }
        }
        Matrix {
            rows: self.len(),
            cols: other.len(),
            data,
        }
    }
}

/// A dense row-major matrix. Rows are feature coordinates, columns are
/// batch samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// Number of rows (feature coordinates).
    pub rows: usize,
    /// Number of columns (batch samples).
    pub cols: usize,
    /// Row-major storage of length `rows * cols`.
    pub data: Vec<f64>,
}

impl Matrix {
    /// Create a matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Create a matrix from row-major values.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "data length {} does not match {rows}×{cols}",
            data.len()
        );
        Self { rows, cols, data }
    }

    /// Assemble a matrix whose columns are the given equally-sized vectors.
    pub fn from_columns(columns: &[Vector]) -> Self {
        assert!(!columns.is_empty(), "from_columns needs at least one column");
        let rows = columns[0].len();
        let cols = columns.len();
        let mut data = vec![0.0; rows * cols];
        for (j, col) in columns.iter().enumerate() {
            assert_eq!(col.len(), rows, "ragged columns in from_columns");
            for (i, v) in col.data.iter().enumerate() {
                data[i * cols + j] = *v;
            }
        }
        Self { rows, cols, data }
    }

    /// Extract column `j` as a vector.
    pub fn column(&self, j: usize) -> Vector {
        assert!(j < self.cols, "column {j} out of bounds");
        Vector {
            data: (0..self.rows).map(|i| self.data[i * self.cols + j]).collect(),
        }
    }

    /// Elementwise sum.
    pub fn add(&self, other: &Matrix) -> Matrix {
        assert_eq!(
            (self.rows, self.cols),
            (other.rows, other.cols),
            "matrix shape mismatch for add"
        );
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect(),
        }
    }

    /// Elementwise product.
    pub fn mul(&self, other: &Matrix) -> Matrix {
        assert_eq!(
            (self.rows, self.cols),
            (other.rows, other.cols),
            "matrix shape mismatch for mul"
        );
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a * b)
                .collect(),
        }
    }

    /// Row-stack `self` on top of `other`. The matrix analogue of
    /// [`Vector::concat`].
    pub fn vstack(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.cols, other.cols, "column count mismatch for vstack");
        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Matrix {
            rows: self.rows + other.rows,
            cols: self.cols,
            data,
        }
    }

    /// Copy out rows `[offset, offset + rows)`. Exact inverse of
    /// [`Matrix::vstack`] at the stacking boundary.
    pub fn row_slice(&self, offset: usize, rows: usize) -> Matrix {
        assert!(
            offset + rows <= self.rows,
            "row slice [{offset}, {}) out of bounds for {} rows",
            offset + rows,
            self.rows
        );
        Matrix {
            rows,
            cols: self.cols,
            data: self.data[offset * self.cols..(offset + rows) * self.cols].to_vec(),
        }
    }

    /// Matrix product `self · other`.
    pub fn matmul(&self, other: &Matrix) -> Matrix {
        assert_eq!(
            self.cols, other.rows,
            "inner dimensions must match: {} vs {}",
            self.cols, other.rows
        );
        let mut data = vec![0.0; self.rows * other.cols];
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.data[i * self.cols + k];
                if a == 0.0 {
                    continue;
                }
                for j in 0..other.cols {
                    data[i * other.cols + j] += a * other.data[k * other.cols + j];
                }
            }
        }
        Matrix {
            rows: self.rows,
            cols: other.cols,
            data,
        }
    }

    /// Matrix-vector product `self · x`.
    pub fn matvec(&self, x: &Vector) -> Vector {
        assert_eq!(self.cols, x.len(), "matvec dimension mismatch");
        let data = (0..self.rows)
            .map(|i| {
                (0..self.cols)
                    .map(|j| self.data[i * self.cols + j] * x.data[j])
                    .sum()
            })
            .collect();
        Vector { data }
    }

    /// Transposed matrix-vector product `selfᵀ · x`.
    pub fn tr_matvec(&self, x: &Vector) -> Vector {
        assert_eq!(self.rows, x.len(), "tr_matvec dimension mismatch");
        let mut data = vec![0.0; self.cols];
        for i in 0..self.rows {
            for j in 0..self.cols {
                data[j] += self.data[i * self.cols + j] * x.data[i];
            }
        }
        Vector { data }
    }

    /// Return the transpose.
    pub fn transpose(&self) -> Matrix {
        let mut data = vec![0.0; self.rows * self.cols];
        for i in 0..self.rows {
            for j in 0..self.cols {
                data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        Matrix {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    /// Sum across columns, yielding one value per row.
    pub fn row_sums(&self) -> Vector {
        let data = (0..self.rows)
            .map(|i| self.data[i * self.cols..(i + 1) * self.cols].iter().sum())
            .collect();
        Vector { data }
    }

    /// Add `bias` to every column.
    pub fn add_column_broadcast(&self, bias: &Vector) -> Matrix {
        assert_eq!(self.rows, bias.len(), "bias length mismatch for broadcast");
        let mut data = self.data.clone();
        for i in 0..self.rows {
            for j in 0..self.cols {
                data[i * self.cols + j] += bias.data[i];
            }
        }
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }
}
