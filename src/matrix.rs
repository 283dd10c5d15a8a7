//! Dense row-major f32 matrix with the handful of operations backprop needs.
//!
//! Matrices are value types: every operation except `randomize` returns a new
//! matrix, and cloning copies the buffer. Shape-combining operations are
//! precondition-checked and report `ShapeMismatch` instead of panicking.

use core::fmt;

use crate::rng::SeededRng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatrixError {
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { op, lhs, rhs } => write!(
                f,
                "shape mismatch in {op}: {}x{} vs {}x{}",
                lhs.0, lhs.1, rhs.0, rhs.1
            ),
        }
    }
}

impl std::error::Error for MatrixError {}

#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build a 1-row matrix from a slice, the shape every sensor and action
    /// vector uses.
    pub fn from_row(values: &[f32]) -> Self {
        Self {
            rows: 1,
            cols: values.len(),
            data: values.to_vec(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Fill with uniform draws from [min, max). The caller supplies the RNG so
    /// tests and training sessions control the seed explicitly.
    pub fn randomize(&mut self, min: f32, max: f32, rng: &mut SeededRng) {
        for value in &mut self.data {
            *value = rng.next_f32_range(min, max);
        }
    }

    /// Standard matrix product. Requires `self.cols == other.rows`.
    pub fn dot(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        if self.cols != other.rows {
            return Err(MatrixError::ShapeMismatch {
                op: "dot",
                lhs: self.shape(),
                rhs: other.shape(),
            });
        }
        let mut result = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let lhs = self.data[i * self.cols + k];
                if lhs == 0.0 {
                    continue;
                }
                for j in 0..other.cols {
                    result.data[i * other.cols + j] += lhs * other.data[k * other.cols + j];
                }
            }
        }
        Ok(result)
    }

    /// Elementwise sum. Requires identical shapes.
    pub fn add(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        self.zip_with("add", other, |a, b| a + b)
    }

    /// Elementwise difference, used for `target - output`.
    pub fn sub(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        self.zip_with("sub", other, |a, b| a - b)
    }

    /// Elementwise product (Hadamard), used to fold errors into gradients.
    pub fn hadamard(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        self.zip_with("hadamard", other, |a, b| a * b)
    }

    fn zip_with(
        &self,
        op: &'static str,
        other: &Matrix,
        f: impl Fn(f32, f32) -> f32,
    ) -> Result<Matrix, MatrixError> {
        if self.shape() != other.shape() {
            return Err(MatrixError::ShapeMismatch {
                op,
                lhs: self.shape(),
                rhs: other.shape(),
            });
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// Elementwise unary transform; activations and their derivatives.
    pub fn apply(&self, f: impl Fn(f32) -> f32) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Scale every element, used to fold the learning rate into a gradient.
    pub fn scale(&self, factor: f32) -> Matrix {
        self.apply(|v| v * factor)
    }

    pub fn transpose(&self) -> Matrix {
        let mut result = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                result.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_produces_outer_shape() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(3, 4);
        let c = a.dot(&b).unwrap();
        assert_eq!(c.shape(), (2, 4));
    }

    #[test]
    fn dot_rejects_inner_mismatch() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 4);
        let err = a.dot(&b).unwrap_err();
        assert_eq!(
            err,
            MatrixError::ShapeMismatch {
                op: "dot",
                lhs: (2, 3),
                rhs: (2, 4),
            }
        );
    }

    #[test]
    fn dot_multiplies_correctly() {
        let a = Matrix::from_row(&[1.0, 2.0, 3.0]);
        let mut b = Matrix::zeros(3, 2);
        b.set(0, 0, 1.0);
        b.set(1, 0, 2.0);
        b.set(2, 1, 4.0);
        let c = a.dot(&b).unwrap();
        assert_eq!(c.get(0, 0), 5.0);
        assert_eq!(c.get(0, 1), 12.0);
    }

    #[test]
    fn add_rejects_shape_mismatch() {
        let a = Matrix::zeros(2, 2);
        let b = Matrix::zeros(2, 3);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn apply_identity_is_identity() {
        let mut a = Matrix::zeros(3, 3);
        a.randomize(-1.0, 1.0, &mut SeededRng::new(5));
        assert_eq!(a.apply(|v| v), a);
    }

    #[test]
    fn transpose_twice_is_identity() {
        let mut a = Matrix::zeros(4, 7);
        a.randomize(-1.0, 1.0, &mut SeededRng::new(11));
        assert_eq!(a.transpose().transpose(), a);
    }

    #[test]
    fn randomize_is_reproducible_for_a_seed() {
        let mut a = Matrix::zeros(5, 5);
        let mut b = Matrix::zeros(5, 5);
        a.randomize(-0.5, 0.5, &mut SeededRng::new(42));
        b.randomize(-0.5, 0.5, &mut SeededRng::new(42));
        assert_eq!(a, b);
        assert!(a.as_slice().iter().all(|v| (-0.5..0.5).contains(v)));
    }
}
