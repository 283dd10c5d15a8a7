//! Binary model persistence.
//!
//! Layout (little-endian):
//!   i32 layer_count
//!   per layer: i32 w_rows, i32 w_cols, f32[w_rows*w_cols] row-major,
//!              i32 b_rows, i32 b_cols, f32[b_rows*b_cols]
//!
//! Loading stages everything into scratch buffers and validates the full file
//! against the live topology before anything is committed, so a failed load
//! never leaves a network half-mutated.

use core::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::matrix::Matrix;
use crate::network::Network;

#[derive(Debug)]
pub enum ModelError {
    Io(io::Error),
    /// File ended before the declared shapes were satisfied.
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },
    LayerCountMismatch {
        stored: usize,
        live: usize,
    },
    ShapeMismatch {
        layer: usize,
        stored: (usize, usize),
        live: (usize, usize),
    },
    /// A stored dimension was negative or absurd.
    InvalidDimension {
        layer: usize,
        value: i32,
    },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "model io error: {err}"),
            Self::Truncated {
                offset,
                needed,
                len,
            } => write!(
                f,
                "model file truncated: need {needed} bytes at offset {offset}, file is {len}"
            ),
            Self::LayerCountMismatch { stored, live } => write!(
                f,
                "stored model has {stored} layers, live network has {live}"
            ),
            Self::ShapeMismatch {
                layer,
                stored,
                live,
            } => write!(
                f,
                "layer {layer} shape mismatch: stored {}x{}, live {}x{}",
                stored.0, stored.1, live.0, live.1
            ),
            Self::InvalidDimension { layer, value } => {
                write!(f, "layer {layer} has invalid stored dimension {value}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

impl From<io::Error> for ModelError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub fn save(network: &Network, path: &Path) -> Result<(), ModelError> {
    let layers = network.layers();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(layers.len() as i32).to_le_bytes());
    for layer in layers {
        write_matrix(&mut bytes, layer.weights());
        write_matrix(&mut bytes, layer.biases());
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Parse a stored model and check it against the expected per-layer
/// (weight shape, bias shape) pairs. Returns the staged parameters only if
/// every shape matches.
pub fn load(
    path: &Path,
    topology: &[((usize, usize), (usize, usize))],
) -> Result<Vec<(Matrix, Matrix)>, ModelError> {
    let bytes = fs::read(path)?;
    let mut cursor = Cursor::new(&bytes);

    let stored_layers = cursor.read_i32()?;
    if stored_layers < 0 {
        return Err(ModelError::InvalidDimension {
            layer: 0,
            value: stored_layers,
        });
    }
    if stored_layers as usize != topology.len() {
        return Err(ModelError::LayerCountMismatch {
            stored: stored_layers as usize,
            live: topology.len(),
        });
    }

    let mut parameters = Vec::with_capacity(topology.len());
    for (index, (weight_shape, bias_shape)) in topology.iter().enumerate() {
        let weights = cursor.read_matrix(index, *weight_shape)?;
        let biases = cursor.read_matrix(index, *bias_shape)?;
        parameters.push((weights, biases));
    }

    Ok(parameters)
}

fn write_matrix(bytes: &mut Vec<u8>, matrix: &Matrix) {
    bytes.extend_from_slice(&(matrix.rows() as i32).to_le_bytes());
    bytes.extend_from_slice(&(matrix.cols() as i32).to_le_bytes());
    for value in matrix.as_slice() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ModelError> {
        if self.offset + count > self.bytes.len() {
            return Err(ModelError::Truncated {
                offset: self.offset,
                needed: count,
                len: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, ModelError> {
        let raw = self.take(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, ModelError> {
        let raw = self.take(4)?;
        Ok(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read one stored matrix. The declared dimensions are validated against
    /// the live shape before anything is allocated, so a corrupted file can
    /// never turn stored dimensions into a huge allocation.
    fn read_matrix(
        &mut self,
        layer: usize,
        expected: (usize, usize),
    ) -> Result<Matrix, ModelError> {
        let rows = self.read_i32()?;
        let cols = self.read_i32()?;
        if rows < 0 || cols < 0 {
            let value = if rows < 0 { rows } else { cols };
            return Err(ModelError::InvalidDimension { layer, value });
        }
        let stored = (rows as usize, cols as usize);
        if stored != expected {
            return Err(ModelError::ShapeMismatch {
                layer,
                stored,
                live: expected,
            });
        }
        let mut matrix = Matrix::zeros(stored.0, stored.1);
        for i in 0..stored.0 {
            for j in 0..stored.1 {
                matrix.set(i, j, self.read_f32()?);
            }
        }
        Ok(matrix)
    }
}
