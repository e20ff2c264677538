/// Dense affine layer: y[B, out] = x[B, in] @ W[in, out] + b[out].
///
/// Weights are flat Vec<f32> in row-major layout so they serialize as plain
/// arrays in checkpoints.

use serde::{Serialize, Deserialize};

use crate::error::{MemoryError, Result};
use crate::tensor::{matmul_f32, SimpleRng, Tensor};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// [in_dim, out_dim]
    pub w: Vec<f32>,
    /// [out_dim]
    pub b: Vec<f32>,
    pub in_dim: usize,
    pub out_dim: usize,
}

impl Linear {
    /// Xavier-uniform weights, zero bias.
    pub fn init(in_dim: usize, out_dim: usize, rng: &mut SimpleRng) -> Self {
        let scale = (6.0 / (in_dim + out_dim) as f32).sqrt();
        let mut w = vec![0.0f32; in_dim * out_dim];
        rng.fill_uniform(&mut w, scale);
        Linear { w, b: vec![0.0f32; out_dim], in_dim, out_dim }
    }

    pub fn from_parts(w: Vec<f32>, b: Vec<f32>, in_dim: usize, out_dim: usize) -> Result<Self> {
        if w.len() != in_dim * out_dim {
            return Err(MemoryError::ShapeMismatch {
                what: "linear weight",
                expected: vec![in_dim, out_dim],
                actual: vec![w.len()],
            });
        }
        if b.len() != out_dim {
            return Err(MemoryError::ShapeMismatch {
                what: "linear bias",
                expected: vec![out_dim],
                actual: vec![b.len()],
            });
        }
        Ok(Linear { w, b, in_dim, out_dim })
    }

    pub fn num_params(&self) -> usize {
        self.w.len() + self.b.len()
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        if self.w.len() != self.in_dim * self.out_dim || self.b.len() != self.out_dim {
            return Err(MemoryError::ShapeMismatch {
                what: "linear weights",
                expected: vec![self.in_dim, self.out_dim],
                actual: vec![self.w.len(), self.b.len()],
            });
        }
        x.check_buffer("linear input")?;
        if x.shape.len() != 2 || x.shape[1] != self.in_dim {
            return Err(MemoryError::ShapeMismatch {
                what: "linear input",
                expected: vec![x.shape.first().copied().unwrap_or(0), self.in_dim],
                actual: x.shape.clone(),
            });
        }
        let batch = x.shape[0];
        let mut out = Tensor::zeros(&[batch, self.out_dim]);
        matmul_f32(&x.data, &self.w, &mut out.data, batch, self.in_dim, self.out_dim);
        for row in out.data.chunks_mut(self.out_dim) {
            for (y, &bias) in row.iter_mut().zip(&self.b) {
                *y += bias;
            }
        }
        Ok(out)
    }
}
