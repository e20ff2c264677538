/// External memory bank: `[batch, addresses, content]`, row-major.
///
/// Read:   r[b, c] = sum_a w[b, a] * M[b, a, c]
/// Write:  M'[b, a, c] = M[b, a, c] * (1 - w[b, a] * e[b, c]) + w[b, a] * v[b, c]
///
/// Both are pure: `write` returns a new bank, the input is never touched.

use serde::{Serialize, Deserialize};

use crate::addressing::Attention;
use crate::error::{MemoryError, Result};
use crate::tensor::Tensor;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Flat [batch, addresses, width].
    pub data: Vec<f32>,
    pub batch: usize,
    pub addresses: usize,
    pub width: usize,
}

impl Memory {
    /// Bank with every cell set to `init`.
    pub fn new(batch: usize, addresses: usize, width: usize, init: f32) -> Self {
        Memory {
            data: vec![init; batch * addresses * width],
            batch,
            addresses,
            width,
        }
    }

    pub fn from_vec(data: Vec<f32>, batch: usize, addresses: usize, width: usize) -> Result<Self> {
        if data.len() != batch * addresses * width {
            return Err(MemoryError::ShapeMismatch {
                what: "memory buffer",
                expected: vec![batch, addresses, width],
                actual: vec![data.len()],
            });
        }
        Ok(Memory { data, batch, addresses, width })
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.batch, self.addresses, self.width]
    }

    /// Fails if the buffer length disagrees with `batch * addresses * width`.
    pub fn check_buffer(&self) -> Result<()> {
        if self.data.len() != self.batch * self.addresses * self.width {
            return Err(MemoryError::ShapeMismatch {
                what: "memory buffer",
                expected: vec![self.batch, self.addresses, self.width],
                actual: vec![self.data.len()],
            });
        }
        Ok(())
    }

    /// Content stored at address `a` of batch element `b`.
    ///
    /// Panics if `b` or `a` is out of range, like slice indexing.
    pub fn row(&self, b: usize, a: usize) -> &[f32] {
        let base = (b * self.addresses + a) * self.width;
        &self.data[base..base + self.width]
    }

    /// Copy of this bank with one row replaced. Convenience for seeding content.
    pub fn with_row(mut self, b: usize, a: usize, values: &[f32]) -> Result<Self> {
        self.check_buffer()?;
        if b >= self.batch {
            return Err(MemoryError::IndexOutOfRange { what: "memory batch", index: b, bound: self.batch });
        }
        if a >= self.addresses {
            return Err(MemoryError::IndexOutOfRange { what: "memory address", index: a, bound: self.addresses });
        }
        if values.len() != self.width {
            return Err(MemoryError::ShapeMismatch {
                what: "memory row",
                expected: vec![self.width],
                actual: vec![values.len()],
            });
        }
        let base = (b * self.addresses + a) * self.width;
        self.data[base..base + self.width].copy_from_slice(values);
        Ok(self)
    }

    fn check_attention(&self, attention: &Attention) -> Result<()> {
        self.check_buffer()?;
        attention.check_buffer("attention buffer")?;
        if attention.batch != self.batch || attention.addresses != self.addresses {
            return Err(MemoryError::ShapeMismatch {
                what: "attention vs memory",
                expected: vec![self.batch, self.addresses],
                actual: vec![attention.batch, attention.addresses],
            });
        }
        Ok(())
    }

    /// Attention-weighted sum over addresses. Returns [batch, width].
    pub fn read(&self, attention: &Attention) -> Result<Tensor> {
        self.check_attention(attention)?;
        let (a_n, c_n) = (self.addresses, self.width);
        let mut out = Tensor::zeros(&[self.batch, c_n]);
        for b in 0..self.batch {
            let w = attention.row(b);
            let r = &mut out.data[b * c_n..(b + 1) * c_n];
            for a in 0..a_n {
                let w_a = w[a];
                if w_a == 0.0 {
                    continue;
                }
                let m = self.row(b, a);
                for c in 0..c_n {
                    r[c] += w_a * m[c];
                }
            }
        }
        Ok(out)
    }

    /// Erase-then-add write. `erase` and `add` are [batch, width], already activated.
    pub fn write(&self, attention: &Attention, erase: &[f32], add: &[f32]) -> Result<Memory> {
        self.check_attention(attention)?;
        let bc = self.batch * self.width;
        if erase.len() != bc {
            return Err(MemoryError::ShapeMismatch {
                what: "erase vector",
                expected: vec![self.batch, self.width],
                actual: vec![erase.len()],
            });
        }
        if add.len() != bc {
            return Err(MemoryError::ShapeMismatch {
                what: "add vector",
                expected: vec![self.batch, self.width],
                actual: vec![add.len()],
            });
        }

        let (a_n, c_n) = (self.addresses, self.width);
        let mut data = self.data.clone();
        for b in 0..self.batch {
            let w = attention.row(b);
            let e = &erase[b * c_n..(b + 1) * c_n];
            let v = &add[b * c_n..(b + 1) * c_n];
            for a in 0..a_n {
                let w_a = w[a];
                let base = (b * a_n + a) * c_n;
                for c in 0..c_n {
                    data[base + c] = data[base + c] * (1.0 - w_a * e[c]) + w_a * v[c];
                }
            }
        }
        Ok(Memory { data, batch: self.batch, addresses: a_n, width: c_n })
    }
}
