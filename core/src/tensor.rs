/// Minimal tensor utilities for the memory core.
///
/// All operations are free functions on flat f32 slices with explicit dimensions.
/// Row-major layout throughout. Batched quantities keep the batch index outermost:
/// an attention batch `[B, A]` is `data[b * A + a]`, a memory bank `[B, A, C]`
/// is `data[(b * A + a) * C + c]`.

use serde::{Serialize, Deserialize};

use crate::error::{MemoryError, Result};

/// Flat f32 tensor with shape metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        Tensor {
            data: vec![0.0; n],
            shape: shape.to_vec(),
        }
    }

    /// Wrap an existing buffer. Fails if `data.len()` does not match the shape.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let n: usize = shape.iter().product();
        if data.len() != n {
            return Err(MemoryError::ShapeMismatch {
                what: "tensor buffer",
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: shape.to_vec() })
    }

    /// Row `i` of a 2-D tensor.
    pub fn row(&self, i: usize) -> &[f32] {
        debug_assert_eq!(self.shape.len(), 2);
        let cols = self.shape[1];
        &self.data[i * cols..(i + 1) * cols]
    }

    /// Fails if `data.len()` disagrees with `shape` (e.g. a hand-edited or
    /// deserialized tensor).
    pub fn check_buffer(&self, what: &'static str) -> Result<()> {
        let n: usize = self.shape.iter().product();
        if self.data.len() != n {
            return Err(MemoryError::ShapeMismatch {
                what,
                expected: self.shape.clone(),
                actual: vec![self.data.len()],
            });
        }
        Ok(())
    }

    /// Check that this tensor has exactly `expected` shape and a buffer to match.
    pub fn expect_shape(&self, what: &'static str, expected: &[usize]) -> Result<()> {
        self.check_buffer(what)?;
        if self.shape != expected {
            return Err(MemoryError::ShapeMismatch {
                what,
                expected: expected.to_vec(),
                actual: self.shape.clone(),
            });
        }
        Ok(())
    }
}

/// Concatenate 2-D tensors along the column axis. All parts must share the row count.
pub fn concat_cols(parts: &[&Tensor]) -> Result<Tensor> {
    let rows = parts.first().and_then(|t| t.shape.first().copied()).unwrap_or(0);
    let mut total = 0;
    for t in parts {
        t.check_buffer("concat operand")?;
        if t.shape.len() != 2 || t.shape[0] != rows {
            return Err(MemoryError::ShapeMismatch {
                what: "concat operand",
                expected: vec![rows, t.shape.get(1).copied().unwrap_or(0)],
                actual: t.shape.clone(),
            });
        }
        total += t.shape[1];
    }
    let mut out = Vec::with_capacity(rows * total);
    for r in 0..rows {
        for t in parts {
            out.extend_from_slice(t.row(r));
        }
    }
    Ok(Tensor { data: out, shape: vec![rows, total] })
}

// ── Free-function math ops on flat slices ────────────────────────────

/// Matrix multiply: C[M,N] = A[M,K] @ B[K,N].  Row-major.
/// `out` must be pre-allocated with M*N elements (will be overwritten).
pub fn matmul_f32(a: &[f32], b: &[f32], out: &mut [f32], m: usize, k: usize, n: usize) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(out.len(), m * n);

    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for p in 0..k {
                sum += a[i * k + p] * b[p * n + j];
            }
            out[i * n + j] = sum;
        }
    }
}

/// Row-wise softmax: each row of length `cols` in `scores` gets softmaxed into `out`.
/// `rows` * `cols` elements.
pub fn softmax_f32(scores: &[f32], out: &mut [f32], rows: usize, cols: usize) {
    debug_assert_eq!(scores.len(), rows * cols);
    debug_assert_eq!(out.len(), rows * cols);

    for r in 0..rows {
        let base = r * cols;
        let row = &scores[base..base + cols];

        // Numerically stable: subtract max
        let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum_exp = 0.0f32;
        for c in 0..cols {
            let e = (row[c] - max_val).exp();
            out[base + c] = e;
            sum_exp += e;
        }
        if sum_exp > 0.0 {
            for c in 0..cols {
                out[base + c] /= sum_exp;
            }
        }
    }
}

/// Sigmoid: 1 / (1 + exp(-x)). Clamped to avoid overflow.
///
/// Saturates to exactly 1.0 / 0.0 beyond |x| >= 15, which the gate relies on:
/// a saturated gate selects one branch bit-for-bit.
#[inline]
pub fn sigmoid_f32(x: f32) -> f32 {
    if x >= 15.0 { return 1.0; }
    if x <= -15.0 { return 0.0; }
    1.0 / (1.0 + (-x).exp())
}

/// Softplus: ln(1 + exp(x)). Numerically stable.
#[inline]
pub fn softplus_f32(x: f32) -> f32 {
    if x >= 15.0 { return x; }
    if x <= -15.0 { return 0.0; }
    (1.0 + x.exp()).ln()
}

/// "Oneplus": softplus(x) + 1. Always >= 1; used for key strength and sharpening.
#[inline]
pub fn oneplus_f32(x: f32) -> f32 {
    softplus_f32(x) + 1.0
}

/// L2 norm of a vector: sqrt(sum(a[i]^2)).
pub fn vec_norm_f32(a: &[f32]) -> f32 {
    a.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Write `a / max(||a||_2, eps)` into `out`. A zero vector maps to zeros.
pub fn l2_normalize_into(a: &[f32], out: &mut [f32], eps: f32) {
    debug_assert_eq!(a.len(), out.len());
    let inv = 1.0 / vec_norm_f32(a).max(eps);
    for (o, &x) in out.iter_mut().zip(a) {
        *o = x * inv;
    }
}

/// Rescale `a` in-place so its entries sum to 1. Entries are assumed non-negative.
/// No-op if the sum is below `eps`.
pub fn l1_normalize_f32(a: &mut [f32], eps: f32) {
    let sum: f32 = a.iter().sum();
    if sum > eps {
        let inv = 1.0 / sum;
        for x in a.iter_mut() {
            *x *= inv;
        }
    }
}

/// Dot product: sum_i a[i] * b[i].
pub fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut sum = 0.0f32;
    for i in 0..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

/// Simple xorshift64 PRNG for deterministic weight init. Not crypto-safe.
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        SimpleRng { state: seed.max(1) } // avoid zero state
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform in [-scale, scale].
    pub fn uniform(&mut self, scale: f32) -> f32 {
        let u = (self.next_u64() as f64) / (u64::MAX as f64);
        (2.0 * u as f32 - 1.0) * scale
    }

    /// Fill slice with uniform random values in [-scale, scale].
    pub fn fill_uniform(&mut self, buf: &mut [f32], scale: f32) {
        for v in buf.iter_mut() {
            *v = self.uniform(scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_batched_projection() {
        // two hidden rows [B=2, H=3] projected to a bundle of width 2
        let hidden = [1.0, 0.0, -1.0, 0.5, 2.0, 0.0f32];
        let w = [1.0, 0.0, 0.0, 1.0, 2.0, -1.0f32];
        let mut out = [0.0f32; 4];
        matmul_f32(&hidden, &w, &mut out, 2, 3, 2);
        assert_eq!(out, [-1.0, 1.0, 0.5, 2.0]);
    }

    #[test]
    fn test_softmax_single_row() {
        let scores = [1.0, 2.0, 3.0f32];
        let mut out = [0.0f32; 3];
        softmax_f32(&scores, &mut out, 1, 3);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(out[0] < out[1]);
        assert!(out[1] < out[2]);
    }

    #[test]
    fn test_softmax_rows_normalised_independently() {
        // batch of 2 rows over 3 addresses; second row is flat
        let scores = [0.0, 5.0, 0.0, 2.0, 2.0, 2.0f32];
        let mut out = [0.0f32; 6];
        softmax_f32(&scores, &mut out, 2, 3);
        assert!((out[..3].iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(out[1] > 0.98);
        for &x in &out[3..] {
            assert!((x - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_large_logits_stay_finite() {
        let scores = [1000.0, 999.0, -1000.0f32];
        let mut out = [0.0f32; 3];
        softmax_f32(&scores, &mut out, 1, 3);
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((out.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid_f32(0.0) - 0.5).abs() < 1e-6);
        assert_eq!(sigmoid_f32(100.0), 1.0);
        assert_eq!(sigmoid_f32(-100.0), 0.0);
        // sigmoid(3.0) ≈ 0.9526
        assert!((sigmoid_f32(3.0) - 0.9526).abs() < 0.001);
    }

    #[test]
    fn test_softplus() {
        // softplus(0) = ln(2) ≈ 0.6931
        assert!((softplus_f32(0.0) - 0.6931).abs() < 0.001);
        assert!((softplus_f32(20.0) - 20.0).abs() < 0.01);
        assert!(softplus_f32(-20.0) < 1e-6);
    }

    #[test]
    fn test_oneplus_at_least_one() {
        for &x in &[-100.0f32, -3.0, 0.0, 2.5, 40.0] {
            assert!(oneplus_f32(x) >= 1.0, "oneplus({x}) = {}", oneplus_f32(x));
        }
    }

    #[test]
    fn test_l2_normalize_into() {
        let a = [3.0f32, 4.0];
        let mut out = [0.0f32; 2];
        l2_normalize_into(&a, &mut out, 1e-8);
        assert!((out[0] - 0.6).abs() < 1e-6);
        assert!((out[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_no_nan() {
        let a = [0.0f32; 4];
        let mut out = [1.0f32; 4];
        l2_normalize_into(&a, &mut out, 1e-8);
        assert!(out.iter().all(|&x| x == 0.0), "zero vec should map to zeros: {out:?}");
    }

    #[test]
    fn test_l1_normalize() {
        let mut a = [1.0f32, 3.0];
        l1_normalize_f32(&mut a, 1e-12);
        assert!((a[0] - 0.25).abs() < 1e-6);
        assert!((a[1] - 0.75).abs() < 1e-6);

        let mut z = [0.0f32; 3];
        l1_normalize_f32(&mut z, 1e-12);
        assert_eq!(z, [0.0; 3]);
    }

    #[test]
    fn test_dot() {
        let a = [1.0, 2.0, 3.0, 4.0f32];
        let b = [5.0, 6.0, 7.0, 8.0f32];
        assert!((dot_f32(&a, &b) - 70.0).abs() < 1e-6);
    }

    #[test]
    fn test_tensor_from_vec_checks_len() {
        assert!(Tensor::from_vec(vec![0.0; 6], &[2, 3]).is_ok());
        assert!(matches!(
            Tensor::from_vec(vec![0.0; 5], &[2, 3]),
            Err(MemoryError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_buffer_must_match_shape() {
        let t = Tensor { data: vec![0.0; 5], shape: vec![2, 3] };
        assert!(matches!(t.check_buffer("hidden"), Err(MemoryError::ShapeMismatch { .. })));
        assert!(t.expect_shape("hidden", &[2, 3]).is_err());
        let ok = Tensor::zeros(&[2, 3]);
        assert!(concat_cols(&[&ok, &t]).is_err());
    }

    #[test]
    fn test_concat_cols() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let b = Tensor::from_vec(vec![5.0, 6.0], &[2, 1]).unwrap();
        let c = concat_cols(&[&a, &b]).unwrap();
        assert_eq!(c.shape, vec![2, 3]);
        assert_eq!(c.data, vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);

        let bad = Tensor::zeros(&[3, 1]);
        assert!(concat_cols(&[&a, &bad]).is_err());
    }

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = SimpleRng::new(42);
        let mut rng2 = SimpleRng::new(42);
        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_fill_range() {
        let mut rng = SimpleRng::new(123);
        let mut buf = vec![0.0f32; 1000];
        rng.fill_uniform(&mut buf, 0.1);
        for &v in &buf {
            assert!(v >= -0.1 && v <= 0.1, "Value {} out of range", v);
        }
    }
}
