/// Addressing engine: turns raw head parameters + previous attention into a new
/// attention distribution over memory addresses.
///
/// Pipeline (fixed order, per head, per step):
///   w_c = softmax_a( oneplus(beta) * cos(q, M[a]) )          content addressing
///   w_g = g * w_c + (1 - g) * w_prev,  g = sigmoid(gate)      interpolation gate
///   w_s[i] = sum_j s[j] * w_g[(i - (j - S/2)) mod A]          circular shift
///   w[i] = w_s[i]^gamma / sum_k w_s[k]^gamma,  gamma = oneplus(gamma_raw)
///
/// Every stage maps distributions to distributions. All functions are batched
/// over the leading dimension and allocate a fresh output.

use serde::{Serialize, Deserialize};

use crate::config::GateMode;
use crate::error::{MemoryError, Result};
use crate::memory::Memory;
use crate::tensor::{
    dot_f32, l1_normalize_f32, l2_normalize_into, oneplus_f32, sigmoid_f32, softmax_f32,
};

// ── Value types ──────────────────────────────────────────────────────

/// Batched attention over addresses: flat [batch, addresses], rows sum to 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attention {
    pub data: Vec<f32>,
    pub batch: usize,
    pub addresses: usize,
}

impl Attention {
    /// Hard attention on `index` for every batch element.
    pub fn one_hot(batch: usize, addresses: usize, index: usize) -> Result<Self> {
        if index >= addresses {
            return Err(MemoryError::IndexOutOfRange { what: "one-hot address", index, bound: addresses });
        }
        let mut data = vec![0.0f32; batch * addresses];
        for b in 0..batch {
            data[b * addresses + index] = 1.0;
        }
        Ok(Attention { data, batch, addresses })
    }

    pub fn from_vec(data: Vec<f32>, batch: usize, addresses: usize) -> Result<Self> {
        if data.len() != batch * addresses {
            return Err(MemoryError::ShapeMismatch {
                what: "attention buffer",
                expected: vec![batch, addresses],
                actual: vec![data.len()],
            });
        }
        Ok(Attention { data, batch, addresses })
    }

    pub fn row(&self, b: usize) -> &[f32] {
        &self.data[b * self.addresses..(b + 1) * self.addresses]
    }

    /// Address holding the most mass in batch row `b` (first one on ties).
    pub fn argmax(&self, b: usize) -> usize {
        let row = self.row(b);
        let mut best = 0;
        for (i, &v) in row.iter().enumerate() {
            if v > row[best] {
                best = i;
            }
        }
        best
    }

    /// Fails if the buffer length disagrees with `batch * addresses`.
    pub fn check_buffer(&self, what: &'static str) -> Result<()> {
        if self.data.len() != self.batch * self.addresses {
            return Err(MemoryError::ShapeMismatch {
                what,
                expected: vec![self.batch, self.addresses],
                actual: vec![self.data.len()],
            });
        }
        Ok(())
    }

    fn check_same_shape(&self, other: &Attention, what: &'static str) -> Result<()> {
        self.check_buffer("attention buffer")?;
        other.check_buffer(what)?;
        if self.batch != other.batch || self.addresses != other.addresses {
            return Err(MemoryError::ShapeMismatch {
                what,
                expected: vec![self.batch, self.addresses],
                actual: vec![other.batch, other.addresses],
            });
        }
        Ok(())
    }
}

/// Batched shift kernel: flat [batch, size], each row a distribution over
/// shifts `-size/2 ..= size/2` (index j is shift `j - size/2`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShiftKernel {
    pub data: Vec<f32>,
    pub batch: usize,
    pub size: usize,
}

impl ShiftKernel {
    /// Softmax over raw logits [batch, size].
    pub fn from_logits(logits: &[f32], batch: usize, size: usize) -> Result<Self> {
        if size == 0 || size % 2 == 0 {
            return Err(MemoryError::InvalidShiftSize(size));
        }
        if logits.len() != batch * size {
            return Err(MemoryError::ShapeMismatch {
                what: "shift logits",
                expected: vec![batch, size],
                actual: vec![logits.len()],
            });
        }
        let mut data = vec![0.0f32; batch * size];
        softmax_f32(logits, &mut data, batch, size);
        Ok(ShiftKernel { data, batch, size })
    }

    /// Hard kernel selecting a single shift amount in `-size/2 ..= size/2`.
    pub fn one_hot(batch: usize, size: usize, shift: isize) -> Result<Self> {
        if size == 0 || size % 2 == 0 {
            return Err(MemoryError::InvalidShiftSize(size));
        }
        let half = (size / 2) as isize;
        if shift < -half || shift > half {
            return Err(MemoryError::Config(format!(
                "shift {shift} outside kernel range -{half}..={half}"
            )));
        }
        let j = (shift + half) as usize;
        let mut data = vec![0.0f32; batch * size];
        for b in 0..batch {
            data[b * size + j] = 1.0;
        }
        Ok(ShiftKernel { data, batch, size })
    }

    /// Fails if the buffer length disagrees with `batch * size`.
    pub fn check_buffer(&self) -> Result<()> {
        if self.data.len() != self.batch * self.size {
            return Err(MemoryError::ShapeMismatch {
                what: "shift kernel buffer",
                expected: vec![self.batch, self.size],
                actual: vec![self.data.len()],
            });
        }
        Ok(())
    }

    /// Zero-shift kernel.
    pub fn identity(batch: usize, size: usize) -> Result<Self> {
        Self::one_hot(batch, size, 0)
    }

    pub fn row(&self, b: usize) -> &[f32] {
        &self.data[b * self.size..(b + 1) * self.size]
    }
}

fn check_batch_len(what: &'static str, values: &[f32], batch: usize, width: usize) -> Result<()> {
    if values.len() != batch * width {
        return Err(MemoryError::ShapeMismatch {
            what,
            expected: vec![batch, width],
            actual: vec![values.len()],
        });
    }
    Ok(())
}

// ── Content addressing ───────────────────────────────────────────────

/// Cosine-similarity addressing.
///
/// `query`: [B, C] raw query, `strength`: [B] raw (pre-oneplus) key strength.
/// Zero-norm rows are normalised against `eps` and score 0 similarity.
pub fn content_address(query: &[f32], strength: &[f32], memory: &Memory, eps: f32) -> Result<Attention> {
    memory.check_buffer()?;
    let (b_n, a_n, c_n) = (memory.batch, memory.addresses, memory.width);
    check_batch_len("query", query, b_n, c_n)?;
    check_batch_len("strength", strength, b_n, 1)?;

    let mut scores = vec![0.0f32; b_n * a_n];
    let mut q_unit = vec![0.0f32; c_n];
    let mut m_unit = vec![0.0f32; c_n];
    for b in 0..b_n {
        l2_normalize_into(&query[b * c_n..(b + 1) * c_n], &mut q_unit, eps);
        let beta = oneplus_f32(strength[b]);
        for a in 0..a_n {
            l2_normalize_into(memory.row(b, a), &mut m_unit, eps);
            scores[b * a_n + a] = beta * dot_f32(&q_unit, &m_unit);
        }
    }

    let mut data = vec![0.0f32; b_n * a_n];
    softmax_f32(&scores, &mut data, b_n, a_n);
    Ok(Attention { data, batch: b_n, addresses: a_n })
}

// ── Gating ───────────────────────────────────────────────────────────

/// Scalar interpolation gate. `gate`: [B] raw; returns (attention, sigmoid(gate)).
pub fn gate(content: &Attention, previous: &Attention, gate: &[f32]) -> Result<(Attention, Vec<f32>)> {
    content.check_same_shape(previous, "previous attention")?;
    check_batch_len("gate", gate, content.batch, 1)?;

    let a_n = content.addresses;
    let g: Vec<f32> = gate.iter().map(|&x| sigmoid_f32(x)).collect();
    let mut data = vec![0.0f32; content.data.len()];
    for b in 0..content.batch {
        let gb = g[b];
        for a in 0..a_n {
            let i = b * a_n + a;
            data[i] = gb * content.data[i] + (1.0 - gb) * previous.data[i];
        }
    }
    Ok((Attention { data, batch: content.batch, addresses: a_n }, g))
}

/// Three-way selector gate over {previous, content, home (address 0)}.
/// `logits`: [B, 3] raw; returns (attention, softmax(logits)).
pub fn gate_selector(content: &Attention, previous: &Attention, logits: &[f32]) -> Result<(Attention, Vec<f32>)> {
    content.check_same_shape(previous, "previous attention")?;
    check_batch_len("gate logits", logits, content.batch, 3)?;

    let a_n = content.addresses;
    let mut weights = vec![0.0f32; logits.len()];
    softmax_f32(logits, &mut weights, content.batch, 3);
    let mut data = vec![0.0f32; content.data.len()];
    for b in 0..content.batch {
        let (g_prev, g_content, g_home) = (weights[b * 3], weights[b * 3 + 1], weights[b * 3 + 2]);
        for a in 0..a_n {
            let i = b * a_n + a;
            let home = if a == 0 { 1.0 } else { 0.0 };
            data[i] = g_prev * previous.data[i] + g_content * content.data[i] + g_home * home;
        }
    }
    Ok((Attention { data, batch: content.batch, addresses: a_n }, weights))
}

// ── Circular shift ───────────────────────────────────────────────────

/// Extended index table for circular convolution over `addresses` slots with a
/// kernel of odd width `size`: entry p holds address `(p - size/2) mod addresses`,
/// p in 0..addresses + size - 1. Wraps any number of times when size > addresses.
pub fn shift_index_table(addresses: usize, size: usize) -> Vec<usize> {
    if addresses == 0 || size == 0 {
        return Vec::new();
    }
    let half = (size / 2) as isize;
    let a_n = addresses as isize;
    (0..(addresses + size - 1) as isize)
        .map(|p| (p - half).rem_euclid(a_n) as usize)
        .collect()
}

/// Circular convolution of each attention row with its shift kernel row.
///
/// out[i] = sum_j s[j] * w[(i - (j - S/2)) mod A]; with the extended table this
/// is out[i] = sum_j s[j] * w[ext[i + S - 1 - j]].
pub fn shift(attention: &Attention, kernel: &ShiftKernel) -> Result<Attention> {
    if kernel.batch != attention.batch {
        return Err(MemoryError::ShapeMismatch {
            what: "shift kernel batch",
            expected: vec![attention.batch, kernel.size],
            actual: vec![kernel.batch, kernel.size],
        });
    }
    if kernel.size == 0 || kernel.size % 2 == 0 {
        return Err(MemoryError::InvalidShiftSize(kernel.size));
    }
    attention.check_buffer("attention buffer")?;
    kernel.check_buffer()?;

    let (a_n, s_n) = (attention.addresses, kernel.size);
    let ext = shift_index_table(a_n, s_n);
    let mut data = vec![0.0f32; attention.data.len()];
    for b in 0..attention.batch {
        let w = attention.row(b);
        let s = kernel.row(b);
        let out = &mut data[b * a_n..(b + 1) * a_n];
        for i in 0..a_n {
            let mut acc = 0.0f32;
            for j in 0..s_n {
                acc += s[j] * w[ext[i + s_n - 1 - j]];
            }
            out[i] = acc;
        }
    }
    Ok(Attention { data, batch: attention.batch, addresses: a_n })
}

// ── Sharpening ───────────────────────────────────────────────────────

/// Raise each weight to `oneplus(gamma)` and renormalise. `gamma`: [B] raw.
///
/// Weights are divided by the row max before the power so the row sum stays
/// >= 1 and cannot underflow to zero for large exponents.
pub fn sharpen(attention: &Attention, gamma: &[f32], eps: f32) -> Result<Attention> {
    attention.check_buffer("attention buffer")?;
    check_batch_len("gamma", gamma, attention.batch, 1)?;

    let a_n = attention.addresses;
    let mut data = vec![0.0f32; attention.data.len()];
    for b in 0..attention.batch {
        let w = attention.row(b);
        let out = &mut data[b * a_n..(b + 1) * a_n];
        let max_val = w.iter().copied().fold(0.0f32, f32::max);
        if max_val <= 0.0 {
            out.copy_from_slice(w);
            continue;
        }
        let g = oneplus_f32(gamma[b]);
        for a in 0..a_n {
            out[a] = (w[a].max(0.0) / max_val).powf(g);
        }
        l1_normalize_f32(out, eps);
    }
    Ok(Attention { data, batch: attention.batch, addresses: a_n })
}

// ── Full pipeline ────────────────────────────────────────────────────

/// Raw (pre-activation) addressing parameters for one head, batched.
/// `query`/`strength` are `None` when the head does no content addressing.
pub struct AddressingParams<'a> {
    pub query: Option<&'a [f32]>,
    pub strength: Option<&'a [f32]>,
    pub gate: &'a [f32],
    /// Softmax-normalised shift kernel.
    pub shift: ShiftKernel,
    pub gamma: &'a [f32],
}

/// Result of one pass through the pipeline.
pub struct Addressed {
    pub attention: Attention,
    /// Content-addressing output before gating (previous attention if disabled).
    pub content: Attention,
    /// Activated gate value(s): [B] for interpolate, [B, 3] for selector.
    pub gate: Vec<f32>,
    pub shift: ShiftKernel,
}

/// content_address → gate → shift → sharpen.
pub fn address(
    params: AddressingParams<'_>,
    memory: &Memory,
    previous: &Attention,
    gate_mode: GateMode,
    eps: f32,
) -> Result<Addressed> {
    if previous.batch != memory.batch || previous.addresses != memory.addresses {
        return Err(MemoryError::ShapeMismatch {
            what: "previous attention vs memory",
            expected: vec![memory.batch, memory.addresses],
            actual: vec![previous.batch, previous.addresses],
        });
    }

    let content = match (params.query, params.strength) {
        (Some(q), Some(beta)) => content_address(q, beta, memory, eps)?,
        _ => previous.clone(),
    };

    let (gated, gate_values) = match gate_mode {
        GateMode::Interpolate => gate(&content, previous, params.gate)?,
        GateMode::Selector => gate_selector(&content, previous, params.gate)?,
    };

    let shifted = shift(&gated, &params.shift)?;
    let attention = sharpen(&shifted, params.gamma, eps)?;

    Ok(Addressed { attention, content, gate: gate_values, shift: params.shift })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_distribution(w: &Attention) {
        for b in 0..w.batch {
            let sum: f32 = w.row(b).iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "row {b} sums to {sum}");
            assert!(w.row(b).iter().all(|&x| x >= -1e-5), "negative entry in {:?}", w.row(b));
        }
    }

    #[test]
    fn test_index_table_symmetric() {
        // A=5, S=3: addresses -1..=5 wrapped
        assert_eq!(shift_index_table(5, 3), vec![4, 0, 1, 2, 3, 4, 0]);
        // S=1: plain identity table
        assert_eq!(shift_index_table(4, 1), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_index_table_kernel_wider_than_memory() {
        // A=2, S=5: p - 2 for p in 0..6 → -2,-1,0,1,2,3
        assert_eq!(shift_index_table(2, 5), vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_shift_plus_one_moves_forward_and_wraps() {
        let w = Attention::one_hot(1, 4, 3).unwrap();
        let k = ShiftKernel::one_hot(1, 3, 1).unwrap();
        let out = shift(&w, &k).unwrap();
        assert_eq!(out.data, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_shift_minus_one_wraps_backwards() {
        let w = Attention::one_hot(1, 4, 0).unwrap();
        let k = ShiftKernel::one_hot(1, 3, -1).unwrap();
        let out = shift(&w, &k).unwrap();
        assert_eq!(out.data, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_shift_width_one_is_identity() {
        let w = Attention::from_vec(vec![0.1, 0.2, 0.3, 0.4], 1, 4).unwrap();
        let k = ShiftKernel::identity(1, 1).unwrap();
        assert_eq!(shift(&w, &k).unwrap(), w);
    }

    #[test]
    fn test_shift_soft_kernel_spreads_mass() {
        let w = Attention::one_hot(1, 5, 2).unwrap();
        let k = ShiftKernel { data: vec![0.25, 0.5, 0.25], batch: 1, size: 3 };
        let out = shift(&w, &k).unwrap();
        assert_eq!(out.data, vec![0.0, 0.25, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_shift_by_two_with_wide_kernel() {
        let w = Attention::one_hot(1, 3, 2).unwrap();
        let k = ShiftKernel::one_hot(1, 5, 2).unwrap();
        let out = shift(&w, &k).unwrap();
        // (2 + 2) mod 3 = 1
        assert_eq!(out.argmax(0), 1);
        assert_distribution(&out);
    }

    #[test]
    fn test_content_address_prefers_matching_row() {
        let mem = Memory::new(1, 3, 2, 0.0)
            .with_row(0, 0, &[1.0, 0.0]).unwrap()
            .with_row(0, 1, &[0.0, 1.0]).unwrap()
            .with_row(0, 2, &[-1.0, 0.0]).unwrap();
        let w = content_address(&[0.0, 2.0], &[5.0], &mem, 1e-8).unwrap();
        assert_distribution(&w);
        assert_eq!(w.argmax(0), 1);
    }

    #[test]
    fn test_content_address_zero_memory_is_uniform() {
        let mem = Memory::new(2, 4, 3, 0.0);
        let w = content_address(&[1.0, -2.0, 0.5, 0.0, 0.0, 0.0], &[1.0, 1.0], &mem, 1e-8).unwrap();
        assert!(w.data.iter().all(|x| x.is_finite()));
        for &x in &w.data {
            assert!((x - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stronger_key_is_sharper() {
        let mem = Memory::new(1, 2, 2, 0.0)
            .with_row(0, 0, &[1.0, 0.0]).unwrap()
            .with_row(0, 1, &[0.0, 1.0]).unwrap();
        let weak = content_address(&[1.0, 0.0], &[-10.0], &mem, 1e-8).unwrap();
        let strong = content_address(&[1.0, 0.0], &[10.0], &mem, 1e-8).unwrap();
        assert!(strong.data[0] > weak.data[0]);
    }

    #[test]
    fn test_gate_half_blends() {
        let c = Attention::one_hot(1, 2, 0).unwrap();
        let p = Attention::one_hot(1, 2, 1).unwrap();
        let (w, g) = gate(&c, &p, &[0.0]).unwrap();
        assert!((g[0] - 0.5).abs() < 1e-6);
        assert!((w.data[0] - 0.5).abs() < 1e-6);
        assert!((w.data[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_selector_home_channel() {
        let c = Attention::one_hot(1, 3, 1).unwrap();
        let p = Attention::one_hot(1, 3, 2).unwrap();
        let (w, g) = gate_selector(&c, &p, &[-50.0, -50.0, 50.0]).unwrap();
        assert!((g[2] - 1.0).abs() < 1e-6);
        assert!((w.data[0] - 1.0).abs() < 1e-6);
        assert_distribution(&w);
    }

    #[test]
    fn test_sharpen_concentrates() {
        let w = Attention::from_vec(vec![0.1, 0.6, 0.3], 1, 3).unwrap();
        let s = sharpen(&w, &[3.0], 1e-8).unwrap();
        assert_distribution(&s);
        assert!(s.data[1] > w.data[1]);
        assert!(s.data[0] < w.data[0]);
    }

    #[test]
    fn test_sharpen_huge_gamma_no_underflow() {
        let w = Attention::from_vec(vec![0.01, 0.02, 0.97], 1, 3).unwrap();
        let s = sharpen(&w, &[1e4], 1e-8).unwrap();
        assert_distribution(&s);
        assert!((s.data[2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_sharpen_keeps_uniform() {
        let w = Attention::from_vec(vec![0.25; 4], 1, 4).unwrap();
        let s = sharpen(&w, &[2.0], 1e-8).unwrap();
        for &x in &s.data {
            assert!((x - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_kernel_validation() {
        assert!(matches!(ShiftKernel::from_logits(&[0.0; 4], 1, 4), Err(MemoryError::InvalidShiftSize(4))));
        assert!(ShiftKernel::one_hot(1, 3, 2).is_err());
        let k = ShiftKernel::from_logits(&[0.0, 1.0, 2.0], 1, 3).unwrap();
        assert!((k.data.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_address_pipeline_without_content() {
        let mem = Memory::new(1, 4, 2, 0.0);
        let prev = Attention::one_hot(1, 4, 1).unwrap();
        let params = AddressingParams {
            query: None,
            strength: None,
            gate: &[0.0],
            shift: ShiftKernel::one_hot(1, 3, 1).unwrap(),
            gamma: &[0.0],
        };
        let out = address(params, &mem, &prev, GateMode::Interpolate, 1e-8).unwrap();
        assert_eq!(out.content, prev);
        assert_eq!(out.attention.argmax(0), 2);
        assert_distribution(&out.attention);
    }

    #[test]
    fn test_one_hot_out_of_range() {
        let err = Attention::one_hot(1, 4, 7).unwrap_err();
        assert!(matches!(err, MemoryError::IndexOutOfRange { index: 7, bound: 4, .. }), "{err}");
        assert!(Attention::one_hot(2, 0, 0).is_err());
    }

    #[test]
    fn test_buffer_length_disagreeing_with_shape_rejected() {
        let good = Attention::one_hot(1, 4, 0).unwrap();
        let short = Attention { data: vec![1.0], batch: 1, addresses: 4 };
        assert!(matches!(gate(&good, &short, &[0.0]), Err(MemoryError::ShapeMismatch { .. })));
        assert!(matches!(gate_selector(&short, &good, &[0.0; 3]), Err(MemoryError::ShapeMismatch { .. })));
        assert!(matches!(sharpen(&short, &[1.0], 1e-8), Err(MemoryError::ShapeMismatch { .. })));

        let k = ShiftKernel { data: vec![1.0], batch: 1, size: 3 };
        assert!(matches!(shift(&good, &k), Err(MemoryError::ShapeMismatch { .. })));
        assert!(matches!(shift(&short, &ShiftKernel::identity(1, 3).unwrap()), Err(MemoryError::ShapeMismatch { .. })));

        let mut mem = Memory::new(1, 4, 2, 0.0);
        mem.data.pop();
        assert!(matches!(content_address(&[1.0, 0.0], &[0.0], &mem, 1e-8), Err(MemoryError::ShapeMismatch { .. })));
    }
}
