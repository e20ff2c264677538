/// Per-head and per-interface state carried from step t to step t+1.
///
/// Plain immutable values: each step builds a new `InterfaceState` from the
/// previous one; nothing is shared between heads, steps or sequences.

use serde::{Serialize, Deserialize};

use crate::addressing::{Attention, ShiftKernel};
use crate::config::GateMode;
use crate::error::{MemoryError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadState {
    /// Final attention after sharpening, [batch, addresses].
    pub attention: Attention,
    /// Activated gate value(s): [batch] (interpolate) or [batch, 3] (selector).
    pub gate: Vec<f32>,
    /// Shift kernel applied this step, [batch, shift_size].
    pub shift: ShiftKernel,
}

impl HeadState {
    /// Hard attention on address 0, gate selecting the previous attention,
    /// zero-shift kernel.
    pub fn initial(batch: usize, addresses: usize, gate_mode: GateMode, shift_size: usize) -> Result<Self> {
        if addresses == 0 {
            return Err(MemoryError::InvalidDimension { name: "num_addresses" });
        }
        let gate = match gate_mode {
            GateMode::Interpolate => vec![0.0f32; batch],
            GateMode::Selector => {
                let mut g = vec![0.0f32; batch * 3];
                for b in 0..batch {
                    g[b * 3] = 1.0;
                }
                g
            }
        };
        Ok(HeadState {
            attention: Attention::one_hot(batch, addresses, 0)?,
            gate,
            shift: ShiftKernel::identity(batch, shift_size)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterfaceState {
    pub read_heads: Vec<HeadState>,
    pub write_heads: Vec<HeadState>,
}

impl InterfaceState {
    pub fn batch(&self) -> usize {
        self.read_heads.first().map(|h| h.attention.batch).unwrap_or(0)
    }

    pub fn read_attentions(&self) -> Vec<&Attention> {
        self.read_heads.iter().map(|h| &h.attention).collect()
    }

    pub fn write_attentions(&self) -> Vec<&Attention> {
        self.write_heads.iter().map(|h| &h.attention).collect()
    }
}
